//! Middleware wrapped around the request handler

pub mod access_log;

pub use access_log::{AccessLog, AccessLogRecord};

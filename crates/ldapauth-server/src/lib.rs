//! HTTP front end of the k8s-ldap-auth webhook
//!
//! Requests go through the access log, which observes the response through
//! a [`ProxyResponseWriter`], before reaching the authentication
//! [`Handler`].

pub mod handler;
pub mod middleware;
pub mod response;
pub mod server;
pub mod sink;

pub use handler::{Handler, NotConfigured};
pub use middleware::{AccessLog, AccessLogRecord};
pub use response::{CapturedResponseState, HttpResponseWriter, ProxyResponseWriter, ResponseWriter};
pub use server::{initialize, Server};
pub use sink::{JsonLinesSink, LogSink, MemorySink, SinkError, TracingSink};

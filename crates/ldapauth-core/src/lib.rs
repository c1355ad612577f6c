//! k8s-ldap-auth Core Library
//!
//! Configuration and error types shared by the webhook server and its
//! command-line entry point.

pub mod config;
pub mod error;

pub use config::{ConfigBuilder, DirectoryQuery, SearchScope, ServerConfiguration};
pub use error::{Error, Result};

/// k8s-ldap-auth version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

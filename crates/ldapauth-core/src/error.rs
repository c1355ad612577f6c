//! Error types for k8s-ldap-auth

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A required setting is missing or malformed. Raised before any
    /// socket is opened and never retried.
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to read secret file {path}: {source}")]
    SecretFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The listening socket could not be bound.
    #[error("Failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The server stopped with an error after it started serving.
    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Whether the error happened before the server started listening.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::SecretFile { .. } | Error::Bind { .. }
        )
    }
}

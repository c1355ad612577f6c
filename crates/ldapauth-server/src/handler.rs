//! Request handler boundary
//!
//! Everything below the access log is a [`Handler`]: it receives the request
//! and answers through a [`ResponseWriter`]. Credential validation against
//! the directory plugs in here.

use async_trait::async_trait;
use axum::extract::Request;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use crate::response::ResponseWriter;

#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn serve(&self, req: Request, res: &mut dyn ResponseWriter);
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for std::sync::Arc<H> {
    async fn serve(&self, req: Request, res: &mut dyn ResponseWriter) {
        (**self).serve(req, res).await
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

/// Answers every request with `501 Not Implemented`.
///
/// Mounted when no authenticator is wired in, so the server still starts,
/// logs traffic and tells clients why they are turned away.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotConfigured;

#[async_trait]
impl Handler for NotConfigured {
    async fn serve(&self, req: Request, res: &mut dyn ResponseWriter) {
        debug!(method = %req.method(), uri = %req.uri(), "No authenticator configured");

        let body = match serde_json::to_vec(&ErrorBody {
            error: "no authenticator is configured on this server",
        }) {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to encode error body: {}", e);
                Vec::new()
            }
        };

        res.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        res.write_status(StatusCode::NOT_IMPLEMENTED);
        if let Err(e) = res.write_all(&body) {
            debug!("Failed to write response body: {}", e);
        }
    }
}

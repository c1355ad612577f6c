//! Access log middleware
//!
//! Emits one record per request in the spirit of the Apache access log
//! (<https://httpd.apache.org/docs/2.4/logs.html>). The `%l` (remote logname)
//! and `%u` (remote user) fields are not part of the record: the first is
//! obsolete, the second is unknown at this layer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::{ConnectInfo, Request};
use http::header::{REFERER, USER_AGENT};
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::handler::Handler;
use crate::response::{CapturedResponseState, ProxyResponseWriter, ResponseWriter};
use crate::sink::LogSink;

/// One access log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogRecord {
    /// `ip:port` of the peer, empty when unknown
    #[serde(rename = "remoteaddr")]
    pub remote_addr: String,
    pub method: String,
    /// Request target including the query string
    pub url: String,
    pub proto: String,
    pub code: u16,
    pub length: u64,
    pub referer: String,
    #[serde(rename = "useragent")]
    pub user_agent: String,
    /// Handler execution time in microseconds
    pub elapsed: u64,
}

/// Request fields captured before the request is handed over.
#[derive(Debug, Clone)]
struct RequestLine {
    remote_addr: String,
    method: String,
    url: String,
    proto: String,
    referer: String,
    user_agent: String,
}

impl RequestLine {
    fn from_request(req: &Request) -> Self {
        let remote_addr = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string())
            .unwrap_or_default();

        Self {
            remote_addr,
            method: req.method().to_string(),
            url: req.uri().to_string(),
            proto: format!("{:?}", req.version()),
            referer: header_or_empty(req.headers(), REFERER),
            user_agent: header_or_empty(req.headers(), USER_AGENT),
        }
    }

    fn into_record(self, state: CapturedResponseState, elapsed: Duration) -> AccessLogRecord {
        AccessLogRecord {
            remote_addr: self.remote_addr,
            method: self.method,
            url: self.url,
            proto: self.proto,
            code: state.status.as_u16(),
            length: state.bytes_written,
            referer: self.referer,
            user_agent: self.user_agent,
            elapsed: u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
        }
    }
}

fn header_or_empty(headers: &HeaderMap, name: http::header::HeaderName) -> String {
    headers
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default()
}

/// Wraps a handler, observes its response and logs the outcome once it
/// returns.
pub struct AccessLog<H> {
    next: H,
    sink: Arc<dyn LogSink>,
}

impl<H: Handler> AccessLog<H> {
    pub fn new(next: H, sink: Arc<dyn LogSink>) -> Self {
        Self { next, sink }
    }
}

#[async_trait]
impl<H: Handler> Handler for AccessLog<H> {
    async fn serve(&self, req: Request, res: &mut dyn ResponseWriter) {
        let line = RequestLine::from_request(&req);
        let mut wrapper = ProxyResponseWriter::new(res);

        let received = Instant::now();
        self.next.serve(req, &mut wrapper).await;
        let elapsed = received.elapsed();

        let record = line.into_record(wrapper.state(), elapsed);
        if let Err(e) = self.sink.emit(&record) {
            warn!(
                method = %record.method,
                url = %record.url,
                "Failed to emit access log record: {}",
                e
            );
        }
    }
}

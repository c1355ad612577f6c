//! Response channel handed to request handlers
//!
//! Handlers stream their answer through a [`ResponseWriter`]: headers, an
//! optional status and body bytes. [`ProxyResponseWriter`] decorates any
//! writer to observe the final status and the number of bytes accepted, which
//! the plain channel does not expose.

use std::io;

use axum::body::Body;
use axum::response::Response;
use bytes::BytesMut;
use http::{HeaderMap, StatusCode};
use tracing::warn;

/// Outbound side of a single HTTP exchange.
pub trait ResponseWriter: Send {
    /// Headers sent with the response.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Append body bytes. Returns how many bytes were accepted, which may be
    /// less than `buf.len()`.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Set the response status.
    fn write_status(&mut self, status: StatusCode);

    /// Write the whole buffer, retrying on short writes.
    fn write_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write(buf) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write whole response body",
                    ))
                }
                Ok(n) => buf = &buf[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

// ============================================================================
// HTTP channel
// ============================================================================

/// Response channel backing the server.
///
/// The head is committed by the first `write_status`, or implicitly with
/// `200 OK` by the first `write`. Later status changes are ignored and header
/// changes made after the commit are not sent.
#[derive(Debug, Default)]
pub struct HttpResponseWriter {
    headers: HeaderMap,
    head: Option<(StatusCode, HeaderMap)>,
    body: BytesMut,
}

impl HttpResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status that will be sent, if the head has been committed.
    pub fn committed_status(&self) -> Option<StatusCode> {
        self.head.as_ref().map(|(status, _)| *status)
    }

    fn commit(&mut self, status: StatusCode) {
        self.head = Some((status, self.headers.clone()));
    }

    pub fn into_response(self) -> Response {
        let (status, headers) = match self.head {
            Some(head) => head,
            None => (StatusCode::OK, self.headers),
        };

        let mut response = Response::new(Body::from(self.body.freeze()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

impl ResponseWriter for HttpResponseWriter {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.head.is_none() {
            self.commit(StatusCode::OK);
        }
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn write_status(&mut self, status: StatusCode) {
        if let Some(sent) = self.committed_status() {
            warn!(sent = %sent, ignored = %status, "Superfluous write_status call");
            return;
        }
        self.commit(status);
    }
}

// ============================================================================
// Observation decorator
// ============================================================================

/// What a [`ProxyResponseWriter`] observed for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturedResponseState {
    /// Last status given to the writer, `200` when none was set.
    pub status: StatusCode,
    /// Bytes accepted by the wrapped writer.
    pub bytes_written: u64,
}

impl Default for CapturedResponseState {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            bytes_written: 0,
        }
    }
}

/// Forwards every call to the wrapped writer unchanged and keeps track of
/// the response status and size.
///
/// The recorded status is the last one given, even though the wrapped
/// channel may only honour the first.
pub struct ProxyResponseWriter<'a> {
    state: CapturedResponseState,
    parent: &'a mut dyn ResponseWriter,
}

impl<'a> ProxyResponseWriter<'a> {
    pub fn new(parent: &'a mut dyn ResponseWriter) -> Self {
        Self {
            state: CapturedResponseState::default(),
            parent,
        }
    }

    pub fn state(&self) -> CapturedResponseState {
        self.state
    }
}

impl ResponseWriter for ProxyResponseWriter<'_> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.parent.headers_mut()
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.parent.write(buf)?;
        self.state.bytes_written += written as u64;
        Ok(written)
    }

    fn write_status(&mut self, status: StatusCode) {
        self.state.status = status;
        self.parent.write_status(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;
    use http::HeaderValue;

    /// Accepts at most `limit` bytes per call and fails once `fail_after`
    /// calls have been made.
    struct ShortWriter {
        headers: HeaderMap,
        limit: usize,
        calls: usize,
        fail_after: Option<usize>,
        accepted: Vec<u8>,
        statuses: Vec<StatusCode>,
    }

    impl ShortWriter {
        fn new(limit: usize) -> Self {
            Self {
                headers: HeaderMap::new(),
                limit,
                calls: 0,
                fail_after: None,
                accepted: Vec::new(),
                statuses: Vec::new(),
            }
        }
    }

    impl ResponseWriter for ShortWriter {
        fn headers_mut(&mut self) -> &mut HeaderMap {
            &mut self.headers
        }

        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.calls += 1;
            if self.fail_after.is_some_and(|n| self.calls > n) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "client went away"));
            }
            let n = buf.len().min(self.limit);
            self.accepted.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn write_status(&mut self, status: StatusCode) {
            self.statuses.push(status);
        }
    }

    #[test]
    fn test_defaults_without_any_call() {
        let mut inner = HttpResponseWriter::new();
        let proxy = ProxyResponseWriter::new(&mut inner);

        assert_eq!(proxy.state().status, StatusCode::OK);
        assert_eq!(proxy.state().bytes_written, 0);
    }

    #[test]
    fn test_counts_bytes_accepted_not_requested() {
        let mut inner = ShortWriter::new(4);
        let mut proxy = ProxyResponseWriter::new(&mut inner);

        assert_eq!(proxy.write(b"hello world").unwrap(), 4);
        assert_eq!(proxy.write(b"abc").unwrap(), 3);
        assert_eq!(proxy.write(b"").unwrap(), 0);
        assert_eq!(proxy.state().bytes_written, 7);

        drop(proxy);
        assert_eq!(inner.accepted, b"hellabc");
    }

    #[test]
    fn test_write_all_through_short_writes() {
        let mut inner = ShortWriter::new(3);
        let mut proxy = ProxyResponseWriter::new(&mut inner);

        proxy.write_all(b"0123456789").unwrap();
        assert_eq!(proxy.state().bytes_written, 10);

        drop(proxy);
        assert_eq!(inner.accepted, b"0123456789");
        assert_eq!(inner.calls, 4);
    }

    #[test]
    fn test_errors_propagate_unchanged() {
        let mut inner = ShortWriter::new(16);
        inner.fail_after = Some(1);
        let mut proxy = ProxyResponseWriter::new(&mut inner);

        assert_eq!(proxy.write(b"first").unwrap(), 5);
        let err = proxy.write(b"second").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(err.to_string(), "client went away");
        assert_eq!(proxy.state().bytes_written, 5);
    }

    #[test]
    fn test_status_last_call_wins_and_is_forwarded() {
        let mut inner = ShortWriter::new(16);
        let mut proxy = ProxyResponseWriter::new(&mut inner);

        proxy.write_status(StatusCode::UNAUTHORIZED);
        proxy.write_status(StatusCode::FORBIDDEN);
        assert_eq!(proxy.state().status, StatusCode::FORBIDDEN);

        drop(proxy);
        assert_eq!(
            inner.statuses,
            vec![StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN]
        );
    }

    #[test]
    fn test_headers_pass_through() {
        let mut inner = HttpResponseWriter::new();
        let mut proxy = ProxyResponseWriter::new(&mut inner);

        proxy
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        drop(proxy);
        assert_eq!(
            inner.headers_mut().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_http_writer_first_status_is_sent() {
        let mut writer = HttpResponseWriter::new();
        writer.write_status(StatusCode::NO_CONTENT);
        writer.write_status(StatusCode::INTERNAL_SERVER_ERROR);

        assert_eq!(writer.committed_status(), Some(StatusCode::NO_CONTENT));
        assert_eq!(writer.into_response().status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn test_http_writer_write_commits_ok() {
        let mut writer = HttpResponseWriter::new();
        writer.write_all(b"payload").unwrap();
        writer.write_status(StatusCode::NOT_FOUND);

        assert_eq!(writer.into_response().status(), StatusCode::OK);
    }

    #[test]
    fn test_http_writer_headers_frozen_at_commit() {
        let mut writer = HttpResponseWriter::new();
        writer
            .headers_mut()
            .insert("x-before", HeaderValue::from_static("1"));
        writer.write_status(StatusCode::ACCEPTED);
        writer
            .headers_mut()
            .insert("x-after", HeaderValue::from_static("1"));

        let response = writer.into_response();
        assert!(response.headers().contains_key("x-before"));
        assert!(!response.headers().contains_key("x-after"));
    }

    #[tokio::test]
    async fn test_http_writer_body() {
        let mut writer = HttpResponseWriter::new();
        writer.write_all(b"hello ").unwrap();
        writer.write_all(b"world").unwrap();

        let response = writer.into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"hello world");
    }
}

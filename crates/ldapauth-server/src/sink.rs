//! Access log sinks
//!
//! The sink is handed to the server at construction time. It is shared by
//! every request, so implementations must accept concurrent calls and keep
//! each record in one piece.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::info;

use crate::middleware::AccessLogRecord;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to write access log record: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode access log record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination of access log records.
pub trait LogSink: Send + Sync {
    fn emit(&self, record: &AccessLogRecord) -> Result<(), SinkError>;
}

/// Sends each record as one `tracing` event with target `access_log`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, record: &AccessLogRecord) -> Result<(), SinkError> {
        info!(
            target: "access_log",
            remoteaddr = %record.remote_addr,
            method = %record.method,
            url = %record.url,
            proto = %record.proto,
            code = record.code,
            length = record.length,
            referer = %record.referer,
            useragent = %record.user_agent,
            elapsed = record.elapsed,
            "access"
        );
        Ok(())
    }
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl JsonLinesSink<File> {
    /// Append to `path`, creating it if needed.
    pub fn append(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(file))
    }
}

impl<W: Write + Send> LogSink for JsonLinesSink<W> {
    fn emit(&self, record: &AccessLogRecord) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut writer = self.writer.lock();
        writer.write_all(&line)?;
        writer.flush()?;
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<AccessLogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AccessLogRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl LogSink for MemorySink {
    fn emit(&self, record: &AccessLogRecord) -> Result<(), SinkError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

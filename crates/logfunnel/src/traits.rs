//! Traits for record sinks.
//!
//! This module provides:
//! - [`RecordHandler`] — A synchronous destination for formatted records
//! - [`RecordSink`] — An async destination for whole records, used by front-ends
//! - [`StreamHandler`] — A handler writing to any [`Write`] (stdout for the console)
//! - [`MemoryHandler`] — A handler keeping formatted lines in memory
//! - [`MemorySink`] — A sink keeping whole records in memory

use std::future::Future;
use std::io::{self, Stdout, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::types::{LogLevel, LogRecord};

/// A destination for formatted records.
///
/// Implementors guard their own state; `handle` may be called from many
/// connection tasks at once.
pub trait RecordHandler: Send + Sync {
    /// Writes one formatted record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be written.
    fn handle(&self, record: &LogRecord, formatted: &str) -> Result<()>;

    /// Minimum level this handler accepts.
    fn min_level(&self) -> LogLevel {
        LogLevel::Debug
    }

    /// Returns true if this handler accepts records of the given level.
    fn accepts(&self, level: LogLevel) -> bool {
        level.is_at_least(self.min_level())
    }

    /// Flushes buffered output.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing fails.
    fn flush(&self) -> Result<()>;

    /// Flushes and releases underlying resources.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing fails.
    fn close(&self) -> Result<()> {
        self.flush()
    }
}

/// An async destination for records delivered by an ingestion front-end.
pub trait RecordSink: Send + Sync {
    /// Delivers one record.
    fn submit(&self, record: LogRecord) -> impl Future<Output = Result<()>> + Send;
}

impl<S: RecordSink> RecordSink for Arc<S> {
    fn submit(&self, record: LogRecord) -> impl Future<Output = Result<()>> + Send {
        S::submit(self, record)
    }
}

/// Writes formatted records to a stream, one per line.
pub struct StreamHandler<W: Write + Send> {
    writer: Mutex<W>,
    min_level: LogLevel,
}

impl StreamHandler<Stdout> {
    /// Creates a console handler writing to stdout.
    #[must_use]
    pub fn stdout(min_level: LogLevel) -> Self {
        Self::new(io::stdout(), min_level)
    }
}

impl<W: Write + Send> StreamHandler<W> {
    /// Creates a handler writing to the given stream.
    #[must_use]
    pub fn new(writer: W, min_level: LogLevel) -> Self {
        Self {
            writer: Mutex::new(writer),
            min_level,
        }
    }

    /// Consumes the handler and returns the stream.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> RecordHandler for StreamHandler<W> {
    fn handle(&self, _record: &LogRecord, formatted: &str) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.write_all(formatted.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        self.min_level
    }

    fn flush(&self) -> Result<()> {
        self.writer.lock().flush()?;
        Ok(())
    }
}

/// Keeps formatted lines in memory.
#[derive(Debug, Default)]
pub struct MemoryHandler {
    lines: Mutex<Vec<String>>,
    min_level: Option<LogLevel>,
}

impl MemoryHandler {
    /// Creates a handler accepting every level.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handler accepting records at or above `level`.
    #[must_use]
    pub fn with_min_level(level: LogLevel) -> Self {
        Self {
            lines: Mutex::new(Vec::new()),
            min_level: Some(level),
        }
    }

    /// Returns a copy of the lines written so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Returns the number of lines written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    /// Returns true if nothing was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordHandler for MemoryHandler {
    fn handle(&self, _record: &LogRecord, formatted: &str) -> Result<()> {
        self.lines.lock().push(formatted.to_string());
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        self.min_level.unwrap_or(LogLevel::Debug)
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Keeps submitted records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the records submitted so far.
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Returns the messages of the records submitted so far.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.records.lock().iter().map(|r| r.message.clone()).collect()
    }
}

impl RecordSink for MemorySink {
    async fn submit(&self, record: LogRecord) -> Result<()> {
        self.records.lock().push(record);
        Ok(())
    }
}

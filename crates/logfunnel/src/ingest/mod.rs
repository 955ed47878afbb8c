//! Ingestion front-ends.
//!
//! This module provides:
//! - [`queue`] — In-process queue with a shutdown sentinel
//! - [`tcp`] — Concurrent TCP server reading length-prefixed frames
//! - [`pipe`] — Newline-delimited records from a subprocess or tunnel, with control tokens
//!
//! Every front-end hands records to a [`RecordSink`] and stamps host and IP
//! when the producer left them empty. A bad record or connection is logged
//! and dropped; the front-end keeps serving. A pipe whose sink refuses a
//! record ends, since later records would be lost the same way.

pub mod pipe;
pub mod queue;
pub mod tcp;

use tracing::warn;

use crate::traits::RecordSink;
use crate::types::LogRecord;

/// Counters reported when a front-end loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Records handed to the sink.
    pub delivered: u64,
    /// Messages that could not be decoded or delivered.
    pub dropped: u64,
}

impl IngestStats {
    fn record(&mut self, delivered: bool) {
        if delivered {
            self.delivered += 1;
        } else {
            self.dropped += 1;
        }
    }
}

/// Stamps provenance and submits one record, logging a failed delivery.
async fn deliver<S: RecordSink>(sink: &S, mut record: LogRecord, source: &str) -> bool {
    record.stamp_host();
    match sink.submit(record).await {
        Ok(()) => true,
        Err(e) => {
            warn!(source = %source, error = %e, "failed to deliver record");
            false
        }
    }
}

//! In-process queue front-end.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{IngestStats, deliver};
use crate::error::{FunnelError, Result};
use crate::traits::RecordSink;
use crate::types::LogRecord;

/// A message carried by the record queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueMessage {
    /// A record to route.
    Record(Box<LogRecord>),
    /// Sentinel asking the consumer to stop.
    Shutdown,
}

/// Sending half of the record queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct QueueProducer {
    tx: mpsc::UnboundedSender<QueueMessage>,
}

/// Receiving half of the record queue.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<QueueMessage>,
}

/// Creates a connected queue producer and receiver.
#[must_use]
pub fn record_queue() -> (QueueProducer, QueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueProducer { tx }, QueueReceiver { rx })
}

impl QueueProducer {
    /// Enqueues a record without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`FunnelError::ChannelClosed`] if the receiver is gone.
    pub fn send(&self, record: LogRecord) -> Result<()> {
        self.tx
            .send(QueueMessage::Record(Box::new(record)))
            .map_err(|_| FunnelError::ChannelClosed)
    }

    /// Enqueues the shutdown sentinel.
    pub fn shutdown(&self) -> Result<()> {
        self.tx
            .send(QueueMessage::Shutdown)
            .map_err(|_| FunnelError::ChannelClosed)
    }

    /// Returns true if the receiver has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl RecordSink for QueueProducer {
    async fn submit(&self, record: LogRecord) -> Result<()> {
        self.send(record)
    }
}

impl QueueReceiver {
    /// Consumes records until the sentinel, a closed queue, or cancellation.
    ///
    /// On cancellation, messages already queued are drained first.
    pub async fn serve<S: RecordSink>(mut self, sink: &S, cancel: CancellationToken) -> IngestStats {
        let mut stats = IngestStats::default();
        loop {
            let message = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.drain(sink, &mut stats).await;
                    debug!(delivered = stats.delivered, "queue consumer cancelled");
                    break;
                }
                message = self.rx.recv() => message,
            };
            match message {
                Some(QueueMessage::Record(record)) => {
                    stats.record(deliver(sink, *record, "queue").await);
                }
                Some(QueueMessage::Shutdown) => {
                    debug!(delivered = stats.delivered, "queue consumer received shutdown");
                    break;
                }
                None => {
                    debug!(delivered = stats.delivered, "queue closed");
                    break;
                }
            }
        }
        stats
    }

    async fn drain<S: RecordSink>(&mut self, sink: &S, stats: &mut IngestStats) {
        while let Ok(message) = self.rx.try_recv() {
            match message {
                QueueMessage::Record(record) => stats.record(deliver(sink, *record, "queue").await),
                QueueMessage::Shutdown => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MemorySink;
    use crate::types::LogLevel;

    fn record(message: &str) -> LogRecord {
        LogRecord::builder()
            .logger_name("svc.q")
            .level(LogLevel::Info)
            .message(message)
            .build()
            .expect("build record")
    }

    #[tokio::test]
    async fn stops_on_sentinel_in_order() {
        let (producer, receiver) = record_queue();
        let sink = MemorySink::new();
        producer.send(record("one")).expect("send");
        producer.send(record("two")).expect("send");
        producer.shutdown().expect("shutdown");
        producer.send(record("after")).expect("send");

        let stats = receiver.serve(&sink, CancellationToken::new()).await;
        assert_eq!(stats.delivered, 2);
        assert_eq!(sink.messages(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn stops_when_all_producers_drop() {
        let (producer, receiver) = record_queue();
        let sink = MemorySink::new();
        producer.send(record("only")).expect("send");
        drop(producer);

        let stats = receiver.serve(&sink, CancellationToken::new()).await;
        assert_eq!(stats.delivered, 1);
    }

    #[tokio::test]
    async fn cancellation_drains_queued_records() {
        let (producer, receiver) = record_queue();
        let sink = MemorySink::new();
        for i in 0..5 {
            producer.send(record(&format!("r{i}"))).expect("send");
        }
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stats = receiver.serve(&sink, cancel).await;
        assert_eq!(stats.delivered, 5);
        assert_eq!(sink.messages(), vec!["r0", "r1", "r2", "r3", "r4"]);
    }

    #[tokio::test]
    async fn stamps_host_on_ingestion() {
        let (producer, receiver) = record_queue();
        let sink = MemorySink::new();
        producer.send(record("x")).expect("send");
        producer.shutdown().expect("shutdown");
        receiver.serve(&sink, CancellationToken::new()).await;
        assert!(sink.records().iter().all(|r| !r.host.is_empty()));
    }

    #[tokio::test]
    async fn send_after_receiver_drop_fails() {
        let (producer, receiver) = record_queue();
        drop(receiver);
        assert!(matches!(producer.send(record("x")), Err(FunnelError::ChannelClosed)));
    }
}

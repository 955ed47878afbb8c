//! # logfunnel
//!
//! Multi-process log aggregation into per-logger rotating files.
//!
//! This crate provides:
//!
//! - [`LogRecord`] — Explicit record schema shared by every transport
//! - [`RotatingFileHandler`] — Appends to one file with size and time rotation
//! - [`Router`] — Maps records onto per-key handlers, optionally by hierarchy
//! - [`LevelFormatter`] — Per-level line templates
//! - [`QueueReceiver`], [`TcpFrontEnd`], [`serve_pipe`] — Ingestion front-ends
//! - [`Aggregator`] — Worker lifecycle with readiness and shutdown handshakes
//! - [`TcpProducer`], [`PipeProducer`], [`Emitter`] — Producer-side senders
//!
//! ## Example
//!
//! ```rust,no_run
//! use logfunnel::{Aggregator, LogLevel, LogRecord, LoggerInfo};
//!
//! let info = LoggerInfo::new("svc").with_logdir("/var/log/svc");
//! let mut aggregator = Aggregator::new(info);
//! aggregator.start()?;
//!
//! if let Some(queue) = aggregator.queue_producer() {
//!     let record = LogRecord::builder()
//!         .logger_name("svc.worker")
//!         .level(LogLevel::Info)
//!         .message("started")
//!         .build()?;
//!     queue.send(record)?;
//! }
//!
//! aggregator.stop()?;
//! # Ok::<(), logfunnel::FunnelError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod config;
pub mod error;
pub mod format;
pub mod ingest;
pub mod lifecycle;
pub mod producer;
pub mod provenance;
pub mod rotation;
pub mod router;
pub mod signals;
pub mod traits;
pub mod types;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    Encoding, FileMode, HandlerPolicy, LoggerInfo, RolloverWhen, TransportEndpoint,
};
pub use error::{FunnelError, Result};
pub use format::{LevelFormatter, Template};
pub use ingest::IngestStats;
pub use ingest::pipe::{PipeExit, PipeFrontEnd, PipeMessage, PipeSummary, serve_pipe};
pub use ingest::queue::{QueueMessage, QueueProducer, QueueReceiver, record_queue};
pub use ingest::tcp::{TcpFrontEnd, frame_codec};
pub use lifecycle::{Aggregator, AggregatorState};
pub use producer::{Emitter, PipeProducer, TcpProducer};
pub use rotation::RotatingFileHandler;
pub use router::{Routed, Router};
pub use traits::{MemoryHandler, MemorySink, RecordHandler, RecordSink, StreamHandler};
pub use types::{LogLevel, LogRecord, LogRecordBuilder, RoutingField, split_hierarchy};

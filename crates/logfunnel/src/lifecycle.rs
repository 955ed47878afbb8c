//! Aggregation worker lifecycle.
//!
//! This module provides:
//! - [`Aggregator`] — Starts the router and front-end on a dedicated worker
//!   thread, waits for readiness, and shuts it down on request
//! - [`AggregatorState`] — `Created → Starting → Running → Stopping → Stopped`
//!
//! The caller and the worker talk only through messages: the worker reports
//! `Ready` (with the resolved configuration) and `Finished`, and the caller
//! stops it by cancelling a token.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{LoggerInfo, TransportEndpoint};
use crate::error::{FunnelError, Result};
use crate::ingest::pipe::PipeFrontEnd;
use crate::ingest::queue::{QueueProducer, QueueReceiver, record_queue};
use crate::ingest::tcp::TcpFrontEnd;
use crate::router::Router;
use crate::signals;

/// Lifecycle state of an [`Aggregator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    /// Not started yet.
    Created,
    /// Waiting for the worker to become ready.
    Starting,
    /// Worker is serving.
    Running,
    /// Waiting for the worker to finish.
    Stopping,
    /// Worker has finished.
    Stopped,
}

/// Messages sent from the worker to its controller.
#[derive(Debug)]
enum WorkerEvent {
    Ready(Box<LoggerInfo>),
    Failed(String),
    Finished,
}

/// Everything a worker needs; moved onto the worker thread.
struct WorkerContext {
    info: LoggerInfo,
    queue: Option<QueueReceiver>,
    cancel: CancellationToken,
    events: Sender<WorkerEvent>,
    handle_signals: bool,
}

impl WorkerContext {
    fn report(&self, event: WorkerEvent) {
        if self.events.send(event).is_err() {
            debug!("aggregator controller is gone");
        }
    }
}

struct Worker {
    cancel: CancellationToken,
    events: Receiver<WorkerEvent>,
    thread: Option<JoinHandle<()>>,
}

/// Controls one aggregation worker.
///
/// Dropping a running aggregator stops it.
pub struct Aggregator {
    info: LoggerInfo,
    handle_signals: bool,
    state: AggregatorState,
    worker: Option<Worker>,
    resolved: Option<LoggerInfo>,
    queue: Option<QueueProducer>,
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("name", &self.info.name)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Aggregator {
    /// Creates an aggregator for a configuration. Nothing runs until [`start`](Self::start).
    #[must_use]
    pub fn new(info: LoggerInfo) -> Self {
        Self {
            info,
            handle_signals: false,
            state: AggregatorState::Created,
            worker: None,
            resolved: None,
            queue: None,
        }
    }

    /// Makes SIGINT and SIGTERM stop the worker.
    #[must_use]
    pub const fn with_signal_handling(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> AggregatorState {
        self.state
    }

    /// Returns the configuration producers should use, with the actual TCP
    /// port filled in. Available while running.
    #[must_use]
    pub fn logger_info(&self) -> Option<&LoggerInfo> {
        self.resolved.as_ref()
    }

    /// Returns a sender for the in-process queue, when that transport is used.
    #[must_use]
    pub fn queue_producer(&self) -> Option<QueueProducer> {
        self.queue.clone()
    }

    /// Starts the worker and blocks until it reports readiness.
    ///
    /// # Errors
    ///
    /// Returns a configuration error before anything is spawned,
    /// [`FunnelError::InvalidState`] if already running, and
    /// [`FunnelError::StartupFailed`] if the worker fails or stays silent
    /// past the startup timeout.
    pub fn start(&mut self) -> Result<()> {
        self.launch(run_worker)
    }

    fn launch<F>(&mut self, body: F) -> Result<()>
    where
        F: FnOnce(WorkerContext) + Send + 'static,
    {
        match self.state {
            AggregatorState::Created | AggregatorState::Stopped => {}
            state => {
                return Err(FunnelError::InvalidState(format!(
                    "cannot start aggregator in state {state:?}"
                )));
            }
        }
        self.info.validate()?;
        self.state = AggregatorState::Starting;

        let (queue, receiver) = match self.info.transport {
            TransportEndpoint::Queue => {
                let (producer, receiver) = record_queue();
                (Some(producer), Some(receiver))
            }
            _ => (None, None),
        };
        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::channel();
        let context = WorkerContext {
            info: self.info.clone(),
            queue: receiver,
            cancel: cancel.clone(),
            events: events_tx,
            handle_signals: self.handle_signals,
        };

        let thread = thread::Builder::new()
            .name(format!("logfunnel-{}", self.info.name))
            .spawn(move || body(context))
            .map_err(|e| {
                self.state = AggregatorState::Stopped;
                FunnelError::StartupFailed(format!("failed to spawn worker thread: {e}"))
            })?;

        let timeout = self.info.startup_timeout();
        let outcome = events_rx.recv_timeout(timeout);
        let mut worker = Worker {
            cancel,
            events: events_rx,
            thread: Some(thread),
        };

        let reason = match outcome {
            Ok(WorkerEvent::Ready(resolved)) => {
                info!(name = %resolved.name, transport = ?resolved.transport, "aggregator running");
                self.resolved = Some(*resolved);
                self.queue = queue;
                self.worker = Some(worker);
                self.state = AggregatorState::Running;
                return Ok(());
            }
            Ok(WorkerEvent::Failed(reason)) => reason,
            Ok(WorkerEvent::Finished) => "worker finished before signaling readiness".to_string(),
            Err(RecvTimeoutError::Timeout) => {
                format!("no readiness signal within {} ms", timeout.as_millis())
            }
            Err(RecvTimeoutError::Disconnected) => "worker exited before signaling readiness".to_string(),
        };

        worker.cancel.cancel();
        if let Some(thread) = worker.thread.take() {
            if thread.is_finished() {
                if thread.join().is_err() {
                    warn!("aggregation worker panicked during startup");
                }
            } else {
                // A worker stuck before readiness is detached; it observes the cancelled token if it ever gets there.
                debug!("detaching unresponsive aggregation worker");
            }
        }
        self.state = AggregatorState::Stopped;
        error!(reason = %reason, "aggregator failed to start");
        Err(FunnelError::StartupFailed(reason))
    }

    /// Stops the worker and blocks until it reports completion.
    ///
    /// A no-op unless running.
    ///
    /// # Errors
    ///
    /// Returns [`FunnelError::ShutdownTimeout`] if the worker does not report
    /// completion within the startup timeout or exits without reporting it.
    /// The aggregator is `Stopped` either way.
    pub fn stop(&mut self) -> Result<()> {
        if self.state != AggregatorState::Running {
            return Ok(());
        }
        self.state = AggregatorState::Stopping;
        if let Some(worker) = self.worker.as_ref() {
            worker.cancel.cancel();
        }
        self.finish(Some(self.info.startup_timeout()))
    }

    /// Blocks until the worker finishes on its own, such as after a signal
    /// or the queue shutdown sentinel.
    ///
    /// A no-op unless running.
    pub fn wait(&mut self) -> Result<()> {
        if self.state != AggregatorState::Running {
            return Ok(());
        }
        self.finish(None)
    }

    fn finish(&mut self, timeout: Option<Duration>) -> Result<()> {
        let Some(mut worker) = self.worker.take() else {
            self.state = AggregatorState::Stopped;
            return Ok(());
        };

        let unclean = loop {
            let event = match timeout {
                Some(limit) => worker.events.recv_timeout(limit),
                None => worker.events.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match event {
                Ok(WorkerEvent::Finished) => break None,
                Ok(other) => debug!(event = ?other, "ignoring worker event while stopping"),
                Err(RecvTimeoutError::Timeout) => {
                    let limit = timeout.unwrap_or_default();
                    break Some(format!("no finished signal within {} ms", limit.as_millis()));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    break Some("worker exited without a finished signal".to_string());
                }
            }
        };
        let finished = unclean.is_none();

        let mut result = Ok(());
        if let Some(thread) = worker.thread.take() {
            if finished || thread.is_finished() {
                if thread.join().is_err() {
                    result = Err(FunnelError::InvalidState("aggregation worker panicked".to_string()));
                }
            } else {
                warn!("aggregation worker did not finish in time; detaching");
            }
        }
        self.queue = None;
        self.resolved = None;
        self.state = AggregatorState::Stopped;

        if let Some(reason) = unclean {
            warn!(name = %self.info.name, reason = %reason, "aggregator stopped uncleanly");
            return Err(FunnelError::ShutdownTimeout(reason));
        }
        info!(name = %self.info.name, "aggregator stopped");
        result
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "failed to stop aggregator on drop");
        }
    }
}

fn run_worker(context: WorkerContext) {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("logfunnel-rt")
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            context.report(WorkerEvent::Failed(format!("failed to build runtime: {e}")));
            return;
        }
    };
    runtime.block_on(serve(context));
}

async fn serve(mut context: WorkerContext) {
    let router = match Router::new(&context.info) {
        Ok(router) => Arc::new(router),
        Err(e) => {
            context.report(WorkerEvent::Failed(e.to_string()));
            return;
        }
    };
    if context.handle_signals {
        tokio::spawn(signals::cancel_on_signal(context.cancel.clone()));
    }
    let cancel = context.cancel.clone();

    match context.info.transport.clone() {
        TransportEndpoint::Queue => {
            let Some(receiver) = context.queue.take() else {
                context.report(WorkerEvent::Failed("queue receiver missing".to_string()));
                return;
            };
            context.report(WorkerEvent::Ready(Box::new(context.info.clone())));
            let stats = receiver.serve(router.as_ref(), cancel).await;
            debug!(delivered = stats.delivered, dropped = stats.dropped, "queue front-end ended");
        }
        TransportEndpoint::Tcp { host, port } => {
            let front = match TcpFrontEnd::bind((host.as_str(), port)).await {
                Ok(front) => front,
                Err(e) => {
                    context.report(WorkerEvent::Failed(format!("failed to bind {host}:{port}: {e}")));
                    return;
                }
            };
            let mut resolved = context.info.clone();
            resolved.transport = TransportEndpoint::tcp(host, front.local_addr().port());
            context.report(WorkerEvent::Ready(Box::new(resolved)));
            front.serve(Arc::clone(&router), cancel).await;
        }
        TransportEndpoint::Pipe { command } => {
            let front = match PipeFrontEnd::spawn(&command) {
                Ok(front) => front,
                Err(e) => {
                    context.report(WorkerEvent::Failed(e.to_string()));
                    return;
                }
            };
            context.report(WorkerEvent::Ready(Box::new(context.info.clone())));
            let summary = front.serve(router.as_ref(), cancel).await;
            debug!(exit = ?summary.exit, delivered = summary.stats.delivered, "pipe front-end ended");
        }
    }

    router.close();
    context.report(WorkerEvent::Finished);
}

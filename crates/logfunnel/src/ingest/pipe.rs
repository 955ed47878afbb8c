//! Pipe front-end for newline-delimited records.
//!
//! Each line is a JSON value: an object is a record, and the strings
//! `"TERM"`, `"STOP"` and `"FINISH"` end the channel. Other strings are
//! ignored and undecodable lines are dropped.

use std::process::Stdio;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::tcp::MAX_FRAME_LENGTH;
use super::IngestStats;
use crate::error::{FunnelError, Result};
use crate::traits::RecordSink;
use crate::types::LogRecord;

/// In-band tokens that end a pipe channel.
pub const CONTROL_TOKENS: [&str; 3] = ["TERM", "STOP", "FINISH"];

/// Token written to ask the other end of a pipe to stop.
pub const TERMINATE_TOKEN: &str = "TERM";

/// How long a child gets to exit after the terminate token.
const CHILD_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// One decoded pipe line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeMessage {
    /// A record to route.
    Record(Box<LogRecord>),
    /// A control token ending the channel.
    Control(String),
    /// Any other string, ignored.
    Ignored(String),
}

impl PipeMessage {
    /// Decodes one line.
    ///
    /// # Errors
    ///
    /// Returns an error if the line is neither a string nor a record.
    pub fn decode(line: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(line)?;
        match value {
            serde_json::Value::String(text) => {
                if CONTROL_TOKENS.contains(&text.as_str()) {
                    Ok(Self::Control(text))
                } else {
                    Ok(Self::Ignored(text))
                }
            }
            other => {
                let record: LogRecord = serde_json::from_value(other)?;
                if record.logger_name.is_empty() {
                    return Err(FunnelError::MissingField("logger_name"));
                }
                Ok(Self::Record(Box::new(record)))
            }
        }
    }

    /// Encodes a control token as a pipe line, newline included.
    #[must_use]
    pub fn control_line(token: &str) -> String {
        format!("\"{token}\"\n")
    }
}

/// Why a pipe channel ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeExit {
    /// A control token was received.
    Control(String),
    /// The writer closed the pipe.
    Eof,
    /// The pipe failed to read.
    ReadError(String),
    /// The sink refused a record, so the rest of the channel cannot be delivered.
    DeliveryFailed(String),
    /// The serve loop was cancelled.
    Cancelled,
}

/// Result of serving one pipe channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeSummary {
    /// Why the channel ended.
    pub exit: PipeExit,
    /// Delivery counters.
    pub stats: IngestStats,
}

/// Reads newline-delimited messages from `reader` into `sink`.
///
/// Ends on a control token, end of input, a read error, a sink error, or
/// cancellation; only this channel is affected.
pub async fn serve_pipe<R, S>(reader: R, sink: &S, cancel: CancellationToken) -> PipeSummary
where
    R: AsyncRead + Unpin,
    S: RecordSink,
{
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_FRAME_LENGTH));
    let mut stats = IngestStats::default();

    let exit = loop {
        let line = tokio::select! {
            biased;
            () = cancel.cancelled() => break PipeExit::Cancelled,
            line = lines.next() => line,
        };
        let line = match line {
            Some(Ok(line)) => line,
            Some(Err(e)) => break PipeExit::ReadError(e.to_string()),
            None => break PipeExit::Eof,
        };
        if line.trim().is_empty() {
            continue;
        }
        match PipeMessage::decode(&line) {
            Ok(PipeMessage::Record(record)) => {
                let mut record = *record;
                record.stamp_host();
                if let Err(e) = sink.submit(record).await {
                    warn!(error = %e, "pipe sink failed; ending channel");
                    stats.dropped += 1;
                    break PipeExit::DeliveryFailed(e.to_string());
                }
                stats.delivered += 1;
            }
            Ok(PipeMessage::Control(token)) => break PipeExit::Control(token),
            Ok(PipeMessage::Ignored(text)) => debug!(text = %text, "ignoring pipe message"),
            Err(e) => {
                warn!(error = %e, "dropping undecodable pipe line");
                stats.dropped += 1;
            }
        }
    };

    debug!(exit = ?exit, delivered = stats.delivered, "pipe channel ended");
    PipeSummary { exit, stats }
}

/// A subprocess whose stdout carries records for the aggregator.
#[derive(Debug)]
pub struct PipeFrontEnd {
    program: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
}

impl PipeFrontEnd {
    /// Starts `command` (program followed by arguments).
    ///
    /// # Errors
    ///
    /// Returns [`FunnelError::RemoteLogger`] if the command is empty or
    /// cannot be started.
    pub fn spawn(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| FunnelError::RemoteLogger("empty pipe command".to_string()))?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FunnelError::RemoteLogger(format!("failed to start '{program}': {e}")))?;
        info!(program = %program, pid = ?child.id(), "started pipe source");

        Ok(Self {
            program: program.clone(),
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            child,
        })
    }

    /// Serves the child's stdout, then asks the child to stop and reaps it.
    pub async fn serve<S: RecordSink>(mut self, sink: &S, cancel: CancellationToken) -> PipeSummary {
        let summary = match self.stdout.take() {
            Some(stdout) => serve_pipe(stdout, sink, cancel).await,
            None => PipeSummary {
                exit: PipeExit::ReadError("child stdout unavailable".to_string()),
                stats: IngestStats::default(),
            },
        };
        self.shutdown().await;
        summary
    }

    async fn shutdown(&mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            let line = PipeMessage::control_line(TERMINATE_TOKEN);
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                debug!(program = %self.program, error = %e, "pipe source stdin already closed");
            }
        }
        match tokio::time::timeout(CHILD_EXIT_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => debug!(program = %self.program, status = %status, "pipe source exited"),
            Ok(Err(e)) => warn!(program = %self.program, error = %e, "failed to reap pipe source"),
            Err(_) => {
                warn!(program = %self.program, "pipe source did not exit; killing");
                if let Err(e) = self.child.kill().await {
                    warn!(program = %self.program, error = %e, "failed to kill pipe source");
                }
            }
        }
    }
}

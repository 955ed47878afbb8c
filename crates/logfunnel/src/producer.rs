//! Transport-side producers.
//!
//! This module provides:
//! - [`TcpProducer`] — Writes length-prefixed frames to a TCP front-end
//! - [`PipeProducer`] — Feeds newline-delimited records to a tunnel command's stdin
//! - [`Emitter`] — Builds records for a named logger and sends them through any [`RecordSink`]

use std::net::SocketAddr;
use std::process::Stdio;
use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedWrite, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use crate::config::LoggerInfo;
use crate::error::{FunnelError, Result};
use crate::ingest::pipe::{PipeMessage, TERMINATE_TOKEN};
use crate::ingest::tcp::frame_codec;
use crate::provenance;
use crate::traits::RecordSink;
use crate::types::{LogLevel, LogRecord};

/// How long a spawned tunnel must survive to count as started.
const SPAWN_GRACE: Duration = Duration::from_millis(100);

/// How long a tunnel gets to exit after the terminate token.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends records to a TCP front-end.
#[derive(Debug)]
pub struct TcpProducer {
    peer: SocketAddr,
    frames: Mutex<FramedWrite<TcpStream, LengthDelimitedCodec>>,
}

impl TcpProducer {
    /// Connects to a TCP front-end.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        debug!(peer = %peer, "connected to log listener");
        Ok(Self {
            peer,
            frames: Mutex::new(FramedWrite::new(stream, frame_codec())),
        })
    }

    /// Returns the front-end address.
    #[must_use]
    pub const fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Writes one record as a frame.
    pub async fn send(&self, record: &LogRecord) -> Result<()> {
        let payload = Bytes::from(record.to_json_bytes()?);
        self.frames.lock().await.send(payload).await?;
        Ok(())
    }

    /// Flushes and shuts down the write half.
    pub async fn close(&self) -> Result<()> {
        SinkExt::<Bytes>::close(&mut *self.frames.lock().await).await?;
        Ok(())
    }
}

impl RecordSink for TcpProducer {
    async fn submit(&self, record: LogRecord) -> Result<()> {
        self.send(&record).await
    }
}

struct PipeState {
    child: Child,
    stdin: Option<ChildStdin>,
}

/// Sends records through a tunnel command's stdin.
///
/// Delivery problems surface as [`FunnelError::RemoteLogger`] so callers never
/// believe they are logging when the tunnel is gone.
pub struct PipeProducer {
    program: String,
    state: Mutex<PipeState>,
}

impl std::fmt::Debug for PipeProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeProducer")
            .field("program", &self.program)
            .finish_non_exhaustive()
    }
}

impl PipeProducer {
    /// Starts the tunnel command with a piped stdin.
    ///
    /// # Errors
    ///
    /// Returns [`FunnelError::RemoteLogger`] if the command is empty, cannot
    /// be started, or exits right away.
    pub async fn spawn(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| FunnelError::RemoteLogger("empty tunnel command".to_string()))?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FunnelError::RemoteLogger(format!("failed to start '{program}': {e}")))?;

        tokio::time::sleep(SPAWN_GRACE).await;
        if let Some(status) = child.try_wait()? {
            return Err(FunnelError::RemoteLogger(format!(
                "'{program}' exited immediately with {status}"
            )));
        }
        info!(program = %program, pid = ?child.id(), "started log tunnel");

        Ok(Self {
            program: program.clone(),
            state: Mutex::new(PipeState {
                stdin: child.stdin.take(),
                child,
            }),
        })
    }

    /// Writes one record as a JSON line.
    ///
    /// # Errors
    ///
    /// Returns [`FunnelError::RemoteLogger`] if the tunnel has exited or its
    /// stdin is closed.
    pub async fn send(&self, record: &LogRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut state = self.state.lock().await;
        if let Some(status) = state.child.try_wait()? {
            state.stdin = None;
            return Err(FunnelError::RemoteLogger(format!(
                "'{}' exited with {status}",
                self.program
            )));
        }
        let stdin = state.stdin.as_mut().ok_or_else(|| {
            FunnelError::RemoteLogger(format!("pipe to '{}' is closed", self.program))
        })?;
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        written.map_err(|e| FunnelError::RemoteLogger(format!("pipe to '{}' failed: {e}", self.program)))
    }

    /// Writes the terminate token, closes stdin and waits for exit.
    ///
    /// Calling it again is a no-op.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(mut stdin) = state.stdin.take() else {
            return Ok(());
        };
        let line = PipeMessage::control_line(TERMINATE_TOKEN);
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            debug!(program = %self.program, error = %e, "tunnel stdin already closed");
        }
        drop(stdin);

        match tokio::time::timeout(CLOSE_TIMEOUT, state.child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!(program = %self.program, status = %status, "log tunnel exited");
            }
            Err(_) => {
                warn!(program = %self.program, "log tunnel did not exit; killing");
                state.child.kill().await?;
            }
        }
        Ok(())
    }
}

impl RecordSink for PipeProducer {
    async fn submit(&self, record: LogRecord) -> Result<()> {
        self.send(&record).await
    }
}

/// Emits records for one logger name through a sink.
///
/// Records below the configured level are discarded before they reach the
/// transport. Process and host provenance are stamped at emission.
#[derive(Debug, Clone)]
pub struct Emitter<S> {
    name: String,
    separator: String,
    level: LogLevel,
    sink: S,
}

impl<S: RecordSink> Emitter<S> {
    /// Creates an emitter for `name` using the level of `info`.
    ///
    /// An empty name falls back to the configuration's top-level name.
    pub fn from_info(info: &LoggerInfo, name: impl Into<String>, sink: S) -> Self {
        let name = name.into();
        Self {
            name: if name.is_empty() { info.name.clone() } else { name },
            separator: info.separator.clone(),
            level: info.logging_level,
            sink,
        }
    }

    /// Returns the logger name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the minimum emitted level.
    #[must_use]
    pub const fn level(&self) -> LogLevel {
        self.level
    }

    /// Returns the underlying sink.
    #[must_use]
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    /// Returns true if records at `level` are emitted.
    #[must_use]
    pub fn enabled(&self, level: LogLevel) -> bool {
        level.is_at_least(self.level)
    }

    /// Returns an emitter for a child logger, `<name><sep><suffix>`.
    #[must_use]
    pub fn child(&self, suffix: &str) -> Self
    where
        S: Clone,
    {
        Self {
            name: format!("{}{}{}", self.name, self.separator, suffix),
            separator: self.separator.clone(),
            level: self.level,
            sink: self.sink.clone(),
        }
    }

    /// Emits a message at `level`.
    pub async fn log(&self, level: LogLevel, message: impl Into<String>) -> Result<()> {
        if !self.enabled(level) {
            return Ok(());
        }
        let record = LogRecord::builder()
            .logger_name(self.name.clone())
            .level(level)
            .message(message)
            .host(provenance::hostname())
            .ip(provenance::ip_address())
            .build()?;
        self.sink.submit(record).await
    }

    /// Emits a prepared record, filling in this logger's provenance.
    pub async fn emit(&self, mut record: LogRecord) -> Result<()> {
        if !self.enabled(record.level) {
            return Ok(());
        }
        record.stamp_host();
        self.sink.submit(record).await
    }

    /// Emits at DEBUG.
    pub async fn debug(&self, message: impl Into<String>) -> Result<()> {
        self.log(LogLevel::Debug, message).await
    }

    /// Emits at INFO.
    pub async fn info(&self, message: impl Into<String>) -> Result<()> {
        self.log(LogLevel::Info, message).await
    }

    /// Emits at WARNING.
    pub async fn warning(&self, message: impl Into<String>) -> Result<()> {
        self.log(LogLevel::Warning, message).await
    }

    /// Emits at ERROR.
    pub async fn error(&self, message: impl Into<String>) -> Result<()> {
        self.log(LogLevel::Error, message).await
    }

    /// Emits at CRITICAL.
    pub async fn critical(&self, message: impl Into<String>) -> Result<()> {
        self.log(LogLevel::Critical, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::tcp::TcpFrontEnd;
    use crate::traits::MemorySink;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn emitter_filters_below_level() {
        let info = LoggerInfo::new("svc").with_level(LogLevel::Warning);
        let emitter = Emitter::from_info(&info, "svc.job", MemorySink::new());

        emitter.debug("hidden").await.expect("emit");
        emitter.info("hidden").await.expect("emit");
        emitter.warning("shown").await.expect("emit");
        emitter.critical("shown too").await.expect("emit");

        assert_eq!(emitter.sink().messages(), vec!["shown", "shown too"]);
    }

    #[tokio::test]
    async fn emitter_stamps_provenance() {
        let info = LoggerInfo::new("svc").with_level(LogLevel::Debug);
        let emitter = Emitter::from_info(&info, "", MemorySink::new());
        emitter.info("hello").await.expect("emit");

        let records = emitter.sink().records();
        assert_eq!(records[0].logger_name, "svc");
        assert_eq!(records[0].process_id, std::process::id());
        assert_eq!(records[0].host, provenance::hostname());
    }

    #[tokio::test]
    async fn child_emitter_extends_name() {
        let info = LoggerInfo::new("svc");
        let sink = Arc::new(MemorySink::new());
        let parent = Emitter::from_info(&info, "svc.a", Arc::clone(&sink));
        parent.child("x").info("deep").await.expect("emit");
        assert_eq!(sink.records()[0].logger_name, "svc.a.x");
    }

    #[tokio::test]
    async fn tcp_producer_reaches_front_end() {
        let front = TcpFrontEnd::bind("127.0.0.1:0").await.expect("bind");
        let addr = front.local_addr();
        let sink = Arc::new(MemorySink::new());
        let cancel = CancellationToken::new();
        let server = tokio::spawn(front.serve(Arc::clone(&sink), cancel.clone()));

        let producer = TcpProducer::connect(addr).await.expect("connect");
        assert_eq!(producer.peer_addr(), addr);
        let emitter = Emitter::from_info(&LoggerInfo::new("svc"), "svc.net", producer);
        emitter.info("over tcp").await.expect("send");
        emitter.error("again").await.expect("send");
        emitter.sink().close().await.expect("close");

        for _ in 0..200 {
            if sink.records().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sink.messages(), vec!["over tcp", "again"]);
        cancel.cancel();
        server.await.expect("join");
    }

    #[tokio::test]
    async fn pipe_producer_rejects_missing_program() {
        let result = PipeProducer::spawn(&["/nonexistent/logfunnel-tunnel".to_string()]).await;
        assert!(matches!(result, Err(FunnelError::RemoteLogger(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pipe_producer_rejects_command_that_exits() {
        let result = PipeProducer::spawn(&["true".to_string()]).await;
        assert!(matches!(result, Err(FunnelError::RemoteLogger(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pipe_producer_writes_lines_and_term() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let out = dir.path().join("tunnel.out");
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("cat > '{}'", out.display()),
        ];
        let producer = PipeProducer::spawn(&command).await.expect("spawn");
        let record = LogRecord::builder()
            .logger_name("svc.remote")
            .level(LogLevel::Info)
            .message("through the tunnel")
            .build()
            .expect("build record");
        producer.send(&record).await.expect("send");
        producer.close().await.expect("close");
        producer.close().await.expect("second close is a no-op");

        let written = std::fs::read_to_string(&out).expect("read tunnel output");
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            PipeMessage::decode(lines[0]).expect("decode"),
            PipeMessage::Record(Box::new(record))
        );
        assert_eq!(lines[1], "\"TERM\"");

        let late = LogRecord::builder()
            .logger_name("svc.remote")
            .level(LogLevel::Info)
            .message("late")
            .build()
            .expect("build record");
        let after = producer.send(&late).await;
        assert!(matches!(after, Err(FunnelError::RemoteLogger(_))));
    }
}

//! TCP front-end for length-prefixed record frames.
//!
//! Each frame is a 4-byte big-endian length followed by a JSON record.
//! Connections are served concurrently; a bad payload is dropped and its
//! connection keeps going, while a truncated frame ends that connection only.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{IngestStats, deliver};
use crate::error::Result;
use crate::traits::RecordSink;
use crate::types::LogRecord;

/// Largest accepted frame payload.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Returns the codec shared by the server and [`crate::producer::TcpProducer`].
#[must_use]
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// A bound TCP listener waiting to serve.
#[derive(Debug)]
pub struct TcpFrontEnd {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpFrontEnd {
    /// Binds the listener. Port 0 picks a free port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "log listener bound");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the bound address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until `cancel` fires.
    ///
    /// On cancellation the listener is closed and every connection's pending
    /// read is abandoned; the call returns once all connection tasks ended.
    pub async fn serve<S: RecordSink + 'static>(self, sink: Arc<S>, cancel: CancellationToken) -> IngestStats {
        let Self { listener, local_addr } = self;
        let mut connections: JoinSet<IngestStats> = JoinSet::new();
        let mut totals = IngestStats::default();

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    merge(&mut totals, joined);
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "accepted log connection");
                        connections.spawn(serve_connection(stream, peer, Arc::clone(&sink), cancel.clone()));
                    }
                    Err(e) => warn!(addr = %local_addr, error = %e, "failed to accept connection"),
                },
            }
        }

        drop(listener);
        while let Some(joined) = connections.join_next().await {
            merge(&mut totals, joined);
        }
        info!(
            addr = %local_addr,
            delivered = totals.delivered,
            dropped = totals.dropped,
            "log listener stopped"
        );
        totals
    }
}

fn merge(totals: &mut IngestStats, joined: std::result::Result<IngestStats, tokio::task::JoinError>) {
    match joined {
        Ok(stats) => {
            totals.delivered += stats.delivered;
            totals.dropped += stats.dropped;
        }
        Err(e) => warn!(error = %e, "connection task failed"),
    }
}

async fn serve_connection<S: RecordSink>(
    stream: TcpStream,
    peer: SocketAddr,
    sink: Arc<S>,
    cancel: CancellationToken,
) -> IngestStats {
    let mut frames = FramedRead::new(stream, frame_codec());
    let mut stats = IngestStats::default();
    let source = peer.to_string();

    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = frames.next() => frame,
        };
        match frame {
            Some(Ok(payload)) => match LogRecord::from_json_bytes(&payload) {
                Ok(record) => stats.record(deliver(sink.as_ref(), record, &source).await),
                Err(e) => {
                    warn!(peer = %peer, error = %e, "dropping undecodable frame");
                    stats.dropped += 1;
                }
            },
            Some(Err(e)) => {
                warn!(peer = %peer, error = %e, "closing connection after read error");
                break;
            }
            None => {
                debug!(peer = %peer, "log connection closed");
                break;
            }
        }
    }
    stats
}

//! CONNECT tunnels
//!
//! A tunnel goes through four states:
//!
//! ```text
//!   Dialing ──fail──▶ 503, no tunnel
//!      │
//!      ▼ upstream connected
//!   Established ──no upgrade──▶ 500, upstream dropped
//!      │ 200 sent, client stream taken over
//!      ▼
//!   Relaying  (client→upstream and upstream→client tasks)
//!      │ either task sees EOF or an error
//!      ▼
//!   Closed    (both tasks exit, both sockets dropped)
//! ```
//!
//! Dialing lives in [`TunnelManager::dial`], the relay in
//! [`TunnelManager::relay`]. The hand-off in between is done by the
//! connection that owns the client stream.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;

use crate::error::ProxyError;

/// Default dial timeout for the upstream leg.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const BUFFER_SIZE: usize = 16 * 1024;

/// Byte counts of a finished tunnel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunnelSummary {
    /// Client to upstream
    pub bytes_up: u64,
    /// Upstream to client
    pub bytes_down: u64,
}

#[derive(Debug, Clone)]
pub struct TunnelManager {
    connect_timeout: Duration,
}

impl Default for TunnelManager {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl TunnelManager {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Opens the upstream leg to `authority` (`host:port`).
    pub async fn dial(&self, authority: &str) -> Result<TcpStream, ProxyError> {
        match timeout(self.connect_timeout, TcpStream::connect(authority)).await {
            Ok(Ok(stream)) => {
                tracing::debug!(authority, "Tunnel upstream connected");
                Ok(stream)
            }
            Ok(Err(e)) => Err(ProxyError::unreachable(authority, e)),
            Err(_) => Err(ProxyError::unreachable(authority, "connection timed out")),
        }
    }

    /// Splices bytes between `client` and `upstream` until either side closes.
    ///
    /// `early_data` is whatever the client sent past the CONNECT header block
    /// and is delivered upstream before anything else. Returns once both
    /// forwarding tasks have exited; by then both streams have been dropped.
    pub async fn relay<C, U>(&self, client: C, upstream: U, early_data: Bytes) -> TunnelSummary
    where
        C: AsyncRead + AsyncWrite + Send + 'static,
        U: AsyncRead + AsyncWrite + Send + 'static,
    {
        let started = Instant::now();

        let (client_rd, client_wr) = tokio::io::split(client);
        let (upstream_rd, upstream_wr) = tokio::io::split(upstream);

        let (close_tx, close_rx) = watch::channel(false);
        let close_tx = Arc::new(close_tx);

        let up = tokio::spawn(forward(
            client_rd,
            upstream_wr,
            early_data,
            close_tx.clone(),
            close_rx.clone(),
        ));
        let down = tokio::spawn(forward(
            upstream_rd,
            client_wr,
            Bytes::new(),
            close_tx,
            close_rx,
        ));

        let (up, down) = tokio::join!(up, down);
        let summary = TunnelSummary {
            bytes_up: up.unwrap_or(0),
            bytes_down: down.unwrap_or(0),
        };

        tracing::info!(
            bytes_up = summary.bytes_up,
            bytes_down = summary.bytes_down,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tunnel closed"
        );

        summary
    }
}

/// One direction of a tunnel.
///
/// Stops on EOF, on an I/O error, or when the other direction signals
/// teardown, then signals teardown itself and shuts its write half down.
async fn forward<R, W>(
    mut reader: R,
    mut writer: W,
    early_data: Bytes,
    close_tx: Arc<watch::Sender<bool>>,
    mut close_rx: watch::Receiver<bool>,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    let mut buf = vec![0u8; BUFFER_SIZE];

    if !early_data.is_empty() {
        if writer.write_all(&early_data).await.is_ok() {
            total += early_data.len() as u64;
        } else {
            let _ = close_tx.send(true);
            return total;
        }
    }

    loop {
        let step = async {
            let n = reader.read(&mut buf).await?;
            if n > 0 {
                writer.write_all(&buf[..n]).await?;
            }
            Ok::<usize, std::io::Error>(n)
        };

        tokio::select! {
            res = step => match res {
                Ok(0) => break,
                Ok(n) => total += n as u64,
                Err(e) => {
                    tracing::trace!(error = %e, "Tunnel leg failed");
                    break;
                }
            },
            _ = close_rx.changed() => break,
        }
    }

    let _ = close_tx.send(true);
    let _ = writer.shutdown().await;
    total
}

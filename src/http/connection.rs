use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;

use crate::error::ProxyError;
use crate::http::parser::{parse_http_request, ParseError};
use crate::http::request::{Method, Request};
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::proxy::router::{Dispatch, Observation, PendingTunnel, ProxyRouter};

/// A client byte stream the connection can run over.
///
/// `supports_upgrade` reports whether the stream may be handed off for raw
/// duplex relaying once a CONNECT has been accepted.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    fn supports_upgrade(&self) -> bool {
        true
    }
}

impl Transport for TcpStream {}

impl Transport for DuplexStream {}

/// Exclusive ownership of a client stream after an upgrade.
pub struct Upgraded<S> {
    pub io: S,
    /// Bytes already read from the client past the request that was upgraded.
    pub early_data: Bytes,
}

pub struct Connection<S> {
    stream: Option<S>,
    buffer: Vec<u8>,
    state: ConnectionState,
    router: Arc<ProxyRouter>,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter, bool, Option<Observation>), // bool = keep_alive?
    Tunneling(PendingTunnel),
    Closed,
}

enum Incoming {
    Request(Request),
    Malformed(ParseError),
    Eof,
}

impl<S: Transport> Connection<S> {
    pub fn new(stream: S, router: Arc<ProxyRouter>) -> Self {
        Self {
            stream: Some(stream),
            buffer: Vec::with_capacity(4096),
            state: ConnectionState::Reading,
            router,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Reading => {
                    self.state = match self.read_request().await? {
                        Incoming::Request(req) => ConnectionState::Processing(req),
                        Incoming::Malformed(e) => {
                            tracing::warn!(error = ?e, "Malformed request");
                            let response = ProxyError::MalformedRequest(format!("{:?}", e)).into_response();
                            ConnectionState::Writing(ResponseWriter::new(&response, Method::GET), false, None)
                        }
                        Incoming::Eof => ConnectionState::Closed,
                    };
                }

                ConnectionState::Processing(req) => {
                    let wants_keep_alive = req.keep_alive();

                    self.state = match self.router.route(&req).await {
                        Dispatch::Respond { response, observation } => {
                            let keep_alive = wants_keep_alive && !closes_connection(&response);
                            let writer = ResponseWriter::new(&response, req.method);
                            ConnectionState::Writing(writer, keep_alive, observation)
                        }
                        Dispatch::Tunnel(tunnel) => ConnectionState::Tunneling(tunnel),
                    };
                }

                ConnectionState::Writing(mut writer, keep_alive, observation) => {
                    writer.write_to_stream(self.stream_mut()?).await?;

                    if let Some(observation) = observation {
                        self.router.observe(observation).await;
                    }

                    if keep_alive {
                        self.state = ConnectionState::Reading; // go back for next request
                    } else {
                        self.state = ConnectionState::Closed;
                    }
                }

                ConnectionState::Tunneling(tunnel) => {
                    if !self.can_upgrade() {
                        tracing::error!(authority = %tunnel.authority, "Connection cannot be upgraded");
                        drop(tunnel);
                        let response = ProxyError::TransportHijackUnsupported.into_response();
                        self.state = ConnectionState::Writing(
                            ResponseWriter::new(&response, Method::CONNECT),
                            false,
                            None,
                        );
                        continue;
                    }

                    ResponseWriter::new(&Response::connection_established(), Method::CONNECT)
                        .write_to_stream(self.stream_mut()?)
                        .await?;

                    let upgraded = self.upgrade()?;
                    tracing::info!(authority = %tunnel.authority, "Tunnel established");

                    self.router
                        .tunnels()
                        .relay(upgraded.io, tunnel.upstream, upgraded.early_data)
                        .await;
                    // self.state is already Closed
                }

                ConnectionState::Closed => {
                    break;
                }
            }
        }

        Ok(())
    }

    /// Whether the client stream is still owned here and can be handed off.
    pub fn can_upgrade(&self) -> bool {
        self.stream
            .as_ref()
            .map(|stream| stream.supports_upgrade())
            .unwrap_or(false)
    }

    /// Hands the raw client stream over for duplex relaying.
    ///
    /// The connection is unusable afterwards.
    pub fn upgrade(&mut self) -> Result<Upgraded<S>, ProxyError> {
        if !self.can_upgrade() {
            return Err(ProxyError::TransportHijackUnsupported);
        }

        let io = self.stream.take().ok_or(ProxyError::TransportHijackUnsupported)?;
        let early_data = Bytes::from(std::mem::take(&mut self.buffer));
        self.state = ConnectionState::Closed;

        Ok(Upgraded { io, early_data })
    }

    async fn read_request(&mut self) -> anyhow::Result<Incoming> {
        loop {
            // Try parsing whatever we already have
            match parse_http_request(&self.buffer) {
                Ok((request, consumed)) => {
                    // Remove consumed bytes
                    self.buffer.drain(..consumed);
                    return Ok(Incoming::Request(request));
                }

                Err(ParseError::Incomplete) => {
                    // Need more data → fall through to read
                }

                Err(e) => {
                    return Ok(Incoming::Malformed(e));
                }
            }

            // Read more data
            let mut temp = [0u8; 4096];
            let n = self.stream_mut()?.read(&mut temp).await?;

            if n == 0 {
                // Client closed connection
                return Ok(Incoming::Eof);
            }

            self.buffer.extend_from_slice(&temp[..n]);
        }
    }

    fn stream_mut(&mut self) -> anyhow::Result<&mut S> {
        self.stream
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("connection stream already handed off"))
    }
}

fn closes_connection(response: &Response) -> bool {
    response
        .header("Connection")
        .map(|v| v.eq_ignore_ascii_case("close"))
        .unwrap_or(false)
}

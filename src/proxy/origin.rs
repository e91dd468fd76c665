//! Origin fetching
//!
//! Performs the upstream HTTP/1.1 round-trip for requests that missed the
//! cache and materialises the full response in memory.

use crate::error::ProxyError;
use crate::http::chunked::{decode_chunked, ChunkError};
use crate::http::request::{Method, Request};
use crate::http::response::StatusCode;
use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;

/// Default buffer size for reading
const BUFFER_SIZE: usize = 8192;

/// Largest response header block accepted from an origin.
const MAX_RESPONSE_HEADER_BYTES: usize = 64 * 1024;

/// Headers that describe a single connection and are never forwarded.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "Connection",
    "Keep-Alive",
    "Proxy-Connection",
    "Transfer-Encoding",
    "Upgrade",
    "TE",
    "Trailer",
];

/// A complete origin response with one value per header name.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub status: StatusCode,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

/// Performs upstream requests on behalf of clients
#[derive(Debug, Clone)]
pub struct OriginFetcher {
    /// Dial timeout
    connect_timeout: Duration,

    /// Deadline for the whole exchange once connected
    request_timeout: Option<Duration>,
}

impl OriginFetcher {
    pub fn new(connect_timeout: Duration, request_timeout: Option<Duration>) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }

    /// Fetch `url` from its origin, reusing the method, headers and body of `request`.
    ///
    /// Dial failures surface as `UpstreamUnreachable`, anything that goes wrong
    /// after the connection is up as `UpstreamFetch`.
    pub async fn fetch(&self, request: &Request, url: &Url) -> Result<Fetched, ProxyError> {
        let authority = authority_of(url).map_err(|e| ProxyError::MalformedRequest(e.to_string()))?;

        let stream = timeout(self.connect_timeout, TcpStream::connect(&authority))
            .await
            .map_err(|_| ProxyError::unreachable(&authority, "connection timed out"))?
            .map_err(|e| ProxyError::unreachable(&authority, e))?;

        tracing::trace!(origin = %authority, "Connected to origin");

        let exchange = self.send_request_and_receive_response(stream, request, url);
        let fetched = match self.request_timeout {
            Some(deadline) => timeout(deadline, exchange)
                .await
                .map_err(|_| ProxyError::unreachable(&authority, "request timed out"))?,
            None => exchange.await,
        };

        fetched.map_err(|e| ProxyError::UpstreamFetch(format!("{e:#}")))
    }

    /// Send request to the origin and receive its response
    async fn send_request_and_receive_response(
        &self,
        mut stream: TcpStream,
        request: &Request,
        url: &Url,
    ) -> Result<Fetched> {
        let request_bytes = self.build_http_request(request, url);
        stream.write_all(&request_bytes).await?;
        stream.flush().await?;

        tracing::trace!("Request sent to origin");

        read_http_response(&mut stream, request.method).await
    }

    /// Build the origin-form request bytes sent upstream.
    ///
    /// The absolute-form target is rewritten to path and query, `Host` is set
    /// from the URL, hop-by-hop headers are dropped and the connection is
    /// closed after the response.
    pub fn build_http_request(&self, request: &Request, url: &Url) -> Vec<u8> {
        let mut buffer = Vec::new();

        let mut path = url.path().to_string();
        if path.is_empty() {
            path.push('/');
        }
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        buffer.extend_from_slice(
            format!("{} {} HTTP/1.1\r\n", request.method.as_str(), path).as_bytes()
        );

        let mut headers = request.headers.clone();
        headers.retain(|key, _| {
            !key.eq_ignore_ascii_case("Host") && !is_hop_by_hop(key)
        });

        if let Some(host) = url.host_str() {
            let host_value = match url.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            };
            headers.insert("Host".to_string(), host_value);
        }

        headers.insert("Connection".to_string(), "close".to_string());

        for (key, value) in &headers {
            buffer.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
        }

        buffer.extend_from_slice(b"\r\n");

        if !request.body.is_empty() {
            buffer.extend_from_slice(&request.body);
        }

        buffer
    }
}

/// `host:port` to dial for `url`, with the scheme's default port filled in.
pub fn authority_of(url: &Url) -> Result<String> {
    let host = url.host_str().context("URL missing host")?;
    let port = url
        .port_or_known_default()
        .context("URL has no port and no known default")?;

    // Bracket IPv6 literals again for dialing
    if host.contains(':') && !host.starts_with('[') {
        Ok(format!("[{}]:{}", host, port))
    } else {
        Ok(format!("{}:{}", host, port))
    }
}

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Read a complete HTTP response from an origin that closes after replying.
async fn read_http_response(stream: &mut TcpStream, method: Method) -> Result<Fetched> {
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

    let headers_end = loop {
        if let Some(end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break end;
        }

        if buffer.len() > MAX_RESPONSE_HEADER_BYTES {
            anyhow::bail!("Response headers too large");
        }

        let n = stream.read_buf(&mut buffer).await?;
        if n == 0 {
            anyhow::bail!("Connection closed before complete response received");
        }
    };

    let head = buffer.split_to(headers_end + 4);
    let (status, mut headers) = parse_response_head(&head)?;

    if method == Method::HEAD || status.is_bodiless() {
        headers.retain(|key, _| !is_hop_by_hop(key));
        return Ok(Fetched {
            status,
            headers,
            body: Bytes::new(),
        });
    }

    let chunked = header_value(&headers, "Transfer-Encoding")
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);

    let body = if chunked {
        read_chunked_body(stream, &mut buffer).await?
    } else if let Some(length) = header_value(&headers, "Content-Length") {
        let length: usize = length.trim().parse().context("Invalid Content-Length")?;
        read_sized_body(stream, &mut buffer, length).await?
    } else {
        // No framing: the body runs until the origin closes
        while stream.read_buf(&mut buffer).await? != 0 {}
        buffer.to_vec()
    };

    headers.retain(|key, _| !is_hop_by_hop(key) && !key.eq_ignore_ascii_case("Content-Length"));
    headers.insert("Content-Length".to_string(), body.len().to_string());

    Ok(Fetched {
        status,
        headers,
        body: Bytes::from(body),
    })
}

async fn read_sized_body(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    length: usize,
) -> Result<Vec<u8>> {
    while buffer.len() < length {
        let n = stream.read_buf(buffer).await?;
        if n == 0 {
            anyhow::bail!("Connection closed before complete body received");
        }
    }

    Ok(buffer[..length].to_vec())
}

async fn read_chunked_body(stream: &mut TcpStream, buffer: &mut BytesMut) -> Result<Vec<u8>> {
    loop {
        match decode_chunked(&buffer[..]) {
            Ok((body, _consumed)) => return Ok(body),
            Err(ChunkError::Invalid) => anyhow::bail!("Invalid chunked encoding"),
            Err(ChunkError::Incomplete) => {}
        }

        let n = stream.read_buf(buffer).await?;
        if n == 0 {
            anyhow::bail!("Connection closed inside chunked body");
        }
    }
}

/// Parse a status line and header block. Repeated header names keep the last value.
pub fn parse_response_head(head: &[u8]) -> Result<(StatusCode, HashMap<String, String>)> {
    let head = std::str::from_utf8(head).context("Invalid UTF-8 in response headers")?;

    let mut lines = head.lines();

    let status_line = lines.next().context("Empty response")?;
    let parts: Vec<&str> = status_line.splitn(3, ' ').collect();

    if parts.len() < 2 || !parts[0].starts_with("HTTP/") {
        anyhow::bail!("Invalid status line: {}", status_line);
    }

    let code: u16 = parts[1].parse().context("Invalid status code")?;

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }

        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    Ok((StatusCode::from_u16(code), headers))
}

fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

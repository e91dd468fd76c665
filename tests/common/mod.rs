//! Loopback fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use warden::proxy::origin::parse_response_head;
use warden::proxy::{HostMatcher, OriginFetcher, ProxyRouter, ResponseCache, TunnelManager};
use warden::server::listener;

/// An origin that answers every request with `<body> #<n>`, `n` counting fetches.
pub struct MockOrigin {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
}

impl MockOrigin {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

pub async fn spawn_origin(body: &'static str, delay: Duration) -> MockOrigin {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = hits.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let counter = counter.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }

                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(delay).await;

                let payload = format!("{} #{}", body, n);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nX-Served-By: mock\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    payload.len(),
                    payload
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    MockOrigin { addr, hits }
}

/// An echo server. Sends on the returned channel each time a client connection ends.
pub async fn spawn_echo() -> (SocketAddr, mpsc::UnboundedReceiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (closed_tx, closed_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let closed_tx = closed_tx.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                let _ = closed_tx.send(());
            });
        }
    });

    (addr, closed_rx)
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub fn router_with_ttl(ttl: Duration) -> Arc<ProxyRouter> {
    Arc::new(ProxyRouter::new(
        HostMatcher::new(),
        ResponseCache::new(ttl),
        OriginFetcher::new(Duration::from_secs(2), Some(Duration::from_secs(5))),
        TunnelManager::new(Duration::from_secs(2)),
    ))
}

pub async fn spawn_proxy(router: Arc<ProxyRouter>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(listener::serve(listener, router));
    addr
}

pub struct ClientResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Sends a single `Connection: close` request through the proxy and reads the reply.
pub async fn proxy_get(proxy: SocketAddr, url: &str) -> ClientResponse {
    let raw = format!("GET {} HTTP/1.1\r\nHost: ignored\r\nConnection: close\r\n\r\n", url);
    send_raw(proxy, raw.as_bytes()).await
}

pub async fn send_raw(proxy: SocketAddr, raw: &[u8]) -> ClientResponse {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(raw).await.unwrap();

    let mut buf = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
        .await
        .expect("proxy did not close the connection")
        .unwrap();

    parse_client_response(&buf)
}

pub fn parse_client_response(buf: &[u8]) -> ClientResponse {
    let end = buf
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response has no header terminator");
    let (status, headers) = parse_response_head(&buf[..end + 4]).unwrap();

    ClientResponse {
        status: status.as_u16(),
        headers,
        body: buf[end + 4..].to_vec(),
    }
}

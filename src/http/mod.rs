//! HTTP protocol implementation.
//!
//! This module implements the client-facing side of an HTTP/1.1 forward proxy
//! with support for keep-alive connections and CONNECT upgrades.
//!
//! # Architecture
//!
//! The HTTP layer is organized into several submodules:
//!
//! - **`connection`**: The per-client state machine, including the upgrade hand-off
//! - **`parser`**: Parses incoming HTTP requests from byte buffers
//! - **`chunked`**: Decodes `Transfer-Encoding: chunked` bodies
//! - **`request`**: HTTP request representation and parsing utilities
//! - **`response`**: HTTP response representation with builder pattern
//! - **`writer`**: Serializes and writes HTTP responses to the client
//!
//! # Connection State Machine
//!
//! Each client connection goes through a state machine:
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for incoming request data
//!        └──────┬──────┘
//!               │ Request received (malformed → 400, Writing)
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Route: block, cache, fetch or dial
//!        └──────┬───────────┘
//!               │
//!      ┌────────┴──────────┐
//!      │ Response ready    │ CONNECT dialled
//!      ▼                   ▼
//!  ┌─────────┐      ┌─────────────┐
//!  │ Writing │      │  Tunneling  │ ← 200, upgrade, relay until either side closes
//!  └────┬────┘      └──────┬──────┘
//!       │                  └─ Closed
//!       ├─ Keep-Alive → Reading (same connection)
//!       └─ Close → Closed
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use warden::http::connection::Connection;
//! use warden::proxy::ProxyRouter;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let router = Arc::new(ProxyRouter::from_config(&Default::default()));
//!     let listener = TcpListener::bind("127.0.0.1:8080").await?;
//!
//!     loop {
//!         let (socket, _addr) = listener.accept().await?;
//!         let router = router.clone();
//!         tokio::spawn(async move {
//!             let mut conn = Connection::new(socket, router);
//!             if let Err(e) = conn.run().await {
//!                 eprintln!("Connection error: {}", e);
//!             }
//!         });
//!     }
//! }
//! ```

pub mod request;
pub mod response;
pub mod parser;
pub mod chunked;
pub mod connection;
pub mod writer;

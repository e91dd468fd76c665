//! Warden - Caching Forward Proxy
//!
//! Core library for the HTTP layer, the routing and caching engine, and the
//! CONNECT tunnel.

pub mod config;
pub mod console;
pub mod error;
pub mod http;
pub mod proxy;
pub mod server;

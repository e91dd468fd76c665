//! Forward proxy engine
//!
//! This module implements the routing and caching core: blacklist matching,
//! the response cache, origin fetching, CONNECT tunnels, and the router that
//! ties them together per request.

pub mod cache;
pub mod host_matcher;
pub mod origin;
pub mod router;
pub mod stats;
pub mod tunnel;

pub use cache::{CacheEntry, CacheSnapshot, ResponseCache};
pub use host_matcher::{HostMatcher, RegisterOutcome, UnregisterOutcome};
pub use origin::{Fetched, OriginFetcher};
pub use router::{Dispatch, ProxyRouter, Target};
pub use stats::{Outcome, ProxyStats, StatsReport};
pub use tunnel::{TunnelManager, TunnelSummary};

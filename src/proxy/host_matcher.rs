//! Host blacklist
//!
//! Hosts are matched on their registrable domain (the last two labels), so a
//! single entry covers every subdomain below it.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Result of [`HostMatcher::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Added,
    AlreadyPresent,
}

/// Result of [`HostMatcher::unregister`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnregisterOutcome {
    Removed,
    NotPresent,
}

/// Shared blacklist handle. Clones refer to the same set.
#[derive(Debug, Clone, Default)]
pub struct HostMatcher {
    blocked: Arc<RwLock<BTreeSet<String>>>,
}

impl HostMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the registrable domain of `host` to the blacklist.
    pub async fn register(&self, host: &str) -> RegisterOutcome {
        let domain = normalize_host(host);
        let mut blocked = self.blocked.write().await;

        if blocked.insert(domain.clone()) {
            tracing::info!(host = %domain, "Host blacklisted");
            RegisterOutcome::Added
        } else {
            RegisterOutcome::AlreadyPresent
        }
    }

    /// Removes the registrable domain of `host` from the blacklist.
    pub async fn unregister(&self, host: &str) -> UnregisterOutcome {
        let domain = normalize_host(host);
        let mut blocked = self.blocked.write().await;

        if blocked.remove(&domain) {
            tracing::info!(host = %domain, "Host removed from blacklist");
            UnregisterOutcome::Removed
        } else {
            UnregisterOutcome::NotPresent
        }
    }

    /// Checks `host` (optionally carrying a `:port`) against the blacklist.
    pub async fn is_blocked(&self, host: &str) -> bool {
        let domain = normalize_host(host);
        self.blocked.read().await.contains(&domain)
    }

    /// Current entries in lexical order.
    pub async fn list(&self) -> Vec<String> {
        self.blocked.read().await.iter().cloned().collect()
    }
}

/// Reduces `host[:port]` to the unit the blacklist is keyed on.
///
/// The port is stripped, case and a trailing dot are dropped, then hostnames
/// with three or more labels are cut to their last two. Single- and two-label
/// names and IP literals are kept whole.
///
/// ```
/// # use warden::proxy::host_matcher::normalize_host;
/// assert_eq!(normalize_host("a.b.Example.com:443"), "example.com");
/// assert_eq!(normalize_host("localhost:8080"), "localhost");
/// assert_eq!(normalize_host("10.0.0.1:80"), "10.0.0.1");
/// ```
pub fn normalize_host(host: &str) -> String {
    let host = strip_port(host.trim());
    let host = host.trim_end_matches('.').to_ascii_lowercase();

    if host.parse::<IpAddr>().is_ok() {
        return host;
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() > 2 {
        labels[labels.len() - 2..].join(".")
    } else {
        host
    }
}

fn strip_port(host: &str) -> &str {
    // Bracketed IPv6, with or without a port
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }

    // A bare IPv6 literal has several colons and no port
    if host.matches(':').count() > 1 {
        return host;
    }

    match host.rsplit_once(':') {
        Some((name, _port)) => name,
        None => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_port_variants() {
        assert_eq!(strip_port("example.com:443"), "example.com");
        assert_eq!(strip_port("example.com"), "example.com");
        assert_eq!(strip_port("[::1]:8080"), "::1");
        assert_eq!(strip_port("::1"), "::1");
    }

    #[test]
    fn normalize_keeps_short_names() {
        assert_eq!(normalize_host("intranet"), "intranet");
        assert_eq!(normalize_host("example.com."), "example.com");
        assert_eq!(normalize_host("[2001:db8::1]:443"), "2001:db8::1");
    }
}

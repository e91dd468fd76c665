//! Per-request routing
//!
//! Decides what happens to one inbound request: refuse it, tunnel it, serve
//! it from the cache, or fetch it from the origin and cache the result.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use url::Url;

use crate::config::Config;
use crate::error::ProxyError;
use crate::http::request::{Method, Request};
use crate::http::response::Response;
use crate::proxy::cache::{CacheEntry, CacheSnapshot, ResponseCache};
use crate::proxy::host_matcher::HostMatcher;
use crate::proxy::origin::OriginFetcher;
use crate::proxy::stats::{Outcome, ProxyStats, StatsReport};
use crate::proxy::tunnel::TunnelManager;

/// Where a request is headed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Plain HTTP, cacheable under `key`
    Http { key: String, url: Url },
    /// CONNECT to `authority` (`host:port`)
    Connect { authority: String, host: String },
}

impl Target {
    /// Host the blacklist is consulted for.
    pub fn host(&self) -> &str {
        match self {
            Target::Http { url, .. } => url.host_str().unwrap_or_default(),
            Target::Connect { host, .. } => host,
        }
    }

    /// Label used in statistics and logs.
    pub fn label(&self) -> &str {
        match self {
            Target::Http { key, .. } => key,
            Target::Connect { authority, .. } => authority,
        }
    }
}

/// A timing sample, completed once the response has been written.
#[derive(Debug, Clone)]
pub struct Observation {
    pub key: String,
    pub outcome: Outcome,
    pub started: Instant,
}

/// An upstream leg dialled for a CONNECT request, awaiting the client hand-off.
#[derive(Debug)]
pub struct PendingTunnel {
    pub authority: String,
    pub upstream: TcpStream,
}

/// What the connection must do next.
#[derive(Debug)]
pub enum Dispatch {
    Respond {
        response: Response,
        observation: Option<Observation>,
    },
    Tunnel(PendingTunnel),
}

impl Dispatch {
    fn respond(response: Response) -> Self {
        Dispatch::Respond {
            response,
            observation: None,
        }
    }
}

pub struct ProxyRouter {
    matcher: HostMatcher,
    cache: ResponseCache,
    fetcher: OriginFetcher,
    tunnels: TunnelManager,
    stats: ProxyStats,
}

impl ProxyRouter {
    pub fn new(
        matcher: HostMatcher,
        cache: ResponseCache,
        fetcher: OriginFetcher,
        tunnels: TunnelManager,
    ) -> Self {
        Self {
            matcher,
            cache,
            fetcher,
            tunnels,
            stats: ProxyStats::new(),
        }
    }

    /// Builds the router from configuration with an empty blacklist.
    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            HostMatcher::new(),
            ResponseCache::new(cfg.cache.ttl()),
            OriginFetcher::new(cfg.upstream.connect_timeout(), cfg.upstream.request_timeout()),
            TunnelManager::new(cfg.tunnel.connect_timeout()),
        )
    }

    pub fn matcher(&self) -> &HostMatcher {
        &self.matcher
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn tunnels(&self) -> &TunnelManager {
        &self.tunnels
    }

    pub fn stats(&self) -> &ProxyStats {
        &self.stats
    }

    pub async fn route(&self, request: &Request) -> Dispatch {
        let started = Instant::now();

        let target = match resolve_target(request) {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!(target = %request.target, error = %e, "Rejecting request");
                return Dispatch::respond(e.into_response());
            }
        };

        if self.matcher.is_blocked(target.host()).await {
            tracing::info!(host = target.host(), "Blocked");
            let observation = Observation {
                key: target.label().to_string(),
                outcome: Outcome::Blocked,
                started,
            };
            return Dispatch::Respond {
                response: ProxyError::BlockedHost(target.host().to_string()).into_response(),
                observation: Some(observation),
            };
        }

        tracing::info!(host = target.host(), method = request.method.as_str(), "Allowed");

        match target {
            Target::Connect { authority, .. } => match self.tunnels.dial(&authority).await {
                Ok(upstream) => Dispatch::Tunnel(PendingTunnel {
                    authority,
                    upstream,
                }),
                Err(e) => {
                    tracing::warn!(authority = %authority, error = %e, "Tunnel dial failed");
                    Dispatch::respond(e.into_response())
                }
            },
            Target::Http { key, url } => self.serve_http(request, key, url, started).await,
        }
    }

    async fn serve_http(&self, request: &Request, key: String, url: Url, started: Instant) -> Dispatch {
        if let Some(entry) = self.cache.lookup(&key).await {
            tracing::debug!(key = %key, "Cache hit");
            return Dispatch::Respond {
                response: entry.to_response(),
                observation: Some(Observation {
                    key,
                    outcome: Outcome::Hit,
                    started,
                }),
            };
        }

        tracing::debug!(key = %key, "Cache miss");

        match self.fetcher.fetch(request, &url).await {
            Ok(fetched) => {
                let entry = CacheEntry::new(fetched.status, fetched.headers, fetched.body);
                let response = entry.to_response();

                // A HEAD answer has the headers of the full body but none of
                // its bytes, so it cannot stand in for a GET.
                if request.method != Method::HEAD {
                    self.cache.insert(key.clone(), entry).await;
                }

                Dispatch::Respond {
                    response,
                    observation: Some(Observation {
                        key,
                        outcome: Outcome::Miss,
                        started,
                    }),
                }
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Origin fetch failed");
                Dispatch::respond(e.into_response())
            }
        }
    }

    /// Cache contents and request statistics, taken together.
    ///
    /// Timings of keys no longer in the cache are discarded first, so the
    /// per-key table stays bounded by the cache itself.
    pub async fn report(&self) -> (CacheSnapshot, StatsReport) {
        let snapshot = self.cache.snapshot().await;
        let dropped = {
            let live: HashSet<&str> = snapshot.sizes.iter().map(|(key, _)| key.as_str()).collect();
            self.stats.retain_keys(|key| live.contains(key)).await
        };
        if dropped > 0 {
            tracing::debug!(dropped, "Pruned timings of evicted keys");
        }

        let report = self.stats.report().await;
        (snapshot, report)
    }

    /// Completes a timing sample after the response reached the client.
    pub async fn observe(&self, observation: Observation) {
        let elapsed: Duration = observation.started.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;

        match observation.outcome {
            Outcome::Hit => tracing::info!(key = %observation.key, elapsed_ms, "Taken from cache"),
            Outcome::Miss => tracing::info!(key = %observation.key, elapsed_ms, "Taken from web"),
            Outcome::Blocked => {}
        }

        self.stats
            .record(&observation.key, observation.outcome, elapsed)
            .await;
    }
}

/// Works out the target of `request` and, for plain HTTP, its cache key.
///
/// Accepts absolute-form targets, origin-form targets with a `Host` header,
/// and authority-form for CONNECT. Only the `http` scheme is fetched
/// directly; HTTPS must go through CONNECT.
pub fn resolve_target(request: &Request) -> Result<Target, ProxyError> {
    if request.method == Method::CONNECT {
        return resolve_authority(&request.target);
    }

    let absolute = if request.target.starts_with('/') {
        let host = request
            .header("Host")
            .ok_or_else(|| ProxyError::MalformedRequest("origin-form target without Host".into()))?;
        format!("http://{}{}", host, request.target)
    } else {
        request.target.clone()
    };

    let mut url = Url::parse(&absolute)
        .map_err(|e| ProxyError::MalformedRequest(format!("{}: {}", request.target, e)))?;

    if url.scheme() != "http" {
        return Err(ProxyError::MalformedRequest(format!(
            "unsupported scheme {}",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ProxyError::MalformedRequest("target has no host".into()));
    }

    url.set_fragment(None);

    Ok(Target::Http {
        key: url.to_string(),
        url,
    })
}

fn resolve_authority(target: &str) -> Result<Target, ProxyError> {
    let malformed = || ProxyError::MalformedRequest(format!("bad CONNECT target {}", target));

    if target.contains('/') {
        return Err(malformed());
    }

    let (host, port) = target.rsplit_once(':').ok_or_else(malformed)?;
    port.parse::<u16>().map_err(|_| malformed())?;

    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(malformed());
    }

    Ok(Target::Connect {
        authority: target.to_string(),
        host: host.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::RequestBuilder;

    fn request(method: Method, target: &str) -> Request {
        RequestBuilder::new().method(method).target(target).build().unwrap()
    }

    #[test]
    fn key_is_canonical_url() {
        let target = resolve_target(&request(Method::GET, "http://Example.COM:80")).unwrap();
        assert_eq!(target.label(), "http://example.com/");

        let target = resolve_target(&request(Method::GET, "http://example.com/a?x=1#frag")).unwrap();
        assert_eq!(target.label(), "http://example.com/a?x=1");
    }

    #[test]
    fn origin_form_uses_host_header() {
        let req = RequestBuilder::new()
            .method(Method::GET)
            .target("/index.html")
            .header("host", "example.com:8081")
            .build()
            .unwrap();

        let target = resolve_target(&req).unwrap();
        assert_eq!(target.label(), "http://example.com:8081/index.html");
        assert_eq!(target.host(), "example.com");
    }

    #[test]
    fn connect_targets() {
        let target = resolve_target(&request(Method::CONNECT, "sub.ads.example.com:443")).unwrap();
        assert_eq!(
            target,
            Target::Connect {
                authority: "sub.ads.example.com:443".into(),
                host: "sub.ads.example.com".into(),
            }
        );

        assert!(resolve_target(&request(Method::CONNECT, "example.com")).is_err());
        assert!(resolve_target(&request(Method::CONNECT, ":443")).is_err());
        assert!(resolve_target(&request(Method::CONNECT, "http://example.com:443")).is_err());
    }

    #[test]
    fn non_http_schemes_are_malformed() {
        let err = resolve_target(&request(Method::GET, "https://example.com/")).unwrap_err();
        assert!(matches!(err, ProxyError::MalformedRequest(_)));

        let err = resolve_target(&request(Method::GET, "/no-host")).unwrap_err();
        assert!(matches!(err, ProxyError::MalformedRequest(_)));
    }
}

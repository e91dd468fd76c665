//! Admin console
//!
//! Reads commands line by line and mutates or reports on the blacklist and
//! the cache:
//!
//! - `/add <host>` blacklists a host and its subdomains
//! - `/rmv <host>` removes it again
//! - `/view` lists the blacklist
//! - `/c` reports cache contents and timing statistics

use std::fmt::Write as _;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::proxy::{ProxyRouter, RegisterOutcome, UnregisterOutcome};

const USAGE: &str = "Commands: /add <host>, /rmv <host>, /view, /c";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add(String),
    Remove(String),
    View,
    CacheReport,
    Unknown,
}

impl Command {
    /// Parses one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let name = tokens.next()?;
        let arg = tokens.next().map(str::to_string);

        let cmd = match (name, arg) {
            ("/add", Some(host)) => Command::Add(host),
            ("/rmv", Some(host)) => Command::Remove(host),
            ("/view", None) => Command::View,
            ("/c", None) => Command::CacheReport,
            _ => Command::Unknown,
        };
        Some(cmd)
    }
}

/// Runs `cmd` and returns the text to show the operator.
pub async fn execute(router: &ProxyRouter, cmd: Command) -> String {
    match cmd {
        Command::Add(host) => match router.matcher().register(&host).await {
            RegisterOutcome::Added => "Blacklisted".to_string(),
            RegisterOutcome::AlreadyPresent => "This site is already on the blacklist".to_string(),
        },
        Command::Remove(host) => match router.matcher().unregister(&host).await {
            UnregisterOutcome::Removed => "Removed from blacklist".to_string(),
            UnregisterOutcome::NotPresent => "Site is not blocked".to_string(),
        },
        Command::View => {
            let mut out = String::from("Blacklist:");
            for host in router.matcher().list().await {
                let _ = write!(out, "\n| {}", host);
            }
            out
        }
        Command::CacheReport => cache_report(router).await,
        Command::Unknown => USAGE.to_string(),
    }
}

async fn cache_report(router: &ProxyRouter) -> String {
    let (snapshot, report) = router.report().await;

    if snapshot.entries == 0 && report.hits + report.misses == 0 {
        return "Cache is empty".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "Requests: {} hits, {} misses, {} blocked",
        report.hits, report.misses, report.blocked
    );
    match report.average_time_saved_ms {
        Some(ms) => {
            let _ = writeln!(out, "Average time saved from caching: {:.0}ms", ms);
        }
        None => {
            let _ = writeln!(out, "Average time saved from caching: n/a");
        }
    }
    let _ = write!(
        out,
        "Cached sites ({} entries, {} bytes):",
        snapshot.entries, snapshot.total_bytes
    );
    for (key, bytes) in &snapshot.sizes {
        let _ = write!(out, "\n{}: {} bytes", key, bytes);
    }
    out
}

/// Serves commands from `input` until it reaches EOF.
pub async fn run<R>(input: R, router: Arc<ProxyRouter>) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    println!("| Web Proxy Console |");
    println!("{}", USAGE);

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(cmd) = Command::parse(&line) {
            println!("{}", execute(&router, cmd).await);
        }
    }

    tracing::debug!("Console input closed");
    Ok(())
}

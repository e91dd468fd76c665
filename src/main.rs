use std::sync::Arc;

use warden::config::Config;
use warden::console;
use warden::proxy::ProxyRouter;
use warden::server;

#[tokio::main]
async fn main() -> anyhow::Result<()>{
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;
    let router = Arc::new(ProxyRouter::from_config(&cfg));

    for host in &cfg.blacklist {
        router.matcher().register(host).await;
    }

    let sweeper = router.cache().spawn_sweeper(cfg.cache.sweep_interval());

    if cfg.console.enabled {
        let router = router.clone();
        tokio::spawn(async move {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            if let Err(e) = console::run(stdin, router).await {
                tracing::error!("Console stopped: {}", e);
            }
        });
    }

    tokio::select! {
        res = server::listener::run(&cfg.server.listen_addr, router) => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    sweeper.abort();
    Ok(())
}

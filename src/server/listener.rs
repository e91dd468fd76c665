use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;
use crate::http::connection::Connection;
use crate::proxy::ProxyRouter;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub async fn run(listen_addr: &str, router: Arc<ProxyRouter>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    info!("Listening on {}", listen_addr);

    serve(listener, router).await
}

/// Accepts connections forever, one task per client.
pub async fn serve(listener: TcpListener, router: Arc<ProxyRouter>) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                // e.g. out of file descriptors; back off instead of exiting
                tracing::error!("Accept failed: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        tracing::debug!("Accepted connection from {}", peer);

        let router = router.clone();
        tokio::spawn(async move {
            let mut conn = Connection::new(socket, router);
            if let Err(e) = conn.run().await {
                tracing::error!("Connection error from {}: {}", peer, e);
            }
        });
    }
}

//! Event Hub - Binary Entry Point
//!
//! Usage: `event-hub [port]`

use std::sync::Arc;

use event_hub::api::create_router;
use event_hub::{EventHub, HubConfig};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "event_hub=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = HubConfig::from_env()?.with_port_arg(std::env::args().nth(1))?;
    let hub = Arc::new(EventHub::open(&config)?);

    let (stop_tx, mut stop_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(true);
    })?;

    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, log = %hub.log().path().display(), "listening");
    tracing::info!("GET /?topics=topic1,topic2&lastEventId=123");
    tracing::info!(r#"POST / with {{"topic": "demo.ping", "data": {{...}}, "retain": false}}"#);

    let app = create_router(hub.clone());
    let shutdown_hub = hub.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = stop_rx.wait_for(|stop| *stop).await;
            tracing::info!("shutting down");
            // Ends every open SSE stream so the server can drain
            shutdown_hub.shutdown();
        })
        .await?;

    Ok(())
}

// Buzzer server entry point.
//
// Startup sequence:
// 1. Load config (seeding config/ from defaults/ on first run)
// 2. Initialize tracing
// 3. Bind the WebSocket listener
// 4. Create mpsc channels
// 5. Spawn WebSocket server task
// 6. Spawn game loop task
// 7. Wait for Ctrl+C
// 8. Cleanup on exit

use buzzer_server::app::{self, AppState, ControlCommand};
use buzzer_server::config::{self, Config};
use buzzer_server::ws_server;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config. Tracing depends on it, so errors surface through anyhow.
    let config = config::load_config().context("failed to load configuration")?;

    // 2. Initialize tracing
    init_tracing(&config)?;
    info!("Buzzer server starting up");

    // 3. Bind the listener before spawning so a port clash fails startup
    let bind_addr = config.server.bind_addr();
    let listener = ws_server::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket server on {bind_addr}"))?;
    let local_addr = listener.local_addr()?;

    // 4. Create mpsc channels
    let (ws_tx, ws_rx) = mpsc::channel(config.channels.event_buffer);
    let (ctl_tx, ctl_rx) = mpsc::channel(8);

    // 5. Spawn WebSocket server task
    let ws_handle = tokio::spawn(async move {
        if let Err(e) = ws_server::run(listener, ws_tx).await {
            error!("WebSocket server error: {}", e);
        }
    });

    // 6. Spawn game loop task
    let app_handle = tokio::spawn(async move {
        if let Err(e) = app::run(ws_rx, ctl_rx, AppState::new()).await {
            error!("Application loop error: {}", e);
        }
    });

    info!("Buzzer ready. Clients connect to ws://{}", local_addr);

    // 7. Run until interrupted
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("Ctrl+C received, shutting down");

    // 8. Cleanup: stop the game loop (with timeout), then the accept loop
    let _ = ctl_tx.send(ControlCommand::Shutdown).await;
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        let _ = app_handle.await;
    })
    .await;

    // The accept loop only notices a closed channel on its next connection.
    ws_handle.abort();

    info!("Buzzer server shut down cleanly");
    Ok(())
}

/// Initialize tracing to stdout. `RUST_LOG` wins over `logging.filter`.
fn init_tracing(config: &Config) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}

//! `lockstep-server`: runs a battle server until Ctrl-C.
//!
//! Usage: `lockstep-server [config.json]`. Log filtering follows `RUST_LOG`
//! and defaults to `info`.

use std::time::Duration;

use lockstep::{LockstepError, LockstepServer, ServerConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const STATUS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), LockstepError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!(%path, "loading config");
            ServerConfig::from_file(path)?
        }
        None => ServerConfig::default(),
    };

    let server = LockstepServer::builder().config(config).build().await?;
    info!(addr = %server.local_addr()?, "listening");

    let rooms = server.room_manager();
    let status = tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATUS_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            let room_num = rooms.room_num().await;
            info!(rooms = room_num, "status");
        }
    });

    server
        .run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    status.abort();
    Ok(())
}

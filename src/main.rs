//! uberd - lobby server entry point.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use uberd::args::Args;
use uberd::config::{Config, HotConfig};
use uberd::db::Database;
use uberd::geo::UnknownCountry;
use uberd::mail::LogMailer;
use uberd::state::Lobby;
use uberd::state::events::Event;
use uberd::{network, scheduler, server, services};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::load();
    let config = Config::from_args(&args);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match &config.log_output {
        Some(path) => {
            let file = std::fs::File::create(path)
                .map_err(|e| anyhow::anyhow!("Failed to open log file {}: {e}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(file)
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(env_filter).init();
        }
    }

    info!(port = config.port, nat_port = config.nat_port, "Starting uberd");

    let hot = HotConfig::load(&config);
    let db = Database::connect(&config.sql_url).await?;

    let mut lobby = Lobby::new(
        config.clone(),
        hot,
        db,
        Arc::new(LogMailer),
        Arc::new(UnknownCountry),
    );
    lobby.boot().await?;
    services::chanserv::install(&mut lobby);

    let (events_tx, events_rx) = mpsc::unbounded_channel::<Event>();

    // SIGHUP reloads data files without dropping sessions
    if config.sighup_reload {
        let events = events_tx.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{SignalKind, signal};
            let Ok(mut sighup) = signal(SignalKind::hangup()) else {
                error!("Failed to install SIGHUP handler");
                return;
            };
            while sighup.recv().await.is_some() {
                info!("Received SIGHUP");
                if events.send(Event::Reload).is_err() {
                    break;
                }
            }
        });
    }

    scheduler::spawn_tasks(events_tx.clone());

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let gateway = network::Gateway::bind(addr, events_tx.clone()).await.map_err(|e| {
        error!(port = config.port, error = %e, "Failed to bind lobby port");
        anyhow::anyhow!("bind failed: {e}")
    })?;

    let dispatcher = tokio::spawn(server::run(lobby, events_rx));

    tokio::select! {
        result = gateway.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received interrupt, shutting down");
        }
    }

    // timers hold event senders, so stop the dispatcher directly
    dispatcher.abort();
    let _ = dispatcher.await;
    Ok(())
}

//! The dispatcher event loop.
//!
//! Consumes events from connection tasks, the scheduler and the signal
//! handler, and applies them to the lobby one at a time. This loop is
//! the single place where authoritative state changes.

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::config::HotConfig;
use crate::protocol;
use crate::state::events::Event;
use crate::state::{Lobby, Session};

/// Run the dispatcher until the event queue closes.
pub async fn run(mut lobby: Lobby, mut events: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = events.recv().await {
        match event {
            Event::Connected { sid, addr, outbound } => {
                let now = lobby.now();
                let country = lobby.geo.country(addr.ip());
                let session = Session::new(sid, addr, country, outbound, now);
                lobby.sessions.insert(sid, session);

                let banner = format!(
                    "TASServer {} {} {} 0",
                    crate::config::SERVER_VERSION,
                    lobby.spring_version(),
                    lobby.config.nat_port,
                );
                lobby.send_to(sid, &banner);
            }
            Event::Line { sid, line } => {
                let now = lobby.now();
                if let Some(session) = lobby.session_mut(sid) {
                    session.last_rx = now;
                } else {
                    continue;
                }
                protocol::dispatch(&mut lobby, sid, &line).await;
            }
            Event::Disconnected { sid, reason } => {
                lobby.remove_session(sid, &reason).await;
            }
            Event::SweepMutes => lobby.sweep_mutes().await,
            Event::SweepIdle => lobby.sweep_idle().await,
            Event::DecayThrottles => lobby.decay_throttles(),
            Event::DailyClean => {
                info!("Running daily database maintenance");
                if let Err(e) = lobby.db.clean().await {
                    error!(error = %e, "Database clean failed");
                }
                let now = lobby.now();
                if let Err(e) = lobby.db.users().audit_access(now).await {
                    error!(error = %e, "Access audit failed");
                }
            }
            Event::Reload => {
                info!("Reloading data files");
                lobby.hot = HotConfig::load(&lobby.config);
                lobby.broadcast_all("SERVERMSG Server data files reloaded", None);
            }
        }
    }
    info!("Event queue closed, dispatcher stopping");
}

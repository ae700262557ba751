//! Gateway - TCP listener that accepts incoming connections.
//!
//! The Gateway binds the lobby port and hands each accepted stream to a
//! connection task. Session ids are allocated here, monotonically; id 0
//! is reserved for the in-process service session.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::network::spawn_connection;
use crate::state::SessionId;
use crate::state::events::Event;

/// The Gateway accepts incoming TCP connections and spawns handlers.
pub struct Gateway {
    listener: TcpListener,
    events: mpsc::UnboundedSender<Event>,
    next_sid: Arc<AtomicU32>,
}

impl Gateway {
    /// Bind the gateway to the specified address.
    pub async fn bind(
        addr: SocketAddr,
        events: mpsc::UnboundedSender<Event>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "Gateway listening");
        Ok(Self {
            listener,
            events,
            next_sid: Arc::new(AtomicU32::new(1)),
        })
    }

    /// Run the gateway, accepting connections forever.
    pub async fn run(self) -> std::io::Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let sid: SessionId = self.next_sid.fetch_add(1, Ordering::Relaxed);
                    info!(sid, %addr, "Connection accepted");
                    spawn_connection(sid, stream, addr, self.events.clone());
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

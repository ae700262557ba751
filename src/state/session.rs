//! Per-connection session state.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tas_proto::{BattleStatus, ClientStatus, rank_for_ingame_minutes};
use tokio::sync::mpsc;

use super::{BattleId, SessionId, UserId};
use crate::access::Access;

/// Session lifecycle per the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, banner sent, not authenticated.
    AwaitLogin,
    /// Authenticated and visible to other users.
    LoggedIn,
    /// Being torn down; no further commands accepted.
    Removing,
}

/// Where a session's outbound lines go.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A real client: lines queue to the connection's writer task. The
    /// byte counter backs the flooded-connection cull.
    Tcp {
        tx: mpsc::UnboundedSender<String>,
        queued_bytes: Arc<AtomicUsize>,
    },
    /// An in-process service session; deliveries buffer in the lobby's
    /// service inbox instead of a socket.
    Service,
}

/// One live connection and its presence.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub ip: IpAddr,
    pub port: u16,
    /// Client-reported LAN address, also the proxy passthrough channel.
    pub local_ip: String,
    pub country: String,
    pub is_static: bool,
    pub state: SessionState,

    /// Account id, 0 until authenticated.
    pub user_id: UserId,
    pub username: String,
    pub email: Option<String>,
    pub access: Access,
    pub bot: bool,
    /// Accumulated in-game minutes (persisted on logout).
    pub ingame_minutes: i64,

    pub status: ClientStatus,
    pub battle_status: BattleStatus,
    pub team_color: u32,
    pub script_password: Option<String>,

    /// Names of joined channels.
    pub channels: HashSet<String>,
    pub battle_id: Option<BattleId>,

    pub agent: String,
    pub cpu: String,
    pub sys_id: String,
    pub mac_id: String,

    pub connected_at: i64,
    pub last_rx: i64,
    /// Wall clock of the last in-game transition, for time accounting.
    pub went_ingame: Option<i64>,
    /// Account waiting on CONFIRMAGREEMENT after a login attempt.
    pub pending_agreement: Option<UserId>,
    /// Cached ignore list of the authenticated account.
    pub ignores: HashSet<UserId>,
    /// Wall clock when the send buffer first exceeded the flood limit.
    pub flooded_since: Option<i64>,

    pub outbound: Outbound,
}

impl Session {
    /// Create a session for a freshly accepted connection.
    pub fn new(id: SessionId, addr: SocketAddr, country: String, outbound: Outbound, now: i64) -> Self {
        Self {
            id,
            ip: addr.ip(),
            port: addr.port(),
            local_ip: String::new(),
            country,
            is_static: false,
            state: SessionState::AwaitLogin,
            user_id: 0,
            username: String::new(),
            email: None,
            access: Access::default(),
            bot: false,
            ingame_minutes: 0,
            status: ClientStatus::default(),
            battle_status: BattleStatus::default(),
            team_color: 0,
            script_password: None,
            channels: HashSet::new(),
            battle_id: None,
            agent: String::new(),
            cpu: String::new(),
            sys_id: String::new(),
            mac_id: String::new(),
            connected_at: now,
            last_rx: now,
            went_ingame: None,
            pending_agreement: None,
            ignores: HashSet::new(),
            flooded_since: None,
            outbound,
        }
    }

    pub fn logged_in(&self) -> bool {
        self.state == SessionState::LoggedIn
    }

    /// Queue one line. Returns false when the peer is gone.
    pub(crate) fn push(&self, line: &str) -> bool {
        match &self.outbound {
            Outbound::Tcp { tx, queued_bytes } => {
                queued_bytes.fetch_add(line.len() + 1, Ordering::Relaxed);
                tx.send(line.to_string()).is_ok()
            }
            // Service deliveries are routed by the lobby, never here.
            Outbound::Service => true,
        }
    }

    /// Bytes currently queued towards the peer.
    pub fn queued_bytes(&self) -> usize {
        match &self.outbound {
            Outbound::Tcp { queued_bytes, .. } => queued_bytes.load(Ordering::Relaxed),
            Outbound::Service => 0,
        }
    }

    /// Recompute the server-authoritative bits of the presence byte.
    pub fn refresh_status(&mut self) {
        self.status.rank = rank_for_ingame_minutes(self.ingame_minutes.max(0) as u32);
        self.status.role = self.access.status_role();
        self.status.bot = self.bot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session(outbound: Outbound) -> Session {
        Session::new(7, "10.1.2.3:4000".parse().unwrap(), "DE".to_string(), outbound, 1000)
    }

    #[test]
    fn push_counts_queued_bytes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queued = Arc::new(AtomicUsize::new(0));
        let session = test_session(Outbound::Tcp {
            tx,
            queued_bytes: Arc::clone(&queued),
        });

        assert!(session.push("PONG"));
        assert_eq!(session.queued_bytes(), 5);
        assert_eq!(rx.try_recv().unwrap(), "PONG");
    }

    #[test]
    fn refresh_status_tracks_account_role() {
        let session = &mut test_session(Outbound::Service);
        session.access = Access::Mod;
        session.bot = true;
        session.ingame_minutes = 30 * 60;
        session.refresh_status();
        assert_eq!(session.status.role, tas_proto::StatusRole::Moderator);
        assert!(session.status.bot);
        assert_eq!(session.status.rank, 2);
    }
}

//! The Lobby - central authoritative state.
//!
//! Owns every map the protocol mutates: sessions, username and account-id
//! indexes, channels and battles. Only the dispatcher task holds a `&mut
//! Lobby`, which serializes all state transitions; connection tasks and
//! the scheduler communicate with it exclusively through events.
//!
//! Fan-out rules:
//! - broadcasts snapshot the target set at publication time
//! - static (in-process) sessions are delivered last, so their reactions
//!   always follow the triggering event on every other recipient's wire
//! - a send failure affects only that recipient

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::battle::Battle;
use super::channel::Channel;
use super::session::{Session, SessionState};
use super::{BattleId, SessionId, UserId};
use crate::config::{Config, HotConfig};
use crate::db::Database;
use crate::geo::CountryResolver;
use crate::mail::Mailer;

/// Send buffer size above which a connection counts as flooded.
pub const FLOOD_LIMIT_BYTES: usize = 256 * 1024;
/// Seconds a connection may stay flooded before it is culled.
pub const FLOOD_GRACE_SECS: i64 = 30;

/// Failed logins allowed per address per minute.
const LOGIN_FAILURE_LIMIT: u32 = 5;
const LOGIN_FAILURE_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, Default)]
struct FailureWindow {
    window_start: i64,
    count: u32,
}

/// Central server state, owned by the dispatcher task.
pub struct Lobby {
    pub config: Config,
    pub hot: HotConfig,
    pub db: Database,
    pub mailer: Arc<dyn Mailer>,
    pub geo: Arc<dyn CountryResolver>,

    pub sessions: HashMap<SessionId, Session>,
    /// Logged-in username -> session.
    pub usernames: HashMap<String, SessionId>,
    /// Logged-in account id -> session.
    pub db_ids: HashMap<UserId, SessionId>,
    pub channels: HashMap<String, Channel>,
    pub battles: HashMap<BattleId, Battle>,

    next_battle_id: BattleId,
    /// Lines delivered to static sessions, drained by the dispatcher.
    pub service_inbox: VecDeque<String>,
    /// Echo id of the command currently being handled.
    pending_echo: Option<(SessionId, u32)>,

    pub recent_registrations: HashMap<IpAddr, u32>,
    pub recent_renames: HashMap<UserId, u32>,
    failed_logins: HashMap<IpAddr, FailureWindow>,

    pub min_spring_version: String,
    started: Instant,
}

impl Lobby {
    pub fn new(
        config: Config,
        hot: HotConfig,
        db: Database,
        mailer: Arc<dyn Mailer>,
        geo: Arc<dyn CountryResolver>,
    ) -> Self {
        Self {
            config,
            hot,
            db,
            mailer,
            geo,
            sessions: HashMap::new(),
            usernames: HashMap::new(),
            db_ids: HashMap::new(),
            channels: HashMap::new(),
            battles: HashMap::new(),
            next_battle_id: 0,
            service_inbox: VecDeque::new(),
            pending_echo: None,
            recent_registrations: HashMap::new(),
            recent_renames: HashMap::new(),
            failed_logins: HashMap::new(),
            min_spring_version: "*".to_string(),
            started: Instant::now(),
        }
    }

    /// Load persisted channel state and server settings.
    pub async fn boot(&mut self) -> Result<(), crate::db::DbError> {
        let now = self.now();
        let records = self.db.channels().load_all().await?;
        let mut by_id: HashMap<i64, String> = HashMap::new();
        for record in &records {
            by_id.insert(record.id, record.name.clone());
            self.channels
                .insert(record.name.clone(), Channel::from_record(record, now));
        }

        for (channel_id, user_id) in self.db.channels().ops_all().await? {
            if let Some(name) = by_id.get(&channel_id)
                && let Some(channel) = self.channels.get_mut(name)
            {
                channel.ops.insert(user_id);
            }
        }
        for mute in self.db.channels().mutes_all().await? {
            if let Some(name) = by_id.get(&mute.channel_id)
                && let Some(channel) = self.channels.get_mut(name)
            {
                channel.mutes.insert(
                    mute.user_id,
                    super::channel::MuteEntry {
                        expires: mute.expires,
                        reason: mute.reason,
                    },
                );
            }
        }
        for ban in self.db.channels().bans_all().await? {
            if let Some(name) = by_id.get(&ban.channel_id)
                && let Some(channel) = self.channels.get_mut(name)
            {
                channel.bans.insert(
                    ban.user_id,
                    super::channel::BanEntry {
                        expires: ban.expires,
                        reason: ban.reason,
                    },
                );
            }
        }
        for (from_id, to_id) in self.db.channels().forwards_all().await? {
            if let (Some(from), Some(to)) = (by_id.get(&from_id), by_id.get(&to_id)) {
                let to = to.clone();
                if let Some(channel) = self.channels.get_mut(from) {
                    channel.forwards.push(to);
                }
            }
        }

        self.min_spring_version = self.db.min_spring_version().await?;
        info!(
            channels = self.channels.len(),
            min_spring_version = %self.min_spring_version,
            "Loaded registered channels"
        );
        Ok(())
    }

    /// Wall clock in unix seconds.
    pub fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// Monotonic seconds since server start, for the spam scorer.
    pub fn mono_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Engine version advertised in the banner.
    pub fn spring_version(&self) -> &str {
        if self.min_spring_version != "*" {
            &self.min_spring_version
        } else {
            &self.config.latest_spring_version
        }
    }

    // ---- lookups ----

    pub fn session(&self, sid: SessionId) -> Option<&Session> {
        self.sessions.get(&sid)
    }

    pub fn session_mut(&mut self, sid: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&sid)
    }

    pub fn sid_of(&self, username: &str) -> Option<SessionId> {
        self.usernames.get(username).copied()
    }

    pub fn session_by_name(&self, username: &str) -> Option<&Session> {
        self.sid_of(username).and_then(|sid| self.sessions.get(&sid))
    }

    /// Username of an account, from the live maps or the store.
    pub async fn username_of(&self, user_id: UserId) -> Option<String> {
        if let Some(sid) = self.db_ids.get(&user_id) {
            return self.sessions.get(sid).map(|s| s.username.clone());
        }
        match self.db.users().find_by_id(user_id).await {
            Ok(record) => record.map(|r| r.username),
            Err(e) => {
                warn!(user_id, error = %e, "Username lookup failed");
                None
            }
        }
    }

    /// Fetch the channel, creating a transient one on first reference.
    pub fn get_or_create_channel(&mut self, name: &str) -> &mut Channel {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| Channel::new(name))
    }

    // ---- delivery ----

    /// Remember the echo id of the command being handled; the next line
    /// delivered to `sid` is prefixed with it.
    pub fn begin_command(&mut self, sid: SessionId, msg_id: Option<u32>) {
        self.pending_echo = msg_id.map(|id| (sid, id));
    }

    /// Drop an unconsumed echo id at end of command.
    pub fn end_command(&mut self) {
        self.pending_echo = None;
    }

    /// Deliver one line to one session.
    pub fn send_to(&mut self, sid: SessionId, line: &str) {
        let echoed;
        let line = match self.pending_echo {
            Some((echo_sid, id)) if echo_sid == sid => {
                self.pending_echo = None;
                echoed = format!("#{id} {line}");
                &echoed
            }
            _ => line,
        };

        let Some(session) = self.sessions.get(&sid) else {
            return;
        };
        if session.is_static {
            self.service_inbox.push_back(line.to_string());
        } else if !session.push(line) {
            debug!(sid, "Dropping line for closed connection");
        }
    }

    /// Deliver to many sessions, static sessions last.
    pub fn multicast(&mut self, targets: &[SessionId], line: &str, ignore: Option<SessionId>) {
        let mut statics = Vec::new();
        for &sid in targets {
            if Some(sid) == ignore {
                continue;
            }
            match self.sessions.get(&sid) {
                Some(session) if session.is_static => statics.push(sid),
                Some(_) => self.send_to(sid, line),
                None => {}
            }
        }
        for sid in statics {
            self.send_to(sid, line);
        }
    }

    /// Deliver to every logged-in session.
    pub fn broadcast_all(&mut self, line: &str, ignore: Option<SessionId>) {
        let targets: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.logged_in())
            .map(|s| s.id)
            .collect();
        self.multicast(&targets, line, ignore);
    }

    /// Deliver to the membership of a channel at this instant.
    pub fn broadcast_channel(&mut self, chan: &str, line: &str, ignore: Option<SessionId>) {
        let Some(channel) = self.channels.get(chan) else {
            return;
        };
        let targets: Vec<SessionId> = channel.members.iter().copied().collect();
        self.multicast(&targets, line, ignore);
    }

    /// Deliver to the participants of a battle.
    pub fn broadcast_battle(&mut self, battle_id: BattleId, line: &str, ignore: Option<SessionId>) {
        let Some(battle) = self.battles.get(&battle_id) else {
            return;
        };
        let targets: Vec<SessionId> = battle.users.iter().copied().collect();
        self.multicast(&targets, line, ignore);
    }

    /// Broadcast the packed presence byte of one session.
    pub fn broadcast_client_status(&mut self, sid: SessionId) {
        let Some(session) = self.sessions.get(&sid) else {
            return;
        };
        let line = format!("CLIENTSTATUS {} {}", session.username, session.status.to_bits());
        self.broadcast_all(&line, None);
    }

    // ---- battles ----

    pub fn allocate_battle_id(&mut self) -> BattleId {
        self.next_battle_id += 1;
        self.next_battle_id
    }

    /// Remove a session from its battle; dissolves the battle when the
    /// session hosts it.
    pub fn leave_battle(&mut self, sid: SessionId) {
        let Some(battle_id) = self.sessions.get(&sid).and_then(|s| s.battle_id) else {
            return;
        };
        let Some(is_host) = self.battles.get(&battle_id).map(|b| b.host == sid) else {
            return;
        };

        if is_host {
            let Some(battle) = self.battles.remove(&battle_id) else {
                return;
            };
            for &member in &battle.users {
                if let Some(session) = self.sessions.get_mut(&member) {
                    session.battle_id = None;
                    session.battle_status = Default::default();
                }
            }
            for &member in &battle.users {
                if member != sid
                    && let Some(name) = self.sessions.get(&member).map(|s| s.username.clone())
                {
                    self.broadcast_all(&format!("LEFTBATTLE {battle_id} {name}"), None);
                }
            }
            self.broadcast_all(&format!("BATTLECLOSED {battle_id}"), None);
            return;
        }

        let removed_bots = match self.battles.get_mut(&battle_id) {
            Some(battle) => {
                battle.users.remove(&sid);
                battle.remove_bots_of(sid)
            }
            None => return,
        };
        if let Some(session) = self.sessions.get_mut(&sid) {
            session.battle_id = None;
            session.battle_status = Default::default();
        }
        for bot in removed_bots {
            self.broadcast_battle(battle_id, &format!("REMOVEBOT {battle_id} {bot}"), None);
        }
        if let Some(name) = self.sessions.get(&sid).map(|s| s.username.clone()) {
            self.broadcast_all(&format!("LEFTBATTLE {battle_id} {name}"), None);
        }
    }

    // ---- removal ----

    /// Tear a session down: battle, channels, presence maps, store. The
    /// `REMOVEUSER` broadcast happens exactly once.
    pub async fn remove_session(&mut self, sid: SessionId, reason: &str) {
        let Some(session) = self.sessions.get_mut(&sid) else {
            return;
        };
        if session.state == SessionState::Removing || session.is_static {
            return;
        }
        let was_logged_in = session.logged_in();
        session.state = SessionState::Removing;

        let username = session.username.clone();
        let user_id = session.user_id;
        let access = session.access;
        let bot = session.bot;
        let channels: Vec<String> = session.channels.iter().cloned().collect();
        let now = self.now();

        // close out a running in-game stint before persisting
        if let Some(session) = self.sessions.get_mut(&sid)
            && let Some(since) = session.went_ingame.take()
        {
            session.ingame_minutes += (now - since).max(0) / 60;
        }
        let ingame_minutes = self
            .sessions
            .get(&sid)
            .map(|s| s.ingame_minutes)
            .unwrap_or(0);

        self.leave_battle(sid);

        for chan in channels {
            let mut gone = false;
            if let Some(channel) = self.channels.get_mut(&chan) {
                channel.members.remove(&sid);
                channel.antispam.forget(sid);
                // unregistered channels vanish with their last member
                gone = !channel.registered() && channel.members.is_empty();
            }
            if gone {
                self.channels.remove(&chan);
            }
            if was_logged_in {
                self.broadcast_channel(&chan, &format!("LEFT {chan} {username} {reason}"), Some(sid));
            }
        }

        if was_logged_in {
            self.usernames.remove(&username);
            self.db_ids.remove(&user_id);
            self.broadcast_all(&format!("REMOVEUSER {username}"), Some(sid));

            if let Err(e) = self
                .db
                .users()
                .save_presence(user_id, ingame_minutes, access.as_str(), bot)
                .await
            {
                warn!(user = %username, error = %e, "Failed to persist presence on logout");
            }
            if let Err(e) = self.db.users().end_session(user_id).await {
                warn!(user = %username, error = %e, "Failed to close login row");
            }
        }

        self.sessions.remove(&sid);
        info!(sid, user = %username, reason, "Session removed");
    }

    // ---- scheduled sweeps ----

    /// Expire channel mutes and announce each expiry.
    pub async fn sweep_mutes(&mut self) {
        let now = self.now();
        let names: Vec<String> = self.channels.keys().cloned().collect();
        for name in names {
            let Some(channel) = self.channels.get_mut(&name) else {
                continue;
            };
            let expired = channel.take_expired_mutes(now);
            let channel_id = channel.id;
            let registered = channel.registered();
            for user_id in expired {
                if registered
                    && let Err(e) = self.db.channels().remove_mute(channel_id, user_id).await
                {
                    warn!(chan = %name, user_id, error = %e, "Failed to drop stored mute");
                }
                if let Some(username) = self.username_of(user_id).await {
                    self.broadcast_channel(
                        &name,
                        &format!("CHANNELMESSAGE {name} <{username}> has been unmuted (mute expired)."),
                        None,
                    );
                }
            }
        }
    }

    /// Cull sessions that never logged in, went silent, or flooded.
    pub async fn sweep_idle(&mut self) {
        let now = self.now();
        let mut victims: Vec<(SessionId, &'static str, String)> = Vec::new();

        for session in self.sessions.values_mut() {
            if session.is_static || session.state == SessionState::Removing {
                continue;
            }
            if !session.logged_in() && session.connected_at < now - 60 {
                victims.push((
                    session.id,
                    "Connection timed out, didn't login",
                    "SERVERMSG timed out, no login within 60 seconds!".to_string(),
                ));
            } else if session.last_rx < now - 60 {
                victims.push((
                    session.id,
                    "Connection timed out",
                    "SERVERMSG timed out, no data or PING received for >60 seconds, closing connection"
                        .to_string(),
                ));
            } else if session.queued_bytes() > FLOOD_LIMIT_BYTES {
                match session.flooded_since {
                    None => session.flooded_since = Some(now),
                    Some(since) if now - since > FLOOD_GRACE_SECS => {
                        victims.push((
                            session.id,
                            "Connection flooded",
                            "SERVERMSG Connection flooded".to_string(),
                        ));
                    }
                    Some(_) => {}
                }
            } else {
                session.flooded_since = None;
            }
        }

        for (sid, reason, notice) in victims {
            self.send_to(sid, &notice);
            self.remove_session(sid, reason).await;
        }
    }

    /// Decay the registration and rename throttles.
    pub fn decay_throttles(&mut self) {
        for count in self.recent_registrations.values_mut() {
            *count = count.saturating_sub(1);
        }
        self.recent_registrations.retain(|_, count| *count > 0);
        for count in self.recent_renames.values_mut() {
            *count = count.saturating_sub(1);
        }
        self.recent_renames.retain(|_, count| *count > 0);
    }

    // ---- login failure throttle ----

    /// Record one failed login from `ip`; true when the address is over
    /// its budget for this window.
    pub fn register_login_failure(&mut self, ip: IpAddr) -> bool {
        let now = self.now();
        let entry = self.failed_logins.entry(ip).or_default();
        if now - entry.window_start > LOGIN_FAILURE_WINDOW_SECS {
            entry.window_start = now;
            entry.count = 0;
        }
        entry.count += 1;
        entry.count > LOGIN_FAILURE_LIMIT
    }

    /// Whether `ip` has exhausted its failed-login budget.
    pub fn login_throttled(&self, ip: IpAddr) -> bool {
        let now = self.now();
        match self.failed_logins.get(&ip) {
            Some(entry) => {
                now - entry.window_start <= LOGIN_FAILURE_WINDOW_SECS
                    && entry.count >= LOGIN_FAILURE_LIMIT
            }
            None => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::mpsc;

    use super::*;
    use crate::access::Access;
    use crate::state::Outbound;

    /// Lobby over an in-memory store for handler tests.
    pub async fn test_lobby() -> Lobby {
        let config = {
            use clap::Parser;
            let args = crate::args::Args::parse_from(["uberd"]);
            Config::from_args(&args)
        };
        let db = crate::db::test_db().await;
        Lobby::new(
            config,
            HotConfig::default(),
            db,
            Arc::new(crate::mail::LogMailer),
            Arc::new(crate::geo::UnknownCountry),
        )
    }

    /// Attach a TCP-backed session and return the receiving end of its
    /// outbound queue.
    pub fn attach_session(
        lobby: &mut Lobby,
        sid: SessionId,
        username: &str,
        user_id: UserId,
        access: Access,
    ) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let outbound = Outbound::Tcp {
            tx,
            queued_bytes: Arc::new(AtomicUsize::new(0)),
        };
        let now = lobby.now();
        let mut session = Session::new(
            sid,
            format!("127.0.0.{sid}:5000").parse().unwrap(),
            "??".to_string(),
            outbound,
            now,
        );
        session.state = SessionState::LoggedIn;
        session.username = username.to_string();
        session.user_id = user_id;
        session.access = access;
        session.refresh_status();
        lobby.sessions.insert(sid, session);
        lobby.usernames.insert(username.to_string(), sid);
        lobby.db_ids.insert(user_id, sid);
        rx
    }

    /// Drain everything queued for one receiver.
    pub fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(line) = rx.try_recv() {
            out.push(line);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{attach_session, drain, test_lobby};
    use crate::access::Access;

    #[tokio::test]
    async fn broadcast_reaches_all_but_ignored() {
        let mut lobby = test_lobby().await;
        let mut rx_a = attach_session(&mut lobby, 1, "alice", 10, Access::User);
        let mut rx_b = attach_session(&mut lobby, 2, "bob", 11, Access::User);

        lobby.broadcast_all("SERVERMSG hi", Some(1));
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b), vec!["SERVERMSG hi".to_string()]);
    }

    #[tokio::test]
    async fn echo_id_prefixes_first_line_only() {
        let mut lobby = test_lobby().await;
        let mut rx = attach_session(&mut lobby, 1, "alice", 10, Access::User);

        lobby.begin_command(1, Some(42));
        lobby.send_to(1, "PONG");
        lobby.send_to(1, "SERVERMSG after");
        lobby.end_command();

        assert_eq!(
            drain(&mut rx),
            vec!["#42 PONG".to_string(), "SERVERMSG after".to_string()]
        );
    }

    #[tokio::test]
    async fn remove_session_broadcasts_removeuser_once() {
        let mut lobby = test_lobby().await;
        let user_id = lobby
            .db
            .users()
            .register("alice", "h", "", None, "user")
            .await
            .unwrap();
        let _rx_a = attach_session(&mut lobby, 1, "alice", user_id, Access::User);
        let mut rx_b = attach_session(&mut lobby, 2, "bob", 11, Access::User);

        lobby.remove_session(1, "Quit").await;
        lobby.remove_session(1, "Quit").await;

        let lines = drain(&mut rx_b);
        assert_eq!(
            lines.iter().filter(|l| *l == "REMOVEUSER alice").count(),
            1
        );
        assert!(lobby.sid_of("alice").is_none());
        assert!(!lobby.sessions.contains_key(&1));
    }

    #[tokio::test]
    async fn host_departure_dissolves_battle() {
        let mut lobby = test_lobby().await;
        let _rx_a = attach_session(&mut lobby, 1, "alice", 10, Access::User);
        let mut rx_b = attach_session(&mut lobby, 2, "bob", 11, Access::User);

        let battle_id = lobby.allocate_battle_id();
        let params = tas_proto::OpenBattle {
            replay: false,
            nat_type: tas_proto::NatType::None,
            password: None,
            port: 8452,
            max_players: 8,
            game_hash: "0".to_string(),
            rank_limit: 0,
            map_hash: "beef".to_string(),
            engine_name: None,
            engine_version: None,
            map_name: "SmallDivide".to_string(),
            title: "t".to_string(),
            game_name: "BA".to_string(),
        };
        let mut battle =
            crate::state::Battle::open(battle_id, 1, "alice".to_string(), params, "104");
        battle.users.insert(2);
        lobby.battles.insert(battle_id, battle);
        lobby.session_mut(1).unwrap().battle_id = Some(battle_id);
        lobby.session_mut(2).unwrap().battle_id = Some(battle_id);
        drain(&mut rx_b);

        lobby.leave_battle(1);

        assert!(lobby.battles.is_empty());
        assert_eq!(lobby.session(2).unwrap().battle_id, None);
        let lines = drain(&mut rx_b);
        assert!(lines.contains(&format!("BATTLECLOSED {battle_id}")));
    }

    #[tokio::test]
    async fn battle_ids_are_strictly_increasing() {
        let mut lobby = test_lobby().await;
        let first = lobby.allocate_battle_id();
        let second = lobby.allocate_battle_id();
        assert!(second > first);
    }

    #[tokio::test]
    async fn login_failure_throttle_trips_after_limit() {
        let mut lobby = test_lobby().await;
        let ip: std::net::IpAddr = "10.0.0.1".parse().unwrap();
        assert!(!lobby.login_throttled(ip));
        for _ in 0..5 {
            lobby.register_login_failure(ip);
        }
        assert!(lobby.login_throttled(ip));
    }
}

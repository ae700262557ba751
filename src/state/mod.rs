//! State management module.
//!
//! The authoritative maps (sessions, usernames, channels, battles) live in
//! the [`Lobby`] and are mutated only from the dispatcher task.

mod antispam;
mod battle;
mod channel;
mod lobby;
mod session;

pub mod events;

pub use antispam::{AntiSpam, AntiSpamSettings};
pub use battle::{Battle, BotSlot, StartRect};
pub use channel::{BanEntry, Channel, MuteEntry, Topic};
pub use lobby::{FLOOD_GRACE_SECS, FLOOD_LIMIT_BYTES, Lobby};
pub use session::{Outbound, Session, SessionState};

/// Monotonic per-connection identifier, assigned on accept.
pub type SessionId = u32;

/// Monotonic battle identifier, assigned on `OPENBATTLE`.
pub type BattleId = u32;

/// Stable account identifier from the persistent store.
pub type UserId = i64;

/// Session id reserved for the in-process ChanServ service.
pub const CHANSERV_SID: SessionId = 0;

//! In-memory channel state.

use std::collections::{HashMap, HashSet};

use super::antispam::AntiSpam;
use super::{SessionId, UserId};
use crate::access::{Access, ChannelRank};
use crate::db::ChannelRecord;

/// Current channel topic.
#[derive(Debug, Clone)]
pub struct Topic {
    pub text: String,
    pub set_by: String,
    pub set_at: i64,
}

/// One channel mute. `expires = None` means indefinite.
#[derive(Debug, Clone, Default)]
pub struct MuteEntry {
    pub expires: Option<i64>,
    pub reason: Option<String>,
}

/// One channel ban. `expires = None` means indefinite.
#[derive(Debug, Clone, Default)]
pub struct BanEntry {
    pub expires: Option<i64>,
    pub reason: Option<String>,
}

/// A chat channel: membership is transient, the rest mirrors the store
/// for registered channels.
#[derive(Debug, Default)]
pub struct Channel {
    pub name: String,
    /// Persistent id; 0 while unregistered.
    pub id: i64,
    pub topic: Option<Topic>,
    pub key: Option<String>,
    /// Founding account of a registered channel.
    pub founder: Option<UserId>,
    pub ops: HashSet<UserId>,
    pub mutes: HashMap<UserId, MuteEntry>,
    pub bans: HashMap<UserId, BanEntry>,
    /// Joins into this channel also enter these channels.
    pub forwards: Vec<String>,
    pub members: HashSet<SessionId>,
    pub antispam: AntiSpam,
    pub store_history: bool,
    pub censor: bool,
}

impl Channel {
    /// A fresh unregistered channel.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Rebuild a registered channel from its stored row.
    pub fn from_record(record: &ChannelRecord, now: i64) -> Self {
        let mut channel = Self::new(&record.name);
        channel.id = record.id;
        channel.key = record.key.clone();
        channel.founder = record.owner_user_id;
        channel.store_history = record.store_history;
        channel.censor = record.censor;
        channel.antispam.enabled = record.antispam;
        if let Some(text) = &record.topic {
            channel.topic = Some(Topic {
                text: text.clone(),
                set_by: "ChanServ".to_string(),
                set_at: now,
            });
        }
        channel
    }

    /// Whether the channel has a registered founder.
    pub fn registered(&self) -> bool {
        self.founder.is_some()
    }

    /// Effective capability of an account in this channel.
    pub fn rank(&self, access: Access, user_id: UserId) -> ChannelRank {
        ChannelRank::effective(
            access,
            self.founder == Some(user_id),
            self.ops.contains(&user_id),
        )
    }

    /// Whether the user is muted right now.
    pub fn is_muted(&self, user_id: UserId, now: i64) -> bool {
        match self.mutes.get(&user_id) {
            Some(entry) => entry.expires.is_none_or(|expires| expires > now),
            None => false,
        }
    }

    /// Whether the user is banned right now.
    pub fn is_banned(&self, user_id: UserId, now: i64) -> bool {
        match self.bans.get(&user_id) {
            Some(entry) => entry.expires.is_none_or(|expires| expires > now),
            None => false,
        }
    }

    /// Mutes whose expiry passed; removes them and returns the user ids.
    pub fn take_expired_mutes(&mut self, now: i64) -> Vec<UserId> {
        let expired: Vec<UserId> = self
            .mutes
            .iter()
            .filter(|(_, entry)| matches!(entry.expires, Some(e) if e <= now))
            .map(|(&user_id, _)| user_id)
            .collect();
        for user_id in &expired {
            self.mutes.remove(user_id);
        }
        expired
    }
}

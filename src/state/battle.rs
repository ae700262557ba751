//! In-memory battle (hosted game room) state.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tas_proto::{BattleStatus, NatType, OpenBattle};

use super::{BattleId, SessionId};

/// An AI participant owned by one of the human players.
#[derive(Debug, Clone)]
pub struct BotSlot {
    pub owner: SessionId,
    pub status: BattleStatus,
    pub color: u32,
    pub ai: String,
}

/// Start rectangle for one ally team, in map per-mille coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartRect {
    pub left: u16,
    pub top: u16,
    pub right: u16,
    pub bottom: u16,
}

/// One hosted game room.
#[derive(Debug)]
pub struct Battle {
    pub id: BattleId,
    pub host: SessionId,
    pub founder_name: String,

    pub replay: bool,
    pub nat_type: NatType,
    pub password: Option<String>,
    pub port: u16,
    pub max_players: u32,
    pub game_hash: String,
    pub rank_limit: u8,
    pub map_hash: String,
    pub engine_name: String,
    pub engine_version: String,
    pub map_name: String,
    pub title: String,
    pub game_name: String,

    /// Participants, host included.
    pub users: HashSet<SessionId>,
    pub spectator_count: u32,
    pub locked: bool,
    // ordered so replayed room state is byte-stable on the wire
    pub bots: BTreeMap<String, BotSlot>,
    pub start_rects: BTreeMap<u8, StartRect>,
    pub script_tags: BTreeMap<String, String>,
    pub disabled_units: BTreeSet<String>,
    pub in_game: bool,
}

impl Battle {
    /// Create a battle from a validated `OPENBATTLE`, hosted by `host`.
    pub fn open(
        id: BattleId,
        host: SessionId,
        founder_name: String,
        params: OpenBattle,
        default_engine: &str,
    ) -> Self {
        let mut users = HashSet::new();
        users.insert(host);
        Self {
            id,
            host,
            founder_name,
            replay: params.replay,
            nat_type: params.nat_type,
            password: params.password,
            port: params.port,
            max_players: params.max_players,
            game_hash: params.game_hash,
            rank_limit: params.rank_limit,
            map_hash: params.map_hash,
            engine_name: params.engine_name.unwrap_or_else(|| "spring".to_string()),
            engine_version: params
                .engine_version
                .unwrap_or_else(|| default_engine.to_string()),
            map_name: params.map_name,
            title: params.title,
            game_name: params.game_name,
            users,
            spectator_count: 0,
            locked: false,
            bots: BTreeMap::new(),
            start_rects: BTreeMap::new(),
            script_tags: BTreeMap::new(),
            disabled_units: BTreeSet::new(),
            in_game: false,
        }
    }

    pub fn passworded(&self) -> bool {
        self.password.is_some()
    }

    /// Drop a departing session's bots, returning their names.
    pub fn remove_bots_of(&mut self, sid: SessionId) -> Vec<String> {
        let names: Vec<String> = self
            .bots
            .iter()
            .filter(|(_, bot)| bot.owner == sid)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &names {
            self.bots.remove(name);
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> OpenBattle {
        OpenBattle {
            replay: false,
            nat_type: NatType::None,
            password: None,
            port: 8452,
            max_players: 8,
            game_hash: "0".to_string(),
            rank_limit: 0,
            map_hash: "beef".to_string(),
            engine_name: None,
            engine_version: None,
            map_name: "SmallDivide".to_string(),
            title: "test".to_string(),
            game_name: "BA".to_string(),
        }
    }

    #[test]
    fn open_includes_host_and_engine_defaults() {
        let battle = Battle::open(3, 9, "alice".to_string(), params(), "104.0");
        assert!(battle.users.contains(&9));
        assert_eq!(battle.engine_name, "spring");
        assert_eq!(battle.engine_version, "104.0");
        assert!(!battle.passworded());
    }

    #[test]
    fn remove_bots_of_owner_only() {
        let mut battle = Battle::open(3, 9, "alice".to_string(), params(), "104.0");
        let bot = BotSlot {
            owner: 9,
            status: BattleStatus::default(),
            color: 0,
            ai: "KAIK".to_string(),
        };
        battle.bots.insert("bot1".to_string(), bot.clone());
        battle.bots.insert("bot2".to_string(), BotSlot { owner: 4, ..bot });

        let mut removed = battle.remove_bots_of(9);
        removed.sort();
        assert_eq!(removed, vec!["bot1".to_string()]);
        assert!(battle.bots.contains_key("bot2"));
    }
}

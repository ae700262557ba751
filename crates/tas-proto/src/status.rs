//! Packed presence and battle state words.
//!
//! `CLIENTSTATUS` carries a packed presence byte and `CLIENTBATTLESTATUS`
//! a packed 32-bit battle state. The server is the sole authority for the
//! role bits of the presence byte; clients may only toggle the in-game and
//! away bits via `MYSTATUS`.

/// Rank thresholds in hours of accumulated in-game time.
const RANK_HOURS: [u32; 7] = [5, 25, 75, 150, 300, 1000, 3000];

/// Compute the 0..=7 rank for a given in-game time in minutes.
pub fn rank_for_ingame_minutes(minutes: u32) -> u8 {
    let hours = minutes / 60;
    RANK_HOURS.iter().filter(|&&t| hours >= t).count() as u8
}

/// Server role encoded in the presence byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum StatusRole {
    /// Ordinary user.
    #[default]
    User = 0,
    /// Server moderator.
    Moderator = 1,
    /// Server administrator.
    Admin = 2,
}

/// Decoded presence byte broadcast via `CLIENTSTATUS`.
///
/// Layout: bit 0 in-game, bit 1 away, bits 2-4 rank, bits 5-6 role,
/// bit 7 bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientStatus {
    /// Client is currently in a running game.
    pub in_game: bool,
    /// Client marked itself away.
    pub away: bool,
    /// Rank derived from in-game time, 0..=7.
    pub rank: u8,
    /// Server role. Server-authoritative.
    pub role: StatusRole,
    /// Automated client flag. Server-authoritative.
    pub bot: bool,
}

impl ClientStatus {
    /// Pack into the wire byte.
    pub fn to_bits(self) -> u32 {
        (self.in_game as u32)
            | (self.away as u32) << 1
            | ((self.rank & 0x7) as u32) << 2
            | (self.role as u32) << 5
            | (self.bot as u32) << 7
    }

    /// Decode a wire byte.
    pub fn from_bits(bits: u32) -> Self {
        let role = match (bits >> 5) & 0x3 {
            1 => StatusRole::Moderator,
            2 => StatusRole::Admin,
            _ => StatusRole::User,
        };
        Self {
            in_game: bits & 0x1 != 0,
            away: bits & 0x2 != 0,
            rank: ((bits >> 2) & 0x7) as u8,
            role,
            bot: bits & 0x80 != 0,
        }
    }

    /// Apply a client-supplied `MYSTATUS` word, keeping only the bits the
    /// client is allowed to set.
    pub fn apply_client_bits(&mut self, bits: u32) {
        let wanted = Self::from_bits(bits);
        self.in_game = wanted.in_game;
        self.away = wanted.away;
    }
}

/// Sync state reported inside the battle status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SyncStatus {
    /// Client has not reported yet.
    #[default]
    Unknown = 0,
    /// Map and game hashes match the host.
    Synced = 1,
    /// Hashes do not match.
    Unsynced = 2,
}

/// Decoded battle status word broadcast via `CLIENTBATTLESTATUS`.
///
/// Layout: bit 1 ready, bits 2-5 team, bits 6-9 ally, bit 10 player
/// (0 = spectator), bits 11-17 handicap, bits 22-23 sync, bits 24-27 side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BattleStatus {
    /// Ready checkbox.
    pub ready: bool,
    /// Team number, 0..=15.
    pub team: u8,
    /// Ally team number, 0..=15.
    pub ally: u8,
    /// False when spectating.
    pub player: bool,
    /// Resource handicap percentage, 0..=100.
    pub handicap: u8,
    /// Map/game sync state.
    pub sync: SyncStatus,
    /// Faction index, 0..=15.
    pub side: u8,
}

impl BattleStatus {
    /// Pack into the wire word.
    pub fn to_bits(self) -> u32 {
        (self.ready as u32) << 1
            | ((self.team & 0xf) as u32) << 2
            | ((self.ally & 0xf) as u32) << 6
            | (self.player as u32) << 10
            | ((self.handicap.min(100)) as u32) << 11
            | (self.sync as u32) << 22
            | ((self.side & 0xf) as u32) << 24
    }

    /// Decode a wire word, sanitizing fields the client could have set to
    /// out-of-range values: handicap is clamped to 0..=100 and an invalid
    /// sync value falls back to `Unknown`.
    pub fn from_bits(bits: u32) -> Self {
        let sync = match (bits >> 22) & 0x3 {
            1 => SyncStatus::Synced,
            2 => SyncStatus::Unsynced,
            _ => SyncStatus::Unknown,
        };
        Self {
            ready: bits & 0x2 != 0,
            team: ((bits >> 2) & 0xf) as u8,
            ally: ((bits >> 6) & 0xf) as u8,
            player: bits & (1 << 10) != 0,
            handicap: (((bits >> 11) & 0x7f) as u8).min(100),
            sync,
            side: ((bits >> 24) & 0xf) as u8,
        }
    }
}

//! Client command types and parsing.
//!
//! A frame is an optional `#<id>` echo prefix, a command word, and an
//! argument string. Tokens are separated by single spaces; the trailing
//! argument of most commands may contain spaces. A few commands carry
//! tab-separated argument groups (`LOGIN`, `OPENBATTLE`,
//! `UPDATEBATTLEINFO`, `SETSCRIPTTAGS`).

use crate::error::{ProtocolError, Result};

/// A decoded inbound frame: optional client message id plus the command.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Client-assigned message id to echo on the first reply line.
    pub msg_id: Option<u32>,
    /// The decoded command.
    pub command: Command,
}

impl Frame {
    /// Parse one wire line (without its terminator).
    pub fn parse(line: &str) -> Result<Frame> {
        let mut rest = line;
        let mut msg_id = None;

        if let Some(tail) = rest.strip_prefix('#') {
            let (id, after) = split_word(tail);
            msg_id = Some(
                id.parse::<u32>()
                    .map_err(|_| ProtocolError::bad_args("#id", "message id must be an integer"))?,
            );
            rest = after;
        }

        let (word, args) = split_word(rest);
        if word.is_empty() {
            return Err(ProtocolError::EmptyLine);
        }

        Ok(Frame {
            msg_id,
            command: Command::parse(word, args)?,
        })
    }
}

/// Split the first space-delimited token off `s`.
fn split_word(s: &str) -> (&str, &str) {
    match s.split_once(' ') {
        Some((head, tail)) => (head, tail),
        None => (s, ""),
    }
}

fn req<'a>(cmd: &'static str, what: &str, s: &'a str) -> Result<&'a str> {
    if s.is_empty() {
        Err(ProtocolError::bad_args(cmd, format!("missing {what}")))
    } else {
        Ok(s)
    }
}

fn int<T: std::str::FromStr>(cmd: &'static str, what: &str, s: &str) -> Result<T> {
    s.parse()
        .map_err(|_| ProtocolError::bad_args(cmd, format!("{what} must be an integer")))
}

fn opt(s: &str) -> Option<String> {
    if s.is_empty() { None } else { Some(s.to_string()) }
}

/// Parameters of an `OPENBATTLE`/`OPENBATTLEEX` command.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenBattle {
    /// 0 = normal battle, 1 = battle replay.
    pub replay: bool,
    /// NAT traversal scheme requested by the host.
    pub nat_type: NatType,
    /// Join password; `*` on the wire means none.
    pub password: Option<String>,
    /// Host game port.
    pub port: u16,
    /// Maximum player count.
    pub max_players: u32,
    /// Game (mod) hash.
    pub game_hash: String,
    /// Minimum rank allowed to join.
    pub rank_limit: u8,
    /// Map hash.
    pub map_hash: String,
    /// Engine name; absent in the legacy argument form.
    pub engine_name: Option<String>,
    /// Engine version; absent in the legacy argument form.
    pub engine_version: Option<String>,
    /// Map name.
    pub map_name: String,
    /// Battle title.
    pub title: String,
    /// Game (mod) name.
    pub game_name: String,
}

/// NAT traversal scheme of a battle host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum NatType {
    /// No traversal assistance.
    #[default]
    None = 0,
    /// Hole punching via the NAT helper service.
    HolePunching = 1,
    /// Fixed source ports.
    FixedSource = 2,
}

impl NatType {
    fn from_wire(cmd: &'static str, s: &str) -> Result<Self> {
        match s {
            "0" => Ok(Self::None),
            "1" => Ok(Self::HolePunching),
            "2" => Ok(Self::FixedSource),
            _ => Err(ProtocolError::bad_args(cmd, "natType must be 0, 1 or 2")),
        }
    }
}

/// All commands a client (or the in-process service session) may send.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // Handshake / account
    /// `LOGIN user password cpu local_ip agent[\t sys_id\t mac_id]`
    Login {
        username: String,
        password: String,
        cpu: String,
        local_ip: String,
        agent: String,
        sys_id: String,
        mac_id: String,
    },
    /// `REGISTER user password [email]`
    Register {
        username: String,
        password: String,
        email: Option<String>,
    },
    /// `CONFIRMAGREEMENT`
    ConfirmAgreement,
    /// `RESETPASSWORDREQUEST email`
    ResetPasswordRequest { email: String },
    /// `RESENDVERIFICATION email`
    ResendVerification { email: String },
    /// `VERIFY email code`
    Verify { email: String, code: String },
    /// `CHANGEPASSWORD old new`
    ChangePassword { old: String, new: String },
    /// `CHANGEEMAILREQUEST email`
    ChangeEmailRequest { email: String },
    /// `CHANGEEMAIL email code`
    ChangeEmail { email: String, code: String },
    /// `RENAMEACCOUNT newname`
    RenameAccount { new_name: String },
    /// `EXIT [reason]`
    Exit { reason: Option<String> },
    /// `PING`
    Ping,
    /// `MYSTATUS status`
    MyStatus { status: u32 },

    // Channels
    /// `CHANNELS`
    Channels,
    /// `JOIN chan [key]`
    Join { chan: String, key: Option<String> },
    /// `LEAVE chan`
    Leave { chan: String },
    /// `SAY chan msg`
    Say { chan: String, msg: String },
    /// `SAYEX chan msg`
    SayEx { chan: String, msg: String },
    /// `SAYPRIVATE user msg`
    SayPrivate { user: String, msg: String },
    /// `CHANNELTOPIC chan text`
    ChannelTopic { chan: String, text: String },
    /// `MUTE chan user [minutes]`
    Mute {
        chan: String,
        user: String,
        minutes: Option<f64>,
    },
    /// `UNMUTE chan user`
    Unmute { chan: String, user: String },
    /// `MUTELIST chan`
    MuteList { chan: String },
    /// `FORCELEAVECHANNEL chan user [reason]`
    ForceLeaveChannel {
        chan: String,
        user: String,
        reason: Option<String>,
    },

    // Battles
    /// `OPENBATTLE …` (tab-separated trailing group)
    OpenBattle(OpenBattle),
    /// `JOINBATTLE id [password] [scriptPassword]`
    JoinBattle {
        id: u32,
        password: Option<String>,
        script_password: Option<String>,
    },
    /// `LEAVEBATTLE`
    LeaveBattle,
    /// `UPDATEBATTLEINFO spectatorCount locked mapHash mapName`
    UpdateBattleInfo {
        spectator_count: u32,
        locked: bool,
        map_hash: String,
        map_name: String,
    },
    /// `SAYBATTLE msg`
    SayBattle { msg: String },
    /// `SAYBATTLEEX msg`
    SayBattleEx { msg: String },
    /// `MYBATTLESTATUS status color`
    MyBattleStatus { status: u32, color: u32 },
    /// `HANDICAP user value`
    Handicap { user: String, value: u32 },
    /// `FORCETEAMNO user team`
    ForceTeamNo { user: String, team: u8 },
    /// `FORCEALLYNO user ally`
    ForceAllyNo { user: String, ally: u8 },
    /// `FORCETEAMCOLOR user color`
    ForceTeamColor { user: String, color: u32 },
    /// `FORCESPECTATORMODE user`
    ForceSpectatorMode { user: String },
    /// `KICKFROMBATTLE user`
    KickFromBattle { user: String },
    /// `ADDBOT name status color aidll`
    AddBot {
        name: String,
        status: u32,
        color: u32,
        ai: String,
    },
    /// `REMOVEBOT name`
    RemoveBot { name: String },
    /// `UPDATEBOT name status color`
    UpdateBot {
        name: String,
        status: u32,
        color: u32,
    },
    /// `ADDSTARTRECT ally left top right bottom`
    AddStartRect {
        ally: u8,
        left: u16,
        top: u16,
        right: u16,
        bottom: u16,
    },
    /// `REMOVESTARTRECT ally`
    RemoveStartRect { ally: u8 },
    /// `SETSCRIPTTAGS key=value[\tkey=value…]`
    SetScriptTags { tags: Vec<(String, String)> },
    /// `REMOVESCRIPTTAGS key [key…]`
    RemoveScriptTags { keys: Vec<String> },
    /// `DISABLEUNITS unit [unit…]`
    DisableUnits { units: Vec<String> },
    /// `ENABLEUNITS unit [unit…]`
    EnableUnits { units: Vec<String> },
    /// `ENABLEALLUNITS`
    EnableAllUnits,
    /// `REQUESTBATTLESTATUS`
    RequestBattleStatus,
    /// `STARTBATTLE`
    StartBattle,

    // Social
    /// `FRIENDREQUEST user [msg]` (`FRIEND` is accepted as an alias)
    FriendRequest { user: String, msg: Option<String> },
    /// `ACCEPTFRIENDREQUEST user`
    AcceptFriendRequest { user: String },
    /// `DECLINEFRIENDREQUEST user`
    DeclineFriendRequest { user: String },
    /// `UNFRIEND user`
    Unfriend { user: String },
    /// `FRIENDLIST`
    FriendList,
    /// `FRIENDREQUESTLIST`
    FriendRequestList,
    /// `IGNORE user [reason]`
    Ignore { user: String, reason: Option<String> },
    /// `UNIGNORE user`
    Unignore { user: String },
    /// `IGNORELIST`
    IgnoreList,

    // Ops
    /// `KICKUSER user [reason]`
    KickUser { user: String, reason: Option<String> },
    /// `BAN target durationDays reason` — target is a username, IP or email
    Ban {
        target: String,
        duration_days: f64,
        reason: String,
    },
    /// `UNBAN target`
    Unban { target: String },
    /// `LISTBANS`
    ListBans,
    /// `BROADCAST msg`
    Broadcast { msg: String },
}

impl Command {
    /// Parse a command word and its argument string.
    pub fn parse(word: &str, args: &str) -> Result<Command> {
        match word {
            "LOGIN" => {
                // agent and the optional sys/mac ids are tab-separated
                let (username, rest) = split_word(args);
                let (password, rest) = split_word(rest);
                let (cpu, rest) = split_word(rest);
                let (local_ip, rest) = split_word(rest);
                req("LOGIN", "username", username)?;
                req("LOGIN", "password", password)?;
                req("LOGIN", "local_ip", local_ip)?;
                let mut tail = rest.split('\t');
                let agent = tail.next().unwrap_or("").trim().to_string();
                let sys_id = tail.next().unwrap_or("").trim().to_string();
                let mac_id = tail.next().unwrap_or("").trim().to_string();
                Ok(Command::Login {
                    username: username.to_string(),
                    password: password.to_string(),
                    cpu: cpu.to_string(),
                    local_ip: local_ip.to_string(),
                    agent,
                    sys_id,
                    mac_id,
                })
            }
            "REGISTER" => {
                let (username, rest) = split_word(args);
                let (password, rest) = split_word(rest);
                req("REGISTER", "username", username)?;
                req("REGISTER", "password", password)?;
                Ok(Command::Register {
                    username: username.to_string(),
                    password: password.to_string(),
                    email: opt(rest),
                })
            }
            "CONFIRMAGREEMENT" => Ok(Command::ConfirmAgreement),
            "RESETPASSWORDREQUEST" => Ok(Command::ResetPasswordRequest {
                email: req("RESETPASSWORDREQUEST", "email", args)?.to_string(),
            }),
            "RESENDVERIFICATION" => Ok(Command::ResendVerification {
                email: req("RESENDVERIFICATION", "email", args)?.to_string(),
            }),
            "VERIFY" => {
                let (email, code) = split_word(args);
                req("VERIFY", "email", email)?;
                req("VERIFY", "code", code)?;
                Ok(Command::Verify {
                    email: email.to_string(),
                    code: code.to_string(),
                })
            }
            "CHANGEPASSWORD" => {
                let (old, new) = split_word(args);
                req("CHANGEPASSWORD", "old password", old)?;
                req("CHANGEPASSWORD", "new password", new)?;
                Ok(Command::ChangePassword {
                    old: old.to_string(),
                    new: new.to_string(),
                })
            }
            "CHANGEEMAILREQUEST" => Ok(Command::ChangeEmailRequest {
                email: req("CHANGEEMAILREQUEST", "email", args)?.to_string(),
            }),
            "CHANGEEMAIL" => {
                let (email, code) = split_word(args);
                req("CHANGEEMAIL", "email", email)?;
                req("CHANGEEMAIL", "code", code)?;
                Ok(Command::ChangeEmail {
                    email: email.to_string(),
                    code: code.to_string(),
                })
            }
            "RENAMEACCOUNT" => Ok(Command::RenameAccount {
                new_name: req("RENAMEACCOUNT", "new name", args)?.to_string(),
            }),
            "EXIT" => Ok(Command::Exit { reason: opt(args) }),
            "PING" => Ok(Command::Ping),
            "MYSTATUS" => Ok(Command::MyStatus {
                status: int("MYSTATUS", "status", req("MYSTATUS", "status", args)?)?,
            }),

            "CHANNELS" => Ok(Command::Channels),
            "JOIN" => {
                let (chan, key) = split_word(args);
                req("JOIN", "channel", chan)?;
                Ok(Command::Join {
                    chan: chan.to_string(),
                    key: opt(key),
                })
            }
            "LEAVE" => Ok(Command::Leave {
                chan: req("LEAVE", "channel", args)?.to_string(),
            }),
            "SAY" | "SAYEX" => {
                let (chan, msg) = split_word(args);
                req("SAY", "channel", chan)?;
                req("SAY", "message", msg)?;
                let chan = chan.to_string();
                let msg = msg.to_string();
                Ok(if word == "SAY" {
                    Command::Say { chan, msg }
                } else {
                    Command::SayEx { chan, msg }
                })
            }
            "SAYPRIVATE" => {
                let (user, msg) = split_word(args);
                req("SAYPRIVATE", "user", user)?;
                req("SAYPRIVATE", "message", msg)?;
                Ok(Command::SayPrivate {
                    user: user.to_string(),
                    msg: msg.to_string(),
                })
            }
            "CHANNELTOPIC" => {
                let (chan, text) = split_word(args);
                req("CHANNELTOPIC", "channel", chan)?;
                req("CHANNELTOPIC", "topic", text)?;
                Ok(Command::ChannelTopic {
                    chan: chan.to_string(),
                    text: text.to_string(),
                })
            }
            "MUTE" => {
                let (chan, rest) = split_word(args);
                let (user, duration) = split_word(rest);
                req("MUTE", "channel", chan)?;
                req("MUTE", "user", user)?;
                let minutes = if duration.is_empty() {
                    None
                } else {
                    Some(duration.parse::<f64>().map_err(|_| {
                        ProtocolError::bad_args("MUTE", "duration must be a number of minutes")
                    })?)
                };
                Ok(Command::Mute {
                    chan: chan.to_string(),
                    user: user.to_string(),
                    minutes,
                })
            }
            "UNMUTE" => {
                let (chan, user) = split_word(args);
                req("UNMUTE", "channel", chan)?;
                req("UNMUTE", "user", user)?;
                Ok(Command::Unmute {
                    chan: chan.to_string(),
                    user: user.to_string(),
                })
            }
            "MUTELIST" => Ok(Command::MuteList {
                chan: req("MUTELIST", "channel", args)?.to_string(),
            }),
            "FORCELEAVECHANNEL" => {
                let (chan, rest) = split_word(args);
                let (user, reason) = split_word(rest);
                req("FORCELEAVECHANNEL", "channel", chan)?;
                req("FORCELEAVECHANNEL", "user", user)?;
                Ok(Command::ForceLeaveChannel {
                    chan: chan.to_string(),
                    user: user.to_string(),
                    reason: opt(reason),
                })
            }

            "OPENBATTLE" | "OPENBATTLEEX" => parse_open_battle(args).map(Command::OpenBattle),
            "JOINBATTLE" => {
                let (id, rest) = split_word(args);
                let (password, script_password) = split_word(rest);
                let id = int("JOINBATTLE", "battle id", req("JOINBATTLE", "battle id", id)?)?;
                let password = opt(password).filter(|p| p != "*");
                Ok(Command::JoinBattle {
                    id,
                    password,
                    script_password: opt(script_password),
                })
            }
            "LEAVEBATTLE" => Ok(Command::LeaveBattle),
            "UPDATEBATTLEINFO" => {
                // mapName is the tab-separated tail so it may contain spaces
                let (head, map_name) = match args.split_once('\t') {
                    Some((h, t)) => (h, t),
                    None => {
                        // legacy space-separated form
                        let (a, rest) = split_word(args);
                        let (b, rest) = split_word(rest);
                        let (c, rest) = split_word(rest);
                        return Ok(Command::UpdateBattleInfo {
                            spectator_count: int("UPDATEBATTLEINFO", "spectatorCount", a)?,
                            locked: b == "1",
                            map_hash: c.to_string(),
                            map_name: req("UPDATEBATTLEINFO", "mapName", rest)?.to_string(),
                        });
                    }
                };
                let (spec, rest) = split_word(head.trim_end());
                let (locked, map_hash) = split_word(rest);
                Ok(Command::UpdateBattleInfo {
                    spectator_count: int("UPDATEBATTLEINFO", "spectatorCount", spec)?,
                    locked: locked == "1",
                    map_hash: map_hash.to_string(),
                    map_name: req("UPDATEBATTLEINFO", "mapName", map_name)?.to_string(),
                })
            }
            "SAYBATTLE" => Ok(Command::SayBattle {
                msg: req("SAYBATTLE", "message", args)?.to_string(),
            }),
            "SAYBATTLEEX" => Ok(Command::SayBattleEx {
                msg: req("SAYBATTLEEX", "message", args)?.to_string(),
            }),
            "MYBATTLESTATUS" => {
                let (status, color) = split_word(args);
                Ok(Command::MyBattleStatus {
                    status: int("MYBATTLESTATUS", "status", req("MYBATTLESTATUS", "status", status)?)?,
                    color: int("MYBATTLESTATUS", "color", req("MYBATTLESTATUS", "color", color)?)?,
                })
            }
            "HANDICAP" => {
                let (user, value) = split_word(args);
                req("HANDICAP", "user", user)?;
                Ok(Command::Handicap {
                    user: user.to_string(),
                    value: int("HANDICAP", "value", value)?,
                })
            }
            "FORCETEAMNO" => {
                let (user, team) = split_word(args);
                req("FORCETEAMNO", "user", user)?;
                Ok(Command::ForceTeamNo {
                    user: user.to_string(),
                    team: int("FORCETEAMNO", "team", team)?,
                })
            }
            "FORCEALLYNO" => {
                let (user, ally) = split_word(args);
                req("FORCEALLYNO", "user", user)?;
                Ok(Command::ForceAllyNo {
                    user: user.to_string(),
                    ally: int("FORCEALLYNO", "ally", ally)?,
                })
            }
            "FORCETEAMCOLOR" => {
                let (user, color) = split_word(args);
                req("FORCETEAMCOLOR", "user", user)?;
                Ok(Command::ForceTeamColor {
                    user: user.to_string(),
                    color: int("FORCETEAMCOLOR", "color", color)?,
                })
            }
            "FORCESPECTATORMODE" => Ok(Command::ForceSpectatorMode {
                user: req("FORCESPECTATORMODE", "user", args)?.to_string(),
            }),
            "KICKFROMBATTLE" => Ok(Command::KickFromBattle {
                user: req("KICKFROMBATTLE", "user", args)?.to_string(),
            }),
            "ADDBOT" => {
                let (name, rest) = split_word(args);
                let (status, rest) = split_word(rest);
                let (color, ai) = split_word(rest);
                req("ADDBOT", "name", name)?;
                req("ADDBOT", "ai", ai)?;
                Ok(Command::AddBot {
                    name: name.to_string(),
                    status: int("ADDBOT", "status", status)?,
                    color: int("ADDBOT", "color", color)?,
                    ai: ai.to_string(),
                })
            }
            "REMOVEBOT" => Ok(Command::RemoveBot {
                name: req("REMOVEBOT", "name", args)?.to_string(),
            }),
            "UPDATEBOT" => {
                let (name, rest) = split_word(args);
                let (status, color) = split_word(rest);
                req("UPDATEBOT", "name", name)?;
                Ok(Command::UpdateBot {
                    name: name.to_string(),
                    status: int("UPDATEBOT", "status", status)?,
                    color: int("UPDATEBOT", "color", color)?,
                })
            }
            "ADDSTARTRECT" => {
                let (ally, rest) = split_word(args);
                let (left, rest) = split_word(rest);
                let (top, rest) = split_word(rest);
                let (right, bottom) = split_word(rest);
                Ok(Command::AddStartRect {
                    ally: int("ADDSTARTRECT", "ally", ally)?,
                    left: int("ADDSTARTRECT", "left", left)?,
                    top: int("ADDSTARTRECT", "top", top)?,
                    right: int("ADDSTARTRECT", "right", right)?,
                    bottom: int("ADDSTARTRECT", "bottom", bottom)?,
                })
            }
            "REMOVESTARTRECT" => Ok(Command::RemoveStartRect {
                ally: int("REMOVESTARTRECT", "ally", req("REMOVESTARTRECT", "ally", args)?)?,
            }),
            "SETSCRIPTTAGS" => {
                let mut tags = Vec::new();
                for pair in args.split('\t') {
                    let pair = pair.trim();
                    if pair.is_empty() {
                        continue;
                    }
                    let (key, value) = pair.split_once('=').ok_or_else(|| {
                        ProtocolError::bad_args("SETSCRIPTTAGS", "tags must be key=value pairs")
                    })?;
                    tags.push((key.trim().to_lowercase(), value.to_string()));
                }
                if tags.is_empty() {
                    return Err(ProtocolError::bad_args("SETSCRIPTTAGS", "missing tags"));
                }
                Ok(Command::SetScriptTags { tags })
            }
            "REMOVESCRIPTTAGS" => {
                let keys: Vec<String> = args
                    .split_whitespace()
                    .map(|k| k.to_lowercase())
                    .collect();
                if keys.is_empty() {
                    return Err(ProtocolError::bad_args("REMOVESCRIPTTAGS", "missing keys"));
                }
                Ok(Command::RemoveScriptTags { keys })
            }
            "DISABLEUNITS" | "ENABLEUNITS" => {
                let units: Vec<String> = args.split_whitespace().map(String::from).collect();
                if units.is_empty() {
                    return Err(ProtocolError::bad_args("DISABLEUNITS", "missing units"));
                }
                Ok(if word == "DISABLEUNITS" {
                    Command::DisableUnits { units }
                } else {
                    Command::EnableUnits { units }
                })
            }
            "ENABLEALLUNITS" => Ok(Command::EnableAllUnits),
            "REQUESTBATTLESTATUS" => Ok(Command::RequestBattleStatus),
            "STARTBATTLE" => Ok(Command::StartBattle),

            "FRIEND" | "FRIENDREQUEST" => {
                let (user, msg) = split_word(args);
                req("FRIENDREQUEST", "user", user)?;
                Ok(Command::FriendRequest {
                    user: user.to_string(),
                    msg: opt(msg),
                })
            }
            "ACCEPTFRIENDREQUEST" => Ok(Command::AcceptFriendRequest {
                user: req("ACCEPTFRIENDREQUEST", "user", args)?.to_string(),
            }),
            "DECLINEFRIENDREQUEST" => Ok(Command::DeclineFriendRequest {
                user: req("DECLINEFRIENDREQUEST", "user", args)?.to_string(),
            }),
            "UNFRIEND" => Ok(Command::Unfriend {
                user: req("UNFRIEND", "user", args)?.to_string(),
            }),
            "FRIENDLIST" => Ok(Command::FriendList),
            "FRIENDREQUESTLIST" => Ok(Command::FriendRequestList),
            "IGNORE" => {
                let (user, reason) = split_word(args);
                req("IGNORE", "user", user)?;
                Ok(Command::Ignore {
                    user: user.to_string(),
                    reason: opt(reason),
                })
            }
            "UNIGNORE" => Ok(Command::Unignore {
                user: req("UNIGNORE", "user", args)?.to_string(),
            }),
            "IGNORELIST" => Ok(Command::IgnoreList),

            "KICKUSER" => {
                let (user, reason) = split_word(args);
                req("KICKUSER", "user", user)?;
                Ok(Command::KickUser {
                    user: user.to_string(),
                    reason: opt(reason),
                })
            }
            "BAN" => {
                let (target, rest) = split_word(args);
                let (duration, reason) = split_word(rest);
                req("BAN", "target", target)?;
                req("BAN", "reason", reason)?;
                let duration_days = duration.parse::<f64>().map_err(|_| {
                    ProtocolError::bad_args("BAN", "duration must be a number of days")
                })?;
                Ok(Command::Ban {
                    target: target.to_string(),
                    duration_days,
                    reason: reason.to_string(),
                })
            }
            "UNBAN" => Ok(Command::Unban {
                target: req("UNBAN", "target", args)?.to_string(),
            }),
            "LISTBANS" => Ok(Command::ListBans),
            "BROADCAST" => Ok(Command::Broadcast {
                msg: req("BROADCAST", "message", args)?.to_string(),
            }),

            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }

    /// The wire name of this command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Login { .. } => "LOGIN",
            Command::Register { .. } => "REGISTER",
            Command::ConfirmAgreement => "CONFIRMAGREEMENT",
            Command::ResetPasswordRequest { .. } => "RESETPASSWORDREQUEST",
            Command::ResendVerification { .. } => "RESENDVERIFICATION",
            Command::Verify { .. } => "VERIFY",
            Command::ChangePassword { .. } => "CHANGEPASSWORD",
            Command::ChangeEmailRequest { .. } => "CHANGEEMAILREQUEST",
            Command::ChangeEmail { .. } => "CHANGEEMAIL",
            Command::RenameAccount { .. } => "RENAMEACCOUNT",
            Command::Exit { .. } => "EXIT",
            Command::Ping => "PING",
            Command::MyStatus { .. } => "MYSTATUS",
            Command::Channels => "CHANNELS",
            Command::Join { .. } => "JOIN",
            Command::Leave { .. } => "LEAVE",
            Command::Say { .. } => "SAY",
            Command::SayEx { .. } => "SAYEX",
            Command::SayPrivate { .. } => "SAYPRIVATE",
            Command::ChannelTopic { .. } => "CHANNELTOPIC",
            Command::Mute { .. } => "MUTE",
            Command::Unmute { .. } => "UNMUTE",
            Command::MuteList { .. } => "MUTELIST",
            Command::ForceLeaveChannel { .. } => "FORCELEAVECHANNEL",
            Command::OpenBattle(_) => "OPENBATTLE",
            Command::JoinBattle { .. } => "JOINBATTLE",
            Command::LeaveBattle => "LEAVEBATTLE",
            Command::UpdateBattleInfo { .. } => "UPDATEBATTLEINFO",
            Command::SayBattle { .. } => "SAYBATTLE",
            Command::SayBattleEx { .. } => "SAYBATTLEEX",
            Command::MyBattleStatus { .. } => "MYBATTLESTATUS",
            Command::Handicap { .. } => "HANDICAP",
            Command::ForceTeamNo { .. } => "FORCETEAMNO",
            Command::ForceAllyNo { .. } => "FORCEALLYNO",
            Command::ForceTeamColor { .. } => "FORCETEAMCOLOR",
            Command::ForceSpectatorMode { .. } => "FORCESPECTATORMODE",
            Command::KickFromBattle { .. } => "KICKFROMBATTLE",
            Command::AddBot { .. } => "ADDBOT",
            Command::RemoveBot { .. } => "REMOVEBOT",
            Command::UpdateBot { .. } => "UPDATEBOT",
            Command::AddStartRect { .. } => "ADDSTARTRECT",
            Command::RemoveStartRect { .. } => "REMOVESTARTRECT",
            Command::SetScriptTags { .. } => "SETSCRIPTTAGS",
            Command::RemoveScriptTags { .. } => "REMOVESCRIPTTAGS",
            Command::DisableUnits { .. } => "DISABLEUNITS",
            Command::EnableUnits { .. } => "ENABLEUNITS",
            Command::EnableAllUnits => "ENABLEALLUNITS",
            Command::RequestBattleStatus => "REQUESTBATTLESTATUS",
            Command::StartBattle => "STARTBATTLE",
            Command::FriendRequest { .. } => "FRIENDREQUEST",
            Command::AcceptFriendRequest { .. } => "ACCEPTFRIENDREQUEST",
            Command::DeclineFriendRequest { .. } => "DECLINEFRIENDREQUEST",
            Command::Unfriend { .. } => "UNFRIEND",
            Command::FriendList => "FRIENDLIST",
            Command::FriendRequestList => "FRIENDREQUESTLIST",
            Command::Ignore { .. } => "IGNORE",
            Command::Unignore { .. } => "UNIGNORE",
            Command::IgnoreList => "IGNORELIST",
            Command::KickUser { .. } => "KICKUSER",
            Command::Ban { .. } => "BAN",
            Command::Unban { .. } => "UNBAN",
            Command::ListBans => "LISTBANS",
            Command::Broadcast { .. } => "BROADCAST",
        }
    }
}

/// Parse the `OPENBATTLE` argument string.
///
/// Head fields are space-separated: `type natType password port maxplayers
/// gameHash [rank] mapHash`; the trailing tab group carries either
/// `map title game` (legacy) or `engineName engineVersion map title game`.
fn parse_open_battle(args: &str) -> Result<OpenBattle> {
    const CMD: &str = "OPENBATTLE";
    let mut groups = args.split('\t');
    let head = groups.next().unwrap_or("");
    let tail: Vec<&str> = groups.collect();

    let words: Vec<&str> = head.split(' ').filter(|w| !w.is_empty()).collect();
    if words.len() < 7 {
        return Err(ProtocolError::bad_args(CMD, "expected at least 7 fields"));
    }
    let (rank_limit, map_hash) = if words.len() >= 8 {
        (int::<u8>(CMD, "rank", words[6])?, words[7])
    } else {
        (0, words[6])
    };

    let (engine_name, engine_version, map_name, title, game_name) = match tail.len() {
        5 => (
            Some(tail[0].to_string()),
            Some(tail[1].to_string()),
            tail[2],
            tail[3],
            tail[4],
        ),
        3 => (None, None, tail[0], tail[1], tail[2]),
        n => {
            return Err(ProtocolError::bad_args(
                CMD,
                format!("expected 3 or 5 tab-separated fields, got {n}"),
            ));
        }
    };

    Ok(OpenBattle {
        replay: words[0] == "1",
        nat_type: NatType::from_wire(CMD, words[1])?,
        password: opt(words[2]).filter(|p| p != "*"),
        port: int(CMD, "port", words[3])?,
        max_players: int(CMD, "maxplayers", words[4])?,
        game_hash: words[5].to_string(),
        rank_limit,
        map_hash: map_hash.to_string(),
        engine_name,
        engine_version,
        map_name: map_name.to_string(),
        title: title.to_string(),
        game_name: game_name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_without_id() {
        let frame = Frame::parse("PING").unwrap();
        assert_eq!(frame.msg_id, None);
        assert_eq!(frame.command, Command::Ping);
    }

    #[test]
    fn frame_with_id() {
        let frame = Frame::parse("#17 PING").unwrap();
        assert_eq!(frame.msg_id, Some(17));
        assert_eq!(frame.command, Command::Ping);
    }

    #[test]
    fn bad_id_is_rejected() {
        assert!(Frame::parse("#abc PING").is_err());
    }

    #[test]
    fn empty_line_is_rejected() {
        assert!(matches!(Frame::parse(""), Err(ProtocolError::EmptyLine)));
    }

    #[test]
    fn unknown_command() {
        assert!(matches!(
            Frame::parse("FROBNICATE now"),
            Err(ProtocolError::UnknownCommand(c)) if c == "FROBNICATE"
        ));
    }

    #[test]
    fn login_with_tab_ids() {
        let frame = Frame::parse("LOGIN alice s3cret 3200 192.168.0.5 MyLobby 0.9\tsys1\tmac1").unwrap();
        match frame.command {
            Command::Login {
                username,
                password,
                cpu,
                local_ip,
                agent,
                sys_id,
                mac_id,
            } => {
                assert_eq!(username, "alice");
                assert_eq!(password, "s3cret");
                assert_eq!(cpu, "3200");
                assert_eq!(local_ip, "192.168.0.5");
                assert_eq!(agent, "MyLobby 0.9");
                assert_eq!(sys_id, "sys1");
                assert_eq!(mac_id, "mac1");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn login_without_ids() {
        let frame = Frame::parse("LOGIN alice pass 0 * agent").unwrap();
        match frame.command {
            Command::Login { sys_id, mac_id, .. } => {
                assert!(sys_id.is_empty());
                assert!(mac_id.is_empty());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn say_keeps_trailing_spaces_in_message() {
        let frame = Frame::parse("SAY main hello there  friends").unwrap();
        assert_eq!(
            frame.command,
            Command::Say {
                chan: "main".to_string(),
                msg: "hello there  friends".to_string()
            }
        );
    }

    #[test]
    fn mute_duration_is_optional() {
        let frame = Frame::parse("MUTE main mallory").unwrap();
        assert!(matches!(frame.command, Command::Mute { minutes: None, .. }));
        let frame = Frame::parse("MUTE main mallory 2.5").unwrap();
        assert!(matches!(
            frame.command,
            Command::Mute {
                minutes: Some(m), ..
            } if (m - 2.5).abs() < f64::EPSILON
        ));
    }

    #[test]
    fn open_battle_short_head_and_engine_fields() {
        let line = "OPENBATTLE 0 0 * 8452 8 0 deadbeef\tspring\t104\tDeltaSiegeDry\tMy battle\tBA";
        let frame = Frame::parse(line).unwrap();
        match frame.command {
            Command::OpenBattle(b) => {
                assert!(!b.replay);
                assert_eq!(b.nat_type, NatType::None);
                assert_eq!(b.password, None);
                assert_eq!(b.port, 8452);
                assert_eq!(b.max_players, 8);
                assert_eq!(b.game_hash, "0");
                assert_eq!(b.rank_limit, 0);
                assert_eq!(b.map_hash, "deadbeef");
                assert_eq!(b.engine_name.as_deref(), Some("spring"));
                assert_eq!(b.engine_version.as_deref(), Some("104"));
                assert_eq!(b.map_name, "DeltaSiegeDry");
                assert_eq!(b.title, "My battle");
                assert_eq!(b.game_name, "BA");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn open_battle_full_head_and_legacy_tail() {
        let line = "OPENBATTLE 1 1 hunter2 8452 16 cafe 3 beef\tSmallDivide\tNight game\tZK";
        let frame = Frame::parse(line).unwrap();
        match frame.command {
            Command::OpenBattle(b) => {
                assert!(b.replay);
                assert_eq!(b.nat_type, NatType::HolePunching);
                assert_eq!(b.password.as_deref(), Some("hunter2"));
                assert_eq!(b.rank_limit, 3);
                assert_eq!(b.map_hash, "beef");
                assert!(b.engine_name.is_none());
                assert_eq!(b.title, "Night game");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn script_tags_parse_lowercased_keys() {
        let frame = Frame::parse("SETSCRIPTTAGS GAME/StartPosType=2\tgame/mapoptions/fog=1").unwrap();
        match frame.command {
            Command::SetScriptTags { tags } => {
                assert_eq!(tags[0], ("game/startpostype".to_string(), "2".to_string()));
                assert_eq!(tags[1], ("game/mapoptions/fog".to_string(), "1".to_string()));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn join_battle_star_password_is_none() {
        let frame = Frame::parse("JOINBATTLE 3 * scriptpw").unwrap();
        assert_eq!(
            frame.command,
            Command::JoinBattle {
                id: 3,
                password: None,
                script_password: Some("scriptpw".to_string())
            }
        );
    }

    #[test]
    fn update_battle_info_tab_form() {
        let frame = Frame::parse("UPDATEBATTLEINFO 2 1 cafe\tDelta Siege Dry").unwrap();
        assert_eq!(
            frame.command,
            Command::UpdateBattleInfo {
                spectator_count: 2,
                locked: true,
                map_hash: "cafe".to_string(),
                map_name: "Delta Siege Dry".to_string()
            }
        );
    }

    #[test]
    fn friend_is_an_alias_for_friendrequest() {
        let frame = Frame::parse("FRIEND bob").unwrap();
        assert_eq!(
            frame.command,
            Command::FriendRequest {
                user: "bob".to_string(),
                msg: None
            }
        );
    }
}

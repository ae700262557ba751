//! Battle handlers: hosting, joining and in-room state.

use tas_proto::{BattleStatus, OpenBattle};
use tracing::info;

use crate::error::{HandlerError, HandlerResult};
use crate::state::{Battle, BattleId, BotSlot, Lobby, SessionId, StartRect};

/// The battle `sid` is in, or a protocol error.
fn current_battle(lobby: &Lobby, sid: SessionId) -> Result<BattleId, HandlerError> {
    lobby
        .session(sid)
        .and_then(|s| s.battle_id)
        .ok_or_else(|| HandlerError::msg("You are not in a battle"))
}

/// The battle `sid` hosts, or a protocol error.
fn hosted_battle(lobby: &Lobby, sid: SessionId) -> Result<BattleId, HandlerError> {
    let battle_id = current_battle(lobby, sid)?;
    match lobby.battles.get(&battle_id) {
        Some(battle) if battle.host == sid => Ok(battle_id),
        _ => Err(HandlerError::msg("Only the battle host can do that")),
    }
}

/// Resolve a username to a session inside the issuer's battle.
fn battle_member(
    lobby: &Lobby,
    battle_id: BattleId,
    user: &str,
) -> Result<SessionId, HandlerError> {
    let sid = lobby
        .sid_of(user)
        .ok_or_else(|| HandlerError::msg(format!("User {user} not found")))?;
    match lobby.battles.get(&battle_id) {
        Some(battle) if battle.users.contains(&sid) => Ok(sid),
        _ => Err(HandlerError::msg(format!("{user} is not in your battle"))),
    }
}

/// The `BATTLEOPENED` line describing a battle.
pub(super) fn battle_opened_line(lobby: &Lobby, battle: &Battle) -> String {
    let host_ip = lobby
        .session(battle.host)
        .map(|s| s.ip.to_string())
        .unwrap_or_else(|| "0.0.0.0".to_string());
    format!(
        "BATTLEOPENED {} {} {} {} {} {} {} {} {} {} {}\t{}\t{}\t{}\t{}",
        battle.id,
        battle.replay as u8,
        battle.nat_type as u8,
        battle.founder_name,
        host_ip,
        battle.port,
        battle.max_players,
        battle.passworded() as u8,
        battle.rank_limit,
        battle.map_hash,
        battle.engine_name,
        battle.engine_version,
        battle.map_name,
        battle.title,
        battle.game_name,
    )
}

pub(super) fn open(lobby: &mut Lobby, sid: SessionId, params: OpenBattle) -> HandlerResult {
    let username = match lobby.session(sid) {
        Some(session) => {
            if session.battle_id.is_some() {
                return Err(HandlerError::msg("You are already in a battle"));
            }
            session.username.clone()
        }
        None => return Ok(()),
    };

    let battle_id = lobby.allocate_battle_id();
    let battle = Battle::open(
        battle_id,
        sid,
        username.clone(),
        params,
        &lobby.config.latest_spring_version,
    );
    let opened = battle_opened_line(lobby, &battle);
    lobby.battles.insert(battle_id, battle);
    if let Some(session) = lobby.session_mut(sid) {
        session.battle_id = Some(battle_id);
    }

    info!(battle_id, host = %username, "Battle opened");
    lobby.send_to(sid, &format!("OPENBATTLE {battle_id}"));
    lobby.broadcast_all(&opened, Some(sid));
    lobby.send_to(sid, "REQUESTBATTLESTATUS");
    Ok(())
}

pub(super) fn join(
    lobby: &mut Lobby,
    sid: SessionId,
    battle_id: BattleId,
    password: Option<String>,
    script_password: Option<String>,
) -> HandlerResult {
    let (username, rank, already_in_battle) = match lobby.session(sid) {
        Some(session) => (
            session.username.clone(),
            session.status.rank,
            session.battle_id.is_some(),
        ),
        None => return Ok(()),
    };
    if already_in_battle {
        lobby.send_to(sid, "JOINBATTLEDENIED You are already in a battle");
        return Ok(());
    }

    let denial = {
        let Some(battle) = lobby.battles.get(&battle_id) else {
            lobby.send_to(sid, "JOINBATTLEDENIED Battle does not exist");
            return Ok(());
        };
        if battle.locked {
            Some("Battle is locked")
        } else if battle.users.len() as u32 >= battle.max_players + battle.spectator_count + 1 {
            Some("Battle is full")
        } else if battle.passworded() && battle.password != password {
            Some("Invalid password")
        } else if rank < battle.rank_limit {
            Some("Your rank is too low for this battle")
        } else {
            None
        }
    };
    if let Some(reason) = denial {
        lobby.send_to(sid, &format!("JOINBATTLEDENIED {reason}"));
        return Ok(());
    }

    let host = {
        let Some(battle) = lobby.battles.get_mut(&battle_id) else {
            return Ok(());
        };
        battle.users.insert(sid);
        battle.host
    };
    if let Some(session) = lobby.session_mut(sid) {
        session.battle_id = Some(battle_id);
        session.script_password = script_password.clone();
    }

    lobby.send_to(sid, &format!("JOINBATTLEACCEPTED {battle_id}"));

    // the host additionally learns the joiner's script password
    let joined = format!("JOINEDBATTLE {battle_id} {username}");
    let joined_for_host = match &script_password {
        Some(pw) => format!("{joined} {pw}"),
        None => joined.clone(),
    };
    let targets: Vec<SessionId> = lobby
        .sessions
        .values()
        .filter(|s| s.logged_in() && s.id != host)
        .map(|s| s.id)
        .collect();
    lobby.multicast(&targets, &joined, None);
    lobby.send_to(host, &joined_for_host);

    push_battle_state(lobby, sid, battle_id);
    lobby.send_to(sid, "REQUESTBATTLESTATUS");
    Ok(())
}

/// Send the room state (tags, units, rects, bots, statuses) to a joiner.
fn push_battle_state(lobby: &mut Lobby, sid: SessionId, battle_id: BattleId) {
    let mut lines = Vec::new();
    {
        let Some(battle) = lobby.battles.get(&battle_id) else {
            return;
        };
        if !battle.script_tags.is_empty() {
            let tags: Vec<String> = battle
                .script_tags
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            lines.push(format!("SETSCRIPTTAGS {}", tags.join("\t")));
        }
        if !battle.disabled_units.is_empty() {
            let units: Vec<&str> = battle.disabled_units.iter().map(String::as_str).collect();
            lines.push(format!("DISABLEUNITS {}", units.join(" ")));
        }
        for (&ally, rect) in &battle.start_rects {
            lines.push(format!(
                "ADDSTARTRECT {ally} {} {} {} {}",
                rect.left, rect.top, rect.right, rect.bottom
            ));
        }
        for (name, bot) in &battle.bots {
            let owner = lobby
                .session(bot.owner)
                .map(|s| s.username.clone())
                .unwrap_or_default();
            lines.push(format!(
                "ADDBOT {battle_id} {name} {owner} {} {} {}",
                bot.status.to_bits(),
                bot.color,
                bot.ai
            ));
        }
        for &member in &battle.users {
            if let Some(session) = lobby.session(member) {
                lines.push(format!(
                    "CLIENTBATTLESTATUS {} {} {}",
                    session.username,
                    session.battle_status.to_bits(),
                    session.team_color
                ));
            }
        }
    }
    for line in lines {
        lobby.send_to(sid, &line);
    }
}

pub(super) fn update_info(
    lobby: &mut Lobby,
    sid: SessionId,
    spectator_count: u32,
    locked: bool,
    map_hash: String,
    map_name: String,
) -> HandlerResult {
    let battle_id = hosted_battle(lobby, sid)?;
    let Some(battle) = lobby.battles.get_mut(&battle_id) else {
        return Ok(());
    };
    battle.spectator_count = spectator_count;
    battle.locked = locked;
    battle.map_hash = map_hash.clone();
    battle.map_name = map_name.clone();

    lobby.broadcast_all(
        &format!(
            "UPDATEBATTLEINFO {battle_id} {spectator_count} {} {map_hash} {map_name}",
            locked as u8
        ),
        None,
    );
    Ok(())
}

pub(super) fn say(lobby: &mut Lobby, sid: SessionId, msg: String, emote: bool) -> HandlerResult {
    let battle_id = current_battle(lobby, sid)?;
    let username = match lobby.session(sid) {
        Some(session) => session.username.clone(),
        None => return Ok(()),
    };
    let said = if emote { "SAIDBATTLEEX" } else { "SAIDBATTLE" };
    lobby.broadcast_battle(battle_id, &format!("{said} {username} {msg}"), None);
    Ok(())
}

pub(super) fn my_status(
    lobby: &mut Lobby,
    sid: SessionId,
    status: u32,
    color: u32,
) -> HandlerResult {
    let battle_id = current_battle(lobby, sid)?;
    let username = {
        let Some(session) = lobby.session_mut(sid) else {
            return Ok(());
        };
        session.battle_status = BattleStatus::from_bits(status);
        session.team_color = color;
        session.username.clone()
    };
    let bits = lobby
        .session(sid)
        .map(|s| s.battle_status.to_bits())
        .unwrap_or(0);
    lobby.broadcast_battle(
        battle_id,
        &format!("CLIENTBATTLESTATUS {username} {bits} {color}"),
        None,
    );
    Ok(())
}

/// Apply a host-forced change to a member's battle status and broadcast it.
fn force_status(
    lobby: &mut Lobby,
    sid: SessionId,
    user: &str,
    apply: impl FnOnce(&mut BattleStatus, &mut u32),
) -> HandlerResult {
    let battle_id = hosted_battle(lobby, sid)?;
    let target_sid = battle_member(lobby, battle_id, user)?;
    let (username, bits, color) = {
        let Some(session) = lobby.session_mut(target_sid) else {
            return Ok(());
        };
        apply(&mut session.battle_status, &mut session.team_color);
        (
            session.username.clone(),
            session.battle_status.to_bits(),
            session.team_color,
        )
    };
    lobby.broadcast_battle(
        battle_id,
        &format!("CLIENTBATTLESTATUS {username} {bits} {color}"),
        None,
    );
    Ok(())
}

pub(super) fn handicap(lobby: &mut Lobby, sid: SessionId, user: String, value: u32) -> HandlerResult {
    force_status(lobby, sid, &user, |status, _| {
        status.handicap = value.min(100) as u8;
    })
}

pub(super) fn force_team(lobby: &mut Lobby, sid: SessionId, user: String, team: u8) -> HandlerResult {
    force_status(lobby, sid, &user, |status, _| {
        status.team = team.min(15);
    })
}

pub(super) fn force_ally(lobby: &mut Lobby, sid: SessionId, user: String, ally: u8) -> HandlerResult {
    force_status(lobby, sid, &user, |status, _| {
        status.ally = ally.min(15);
    })
}

pub(super) fn force_color(
    lobby: &mut Lobby,
    sid: SessionId,
    user: String,
    color: u32,
) -> HandlerResult {
    force_status(lobby, sid, &user, |_, team_color| {
        *team_color = color;
    })
}

pub(super) fn force_spectator(lobby: &mut Lobby, sid: SessionId, user: String) -> HandlerResult {
    force_status(lobby, sid, &user, |status, _| {
        status.player = false;
    })
}

pub(super) fn kick(lobby: &mut Lobby, sid: SessionId, user: String) -> HandlerResult {
    let battle_id = hosted_battle(lobby, sid)?;
    let target_sid = battle_member(lobby, battle_id, &user)?;
    if target_sid == sid {
        return Err(HandlerError::msg("You cannot kick yourself"));
    }
    lobby.send_to(target_sid, "SERVERMSG You were kicked from the battle");
    lobby.leave_battle(target_sid);
    Ok(())
}

pub(super) fn add_bot(
    lobby: &mut Lobby,
    sid: SessionId,
    name: String,
    status: u32,
    color: u32,
    ai: String,
) -> HandlerResult {
    let battle_id = current_battle(lobby, sid)?;
    let username = match lobby.session(sid) {
        Some(session) => session.username.clone(),
        None => return Ok(()),
    };
    if !name.chars().all(|c| c.is_ascii_alphanumeric()) || name.is_empty() {
        return Err(HandlerError::msg("Invalid bot name"));
    }

    let Some(battle) = lobby.battles.get_mut(&battle_id) else {
        return Ok(());
    };
    if battle.bots.contains_key(&name) {
        return Err(HandlerError::msg(format!("Bot {name} already exists")));
    }
    let bot_status = BattleStatus::from_bits(status);
    battle.bots.insert(
        name.clone(),
        BotSlot {
            owner: sid,
            status: bot_status,
            color,
            ai: ai.clone(),
        },
    );

    lobby.broadcast_battle(
        battle_id,
        &format!(
            "ADDBOT {battle_id} {name} {username} {} {color} {ai}",
            bot_status.to_bits()
        ),
        None,
    );
    Ok(())
}

/// Bots may be manipulated by their owner or by the host.
fn may_touch_bot(lobby: &Lobby, battle_id: BattleId, sid: SessionId, name: &str) -> HandlerResult {
    let Some(battle) = lobby.battles.get(&battle_id) else {
        return Err(HandlerError::msg("You are not in a battle"));
    };
    let Some(bot) = battle.bots.get(name) else {
        return Err(HandlerError::msg(format!("Bot {name} does not exist")));
    };
    if bot.owner != sid && battle.host != sid {
        return Err(HandlerError::msg("That bot is not yours"));
    }
    Ok(())
}

pub(super) fn remove_bot(lobby: &mut Lobby, sid: SessionId, name: String) -> HandlerResult {
    let battle_id = current_battle(lobby, sid)?;
    may_touch_bot(lobby, battle_id, sid, &name)?;
    if let Some(battle) = lobby.battles.get_mut(&battle_id) {
        battle.bots.remove(&name);
    }
    lobby.broadcast_battle(battle_id, &format!("REMOVEBOT {battle_id} {name}"), None);
    Ok(())
}

pub(super) fn update_bot(
    lobby: &mut Lobby,
    sid: SessionId,
    name: String,
    status: u32,
    color: u32,
) -> HandlerResult {
    let battle_id = current_battle(lobby, sid)?;
    may_touch_bot(lobby, battle_id, sid, &name)?;
    let bits = {
        let Some(bot) = lobby
            .battles
            .get_mut(&battle_id)
            .and_then(|b| b.bots.get_mut(&name))
        else {
            return Ok(());
        };
        bot.status = BattleStatus::from_bits(status);
        bot.color = color;
        bot.status.to_bits()
    };
    lobby.broadcast_battle(
        battle_id,
        &format!("UPDATEBOT {battle_id} {name} {bits} {color}"),
        None,
    );
    Ok(())
}

pub(super) fn add_start_rect(
    lobby: &mut Lobby,
    sid: SessionId,
    ally: u8,
    left: u16,
    top: u16,
    right: u16,
    bottom: u16,
) -> HandlerResult {
    let battle_id = hosted_battle(lobby, sid)?;
    if let Some(battle) = lobby.battles.get_mut(&battle_id) {
        battle.start_rects.insert(
            ally,
            StartRect {
                left,
                top,
                right,
                bottom,
            },
        );
    }
    lobby.broadcast_battle(
        battle_id,
        &format!("ADDSTARTRECT {ally} {left} {top} {right} {bottom}"),
        Some(sid),
    );
    Ok(())
}

pub(super) fn remove_start_rect(lobby: &mut Lobby, sid: SessionId, ally: u8) -> HandlerResult {
    let battle_id = hosted_battle(lobby, sid)?;
    if let Some(battle) = lobby.battles.get_mut(&battle_id) {
        battle.start_rects.remove(&ally);
    }
    lobby.broadcast_battle(battle_id, &format!("REMOVESTARTRECT {ally}"), Some(sid));
    Ok(())
}

pub(super) fn set_script_tags(
    lobby: &mut Lobby,
    sid: SessionId,
    tags: Vec<(String, String)>,
) -> HandlerResult {
    let battle_id = hosted_battle(lobby, sid)?;
    let line = {
        let Some(battle) = lobby.battles.get_mut(&battle_id) else {
            return Ok(());
        };
        let mut parts = Vec::with_capacity(tags.len());
        for (key, value) in tags {
            parts.push(format!("{key}={value}"));
            battle.script_tags.insert(key, value);
        }
        format!("SETSCRIPTTAGS {}", parts.join("\t"))
    };
    lobby.broadcast_battle(battle_id, &line, None);
    Ok(())
}

pub(super) fn remove_script_tags(
    lobby: &mut Lobby,
    sid: SessionId,
    keys: Vec<String>,
) -> HandlerResult {
    let battle_id = hosted_battle(lobby, sid)?;
    if let Some(battle) = lobby.battles.get_mut(&battle_id) {
        for key in &keys {
            battle.script_tags.remove(key);
        }
    }
    lobby.broadcast_battle(
        battle_id,
        &format!("REMOVESCRIPTTAGS {}", keys.join(" ")),
        None,
    );
    Ok(())
}

pub(super) fn disable_units(lobby: &mut Lobby, sid: SessionId, units: Vec<String>) -> HandlerResult {
    let battle_id = hosted_battle(lobby, sid)?;
    if let Some(battle) = lobby.battles.get_mut(&battle_id) {
        battle.disabled_units.extend(units.iter().cloned());
    }
    lobby.broadcast_battle(
        battle_id,
        &format!("DISABLEUNITS {}", units.join(" ")),
        Some(sid),
    );
    Ok(())
}

pub(super) fn enable_units(lobby: &mut Lobby, sid: SessionId, units: Vec<String>) -> HandlerResult {
    let battle_id = hosted_battle(lobby, sid)?;
    if let Some(battle) = lobby.battles.get_mut(&battle_id) {
        for unit in &units {
            battle.disabled_units.remove(unit);
        }
    }
    lobby.broadcast_battle(
        battle_id,
        &format!("ENABLEUNITS {}", units.join(" ")),
        Some(sid),
    );
    Ok(())
}

pub(super) fn enable_all_units(lobby: &mut Lobby, sid: SessionId) -> HandlerResult {
    let battle_id = hosted_battle(lobby, sid)?;
    if let Some(battle) = lobby.battles.get_mut(&battle_id) {
        battle.disabled_units.clear();
    }
    lobby.broadcast_battle(battle_id, "ENABLEALLUNITS", Some(sid));
    Ok(())
}

pub(super) fn request_status(lobby: &mut Lobby, sid: SessionId) -> HandlerResult {
    let battle_id = current_battle(lobby, sid)?;
    push_battle_state(lobby, sid, battle_id);
    Ok(())
}

pub(super) fn start(lobby: &mut Lobby, sid: SessionId) -> HandlerResult {
    let battle_id = hosted_battle(lobby, sid)?;
    if let Some(battle) = lobby.battles.get_mut(&battle_id) {
        battle.in_game = true;
    }
    if let Some(session) = lobby.session_mut(sid) {
        session.status.in_game = true;
        if session.went_ingame.is_none() {
            session.went_ingame = Some(lobby_now_stamp());
        }
    }
    lobby.broadcast_client_status(sid);
    Ok(())
}

fn lobby_now_stamp() -> i64 {
    chrono::Utc::now().timestamp()
}

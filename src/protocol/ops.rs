//! Server operations: presence updates, kicks, bans and broadcasts.

use std::sync::OnceLock;

use chrono::{TimeZone, Utc};
use tracing::info;

use super::auth::valid_email;
use crate::error::{HandlerError, HandlerResult};
use crate::state::{Lobby, SessionId};

fn ipv4_like(s: &str) -> bool {
    static IP_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = IP_RE.get_or_init(|| {
        regex::Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}$").expect("ip regex")
    });
    re.is_match(s)
}

pub(super) fn my_status(lobby: &mut Lobby, sid: SessionId, status: u32) -> HandlerResult {
    let now = lobby.now();
    let (hosted_battle, in_game) = {
        let Some(session) = lobby.sessions.get_mut(&sid) else {
            return Ok(());
        };
        let was_in_game = session.status.in_game;
        session.status.apply_client_bits(status);

        // account in-game time across transitions
        if session.status.in_game && !was_in_game {
            session.went_ingame = Some(now);
        } else if !session.status.in_game
            && was_in_game
            && let Some(since) = session.went_ingame.take()
        {
            session.ingame_minutes += (now - since).max(0) / 60;
            session.refresh_status();
        }

        let hosted = session
            .battle_id
            .filter(|id| lobby_hosts(&lobby.battles, *id, sid));
        (hosted, session.status.in_game)
    };

    // the host's in-game bit drives the battle state machine
    if let Some(battle_id) = hosted_battle
        && let Some(battle) = lobby.battles.get_mut(&battle_id)
    {
        battle.in_game = in_game;
    }

    lobby.broadcast_client_status(sid);
    Ok(())
}

fn lobby_hosts(
    battles: &std::collections::HashMap<crate::state::BattleId, crate::state::Battle>,
    battle_id: crate::state::BattleId,
    sid: SessionId,
) -> bool {
    battles.get(&battle_id).is_some_and(|b| b.host == sid)
}

pub(super) async fn kick_user(
    lobby: &mut Lobby,
    sid: SessionId,
    user: String,
    reason: Option<String>,
) -> HandlerResult {
    let (issuer_name, issuer_access) = match lobby.session(sid) {
        Some(session) => (session.username.clone(), session.access),
        None => return Ok(()),
    };
    let Some(target) = lobby.session_by_name(&user) else {
        return Err(HandlerError::msg(format!("User {user} not found")));
    };
    let target_sid = target.id;
    if target.access >= issuer_access && target_sid != sid {
        return Err(HandlerError::msg(format!("You cannot kick {user}")));
    }

    let notice = match &reason {
        Some(text) => format!(
            "SERVERMSG You have been kicked from the server by <{issuer_name}>: {text}"
        ),
        None => format!("SERVERMSG You have been kicked from the server by <{issuer_name}>"),
    };
    lobby.send_to(target_sid, &notice);
    info!(target = %user, issuer = %issuer_name, "User kicked");
    lobby.remove_session(target_sid, "Kicked from server").await;
    Ok(())
}

pub(super) async fn ban(
    lobby: &mut Lobby,
    sid: SessionId,
    target: String,
    duration_days: f64,
    reason: String,
) -> HandlerResult {
    let issuer_id = match lobby.session(sid) {
        Some(session) => session.user_id,
        None => return Ok(()),
    };
    let end_date = lobby.now() + (duration_days * 86_400.0) as i64;

    // target may be an email, an address, or a username
    if valid_email(&target) {
        lobby
            .db
            .bans()
            .add(issuer_id, None, None, Some(&target), &reason, end_date)
            .await?;
    } else if ipv4_like(&target) {
        lobby
            .db
            .bans()
            .add(issuer_id, None, Some(&target), None, &reason, end_date)
            .await?;
    } else {
        let Some(record) = lobby.db.users().find_by_username(&target).await? else {
            return Err(HandlerError::msg(format!(
                "Unable to match '{target}' to a username, IP or email"
            )));
        };
        let last_ip = if record.last_ip.is_empty() {
            None
        } else {
            Some(record.last_ip.as_str())
        };
        lobby
            .db
            .bans()
            .add(
                issuer_id,
                Some(record.id),
                last_ip,
                record.email.as_deref(),
                &reason,
                end_date,
            )
            .await?;
    }

    info!(target = %target, days = duration_days, "Ban issued");
    lobby.send_to(
        sid,
        &format!("SERVERMSG Banned {target} for {duration_days} days"),
    );
    Ok(())
}

pub(super) async fn unban(lobby: &mut Lobby, sid: SessionId, target: String) -> HandlerResult {
    let mut removed = 0;
    if valid_email(&target) {
        removed += lobby.db.bans().remove_by_email(&target).await?;
    } else if ipv4_like(&target) {
        removed += lobby.db.bans().remove_by_ip(&target).await?;
    } else if let Some(record) = lobby.db.users().find_by_username(&target).await? {
        removed += lobby.db.bans().remove_by_user(record.id).await?;
        if let Some(email) = &record.email {
            removed += lobby.db.bans().remove_by_email(email).await?;
        }
        if !record.last_ip.is_empty() {
            removed += lobby.db.bans().remove_by_ip(&record.last_ip).await?;
        }
    } else {
        return Err(HandlerError::msg(format!(
            "Unable to match '{target}' to a username, IP or email"
        )));
    }

    if removed == 0 {
        return Err(HandlerError::msg(format!("No matching bans for {target}")));
    }
    lobby.send_to(
        sid,
        &format!("SERVERMSG Removed {removed} bans relating to {target}"),
    );
    Ok(())
}

pub(super) async fn list_bans(lobby: &mut Lobby, sid: SessionId) -> HandlerResult {
    let bans = lobby.db.bans().list().await?;
    if bans.is_empty() {
        lobby.send_to(sid, "SERVERMSG No active bans");
        return Ok(());
    }
    let lines: Vec<String> = bans
        .iter()
        .map(|ban| {
            let until = Utc
                .timestamp_opt(ban.end_date, 0)
                .single()
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| ban.end_date.to_string());
            format!(
                "SERVERMSG BAN user={} ip={} email={} until={} reason={} issuer={}",
                ban.username.as_deref().unwrap_or(""),
                ban.ip.as_deref().unwrap_or(""),
                ban.email.as_deref().unwrap_or(""),
                until,
                ban.reason,
                ban.issuer.as_deref().unwrap_or(""),
            )
        })
        .collect();
    for line in lines {
        lobby.send_to(sid, &line);
    }
    Ok(())
}

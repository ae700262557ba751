//! LOGIN, REGISTER and agreement confirmation.

use tracing::info;

use crate::access::Access;
use crate::error::{HandlerError, HandlerResult};
use crate::mail;
use crate::password;
use crate::state::{Lobby, SessionId, SessionState};

/// Registrations allowed per address between throttle decays.
const REGISTRATION_BURST: u32 = 5;

/// Human-readable remaining time of a ban.
fn remaining_ban_str(end_date: i64, now: i64) -> String {
    let left = end_date - now;
    if left > 900 * 86_400 {
        String::new()
    } else if left > 86_400 {
        format!("{} days remaining", left / 86_400)
    } else if left > 3_600 {
        format!("{} hours remaining", left / 3_600)
    } else {
        "less than one hour remaining".to_string()
    }
}

#[allow(clippy::too_many_arguments)]
pub(super) async fn login(
    lobby: &mut Lobby,
    sid: SessionId,
    username: String,
    wire_password: String,
    cpu: String,
    local_ip: String,
    agent: String,
    sys_id: String,
    mac_id: String,
) -> HandlerResult {
    let (ip, already_logged_in) = match lobby.session(sid) {
        Some(session) => (session.ip, session.logged_in()),
        None => return Ok(()),
    };
    if already_logged_in {
        return Err(HandlerError::msg("You are already logged in"));
    }
    if lobby.login_throttled(ip) {
        return Err(HandlerError::Denied(
            "Too many failed login attempts, please wait a minute".to_string(),
        ));
    }

    // exact-case account lookup, with a case-insensitive hint on miss
    let record = match lobby.db.users().find_by_username(&username).await? {
        Some(record) => record,
        None => {
            lobby.register_login_failure(ip);
            return match lobby.db.users().find_by_username_nocase(&username).await? {
                Some(other) => Err(HandlerError::Denied(format!(
                    "Invalid username -- did you mean '{}'",
                    other.username
                ))),
                None => Err(HandlerError::Denied("Invalid username or password".to_string())),
            };
        }
    };

    if !password::verify(&record.password, &wire_password) {
        lobby.register_login_failure(ip);
        return Err(HandlerError::Denied("Invalid username or password".to_string()));
    }

    // the observed address, unless a trusted proxy passes the real one
    let effective_ip = if lobby.hot.trusted_proxies.contains(&ip) && local_ip.parse::<std::net::IpAddr>().is_ok()
    {
        local_ip.clone()
    } else {
        ip.to_string()
    };

    let access = Access::parse(&record.access).unwrap_or_default();

    // server-ban check; stored admins are exempt
    if access != Access::Admin {
        let now = lobby.now();
        let ban = lobby
            .db
            .bans()
            .check_ban(
                Some(record.id),
                Some(effective_ip.as_str()),
                record.email.as_deref(),
                now,
            )
            .await?;
        if let Some(ban) = ban {
            lobby.register_login_failure(ip);
            return Err(HandlerError::Denied(format!(
                "You are banned: ({}), {}",
                ban.reason,
                remaining_ban_str(ban.end_date, now)
            )));
        }
    }

    // unconfirmed accounts get the agreement instead of a session
    if access == Access::Agreement {
        let agreement: Vec<String> = lobby.hot.agreement.clone();
        for line in agreement {
            lobby.send_to(sid, &format!("AGREEMENT {line}"));
        }
        lobby.send_to(sid, "AGREEMENTEND");
        if let Some(session) = lobby.session_mut(sid) {
            session.pending_agreement = Some(record.id);
        }
        return Ok(());
    }

    // evict a prior session for the same account
    if let Some(old_sid) = lobby.sid_of(&record.username) {
        lobby.send_to(old_sid, "SERVERMSG Ghosted");
        lobby.remove_session(old_sid, "Ghosted").await;
    }

    let ignores = lobby.db.users().ignored_ids(record.id).await?;
    let country = lobby.geo.country(ip);

    let Some(session) = lobby.session_mut(sid) else {
        return Ok(());
    };
    session.state = SessionState::LoggedIn;
    session.user_id = record.id;
    session.username = record.username.clone();
    session.email = record.email.clone();
    session.access = access;
    session.bot = record.bot;
    session.ingame_minutes = record.ingame_time;
    session.agent = agent.clone();
    session.cpu = cpu;
    session.sys_id = sys_id.clone();
    session.mac_id = mac_id.clone();
    session.local_ip = local_ip.clone();
    session.country = country;
    session.ignores = ignores.into_iter().collect();
    session.refresh_status();

    lobby.usernames.insert(record.username.clone(), sid);
    lobby.db_ids.insert(record.id, sid);

    lobby
        .db
        .users()
        .record_login(
            record.id,
            &effective_ip,
            &agent,
            &sys_id,
            &mac_id,
            &local_ip,
            &lobby.session(sid).map(|s| s.country.clone()).unwrap_or_default(),
        )
        .await?;

    info!(sid, user = %record.username, "Login accepted");
    lobby.send_to(sid, &format!("ACCEPTED {}", record.username));

    let motd: Vec<String> = lobby.hot.motd.clone();
    for line in motd {
        lobby.send_to(sid, &format!("MOTD {line}"));
    }

    push_world(lobby, sid);

    // announce the arrival to everyone else
    if let Some((adduser, status_line)) = presence_lines(lobby, sid) {
        lobby.broadcast_all(&adduser, Some(sid));
        lobby.broadcast_all(&status_line, Some(sid));
    }
    Ok(())
}

/// `ADDUSER` and `CLIENTSTATUS` lines describing one session.
fn presence_lines(lobby: &Lobby, sid: SessionId) -> Option<(String, String)> {
    let session = lobby.session(sid)?;
    let cpu = if session.cpu.is_empty() { "0" } else { &session.cpu };
    let adduser = if session.agent.is_empty() {
        format!(
            "ADDUSER {} {} {} {}",
            session.username, session.country, cpu, session.user_id
        )
    } else {
        format!(
            "ADDUSER {} {} {} {} {}",
            session.username, session.country, cpu, session.user_id, session.agent
        )
    };
    let status = format!(
        "CLIENTSTATUS {} {}",
        session.username,
        session.status.to_bits()
    );
    Some((adduser, status))
}

/// Push the whole current world to a fresh login.
fn push_world(lobby: &mut Lobby, sid: SessionId) {
    let others: Vec<SessionId> = lobby
        .sessions
        .values()
        .filter(|s| s.logged_in())
        .map(|s| s.id)
        .collect();
    for other in others {
        if let Some((adduser, status)) = presence_lines(lobby, other) {
            lobby.send_to(sid, &adduser);
            lobby.send_to(sid, &status);
        }
    }

    let mut battle_lines = Vec::new();
    for battle in lobby.battles.values() {
        let host_ip = lobby
            .session(battle.host)
            .map(|s| s.ip.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        battle_lines.push(format!(
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
        ));
        battle_lines.push(format!(
            "UPDATEBATTLEINFO {} {} {} {} {}",
            battle.id,
            battle.spectator_count,
            battle.locked as u8,
            battle.map_hash,
            battle.map_name,
        ));
        for &member in &battle.users {
            if member != battle.host
                && let Some(name) = lobby.session(member).map(|s| s.username.clone())
            {
                battle_lines.push(format!("JOINEDBATTLE {} {}", battle.id, name));
            }
        }
    }
    for line in battle_lines {
        lobby.send_to(sid, &line);
    }

    lobby.send_to(sid, "LOGININFOEND");
}

pub(super) async fn register(
    lobby: &mut Lobby,
    sid: SessionId,
    username: String,
    wire_password: String,
    email: Option<String>,
) -> HandlerResult {
    let (ip, already_logged_in) = match lobby.session(sid) {
        Some(session) => (session.ip, session.logged_in()),
        None => return Ok(()),
    };
    if already_logged_in {
        return Err(HandlerError::msg("You are already logged in"));
    }

    if username.len() > 20 {
        return Err(HandlerError::RegistrationDenied("Username too long".to_string()));
    }
    if username.is_empty()
        || !username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '[' | ']'))
    {
        return Err(HandlerError::RegistrationDenied("Invalid username".to_string()));
    }
    if lobby.config.censor_enabled && !lobby.hot.censor.allows(&username) {
        return Err(HandlerError::RegistrationDenied(
            "Name failed to pass profanity filter.".to_string(),
        ));
    }
    if !password::valid_wire_syntax(&wire_password) {
        return Err(HandlerError::RegistrationDenied(
            "Invalid password hash, please update your client".to_string(),
        ));
    }
    if let Some(email) = &email {
        if !valid_email(email) {
            return Err(HandlerError::RegistrationDenied(
                "Invalid email address format.".to_string(),
            ));
        }
        if lobby.db.users().find_by_email(email).await?.is_some() {
            return Err(HandlerError::RegistrationDenied(
                "Email address is already in use.".to_string(),
            ));
        }
        if let Some((domain, _)) = lobby.db.bans().check_blacklist(email).await? {
            return Err(HandlerError::RegistrationDenied(format!(
                "{domain} is blacklisted"
            )));
        }
    }
    if lobby
        .db
        .users()
        .find_by_username_nocase(&username)
        .await?
        .is_some()
    {
        return Err(HandlerError::RegistrationDenied(
            "Username is already in use.".to_string(),
        ));
    }

    let now = lobby.now();
    let ip_string = ip.to_string();
    if let Some(ban) = lobby.db.bans().check_ban(None, Some(&ip_string), None, now).await? {
        return Err(HandlerError::RegistrationDenied(format!(
            "Account registration failed: {}",
            ban.reason
        )));
    }

    let attempts = lobby.recent_registrations.entry(ip).or_insert(0);
    if *attempts >= REGISTRATION_BURST {
        return Err(HandlerError::RegistrationDenied(
            "Too many registrations from your address, please try again later".to_string(),
        ));
    }
    *attempts += 1;

    let stored = password::storage_hash(&wire_password).map_err(|_| crate::db::DbError::Hash)?;
    let user_id = lobby
        .db
        .users()
        .register(&username, &stored, &ip_string, email.as_deref(), "agreement")
        .await
        .map_err(|e| match e {
            crate::db::DbError::UserExists(_) => {
                HandlerError::RegistrationDenied("Username is already in use.".to_string())
            }
            other => HandlerError::Db(other),
        })?;

    if lobby.config.mail_from.is_some()
        && let Some(email) = &email
    {
        let outcome = lobby
            .db
            .verifications()
            .request(user_id, email, 6, "registered an account")
            .await?;
        if let crate::db::VerificationResult::Send { code, reason } = outcome {
            send_verification_mail(lobby, email, code, &reason);
        }
    }

    info!(user = %username, ip = %ip, "Account registered");
    lobby.send_to(sid, "REGISTRATIONACCEPTED");
    Ok(())
}

pub(super) async fn confirm_agreement(lobby: &mut Lobby, sid: SessionId) -> HandlerResult {
    let Some(user_id) = lobby.session(sid).and_then(|s| s.pending_agreement) else {
        return Err(HandlerError::msg("No agreement is awaiting confirmation"));
    };

    // an account with an outstanding email code waits in `fresh` until
    // it answers VERIFY after logging in
    let access = if lobby.config.mail_from.is_some()
        && lobby.db.verifications().pending_for(user_id).await?
    {
        "fresh"
    } else {
        "user"
    };

    lobby.db.users().set_access(user_id, access).await?;
    if let Some(session) = lobby.session_mut(sid) {
        session.pending_agreement = None;
    }
    info!(user_id, access, "Agreement confirmed");
    Ok(())
}

/// Queue a verification-code mail on a worker task.
pub(super) fn send_verification_mail(lobby: &Lobby, email: &str, code: i64, reason: &str) {
    let body = format!(
        "You are receiving this email because you recently {reason}.\r\n\
         Your email verification code is {code}"
    );
    mail::send_in_background(
        lobby.mailer.clone(),
        email.to_string(),
        "Lobby server verification code".to_string(),
        body,
    );
}

/// Email shape check; the full validity oracle is the delivery itself.
pub(super) fn valid_email(email: &str) -> bool {
    use std::sync::OnceLock;
    static EMAIL_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = EMAIL_RE.get_or_init(|| {
        regex::Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,6}$").expect("email regex")
    });
    re.is_match(email)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shapes() {
        assert!(valid_email("alice@x.yz"));
        assert!(valid_email("a.b+c@sub.domain.org"));
        assert!(!valid_email("missing-at.example.com"));
        assert!(!valid_email("bad@nodot"));
        assert!(!valid_email("spaces in@x.yz"));
    }

    #[test]
    fn ban_remaining_buckets() {
        let now = 1_000_000;
        assert_eq!(remaining_ban_str(now + 30, now), "less than one hour remaining");
        assert_eq!(remaining_ban_str(now + 2 * 3_600, now), "2 hours remaining");
        assert_eq!(remaining_ban_str(now + 3 * 86_400, now), "3 days remaining");
        assert_eq!(remaining_ban_str(now + 1_000 * 86_400, now), "");
    }
}

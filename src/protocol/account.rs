//! Account maintenance: password and email changes, renames, recovery.

use tracing::info;

use super::auth::{send_verification_mail, valid_email};
use crate::access::Access;
use crate::db::VerificationResult;
use crate::error::{HandlerError, HandlerResult};
use crate::mail;
use crate::password;
use crate::state::{Lobby, SessionId};

/// Renames allowed per account between throttle decays.
const RENAME_BURST: u32 = 3;

pub(super) async fn reset_password_request(
    lobby: &mut Lobby,
    sid: SessionId,
    email: String,
) -> HandlerResult {
    if lobby.config.mail_from.is_none() {
        return Err(HandlerError::msg("Password recovery by email is not enabled"));
    }
    let Some(record) = lobby.db.users().find_by_email(&email).await? else {
        return Err(HandlerError::msg(format!(
            "No user with email address {email} was found"
        )));
    };

    let (plaintext, wire) = password::generate();
    let stored = password::storage_hash(&wire).map_err(|_| crate::db::DbError::Hash)?;
    lobby.db.users().set_password(record.id, &stored).await?;

    let body = format!(
        "You are receiving this email because you recently requested to recover the account \
         <{}> at the lobby server.\r\nYour new password is {plaintext}",
        record.username
    );
    mail::send_in_background(
        lobby.mailer.clone(),
        email,
        "Lobby server account recovery".to_string(),
        body,
    );
    info!(user = %record.username, "Password reset issued");
    lobby.send_to(sid, "SERVERMSG A new password has been sent to your email address");
    Ok(())
}

pub(super) async fn resend_verification(
    lobby: &mut Lobby,
    sid: SessionId,
    email: String,
) -> HandlerResult {
    if lobby.config.mail_from.is_none() {
        return Err(HandlerError::msg("Email verification is not enabled"));
    }
    let Some(record) = lobby.db.users().find_by_email(&email).await? else {
        return Err(HandlerError::msg(format!(
            "No user with email address {email} was found"
        )));
    };

    match lobby.db.verifications().resend(record.id, &email).await? {
        VerificationResult::Send { code, reason } => {
            send_verification_mail(lobby, &email, code, &reason);
            lobby.send_to(sid, "SERVERMSG Verification code resent");
            Ok(())
        }
        VerificationResult::Refused(reason) => Err(HandlerError::msg(reason)),
    }
}

pub(super) async fn verify(
    lobby: &mut Lobby,
    sid: SessionId,
    email: String,
    code: String,
) -> HandlerResult {
    let (user_id, access) = match lobby.session(sid) {
        Some(session) => (session.user_id, session.access),
        None => return Ok(()),
    };

    match lobby.db.verifications().verify(user_id, &email, &code).await? {
        Ok(()) => {
            if access == Access::Fresh {
                lobby.db.users().set_access(user_id, "user").await?;
                if let Some(session) = lobby.session_mut(sid) {
                    session.access = Access::User;
                    session.refresh_status();
                }
                lobby.broadcast_client_status(sid);
            }
            lobby.send_to(sid, "SERVERMSG Email address verified");
            Ok(())
        }
        Err(reason) => Err(HandlerError::msg(reason)),
    }
}

pub(super) async fn change_password(
    lobby: &mut Lobby,
    sid: SessionId,
    old: String,
    new: String,
) -> HandlerResult {
    let user_id = match lobby.session(sid) {
        Some(session) => session.user_id,
        None => return Ok(()),
    };
    if !password::valid_wire_syntax(&new) {
        return Err(HandlerError::msg("Invalid password hash, please update your client"));
    }

    let Some(record) = lobby.db.users().find_by_id(user_id).await? else {
        return Err(HandlerError::msg("Account no longer exists"));
    };
    if !password::verify(&record.password, &old) {
        return Err(HandlerError::msg("Current password does not match"));
    }

    let stored = password::storage_hash(&new).map_err(|_| crate::db::DbError::Hash)?;
    lobby.db.users().set_password(user_id, &stored).await?;
    lobby.send_to(sid, "SERVERMSG Password changed");
    Ok(())
}

pub(super) async fn change_email_request(
    lobby: &mut Lobby,
    sid: SessionId,
    email: String,
) -> HandlerResult {
    if lobby.config.mail_from.is_none() {
        return Err(HandlerError::msg("Email verification is not enabled"));
    }
    let user_id = match lobby.session(sid) {
        Some(session) => session.user_id,
        None => return Ok(()),
    };
    if !valid_email(&email) {
        return Err(HandlerError::msg("Invalid email address format."));
    }
    if lobby.db.users().find_by_email(&email).await?.is_some() {
        return Err(HandlerError::msg("Email address is already in use."));
    }
    if let Some((domain, _)) = lobby.db.bans().check_blacklist(&email).await? {
        return Err(HandlerError::msg(format!("{domain} is blacklisted")));
    }

    match lobby
        .db
        .verifications()
        .request(user_id, &email, 6, "requested an email change")
        .await?
    {
        VerificationResult::Send { code, reason } => {
            send_verification_mail(lobby, &email, code, &reason);
            lobby.send_to(sid, &format!("SERVERMSG Verification code sent to {email}"));
            Ok(())
        }
        VerificationResult::Refused(reason) => Err(HandlerError::msg(reason)),
    }
}

pub(super) async fn change_email(
    lobby: &mut Lobby,
    sid: SessionId,
    email: String,
    code: String,
) -> HandlerResult {
    let user_id = match lobby.session(sid) {
        Some(session) => session.user_id,
        None => return Ok(()),
    };

    if lobby.config.mail_from.is_some()
        && let Err(reason) = lobby.db.verifications().verify(user_id, &email, &code).await?
    {
        return Err(HandlerError::msg(reason));
    }

    lobby.db.users().set_email(user_id, &email).await.map_err(|e| match e {
        crate::db::DbError::EmailExists => HandlerError::msg("Email address is already in use."),
        other => HandlerError::Db(other),
    })?;
    if let Some(session) = lobby.session_mut(sid) {
        session.email = Some(email.clone());
    }
    lobby.send_to(sid, &format!("SERVERMSG Email address changed to {email}"));
    Ok(())
}

pub(super) async fn rename_account(
    lobby: &mut Lobby,
    sid: SessionId,
    new_name: String,
) -> HandlerResult {
    let (user_id, old_name) = match lobby.session(sid) {
        Some(session) => (session.user_id, session.username.clone()),
        None => return Ok(()),
    };

    if new_name == old_name {
        return Err(HandlerError::msg("You already have that username"));
    }
    if new_name.len() > 20 {
        return Err(HandlerError::msg("Username too long"));
    }
    if new_name.is_empty()
        || !new_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '[' | ']'))
    {
        return Err(HandlerError::msg("Invalid username"));
    }
    if lobby.config.censor_enabled && !lobby.hot.censor.allows(&new_name) {
        return Err(HandlerError::msg("Name failed to pass profanity filter."));
    }

    let renames = lobby.recent_renames.entry(user_id).or_insert(0);
    if *renames >= RENAME_BURST {
        return Err(HandlerError::msg(
            "Too many recent renames, please try again later",
        ));
    }
    *renames += 1;

    // allow only a case change of one's own name to collide
    if let Some(existing) = lobby.db.users().find_by_username_nocase(&new_name).await?
        && existing.id != user_id
    {
        return Err(HandlerError::msg("Username already exists."));
    }

    lobby
        .db
        .users()
        .rename(user_id, &old_name, &new_name)
        .await
        .map_err(|e| match e {
            crate::db::DbError::UserExists(_) => HandlerError::msg("Username already exists."),
            other => HandlerError::Db(other),
        })?;

    info!(user = %old_name, new = %new_name, "Account renamed");
    lobby.send_to(
        sid,
        "SERVERMSG Your account has been renamed, reconnect with the new username",
    );
    Err(HandlerError::Disconnect("Renamed".to_string()))
}

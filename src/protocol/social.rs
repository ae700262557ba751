//! Social graph handlers: friends, friend requests and ignores.

use crate::error::{HandlerError, HandlerResult};
use crate::state::{Lobby, SessionId, UserId};

/// Resolve a username to an account id, online or not.
async fn resolve_user(lobby: &Lobby, user: &str) -> Result<UserId, HandlerError> {
    if let Some(session) = lobby.session_by_name(user) {
        return Ok(session.user_id);
    }
    match lobby.db.users().find_by_username(user).await? {
        Some(record) => Ok(record.id),
        None => Err(HandlerError::msg(format!("User {user} not found"))),
    }
}

pub(super) async fn friend_request(
    lobby: &mut Lobby,
    sid: SessionId,
    user: String,
    msg: Option<String>,
) -> HandlerResult {
    let (my_id, my_name) = match lobby.session(sid) {
        Some(session) => (session.user_id, session.username.clone()),
        None => return Ok(()),
    };
    let target_id = resolve_user(lobby, &user).await?;
    if target_id == my_id {
        return Err(HandlerError::msg("You cannot friend yourself"));
    }
    if lobby.db.users().are_friends(my_id, target_id).await? {
        return Err(HandlerError::msg(format!("You are already friends with {user}")));
    }
    if lobby.db.users().has_friend_request(my_id, target_id).await? {
        return Err(HandlerError::msg(format!(
            "You already have a pending friend request to {user}"
        )));
    }

    lobby
        .db
        .users()
        .add_friend_request(my_id, target_id, msg.as_deref())
        .await?;

    // notify the target when online
    if let Some(target_sid) = lobby.db_ids.get(&target_id).copied() {
        let line = match &msg {
            Some(text) => format!("FRIENDREQUEST {my_name} {text}"),
            None => format!("FRIENDREQUEST {my_name}"),
        };
        lobby.send_to(target_sid, &line);
    }
    Ok(())
}

pub(super) async fn accept_request(lobby: &mut Lobby, sid: SessionId, user: String) -> HandlerResult {
    let (my_id, my_name) = match lobby.session(sid) {
        Some(session) => (session.user_id, session.username.clone()),
        None => return Ok(()),
    };
    let sender_id = resolve_user(lobby, &user).await?;
    if !lobby.db.users().has_friend_request(sender_id, my_id).await? {
        return Err(HandlerError::msg(format!("No friend request from {user}")));
    }

    lobby.db.users().remove_friend_request(sender_id, my_id).await?;
    lobby.db.users().add_friend(sender_id, my_id).await?;

    lobby.send_to(sid, &format!("FRIEND {user}"));
    if let Some(sender_sid) = lobby.db_ids.get(&sender_id).copied() {
        lobby.send_to(sender_sid, &format!("FRIEND {my_name}"));
    }
    Ok(())
}

pub(super) async fn decline_request(
    lobby: &mut Lobby,
    sid: SessionId,
    user: String,
) -> HandlerResult {
    let my_id = match lobby.session(sid) {
        Some(session) => session.user_id,
        None => return Ok(()),
    };
    let sender_id = resolve_user(lobby, &user).await?;
    if lobby
        .db
        .users()
        .remove_friend_request(sender_id, my_id)
        .await?
        == 0
    {
        return Err(HandlerError::msg(format!("No friend request from {user}")));
    }
    Ok(())
}

pub(super) async fn unfriend(lobby: &mut Lobby, sid: SessionId, user: String) -> HandlerResult {
    let (my_id, my_name) = match lobby.session(sid) {
        Some(session) => (session.user_id, session.username.clone()),
        None => return Ok(()),
    };
    let target_id = resolve_user(lobby, &user).await?;
    if lobby.db.users().remove_friend(my_id, target_id).await? == 0 {
        return Err(HandlerError::msg(format!("You are not friends with {user}")));
    }
    if let Some(target_sid) = lobby.db_ids.get(&target_id).copied() {
        lobby.send_to(target_sid, &format!("UNFRIEND {my_name}"));
    }
    Ok(())
}

pub(super) async fn friend_list(lobby: &mut Lobby, sid: SessionId) -> HandlerResult {
    let my_id = match lobby.session(sid) {
        Some(session) => session.user_id,
        None => return Ok(()),
    };
    let friends = lobby.db.users().friend_list(my_id).await?;
    lobby.send_to(sid, "FRIENDLISTBEGIN");
    for (_, name) in friends {
        lobby.send_to(sid, &format!("FRIENDLIST {name}"));
    }
    lobby.send_to(sid, "FRIENDLISTEND");
    Ok(())
}

pub(super) async fn friend_request_list(lobby: &mut Lobby, sid: SessionId) -> HandlerResult {
    let my_id = match lobby.session(sid) {
        Some(session) => session.user_id,
        None => return Ok(()),
    };
    let requests = lobby.db.users().friend_requests_for(my_id).await?;
    lobby.send_to(sid, "FRIENDREQUESTLISTBEGIN");
    for (_, name, msg) in requests {
        let line = match msg {
            Some(text) => format!("FRIENDREQUESTLIST {name} {text}"),
            None => format!("FRIENDREQUESTLIST {name}"),
        };
        lobby.send_to(sid, &line);
    }
    lobby.send_to(sid, "FRIENDREQUESTLISTEND");
    Ok(())
}

pub(super) async fn ignore(
    lobby: &mut Lobby,
    sid: SessionId,
    user: String,
    reason: Option<String>,
) -> HandlerResult {
    let my_id = match lobby.session(sid) {
        Some(session) => session.user_id,
        None => return Ok(()),
    };
    let target_id = resolve_user(lobby, &user).await?;
    if target_id == my_id {
        return Err(HandlerError::msg("You cannot ignore yourself"));
    }
    if lobby.db.users().is_ignored(my_id, target_id).await? {
        return Err(HandlerError::msg(format!("You are already ignoring {user}")));
    }

    lobby
        .db
        .users()
        .add_ignore(my_id, target_id, reason.as_deref())
        .await?;
    if let Some(session) = lobby.session_mut(sid) {
        session.ignores.insert(target_id);
    }
    lobby.send_to(sid, &format!("SERVERMSG Ignoring {user}"));
    Ok(())
}

pub(super) async fn unignore(lobby: &mut Lobby, sid: SessionId, user: String) -> HandlerResult {
    let my_id = match lobby.session(sid) {
        Some(session) => session.user_id,
        None => return Ok(()),
    };
    let target_id = resolve_user(lobby, &user).await?;
    if lobby.db.users().remove_ignore(my_id, target_id).await? == 0 {
        return Err(HandlerError::msg(format!("You are not ignoring {user}")));
    }
    if let Some(session) = lobby.session_mut(sid) {
        session.ignores.remove(&target_id);
    }
    lobby.send_to(sid, &format!("SERVERMSG No longer ignoring {user}"));
    Ok(())
}

pub(super) async fn ignore_list(lobby: &mut Lobby, sid: SessionId) -> HandlerResult {
    let my_id = match lobby.session(sid) {
        Some(session) => session.user_id,
        None => return Ok(()),
    };
    let entries = lobby.db.users().ignore_list(my_id).await?;
    lobby.send_to(sid, "IGNORELISTBEGIN");
    for (_, name, reason) in entries {
        let line = match reason {
            Some(text) => format!("IGNORELIST {name} {text}"),
            None => format!("IGNORELIST {name}"),
        };
        lobby.send_to(sid, &line);
    }
    lobby.send_to(sid, "IGNORELISTEND");
    Ok(())
}

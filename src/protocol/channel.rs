//! Channel handlers: join/leave, chat, topic and moderation.

use tracing::info;

use crate::access::ChannelRank;
use crate::error::{HandlerError, HandlerResult};
use crate::state::{Lobby, MuteEntry, SessionId, Topic, UserId};

/// Members listed per `CLIENTS` line.
const CLIENTS_PER_LINE: usize = 10;
/// History lines replayed to a joiner.
const HISTORY_REPLAY_LIMIT: i64 = 50;

fn valid_channel_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 20
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '[' | ']'))
}

/// The issuer's `(user_id, username, rank)` in a channel, if it exists.
fn issuer_in_channel(
    lobby: &Lobby,
    sid: SessionId,
    chan: &str,
) -> Option<(UserId, String, ChannelRank)> {
    let session = lobby.session(sid)?;
    let channel = lobby.channels.get(chan)?;
    Some((
        session.user_id,
        session.username.clone(),
        channel.rank(session.access, session.user_id),
    ))
}

pub(super) async fn join(
    lobby: &mut Lobby,
    sid: SessionId,
    chan: String,
    key: Option<String>,
) -> HandlerResult {
    if !valid_channel_name(&chan) {
        lobby.send_to(sid, &format!("JOINFAILED {chan} Invalid channel name"));
        return Ok(());
    }
    join_one(lobby, sid, &chan, key.as_deref()).await?;

    // joins into a forward source transparently enter the targets too
    let forwards: Vec<String> = lobby
        .channels
        .get(&chan)
        .map(|c| c.forwards.clone())
        .unwrap_or_default();
    for target in forwards {
        join_one(lobby, sid, &target, None).await?;
    }
    Ok(())
}

/// Result of phase one of a join: the channel-map mutation.
enum JoinOutcome {
    Already,
    Failed(String),
    Joined {
        channel_id: i64,
        registered: bool,
        store_history: bool,
        topic: Option<Topic>,
        member_sids: Vec<SessionId>,
    },
}

async fn join_one(lobby: &mut Lobby, sid: SessionId, chan: &str, key: Option<&str>) -> HandlerResult {
    let (user_id, username, access) = match lobby.session(sid) {
        Some(session) => (session.user_id, session.username.clone(), session.access),
        None => return Ok(()),
    };
    let now = lobby.now();

    lobby.get_or_create_channel(chan);
    let outcome = {
        let Some(channel) = lobby.channels.get_mut(chan) else {
            return Ok(());
        };
        if channel.members.contains(&sid) {
            JoinOutcome::Already
        } else {
            let rank = channel.rank(access, user_id);
            let wrong_key = matches!(&channel.key, Some(k) if key != Some(k.as_str()));
            if wrong_key && rank < ChannelRank::Op {
                JoinOutcome::Failed("Channel is locked".to_string())
            } else if channel.is_banned(user_id, now) && rank < ChannelRank::Op {
                let reason = channel
                    .bans
                    .get(&user_id)
                    .and_then(|b| b.reason.clone())
                    .unwrap_or_else(|| "You are banned from the channel".to_string());
                JoinOutcome::Failed(reason)
            } else {
                channel.members.insert(sid);
                JoinOutcome::Joined {
                    channel_id: channel.id,
                    registered: channel.registered(),
                    store_history: channel.store_history,
                    topic: channel.topic.clone(),
                    member_sids: channel.members.iter().copied().collect(),
                }
            }
        }
    };

    let (channel_id, registered, store_history, topic, member_sids) = match outcome {
        JoinOutcome::Already => return Ok(()),
        JoinOutcome::Failed(reason) => {
            lobby.send_to(sid, &format!("JOINFAILED {chan} {reason}"));
            return Ok(());
        }
        JoinOutcome::Joined {
            channel_id,
            registered,
            store_history,
            topic,
            member_sids,
        } => (channel_id, registered, store_history, topic, member_sids),
    };

    let member_names: Vec<String> = member_sids
        .iter()
        .filter_map(|member| lobby.sessions.get(member).map(|s| s.username.clone()))
        .collect();

    if let Some(session) = lobby.session_mut(sid) {
        session.channels.insert(chan.to_string());
    }

    lobby.send_to(sid, &format!("JOIN {chan}"));
    if let Some(topic) = &topic {
        lobby.send_to(sid, &format!("CHANNELTOPIC {chan} {} {}", topic.set_by, topic.text));
    }
    for chunk in member_names.chunks(CLIENTS_PER_LINE) {
        lobby.send_to(sid, &format!("CLIENTS {chan} {}", chunk.join(" ")));
    }
    lobby.broadcast_channel(chan, &format!("JOINED {chan} {username}"), Some(sid));

    if registered {
        lobby.db.channels().record_use(channel_id).await?;
        if store_history {
            let rows = lobby
                .db
                .channels()
                .recent_history(channel_id, HISTORY_REPLAY_LIMIT)
                .await?;
            for row in rows {
                let said = if row.ex_msg { "SAIDEX" } else { "SAID" };
                lobby.send_to(sid, &format!("{said} {chan} {} {}", row.username, row.msg));
            }
        }
    }
    Ok(())
}

pub(super) fn leave(lobby: &mut Lobby, sid: SessionId, chan: String) -> HandlerResult {
    let username = match lobby.session(sid) {
        Some(session) => session.username.clone(),
        None => return Ok(()),
    };
    let Some(channel) = lobby.channels.get_mut(&chan) else {
        return Err(HandlerError::msg(format!("You are not in channel {chan}")));
    };
    if !channel.members.remove(&sid) {
        return Err(HandlerError::msg(format!("You are not in channel {chan}")));
    }
    channel.antispam.forget(sid);
    let gone = !channel.registered() && channel.members.is_empty();
    if gone {
        lobby.channels.remove(&chan);
    }
    if let Some(session) = lobby.session_mut(sid) {
        session.channels.remove(&chan);
    }
    lobby.broadcast_channel(&chan, &format!("LEFT {chan} {username}"), None);
    Ok(())
}

pub(super) async fn say(
    lobby: &mut Lobby,
    sid: SessionId,
    chan: String,
    msg: String,
    emote: bool,
) -> HandlerResult {
    let (user_id, username) = match lobby.session(sid) {
        Some(session) => (session.user_id, session.username.clone()),
        None => return Ok(()),
    };
    let now = lobby.now();
    let mono = lobby.mono_secs();
    let censor_enabled = lobby.config.censor_enabled;

    let Some(channel) = lobby.channels.get_mut(&chan) else {
        return Err(HandlerError::msg(format!("You are not in channel {chan}")));
    };
    if !channel.members.contains(&sid) {
        return Err(HandlerError::msg(format!("You are not in channel {chan}")));
    }
    if channel.is_muted(user_id, now) {
        return Err(HandlerError::msg(format!("You are muted in {chan}")));
    }
    if censor_enabled && channel.censor && !lobby.hot.censor.allows(&msg) {
        return Err(HandlerError::msg(
            "Your message was blocked by the language filter",
        ));
    }

    // the message that trips the scorer is swallowed by the mute
    if channel.antispam.record(sid, msg.len(), mono) {
        let duration = channel.antispam.settings.duration_secs;
        let quiet = channel.antispam.settings.quiet;
        apply_mute(
            lobby,
            &chan,
            user_id,
            Some(now + duration),
            Some("spamming"),
        )
        .await?;
        if !quiet {
            announce_mute(
                lobby,
                &chan,
                &format!("<{username}> has been muted for spamming (auto-mute, {duration}s)"),
            );
        }
        info!(chan = %chan, user = %username, "Anti-spam mute");
        return Ok(());
    }

    let channel_id = channel.id;
    let log_history = channel.store_history && channel.registered();

    let said = if emote { "SAIDEX" } else { "SAID" };
    lobby.broadcast_channel(&chan, &format!("{said} {chan} {username} {msg}"), None);

    if log_history {
        lobby
            .db
            .channels()
            .append_history(channel_id, user_id, &msg, emote)
            .await?;
    }
    Ok(())
}

pub(super) fn say_private(
    lobby: &mut Lobby,
    sid: SessionId,
    user: String,
    msg: String,
) -> HandlerResult {
    let (sender_id, sender_name) = match lobby.session(sid) {
        Some(session) => (session.user_id, session.username.clone()),
        None => return Ok(()),
    };
    let Some(target_sid) = lobby.sid_of(&user) else {
        return Err(HandlerError::msg(format!("User {user} not found")));
    };

    // echo to the sender first so the #id lands on it
    lobby.send_to(sid, &format!("SAYPRIVATE {user} {msg}"));

    let ignoring = lobby
        .session(target_sid)
        .is_some_and(|target| target.ignores.contains(&sender_id));
    if !ignoring {
        lobby.send_to(target_sid, &format!("SAIDPRIVATE {sender_name} {msg}"));
    }
    Ok(())
}

pub(super) async fn topic(
    lobby: &mut Lobby,
    sid: SessionId,
    chan: String,
    text: String,
) -> HandlerResult {
    let Some((user_id, username, rank)) = issuer_in_channel(lobby, sid, &chan) else {
        return Err(HandlerError::msg(format!("Channel {chan} does not exist")));
    };
    if rank < ChannelRank::Op {
        return Err(HandlerError::msg(
            "You do not have permission to set the topic",
        ));
    }

    let now = lobby.now();
    let cleared = text == "*";
    let Some(channel) = lobby.channels.get_mut(&chan) else {
        return Ok(());
    };
    channel.topic = if cleared {
        None
    } else {
        Some(Topic {
            text: text.clone(),
            set_by: username.clone(),
            set_at: now,
        })
    };
    let channel_id = channel.id;
    let registered = channel.registered();

    if registered {
        let stored = if cleared { "" } else { text.as_str() };
        lobby.db.channels().set_topic(channel_id, stored, user_id).await?;
    }
    lobby.broadcast_channel(&chan, &format!("CHANNELTOPIC {chan} {username} {text}"), None);
    Ok(())
}

/// Record a mute in channel state and, for registered channels, the store.
pub(crate) async fn apply_mute(
    lobby: &mut Lobby,
    chan: &str,
    user_id: UserId,
    expires: Option<i64>,
    reason: Option<&str>,
) -> HandlerResult {
    let Some(channel) = lobby.channels.get_mut(chan) else {
        return Ok(());
    };
    channel.mutes.insert(
        user_id,
        MuteEntry {
            expires,
            reason: reason.map(String::from),
        },
    );
    let channel_id = channel.id;
    if channel.registered() {
        lobby
            .db
            .channels()
            .add_mute(channel_id, 0, user_id, expires, reason)
            .await?;
    }
    Ok(())
}

/// Announce a moderation event to the channel.
pub(crate) fn announce_mute(lobby: &mut Lobby, chan: &str, text: &str) {
    lobby.broadcast_channel(chan, &format!("CHANNELMESSAGE {chan} {text}"), None);
}

pub(super) async fn mute(
    lobby: &mut Lobby,
    sid: SessionId,
    chan: String,
    user: String,
    minutes: Option<f64>,
) -> HandlerResult {
    let Some((_, issuer_name, rank)) = issuer_in_channel(lobby, sid, &chan) else {
        return Err(HandlerError::msg(format!("Channel {chan} does not exist")));
    };
    if rank < ChannelRank::Op {
        return Err(HandlerError::msg("You do not have permission to mute users"));
    }
    let Some(target) = lobby.session_by_name(&user) else {
        return Err(HandlerError::msg(format!("User {user} not found")));
    };
    let target_id = target.user_id;
    let target_access = target.access;
    if let Some(channel) = lobby.channels.get(&chan)
        && channel.rank(target_access, target_id) >= rank
    {
        return Err(HandlerError::msg(format!("{user} outranks you in {chan}")));
    }

    // under a minute means indefinite
    let now = lobby.now();
    let expires = match minutes {
        Some(m) if m * 60.0 >= 1.0 => Some(now + (m * 60.0) as i64),
        _ => None,
    };
    apply_mute(lobby, &chan, target_id, expires, Some("muted")).await?;
    announce_mute(lobby, &chan, &format!("<{user}> muted by <{issuer_name}>"));
    Ok(())
}

pub(super) async fn unmute(
    lobby: &mut Lobby,
    sid: SessionId,
    chan: String,
    user: String,
) -> HandlerResult {
    let Some((_, issuer_name, rank)) = issuer_in_channel(lobby, sid, &chan) else {
        return Err(HandlerError::msg(format!("Channel {chan} does not exist")));
    };
    if rank < ChannelRank::Op {
        return Err(HandlerError::msg("You do not have permission to unmute users"));
    }
    let Some(target_id) = lobby
        .session_by_name(&user)
        .map(|s| s.user_id)
    else {
        return Err(HandlerError::msg(format!("User {user} not found")));
    };

    let Some(channel) = lobby.channels.get_mut(&chan) else {
        return Ok(());
    };
    if channel.mutes.remove(&target_id).is_none() {
        return Err(HandlerError::msg(format!("{user} is not muted in {chan}")));
    }
    let channel_id = channel.id;
    if channel.registered() {
        lobby.db.channels().remove_mute(channel_id, target_id).await?;
    }
    announce_mute(lobby, &chan, &format!("<{user}> unmuted by <{issuer_name}>"));
    Ok(())
}

pub(super) async fn mute_list(lobby: &mut Lobby, sid: SessionId, chan: String) -> HandlerResult {
    let Some(channel) = lobby.channels.get(&chan) else {
        return Err(HandlerError::msg(format!("Channel {chan} does not exist")));
    };
    let now = lobby.now();
    let entries: Vec<(UserId, Option<i64>)> = channel
        .mutes
        .iter()
        .map(|(&user_id, entry)| (user_id, entry.expires))
        .collect();

    lobby.send_to(sid, &format!("MUTELISTBEGIN {chan}"));
    for (user_id, expires) in entries {
        let Some(username) = lobby.username_of(user_id).await else {
            continue;
        };
        let remaining = match expires {
            Some(expiry) => format!("{}", (expiry - now).max(0)),
            None => "indefinite".to_string(),
        };
        lobby.send_to(sid, &format!("MUTELIST {username} {remaining}"));
    }
    lobby.send_to(sid, "MUTELISTEND");
    Ok(())
}

pub(super) fn channels(lobby: &mut Lobby, sid: SessionId) -> HandlerResult {
    let listing: Vec<String> = lobby
        .channels
        .values()
        .map(|channel| {
            let topic = channel
                .topic
                .as_ref()
                .map(|t| format!(" {}", t.text))
                .unwrap_or_default();
            format!("CHANNEL {} {}{topic}", channel.name, channel.members.len())
        })
        .collect();
    for line in listing {
        lobby.send_to(sid, &line);
    }
    lobby.send_to(sid, "ENDOFCHANNELS");
    Ok(())
}

pub(super) fn force_leave(
    lobby: &mut Lobby,
    sid: SessionId,
    chan: String,
    user: String,
    reason: Option<String>,
) -> HandlerResult {
    let Some((_, issuer_name, rank)) = issuer_in_channel(lobby, sid, &chan) else {
        return Err(HandlerError::msg(format!("Channel {chan} does not exist")));
    };
    if rank < ChannelRank::Op {
        return Err(HandlerError::msg(
            "You do not have permission to kick users from the channel",
        ));
    }
    let Some(target) = lobby.session_by_name(&user) else {
        return Err(HandlerError::msg(format!("User {user} not found")));
    };
    let target_sid = target.id;
    let target_rank = lobby
        .channels
        .get(&chan)
        .map(|c| c.rank(target.access, target.user_id))
        .unwrap_or(ChannelRank::Member);
    if target_rank >= rank {
        return Err(HandlerError::msg(format!("{user} outranks you in {chan}")));
    }

    let Some(channel) = lobby.channels.get_mut(&chan) else {
        return Ok(());
    };
    if !channel.members.remove(&target_sid) {
        return Err(HandlerError::msg(format!("{user} is not in {chan}")));
    }
    channel.antispam.forget(target_sid);
    if let Some(session) = lobby.session_mut(target_sid) {
        session.channels.remove(&chan);
    }

    let reason_text = reason.unwrap_or_default();
    lobby.send_to(
        target_sid,
        &format!("FORCELEAVECHANNEL {chan} {issuer_name} {reason_text}"),
    );
    lobby.broadcast_channel(
        &chan,
        &format!("LEFT {chan} {user} kicked from channel by <{issuer_name}>"),
        Some(target_sid),
    );
    Ok(())
}

//! ChanServ - the channel administration service.
//!
//! A static session bound at boot with `session_id = 0`. It owns no
//! socket: the dispatcher delivers its `SAID`/`SAIDPRIVATE` lines into
//! the lobby's service inbox, and its reactions re-enter the dispatcher
//! as ordinary commands, so there is exactly one delivery code path.

use tracing::info;

use crate::access::{Access, ChannelRank};
use crate::protocol::{announce_mute, apply_mute};
use crate::state::{CHANSERV_SID, Lobby, Session, SessionState, Topic, UserId};

/// The service account name.
pub const CHANSERV: &str = "ChanServ";

/// Bind the static ChanServ session and auto-join registered channels.
pub fn install(lobby: &mut Lobby) {
    let now = lobby.now();
    let mut session = Session::new(
        CHANSERV_SID,
        "127.0.0.1:0".parse().expect("loopback address"),
        "??".to_string(),
        crate::state::Outbound::Service,
        now,
    );
    session.is_static = true;
    session.state = SessionState::LoggedIn;
    session.username = CHANSERV.to_string();
    session.access = Access::Admin;
    session.bot = true;
    session.refresh_status();

    let registered: Vec<String> = lobby
        .channels
        .values()
        .filter(|c| c.registered())
        .map(|c| c.name.clone())
        .collect();
    for name in &registered {
        if let Some(channel) = lobby.channels.get_mut(name) {
            channel.members.insert(CHANSERV_SID);
        }
        session.channels.insert(name.clone());
    }

    lobby.usernames.insert(CHANSERV.to_string(), CHANSERV_SID);
    lobby.sessions.insert(CHANSERV_SID, session);
    info!(channels = registered.len(), "ChanServ bound");
}

/// React to one line delivered to the service session.
pub async fn deliver(lobby: &mut Lobby, line: &str) {
    let (kind, rest) = match line.split_once(' ') {
        Some(split) => split,
        None => return,
    };

    let (chan, user, text) = match kind {
        "SAID" | "SAIDEX" => {
            let Some((chan, rest)) = rest.split_once(' ') else {
                return;
            };
            let Some((user, text)) = rest.split_once(' ') else {
                return;
            };
            (Some(chan.to_string()), user.to_string(), text.to_string())
        }
        "SAIDPRIVATE" => {
            let Some((user, text)) = rest.split_once(' ') else {
                return;
            };
            (None, user.to_string(), text.to_string())
        }
        _ => return,
    };

    if user == CHANSERV {
        return;
    }
    let Some(command_text) = text.strip_prefix('!') else {
        return;
    };

    if command_text.trim().eq_ignore_ascii_case("help") {
        for help_line in help_lines(&user) {
            say_private(lobby, &user, &help_line).await;
        }
        return;
    }

    let (cmd, chan, args) = parse_command(command_text, chan);
    let Some(chan) = chan else {
        say_private(lobby, &user, "You must specify a channel, e.g. !info #main").await;
        return;
    };

    if let Some(response) = handle_command(lobby, &chan, &user, &cmd, args.as_deref()).await {
        say_private(lobby, &user, &response).await;
    }
}

/// Split `cmd [#chan] [args…]`, falling back to the channel spoken in.
fn parse_command(text: &str, default_chan: Option<String>) -> (String, Option<String>, Option<String>) {
    let mut chan = default_chan;
    let (cmd, rest) = match text.split_once(' ') {
        Some((cmd, rest)) => (cmd.to_lowercase(), rest.trim()),
        None => (text.trim().to_lowercase(), ""),
    };
    let args = if let Some(tail) = rest.strip_prefix('#') {
        match tail.split_once(' ') {
            Some((chan_name, args)) => {
                chan = Some(chan_name.to_string());
                Some(args.to_string())
            }
            None => {
                chan = Some(tail.to_string());
                None
            }
        }
    } else if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    };
    (cmd, chan, args)
}

fn help_lines(user: &str) -> Vec<String> {
    vec![
        format!("Hello, {user}!"),
        "I am the automated channel service bot.".to_string(),
        "Commands: !help !info !topic !register !unregister !changefounder".to_string(),
        "!spamprotection !spamsettings !op !deop !kick !lock !unlock".to_string(),
        "!mute !unmute !mutelist !chanmsg".to_string(),
        "If you want to register a new channel, please contact a server moderator!".to_string(),
    ]
}

/// Reply privately as ChanServ, through the ordinary dispatcher path.
async fn say_private(lobby: &mut Lobby, user: &str, text: &str) {
    crate::protocol::handle_line(lobby, CHANSERV_SID, &format!("SAYPRIVATE {user} {text}")).await;
}

/// The requester's effective rank in a channel.
fn requester_rank(lobby: &Lobby, chan: &str, user: &str) -> (Option<UserId>, ChannelRank) {
    let Some(session) = lobby.session_by_name(user) else {
        return (None, ChannelRank::Member);
    };
    let rank = lobby
        .channels
        .get(chan)
        .map(|c| c.rank(session.access, session.user_id))
        .unwrap_or_else(|| ChannelRank::effective(session.access, false, false));
    (Some(session.user_id), rank)
}

async fn handle_command(
    lobby: &mut Lobby,
    chan: &str,
    user: &str,
    cmd: &str,
    args: Option<&str>,
) -> Option<String> {
    let (requester_id, rank) = requester_rank(lobby, chan, user);
    let requester_id = requester_id?;
    let exists = lobby.channels.contains_key(chan);

    // registration is special: it may target a channel ChanServ is not in
    if cmd == "register" {
        if rank < ChannelRank::Mod {
            return Some(format!(
                "#{chan}: You must contact one of the server moderators to register a channel"
            ));
        }
        let founder_name = args.unwrap_or(user).split(' ').next().unwrap_or(user);
        return Some(register_channel(lobby, chan, user, founder_name).await);
    }

    if !exists {
        return Some(format!("#{chan} does not exist"));
    }

    match cmd {
        "info" => {
            let channel = lobby.channels.get(chan)?;
            let founder = match channel.founder {
                Some(id) => match lobby.username_of(id).await {
                    Some(name) => format!("Founder is <{name}>"),
                    None => "Founder is unknown".to_string(),
                },
                None => "No founder is registered".to_string(),
            };
            let ops = if channel.ops.is_empty() {
                "no operators are registered".to_string()
            } else {
                format!("{} registered operator(s)", channel.ops.len())
            };
            let users = channel.members.len();
            let antispam = if channel.antispam.enabled { "on" } else { "off" };
            Some(format!(
                "#{chan} info: Anti-spam protection is {antispam}. {founder}, {ops}. {users} users currently in the channel."
            ))
        }
        "topic" => {
            if rank < ChannelRank::Op {
                return Some(format!("#{chan}: You do not have permission to set the topic"));
            }
            let text = args.unwrap_or("*").to_string();
            let now = lobby.now();
            let (channel_id, registered) = {
                let channel = lobby.channels.get_mut(chan)?;
                channel.topic = if text == "*" {
                    None
                } else {
                    Some(Topic {
                        text: text.clone(),
                        set_by: CHANSERV.to_string(),
                        set_at: now,
                    })
                };
                (channel.id, channel.registered())
            };
            if registered {
                let stored = if text == "*" { "" } else { text.as_str() };
                if let Err(e) = lobby.db.channels().set_topic(channel_id, stored, requester_id).await {
                    return Some(format!("#{chan}: Failed to store topic: {e}"));
                }
            }
            lobby.broadcast_channel(chan, &format!("CHANNELTOPIC {chan} {CHANSERV} {text}"), None);
            Some(format!("#{chan}: Topic changed"))
        }
        "unregister" => {
            if rank < ChannelRank::Founder {
                return Some(format!(
                    "#{chan}: You must contact a server moderator or the channel owner to unregister a channel"
                ));
            }
            if let Some(channel) = lobby.channels.get_mut(chan) {
                channel.founder = None;
                channel.ops.clear();
            }
            if let Err(e) = lobby.db.channels().unregister(chan).await {
                return Some(format!("#{chan}: Failed to unregister: {e}"));
            }
            announce_mute(lobby, chan, "Channel has been unregistered");
            crate::protocol::handle_line(lobby, CHANSERV_SID, &format!("LEAVE {chan}")).await;
            Some(format!("#{chan}: Successfully unregistered."))
        }
        "changefounder" => {
            if rank < ChannelRank::Founder {
                return Some(format!(
                    "#{chan}: You must contact a server moderator or the channel owner to change the founder"
                ));
            }
            let Some(new_founder) = args else {
                return Some(format!("#{chan}: You must specify a new founder"));
            };
            let target = match lobby.db.users().find_by_username(new_founder).await {
                Ok(Some(record)) => record,
                _ => return Some(format!("#{chan}: User <{new_founder}> not found")),
            };
            let channel_id = {
                let channel = lobby.channels.get_mut(chan)?;
                channel.founder = Some(target.id);
                channel.id
            };
            if let Err(e) = lobby.db.channels().set_founder(channel_id, target.id).await {
                return Some(format!("#{chan}: Failed to store founder: {e}"));
            }
            announce_mute(
                lobby,
                chan,
                &format!("Founder has been changed to <{new_founder}>"),
            );
            Some(format!("#{chan}: Successfully changed founder to <{new_founder}>"))
        }
        "spamprotection" => {
            match args {
                Some("on") | Some("off") => {
                    if rank < ChannelRank::Founder {
                        return Some(format!(
                            "#{chan}: You do not have permission to change spam protection"
                        ));
                    }
                    let enable = args == Some("on");
                    let channel_id = {
                        let channel = lobby.channels.get_mut(chan)?;
                        channel.antispam.enabled = enable;
                        channel.id
                    };
                    if lobby.channels.get(chan).is_some_and(|c| c.registered())
                        && let Err(e) = lobby.db.channels().set_antispam(channel_id, enable).await
                    {
                        return Some(format!("#{chan}: Failed to store setting: {e}"));
                    }
                    let state = if enable { "enabled" } else { "disabled" };
                    announce_mute(
                        lobby,
                        chan,
                        &format!("Anti-spam protection was {state} by <{user}>"),
                    );
                    Some(format!("#{chan}: Anti-spam protection is {state}"))
                }
                _ => {
                    let channel = lobby.channels.get(chan)?;
                    let status = if channel.antispam.enabled {
                        format!("on (settings: {})", channel.antispam.describe())
                    } else {
                        "off".to_string()
                    };
                    Some(format!("#{chan}: Anti-spam protection is {status}"))
                }
            }
        }
        "spamsettings" => {
            if rank < ChannelRank::Founder {
                return Some(format!(
                    "#{chan}: You do not have permission to change spam settings"
                ));
            }
            let usage = format!(
                "#{chan}: Invalid args for spamsettings. Valid syntax is \
                 \"!spamsettings <timeout> <quiet> <aggressiveness> <bonuslength> <duration>\". \
                 All args but quiet are positive integers; quiet is \"on\" or \"off\"."
            );
            let Some(args) = args else { return Some(usage) };
            let parts: Vec<&str> = args.split_whitespace().collect();
            if parts.len() != 5 {
                return Some(usage);
            }
            let quiet = match parts[1] {
                "on" => true,
                "off" => false,
                _ => return Some(usage),
            };
            let numbers: Vec<i64> = parts
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != 1)
                .filter_map(|(_, p)| p.parse::<i64>().ok())
                .filter(|n| *n > 0)
                .collect();
            let [timeout, aggressiveness, bonus_length, duration] = numbers.as_slice() else {
                return Some(usage);
            };
            let channel = lobby.channels.get_mut(chan)?;
            channel.antispam.settings = crate::state::AntiSpamSettings {
                timeout: *timeout as f64,
                aggressiveness: *aggressiveness as f64,
                bonus_length: *bonus_length as f64,
                duration_secs: *duration,
                quiet,
            };
            let summary = channel.antispam.describe();
            Some(format!("#{chan}: Anti-spam settings updated ({summary})"))
        }
        "op" | "deop" => {
            if rank < ChannelRank::Founder {
                return Some(format!("#{chan}: You do not have permission to {cmd} users"));
            }
            let Some(target_name) = args else {
                return Some(format!("#{chan}: You must specify a user to {cmd}"));
            };
            let target = match lobby.db.users().find_by_username(target_name).await {
                Ok(Some(record)) => record,
                _ => return Some(format!("#{chan}: User <{target_name}> not found")),
            };
            let adding = cmd == "op";
            let (channel_id, registered, changed) = {
                let channel = lobby.channels.get_mut(chan)?;
                let changed = if adding {
                    channel.ops.insert(target.id)
                } else {
                    channel.ops.remove(&target.id)
                };
                (channel.id, channel.registered(), changed)
            };
            if !changed {
                return Some(if adding {
                    format!("#{chan}: <{target_name}> was already an op")
                } else {
                    format!("#{chan}: <{target_name}> was not an op")
                });
            }
            if registered {
                let result = if adding {
                    lobby.db.channels().add_op(channel_id, target.id).await
                } else {
                    lobby.db.channels().remove_op(channel_id, target.id).await
                };
                if let Err(e) = result {
                    return Some(format!("#{chan}: Failed to store operator change: {e}"));
                }
            }
            let verb = if adding { "opped" } else { "deopped" };
            announce_mute(lobby, chan, &format!("<{target_name}> was {verb} by <{user}>"));
            None
        }
        "kick" => {
            if rank < ChannelRank::Op {
                return Some(format!(
                    "#{chan}: You do not have permission to kick users from the channel"
                ));
            }
            let Some(args) = args else {
                return Some(format!("#{chan}: You must specify a user to kick from the channel"));
            };
            let (target_name, reason) = match args.split_once(' ') {
                Some((name, reason)) => (name, format!(" (reason: {reason})")),
                None => (args, String::new()),
            };
            let Some(target_sid) = lobby.sid_of(target_name) else {
                return Some(format!("#{chan}: <{target_name}> not in channel"));
            };
            let in_channel = lobby
                .channels
                .get(chan)
                .is_some_and(|c| c.members.contains(&target_sid));
            if !in_channel {
                return Some(format!("#{chan}: <{target_name}> not in channel"));
            }
            if let Some(channel) = lobby.channels.get_mut(chan) {
                channel.members.remove(&target_sid);
                channel.antispam.forget(target_sid);
            }
            if let Some(session) = lobby.sessions.get_mut(&target_sid) {
                session.channels.remove(chan);
            }
            announce_mute(
                lobby,
                chan,
                &format!("<{target_name}> kicked from the channel by <{user}>{reason}"),
            );
            lobby.send_to(target_sid, &format!("FORCELEAVECHANNEL {chan} {CHANSERV}{reason}"));
            lobby.broadcast_channel(
                chan,
                &format!("LEFT {chan} {target_name} kicked from channel"),
                Some(target_sid),
            );
            Some(format!("#{chan}: <{target_name}> kicked"))
        }
        "lock" => {
            if rank < ChannelRank::Op {
                return Some(format!("#{chan}: You do not have permission to lock the channel"));
            }
            let Some(key) = args else {
                return Some(format!("#{chan}: You must specify a channel key to lock a channel"));
            };
            let (channel_id, registered) = {
                let channel = lobby.channels.get_mut(chan)?;
                channel.key = Some(key.to_string());
                (channel.id, channel.registered())
            };
            if registered
                && let Err(e) = lobby.db.channels().set_key(channel_id, Some(key)).await
            {
                return Some(format!("#{chan}: Failed to store key: {e}"));
            }
            announce_mute(lobby, chan, &format!("Channel locked by <{user}>"));
            Some(format!("#{chan}: Locked"))
        }
        "unlock" => {
            if rank < ChannelRank::Op {
                return Some(format!("#{chan}: You do not have permission to unlock the channel"));
            }
            let (channel_id, registered) = {
                let channel = lobby.channels.get_mut(chan)?;
                channel.key = None;
                (channel.id, channel.registered())
            };
            if registered
                && let Err(e) = lobby.db.channels().set_key(channel_id, None).await
            {
                return Some(format!("#{chan}: Failed to store key: {e}"));
            }
            announce_mute(lobby, chan, &format!("Channel unlocked by <{user}>"));
            Some(format!("#{chan}: Unlocked"))
        }
        "mute" => {
            if rank < ChannelRank::Op {
                return Some(format!("#{chan}: You do not have permission to mute users"));
            }
            let Some(args) = args else {
                return Some(format!("#{chan}: You must specify a user to mute"));
            };
            let (target_name, duration) = match args.split_once(' ') {
                Some((name, duration)) => (name, Some(duration)),
                None => (args, None),
            };
            let minutes = match duration {
                Some(text) => match text.trim().parse::<f64>() {
                    Ok(m) => Some(m),
                    Err(_) => return Some(format!("#{chan}: Duration must be a number of minutes")),
                },
                None => None,
            };
            let Some(target_id) = lobby.session_by_name(target_name).map(|s| s.user_id) else {
                return Some(format!("#{chan}: User <{target_name}> not found"));
            };
            let now = lobby.now();
            let expires = match minutes {
                Some(m) if m * 60.0 >= 1.0 => Some(now + (m * 60.0) as i64),
                _ => None,
            };
            if apply_mute(lobby, chan, target_id, expires, Some("muted")).await.is_err() {
                return Some(format!("#{chan}: Failed to store mute"));
            }
            announce_mute(lobby, chan, &format!("<{target_name}> muted by <{user}>"));
            None
        }
        "unmute" => {
            if rank < ChannelRank::Op {
                return Some(format!("#{chan}: You do not have permission to unmute users"));
            }
            let Some(target_name) = args else {
                return Some(format!("#{chan}: You must specify a user to unmute"));
            };
            let Some(target_id) = lobby.session_by_name(target_name).map(|s| s.user_id) else {
                return Some(format!("#{chan}: User <{target_name}> not found"));
            };
            let (channel_id, registered, removed) = {
                let channel = lobby.channels.get_mut(chan)?;
                let removed = channel.mutes.remove(&target_id).is_some();
                (channel.id, channel.registered(), removed)
            };
            if !removed {
                return Some(format!("#{chan}: <{target_name}> is not muted"));
            }
            if registered
                && let Err(e) = lobby.db.channels().remove_mute(channel_id, target_id).await
            {
                return Some(format!("#{chan}: Failed to drop stored mute: {e}"));
            }
            announce_mute(lobby, chan, &format!("<{target_name}> unmuted by <{user}>"));
            None
        }
        "mutelist" => {
            let entries: Vec<(UserId, Option<i64>)> = lobby
                .channels
                .get(chan)?
                .mutes
                .iter()
                .map(|(&id, entry)| (id, entry.expires))
                .collect();
            if entries.is_empty() {
                return Some(format!("#{chan}: Mute list is empty!"));
            }
            let now = lobby.now();
            let mut summary = format!("#{chan}: Mute list ({} entries): ", entries.len());
            for (user_id, expires) in entries {
                let Some(name) = lobby.username_of(user_id).await else {
                    continue;
                };
                match expires {
                    Some(expiry) => {
                        summary.push_str(&format!("{name}, {} seconds remaining; ", (expiry - now).max(0)));
                    }
                    None => summary.push_str(&format!("{name}, indefinite; ")),
                }
            }
            Some(summary)
        }
        "chanmsg" => {
            if rank < ChannelRank::Op {
                return Some(format!(
                    "#{chan}: You do not have permission to issue a channel message"
                ));
            }
            let Some(text) = args else {
                return Some(format!("#{chan}: You must specify a channel message"));
            };
            announce_mute(lobby, chan, &format!("issued by <{user}>: {text}"));
            None
        }
        _ => Some(format!("#{chan}: Unknown command !{cmd}, try !help")),
    }
}

/// Register a channel to a founder and have ChanServ join it.
async fn register_channel(lobby: &mut Lobby, chan: &str, requester: &str, founder: &str) -> String {
    let target = match lobby.db.users().find_by_username(founder).await {
        Ok(Some(record)) => record,
        _ => return format!("#{chan}: User <{founder}> not found"),
    };

    crate::protocol::handle_line(lobby, CHANSERV_SID, &format!("JOIN {chan}")).await;

    let topic = lobby
        .channels
        .get(chan)
        .and_then(|c| c.topic.as_ref().map(|t| t.text.clone()));
    let channel_id = match lobby
        .db
        .channels()
        .register(chan, target.id, topic.as_deref().map(|t| (t, target.id)))
        .await
    {
        Ok(id) => id,
        Err(e) => return format!("#{chan}: Failed to register: {e}"),
    };
    if let Some(channel) = lobby.channels.get_mut(chan) {
        channel.id = channel_id;
        channel.founder = Some(target.id);
    }

    announce_mute(
        lobby,
        chan,
        &format!("Channel has been registered to <{founder}> by <{requester}>"),
    );
    format!("#{chan}: Successfully registered to <{founder}>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_parsing_with_explicit_channel() {
        let (cmd, chan, args) = parse_command("topic #dev new topic here", Some("main".to_string()));
        assert_eq!(cmd, "topic");
        assert_eq!(chan.as_deref(), Some("dev"));
        assert_eq!(args.as_deref(), Some("new topic here"));
    }

    #[test]
    fn command_parsing_uses_spoken_channel() {
        let (cmd, chan, args) = parse_command("mute mallory 5", Some("main".to_string()));
        assert_eq!(cmd, "mute");
        assert_eq!(chan.as_deref(), Some("main"));
        assert_eq!(args.as_deref(), Some("mallory 5"));
    }

    #[test]
    fn command_parsing_bare_command() {
        let (cmd, chan, args) = parse_command("info", None);
        assert_eq!(cmd, "info");
        assert_eq!(chan, None);
        assert_eq!(args, None);
    }

    #[test]
    fn command_parsing_channel_only() {
        let (cmd, chan, args) = parse_command("info #sub", None);
        assert_eq!(cmd, "info");
        assert_eq!(chan.as_deref(), Some("sub"));
        assert_eq!(args, None);
    }
}

//! Protocol dispatcher.
//!
//! Routes decoded frames to handlers, gating each command on session
//! state and account access. Handlers mutate the lobby synchronously (DB
//! calls aside) and compute their whole fan-out before enqueueing, so
//! every recipient observes events in dispatch order.

mod account;
mod auth;
mod battle;
mod channel;
mod ops;
mod social;

pub(crate) use channel::{announce_mute, apply_mute};

use tas_proto::{Command, Frame, ProtocolError};
use tracing::{debug, error};

use crate::access::Access;
use crate::error::{HandlerError, HandlerResult};
use crate::state::{Lobby, SessionId, SessionState};

/// Gating metadata for one command.
struct Gate {
    min_access: Access,
    requires_login: bool,
}

const fn pre_login() -> Gate {
    Gate {
        min_access: Access::Agreement,
        requires_login: false,
    }
}

const fn user() -> Gate {
    Gate {
        min_access: Access::User,
        requires_login: true,
    }
}

/// Unverified accounts may still finish their email verification.
const fn fresh() -> Gate {
    Gate {
        min_access: Access::Fresh,
        requires_login: true,
    }
}

const fn moderator() -> Gate {
    Gate {
        min_access: Access::Mod,
        requires_login: true,
    }
}

const fn admin() -> Gate {
    Gate {
        min_access: Access::Admin,
        requires_login: true,
    }
}

/// Declared access requirements per command name.
fn gate(name: &str) -> Gate {
    match name {
        "LOGIN" | "REGISTER" | "EXIT" | "PING" | "CONFIRMAGREEMENT" | "RESETPASSWORDREQUEST"
        | "RESENDVERIFICATION" => pre_login(),
        "VERIFY" => fresh(),
        "KICKUSER" | "BAN" | "UNBAN" | "LISTBANS" => moderator(),
        "BROADCAST" => admin(),
        _ => user(),
    }
}

/// Process one full line from a session, then let the service session
/// react to anything that was delivered to it.
pub async fn dispatch(lobby: &mut Lobby, sid: SessionId, line: &str) {
    handle_line(lobby, sid, line).await;
    while let Some(delivered) = lobby.service_inbox.pop_front() {
        crate::services::chanserv::deliver(lobby, &delivered).await;
    }
}

/// Parse, gate and run a single command line.
pub(crate) async fn handle_line(lobby: &mut Lobby, sid: SessionId, line: &str) {
    let frame = match Frame::parse(line) {
        Ok(frame) => frame,
        Err(ProtocolError::EmptyLine) => return,
        Err(ProtocolError::UnknownCommand(cmd)) => {
            lobby.send_to(sid, &format!("SERVERMSG Unknown command \"{cmd}\""));
            return;
        }
        Err(e) => {
            debug!(sid, error = %e, "Unparseable command");
            lobby.send_to(sid, &format!("SERVERMSG Bad command: {e}"));
            return;
        }
    };

    lobby.begin_command(sid, frame.msg_id);
    let name = frame.command.name();
    let result = route(lobby, sid, frame.command).await;
    match result {
        Ok(()) => {}
        Err(HandlerError::Denied(reason)) => {
            lobby.send_to(sid, &format!("DENIED {reason}"));
        }
        Err(HandlerError::RegistrationDenied(reason)) => {
            lobby.send_to(sid, &format!("REGISTRATIONDENIED {reason}"));
        }
        Err(HandlerError::ServerMsg(text)) => {
            lobby.send_to(sid, &format!("SERVERMSG {text}"));
        }
        Err(HandlerError::Disconnect(reason)) => {
            lobby.end_command();
            lobby.remove_session(sid, &reason).await;
            return;
        }
        Err(HandlerError::Db(e)) => {
            error!(sid, command = name, error = %e, "Handler database failure");
            lobby.send_to(sid, "SERVERMSG Internal error");
        }
    }
    lobby.end_command();
}

/// Gate and route one decoded command.
async fn route(lobby: &mut Lobby, sid: SessionId, cmd: Command) -> HandlerResult {
    let Some(session) = lobby.session(sid) else {
        return Ok(());
    };
    if session.state == SessionState::Removing {
        return Ok(());
    }

    let gate = gate(cmd.name());
    if gate.requires_login {
        if !session.logged_in() {
            return Err(HandlerError::msg(format!(
                "You must be logged in to use {}",
                cmd.name()
            )));
        }
        if session.access < gate.min_access {
            return Err(HandlerError::msg(
                "You do not have permission to use this command",
            ));
        }
    }

    match cmd {
        // handshake / account
        Command::Login {
            username,
            password,
            cpu,
            local_ip,
            agent,
            sys_id,
            mac_id,
        } => auth::login(lobby, sid, username, password, cpu, local_ip, agent, sys_id, mac_id).await,
        Command::Register {
            username,
            password,
            email,
        } => auth::register(lobby, sid, username, password, email).await,
        Command::ConfirmAgreement => auth::confirm_agreement(lobby, sid).await,
        Command::ResetPasswordRequest { email } => {
            account::reset_password_request(lobby, sid, email).await
        }
        Command::ResendVerification { email } => {
            account::resend_verification(lobby, sid, email).await
        }
        Command::Verify { email, code } => account::verify(lobby, sid, email, code).await,
        Command::ChangePassword { old, new } => account::change_password(lobby, sid, old, new).await,
        Command::ChangeEmailRequest { email } => {
            account::change_email_request(lobby, sid, email).await
        }
        Command::ChangeEmail { email, code } => account::change_email(lobby, sid, email, code).await,
        Command::RenameAccount { new_name } => account::rename_account(lobby, sid, new_name).await,
        Command::Exit { reason } => {
            let reason = match reason {
                Some(text) => format!("Exiting: {text}"),
                None => "Exiting".to_string(),
            };
            Err(HandlerError::Disconnect(reason))
        }
        Command::Ping => {
            lobby.send_to(sid, "PONG");
            Ok(())
        }
        Command::MyStatus { status } => ops::my_status(lobby, sid, status),

        // channels
        Command::Channels => channel::channels(lobby, sid),
        Command::Join { chan, key } => channel::join(lobby, sid, chan, key).await,
        Command::Leave { chan } => channel::leave(lobby, sid, chan),
        Command::Say { chan, msg } => channel::say(lobby, sid, chan, msg, false).await,
        Command::SayEx { chan, msg } => channel::say(lobby, sid, chan, msg, true).await,
        Command::SayPrivate { user, msg } => channel::say_private(lobby, sid, user, msg),
        Command::ChannelTopic { chan, text } => channel::topic(lobby, sid, chan, text).await,
        Command::Mute {
            chan,
            user,
            minutes,
        } => channel::mute(lobby, sid, chan, user, minutes).await,
        Command::Unmute { chan, user } => channel::unmute(lobby, sid, chan, user).await,
        Command::MuteList { chan } => channel::mute_list(lobby, sid, chan).await,
        Command::ForceLeaveChannel { chan, user, reason } => {
            channel::force_leave(lobby, sid, chan, user, reason)
        }

        // battles
        Command::OpenBattle(params) => battle::open(lobby, sid, params),
        Command::JoinBattle {
            id,
            password,
            script_password,
        } => battle::join(lobby, sid, id, password, script_password),
        Command::LeaveBattle => {
            lobby.leave_battle(sid);
            Ok(())
        }
        Command::UpdateBattleInfo {
            spectator_count,
            locked,
            map_hash,
            map_name,
        } => battle::update_info(lobby, sid, spectator_count, locked, map_hash, map_name),
        Command::SayBattle { msg } => battle::say(lobby, sid, msg, false),
        Command::SayBattleEx { msg } => battle::say(lobby, sid, msg, true),
        Command::MyBattleStatus { status, color } => battle::my_status(lobby, sid, status, color),
        Command::Handicap { user, value } => battle::handicap(lobby, sid, user, value),
        Command::ForceTeamNo { user, team } => battle::force_team(lobby, sid, user, team),
        Command::ForceAllyNo { user, ally } => battle::force_ally(lobby, sid, user, ally),
        Command::ForceTeamColor { user, color } => battle::force_color(lobby, sid, user, color),
        Command::ForceSpectatorMode { user } => battle::force_spectator(lobby, sid, user),
        Command::KickFromBattle { user } => battle::kick(lobby, sid, user),
        Command::AddBot {
            name,
            status,
            color,
            ai,
        } => battle::add_bot(lobby, sid, name, status, color, ai),
        Command::RemoveBot { name } => battle::remove_bot(lobby, sid, name),
        Command::UpdateBot {
            name,
            status,
            color,
        } => battle::update_bot(lobby, sid, name, status, color),
        Command::AddStartRect {
            ally,
            left,
            top,
            right,
            bottom,
        } => battle::add_start_rect(lobby, sid, ally, left, top, right, bottom),
        Command::RemoveStartRect { ally } => battle::remove_start_rect(lobby, sid, ally),
        Command::SetScriptTags { tags } => battle::set_script_tags(lobby, sid, tags),
        Command::RemoveScriptTags { keys } => battle::remove_script_tags(lobby, sid, keys),
        Command::DisableUnits { units } => battle::disable_units(lobby, sid, units),
        Command::EnableUnits { units } => battle::enable_units(lobby, sid, units),
        Command::EnableAllUnits => battle::enable_all_units(lobby, sid),
        Command::RequestBattleStatus => battle::request_status(lobby, sid),
        Command::StartBattle => battle::start(lobby, sid),

        // social
        Command::FriendRequest { user, msg } => social::friend_request(lobby, sid, user, msg).await,
        Command::AcceptFriendRequest { user } => social::accept_request(lobby, sid, user).await,
        Command::DeclineFriendRequest { user } => social::decline_request(lobby, sid, user).await,
        Command::Unfriend { user } => social::unfriend(lobby, sid, user).await,
        Command::FriendList => social::friend_list(lobby, sid).await,
        Command::FriendRequestList => social::friend_request_list(lobby, sid).await,
        Command::Ignore { user, reason } => social::ignore(lobby, sid, user, reason).await,
        Command::Unignore { user } => social::unignore(lobby, sid, user).await,
        Command::IgnoreList => social::ignore_list(lobby, sid).await,

        // ops
        Command::KickUser { user, reason } => ops::kick_user(lobby, sid, user, reason).await,
        Command::Ban {
            target,
            duration_days,
            reason,
        } => ops::ban(lobby, sid, target, duration_days, reason).await,
        Command::Unban { target } => ops::unban(lobby, sid, target).await,
        Command::ListBans => ops::list_bans(lobby, sid).await,
        Command::Broadcast { msg } => {
            lobby.broadcast_all(&format!("BROADCAST {msg}"), None);
            Ok(())
        }
    }
}

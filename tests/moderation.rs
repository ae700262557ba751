//! Server-level moderation: kicks, bans, status authority, broadcasts.

mod common;

use common::{connect, drain, login_user, send};
use uberd::access::Access;

async fn promote(lobby: &mut uberd::state::Lobby, sid: u32, access: Access) {
    let user_id = lobby.session(sid).unwrap().user_id;
    lobby
        .db
        .users()
        .set_access(user_id, access.as_str())
        .await
        .unwrap();
    let session = lobby.session_mut(sid).unwrap();
    session.access = access;
    session.refresh_status();
}

#[tokio::test]
async fn kick_notifies_target_and_broadcasts_removal_once() {
    let mut lobby = common::new_lobby().await;
    let mut rx_mod = connect(&mut lobby, 1);
    let mut rx_mallory = connect(&mut lobby, 2);
    let mut rx_witness = connect(&mut lobby, 3);
    login_user(&mut lobby, 1, &mut rx_mod, "modguy", "pass").await;
    login_user(&mut lobby, 2, &mut rx_mallory, "mallory", "pass").await;
    login_user(&mut lobby, 3, &mut rx_witness, "witness", "pass").await;
    promote(&mut lobby, 1, Access::Mod).await;
    drain(&mut rx_mallory);
    drain(&mut rx_witness);

    send(&mut lobby, 1, "KICKUSER mallory griefing").await;

    let mallory_lines = drain(&mut rx_mallory);
    assert!(
        mallory_lines
            .iter()
            .any(|l| l == "SERVERMSG You have been kicked from the server by <modguy>: griefing")
    );
    assert!(!lobby.sessions.contains_key(&2));
    assert!(lobby.sid_of("mallory").is_none());

    let witness_lines = drain(&mut rx_witness);
    assert_eq!(
        witness_lines
            .iter()
            .filter(|l| *l == "REMOVEUSER mallory")
            .count(),
        1
    );
}

#[tokio::test]
async fn kick_requires_moderator_access() {
    let mut lobby = common::new_lobby().await;
    let mut rx_a = connect(&mut lobby, 1);
    let mut rx_b = connect(&mut lobby, 2);
    login_user(&mut lobby, 1, &mut rx_a, "alice", "pass").await;
    login_user(&mut lobby, 2, &mut rx_b, "bob", "pass").await;
    drain(&mut rx_a);

    send(&mut lobby, 1, "KICKUSER bob nope").await;
    assert!(
        drain(&mut rx_a)
            .iter()
            .any(|l| l == "SERVERMSG You do not have permission to use this command")
    );
    assert!(lobby.sessions.contains_key(&2));
}

#[tokio::test]
async fn banned_user_cannot_log_back_in() {
    let mut lobby = common::new_lobby().await;
    let mut rx_mod = connect(&mut lobby, 1);
    let mut rx_target = connect(&mut lobby, 2);
    login_user(&mut lobby, 1, &mut rx_mod, "modguy", "pass").await;
    login_user(&mut lobby, 2, &mut rx_target, "grief", "pass").await;
    promote(&mut lobby, 1, Access::Mod).await;

    send(&mut lobby, 1, "BAN grief 7 being awful").await;
    assert!(
        drain(&mut rx_mod)
            .iter()
            .any(|l| l.starts_with("SERVERMSG Banned grief"))
    );
    send(&mut lobby, 2, "EXIT").await;

    let mut rx_retry = connect(&mut lobby, 3);
    let wire = uberd::password::wire_hash("pass");
    send(&mut lobby, 3, &format!("LOGIN grief {wire} 0 * agent")).await;
    let replies = drain(&mut rx_retry);
    assert!(
        replies
            .iter()
            .any(|l| l.starts_with("DENIED You are banned: (being awful)")),
        "expected ban denial: {replies:?}"
    );

    // UNBAN clears every identity the ban covered
    send(&mut lobby, 1, "UNBAN grief").await;
    let mut rx_again = connect(&mut lobby, 4);
    send(&mut lobby, 4, &format!("LOGIN grief {wire} 0 * agent")).await;
    assert!(
        drain(&mut rx_again)
            .iter()
            .any(|l| l == "ACCEPTED grief")
    );
}

#[tokio::test]
async fn mystatus_preserves_only_client_bits() {
    let mut lobby = common::new_lobby().await;
    let mut rx_a = connect(&mut lobby, 1);
    let mut rx_b = connect(&mut lobby, 2);
    login_user(&mut lobby, 1, &mut rx_a, "alice", "pass").await;
    login_user(&mut lobby, 2, &mut rx_b, "bob", "pass").await;
    drain(&mut rx_b);

    // claim every bit: away + in-game survive, roles and rank do not
    send(&mut lobby, 1, &format!("MYSTATUS {}", u32::MAX)).await;
    let status = lobby.session(1).unwrap().status;
    assert!(status.in_game);
    assert!(status.away);
    assert_eq!(status.role, tas_proto::StatusRole::User);
    assert!(!status.bot);

    let expected = format!("CLIENTSTATUS alice {}", status.to_bits());
    assert!(drain(&mut rx_b).contains(&expected));
}

#[tokio::test]
async fn broadcast_requires_admin_and_reaches_everyone() {
    let mut lobby = common::new_lobby().await;
    let mut rx_a = connect(&mut lobby, 1);
    let mut rx_b = connect(&mut lobby, 2);
    login_user(&mut lobby, 1, &mut rx_a, "alice", "pass").await;
    login_user(&mut lobby, 2, &mut rx_b, "bob", "pass").await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    send(&mut lobby, 1, "BROADCAST maintenance in 5").await;
    assert!(
        drain(&mut rx_a)
            .iter()
            .any(|l| l == "SERVERMSG You do not have permission to use this command")
    );

    promote(&mut lobby, 1, Access::Admin).await;
    drain(&mut rx_b);
    send(&mut lobby, 1, "BROADCAST maintenance in 5").await;
    assert!(
        drain(&mut rx_b)
            .iter()
            .any(|l| l == "BROADCAST maintenance in 5")
    );
}

#[tokio::test]
async fn idle_unauthenticated_sessions_are_culled() {
    let mut lobby = common::new_lobby().await;
    let mut rx = connect(&mut lobby, 1);

    // age the connection past the login deadline
    lobby.session_mut(1).unwrap().connected_at -= 120;
    lobby.sweep_idle().await;

    let lines = drain(&mut rx);
    assert!(
        lines
            .iter()
            .any(|l| l == "SERVERMSG timed out, no login within 60 seconds!")
    );
    assert!(!lobby.sessions.contains_key(&1));
}

#[tokio::test]
async fn silent_sessions_are_culled() {
    let mut lobby = common::new_lobby().await;
    let mut rx = connect(&mut lobby, 1);
    login_user(&mut lobby, 1, &mut rx, "alice", "pass").await;

    lobby.session_mut(1).unwrap().last_rx -= 120;
    lobby.sweep_idle().await;

    let lines = drain(&mut rx);
    assert!(lines.iter().any(|l| l.starts_with("SERVERMSG timed out, no data")));
    assert!(!lobby.sessions.contains_key(&1));
}

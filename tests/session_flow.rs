//! Registration, login and session lifecycle flows.

mod common;

use common::{connect, drain, login_user, send};

#[tokio::test]
async fn register_confirm_login_flow() {
    let mut lobby = common::new_lobby().await;
    let mut rx = connect(&mut lobby, 1);

    let wire = uberd::password::wire_hash("pass");
    send(&mut lobby, 1, &format!("REGISTER alice {wire} alice@x.yz")).await;
    assert_eq!(drain(&mut rx), vec!["REGISTRATIONACCEPTED".to_string()]);

    send(&mut lobby, 1, &format!("LOGIN alice {wire} 0 * agent")).await;
    let replies = drain(&mut rx);
    assert_eq!(replies.last().map(String::as_str), Some("AGREEMENTEND"));
    // no session yet: the agreement must be confirmed first
    assert!(!replies.iter().any(|l| l.starts_with("ACCEPTED")));

    send(&mut lobby, 1, "CONFIRMAGREEMENT").await;
    drain(&mut rx);

    send(&mut lobby, 1, &format!("LOGIN alice {wire} 0 * agent")).await;
    let replies = drain(&mut rx);
    assert_eq!(replies.first().map(String::as_str), Some("ACCEPTED alice"));
    // the world push includes our own presence and terminates properly
    assert!(replies.iter().any(|l| l.starts_with("ADDUSER alice")));
    assert!(replies.iter().any(|l| l == "LOGININFOEND"));
}

#[tokio::test]
async fn wrong_password_is_denied() {
    let mut lobby = common::new_lobby().await;
    let mut rx = connect(&mut lobby, 1);
    login_user(&mut lobby, 1, &mut rx, "alice", "pass").await;

    let mut rx2 = connect(&mut lobby, 2);
    let wrong = uberd::password::wire_hash("wrong");
    send(&mut lobby, 2, &format!("LOGIN alice {wrong} 0 * agent")).await;
    let replies = drain(&mut rx2);
    assert_eq!(
        replies,
        vec!["DENIED Invalid username or password".to_string()]
    );
}

#[tokio::test]
async fn wrong_case_username_gets_a_hint() {
    let mut lobby = common::new_lobby().await;
    let mut rx = connect(&mut lobby, 1);
    login_user(&mut lobby, 1, &mut rx, "alice", "pass").await;

    let mut rx2 = connect(&mut lobby, 2);
    let wire = uberd::password::wire_hash("pass");
    send(&mut lobby, 2, &format!("LOGIN Alice {wire} 0 * agent")).await;
    let replies = drain(&mut rx2);
    assert_eq!(
        replies,
        vec!["DENIED Invalid username -- did you mean 'alice'".to_string()]
    );
}

#[tokio::test]
async fn second_login_ghosts_the_first() {
    let mut lobby = common::new_lobby().await;
    let mut rx_old = connect(&mut lobby, 1);
    login_user(&mut lobby, 1, &mut rx_old, "alice", "pass").await;

    let mut rx_new = connect(&mut lobby, 2);
    let wire = uberd::password::wire_hash("pass");
    send(&mut lobby, 2, &format!("LOGIN alice {wire} 0 * agent")).await;

    let old_lines = drain(&mut rx_old);
    assert!(old_lines.contains(&"SERVERMSG Ghosted".to_string()));
    assert!(!lobby.sessions.contains_key(&1));

    let new_lines = drain(&mut rx_new);
    assert!(new_lines.iter().any(|l| l == "ACCEPTED alice"));
    assert_eq!(lobby.sid_of("alice"), Some(2));
}

#[tokio::test]
async fn oversized_username_is_rejected() {
    let mut lobby = common::new_lobby().await;
    let mut rx = connect(&mut lobby, 1);
    let wire = uberd::password::wire_hash("pass");
    let long_name = "a".repeat(21);
    send(&mut lobby, 1, &format!("REGISTER {long_name} {wire}")).await;
    assert_eq!(
        drain(&mut rx),
        vec!["REGISTRATIONDENIED Username too long".to_string()]
    );
}

#[tokio::test]
async fn malformed_password_hash_is_rejected() {
    let mut lobby = common::new_lobby().await;
    let mut rx = connect(&mut lobby, 1);
    send(&mut lobby, 1, "REGISTER alice plaintext-password").await;
    let replies = drain(&mut rx);
    assert!(replies[0].starts_with("REGISTRATIONDENIED Invalid password hash"));
}

#[tokio::test]
async fn missing_at_sign_in_email_is_rejected() {
    let mut lobby = common::new_lobby().await;
    let mut rx = connect(&mut lobby, 1);
    let wire = uberd::password::wire_hash("pass");
    send(&mut lobby, 1, &format!("REGISTER alice {wire} not-an-email")).await;
    let replies = drain(&mut rx);
    assert!(replies[0].starts_with("REGISTRATIONDENIED Invalid email"));
}

#[tokio::test]
async fn unknown_command_gets_servermsg() {
    let mut lobby = common::new_lobby().await;
    let mut rx = connect(&mut lobby, 1);
    send(&mut lobby, 1, "FROBNICATE now").await;
    assert_eq!(
        drain(&mut rx),
        vec!["SERVERMSG Unknown command \"FROBNICATE\"".to_string()]
    );
}

#[tokio::test]
async fn commands_require_login() {
    let mut lobby = common::new_lobby().await;
    let mut rx = connect(&mut lobby, 1);
    send(&mut lobby, 1, "JOIN main").await;
    let replies = drain(&mut rx);
    assert_eq!(
        replies,
        vec!["SERVERMSG You must be logged in to use JOIN".to_string()]
    );
}

#[tokio::test]
async fn msg_id_echo_prefixes_first_reply() {
    let mut lobby = common::new_lobby().await;
    let mut rx = connect(&mut lobby, 1);
    send(&mut lobby, 1, "#7 PING").await;
    assert_eq!(drain(&mut rx), vec!["#7 PONG".to_string()]);

    send(&mut lobby, 1, "PING").await;
    assert_eq!(drain(&mut rx), vec!["PONG".to_string()]);
}

#[tokio::test]
async fn exit_removes_session() {
    let mut lobby = common::new_lobby().await;
    let mut rx_a = connect(&mut lobby, 1);
    let mut rx_b = connect(&mut lobby, 2);
    login_user(&mut lobby, 1, &mut rx_a, "alice", "pass").await;
    login_user(&mut lobby, 2, &mut rx_b, "bob", "pass").await;
    drain(&mut rx_b);

    send(&mut lobby, 1, "EXIT bye").await;
    assert!(!lobby.sessions.contains_key(&1));
    assert!(lobby.sid_of("alice").is_none());

    let lines = drain(&mut rx_b);
    assert_eq!(
        lines.iter().filter(|l| *l == "REMOVEUSER alice").count(),
        1
    );
}

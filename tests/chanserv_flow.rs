//! ChanServ: registration, moderation commands and restart behavior.

mod common;

use common::{connect, drain, login_user, send};
use uberd::access::Access;
use uberd::services::chanserv;
use uberd::state::CHANSERV_SID;

async fn promote(lobby: &mut uberd::state::Lobby, sid: u32, access: Access) {
    let user_id = lobby.session(sid).unwrap().user_id;
    lobby
        .db
        .users()
        .set_access(user_id, access.as_str())
        .await
        .unwrap();
    lobby.session_mut(sid).unwrap().access = access;
}

#[tokio::test]
async fn chanserv_is_present_and_silent() {
    let mut lobby = common::new_lobby().await;
    assert_eq!(lobby.sid_of("ChanServ"), Some(CHANSERV_SID));

    let (mut rx_a, mut rx_b) = common::two_users_in_channel(&mut lobby, "main").await;
    send(&mut lobby, 1, "SAY main hello").await;

    // both humans see the message; ChanServ observes but stays quiet
    assert!(drain(&mut rx_a).contains(&"SAID main alice hello".to_string()));
    assert!(drain(&mut rx_b).contains(&"SAID main alice hello".to_string()));
    assert!(lobby.service_inbox.is_empty());
}

#[tokio::test]
async fn help_is_answered_privately() {
    let mut lobby = common::new_lobby().await;
    let mut rx = connect(&mut lobby, 1);
    login_user(&mut lobby, 1, &mut rx, "alice", "pass").await;

    send(&mut lobby, 1, "SAYPRIVATE ChanServ !help").await;
    let replies = drain(&mut rx);
    assert!(
        replies
            .iter()
            .any(|l| l == "SAIDPRIVATE ChanServ Hello, alice!"),
        "expected help reply: {replies:?}"
    );
}

#[tokio::test]
async fn register_requires_moderator() {
    let mut lobby = common::new_lobby().await;
    let (mut rx_a, _rx_b) = common::two_users_in_channel(&mut lobby, "foo").await;

    send(&mut lobby, 1, "SAYPRIVATE ChanServ !register #foo alice").await;
    let replies = drain(&mut rx_a);
    assert!(
        replies
            .iter()
            .any(|l| l.contains("You must contact one of the server moderators")),
        "plain users may not register channels: {replies:?}"
    );
    assert!(!lobby.channels.get("foo").unwrap().registered());
}

#[tokio::test]
async fn registered_channel_survives_restart() {
    let mut lobby = common::new_lobby().await;
    let (mut rx_a, _rx_b) = common::two_users_in_channel(&mut lobby, "foo").await;
    promote(&mut lobby, 1, Access::Mod).await;

    send(&mut lobby, 1, "SAYPRIVATE ChanServ !register #foo alice").await;
    let replies = drain(&mut rx_a);
    assert!(
        replies
            .iter()
            .any(|l| l.contains("Successfully registered to <alice>")),
        "registration should succeed: {replies:?}"
    );

    let alice_id = lobby.session(1).unwrap().user_id;
    let channel = lobby.channels.get("foo").unwrap();
    assert_eq!(channel.founder, Some(alice_id));
    // ChanServ joined the channel it now administers
    assert!(channel.members.contains(&CHANSERV_SID));

    let stored = lobby
        .db
        .channels()
        .find_by_name("foo")
        .await
        .unwrap()
        .expect("channel row persisted");
    assert_eq!(stored.owner_user_id, Some(alice_id));

    // simulate a restart over the same store
    let db = lobby.db.clone();
    let mut reborn = {
        use clap::Parser;
        let args = uberd::args::Args::parse_from(["uberd"]);
        uberd::state::Lobby::new(
            uberd::config::Config::from_args(&args),
            uberd::config::HotConfig::default(),
            db,
            std::sync::Arc::new(uberd::mail::LogMailer),
            std::sync::Arc::new(uberd::geo::UnknownCountry),
        )
    };
    reborn.boot().await.unwrap();
    chanserv::install(&mut reborn);

    let channel = reborn.channels.get("foo").expect("channel reloaded");
    assert_eq!(channel.founder, Some(alice_id));
    assert!(channel.members.contains(&CHANSERV_SID));
}

#[tokio::test]
async fn founder_controls_spamprotection_and_ops() {
    let mut lobby = common::new_lobby().await;
    let (mut rx_a, mut rx_b) = common::two_users_in_channel(&mut lobby, "foo").await;
    promote(&mut lobby, 1, Access::Mod).await;
    send(&mut lobby, 1, "SAYPRIVATE ChanServ !register #foo alice").await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    // the founder flips anti-spam on via an in-channel command
    send(&mut lobby, 1, "SAY foo !spamprotection on").await;
    let replies = drain(&mut rx_a);
    assert!(
        replies
            .iter()
            .any(|l| l == "SAIDPRIVATE ChanServ #foo: Anti-spam protection is enabled"),
        "founder can enable spam protection: {replies:?}"
    );
    assert!(lobby.channels.get("foo").unwrap().antispam.enabled);
    assert!(
        lobby
            .db
            .channels()
            .find_by_name("foo")
            .await
            .unwrap()
            .unwrap()
            .antispam
    );

    // a plain member may not
    send(&mut lobby, 2, "SAY foo !spamprotection off").await;
    let replies = drain(&mut rx_b);
    assert!(
        replies
            .iter()
            .any(|l| l.contains("You do not have permission")),
        "member cannot change spam protection: {replies:?}"
    );

    // ops management persists
    send(&mut lobby, 1, "SAYPRIVATE ChanServ !op #foo bob").await;
    drain(&mut rx_a);
    let bob_id = lobby.session(2).unwrap().user_id;
    assert!(lobby.channels.get("foo").unwrap().ops.contains(&bob_id));
    let ops = lobby.db.channels().ops_all().await.unwrap();
    assert!(ops.iter().any(|&(_, user)| user == bob_id));
}

#[tokio::test]
async fn spamsettings_validates_strictly() {
    let mut lobby = common::new_lobby().await;
    let (mut rx_a, _rx_b) = common::two_users_in_channel(&mut lobby, "foo").await;
    promote(&mut lobby, 1, Access::Mod).await;
    send(&mut lobby, 1, "SAYPRIVATE ChanServ !register #foo alice").await;
    drain(&mut rx_a);

    // wrong arity, bad quiet word, negative numbers all refused
    for bad in [
        "!spamsettings #foo 10 off 5",
        "!spamsettings #foo 10 maybe 5 50 30",
        "!spamsettings #foo 10 off -5 50 30",
        "!spamsettings #foo ten off 5 50 30",
    ] {
        send(&mut lobby, 1, &format!("SAYPRIVATE ChanServ {bad}")).await;
        let replies = drain(&mut rx_a);
        assert!(
            replies.iter().any(|l| l.contains("Invalid args for spamsettings")),
            "{bad} should be refused: {replies:?}"
        );
    }
    let defaults = uberd::state::AntiSpamSettings::default();
    assert_eq!(
        lobby.channels.get("foo").unwrap().antispam.settings,
        defaults
    );

    send(
        &mut lobby,
        1,
        "SAYPRIVATE ChanServ !spamsettings #foo 20 on 8 100 60",
    )
    .await;
    drain(&mut rx_a);
    let settings = &lobby.channels.get("foo").unwrap().antispam.settings;
    assert_eq!(settings.timeout, 20.0);
    assert!(settings.quiet);
    assert_eq!(settings.aggressiveness, 8.0);
    assert_eq!(settings.bonus_length, 100.0);
    assert_eq!(settings.duration_secs, 60);
}

#[tokio::test]
async fn chanserv_kick_and_lock() {
    let mut lobby = common::new_lobby().await;
    let (mut rx_a, mut rx_b) = common::two_users_in_channel(&mut lobby, "foo").await;
    promote(&mut lobby, 1, Access::Mod).await;
    send(&mut lobby, 1, "SAYPRIVATE ChanServ !register #foo alice").await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    send(&mut lobby, 1, "SAYPRIVATE ChanServ !kick #foo bob flooding").await;
    let b_lines = drain(&mut rx_b);
    assert!(
        b_lines
            .iter()
            .any(|l| l.starts_with("FORCELEAVECHANNEL foo ChanServ")),
        "bob is ejected: {b_lines:?}"
    );
    assert!(!lobby.channels.get("foo").unwrap().members.contains(&2));

    send(&mut lobby, 1, "SAYPRIVATE ChanServ !lock #foo sesame").await;
    drain(&mut rx_a);
    assert_eq!(
        lobby.channels.get("foo").unwrap().key.as_deref(),
        Some("sesame")
    );

    // locked out without the key, back in with it
    send(&mut lobby, 2, "JOIN foo").await;
    assert!(
        drain(&mut rx_b)
            .iter()
            .any(|l| l == "JOINFAILED foo Channel is locked")
    );
    send(&mut lobby, 2, "JOIN foo sesame").await;
    assert!(drain(&mut rx_b).iter().any(|l| l == "JOIN foo"));
}

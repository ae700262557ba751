//! Channel membership, chat, moderation and anti-spam flows.

mod common;

use common::{connect, drain, login_user, send, two_users_in_channel};

#[tokio::test]
async fn join_delivers_topic_free_welcome_and_members() {
    let mut lobby = common::new_lobby().await;
    let mut rx = connect(&mut lobby, 1);
    login_user(&mut lobby, 1, &mut rx, "alice", "pass").await;

    send(&mut lobby, 1, "JOIN main").await;
    let replies = drain(&mut rx);
    assert_eq!(replies[0], "JOIN main");
    assert!(replies.iter().any(|l| l == "CLIENTS main alice"));
}

#[tokio::test]
async fn say_reaches_other_members() {
    let mut lobby = common::new_lobby().await;
    let (mut rx_a, mut rx_b) = two_users_in_channel(&mut lobby, "main").await;

    send(&mut lobby, 1, "SAY main hi there").await;
    assert!(drain(&mut rx_b).contains(&"SAID main alice hi there".to_string()));
    // the sender sees their own line too
    assert!(drain(&mut rx_a).contains(&"SAID main alice hi there".to_string()));
}

#[tokio::test]
async fn sayex_uses_emote_form() {
    let mut lobby = common::new_lobby().await;
    let (_rx_a, mut rx_b) = two_users_in_channel(&mut lobby, "main").await;

    send(&mut lobby, 1, "SAYEX main waves").await;
    assert!(drain(&mut rx_b).contains(&"SAIDEX main alice waves".to_string()));
}

#[tokio::test]
async fn join_leave_join_is_idempotent() {
    let mut lobby = common::new_lobby().await;
    let mut rx = connect(&mut lobby, 1);
    login_user(&mut lobby, 1, &mut rx, "alice", "pass").await;

    send(&mut lobby, 1, "JOIN dev").await;
    send(&mut lobby, 1, "LEAVE dev").await;
    send(&mut lobby, 1, "JOIN dev").await;

    let channel = lobby.channels.get("dev").expect("channel exists");
    assert_eq!(channel.members.len(), 1);
    assert!(channel.members.contains(&1));
    assert!(lobby.session(1).unwrap().channels.contains("dev"));

    // joining again changes nothing
    send(&mut lobby, 1, "JOIN dev").await;
    assert_eq!(lobby.channels.get("dev").unwrap().members.len(), 1);
}

#[tokio::test]
async fn keyed_channel_rejects_wrong_key() {
    let mut lobby = common::new_lobby().await;
    let (mut rx_a, mut rx_b) = two_users_in_channel(&mut lobby, "main").await;

    lobby.channels.get_mut("main").unwrap().key = Some("sesame".to_string());

    let mut rx_c = connect(&mut lobby, 3);
    login_user(&mut lobby, 3, &mut rx_c, "carol", "pass").await;
    send(&mut lobby, 3, "JOIN main").await;
    assert!(
        drain(&mut rx_c)
            .contains(&"JOINFAILED main Channel is locked".to_string())
    );

    send(&mut lobby, 3, "JOIN main sesame").await;
    let replies = drain(&mut rx_c);
    assert_eq!(replies[0], "JOIN main");

    drain(&mut rx_a);
    drain(&mut rx_b);
}

#[tokio::test]
async fn private_message_round_trip_and_ignore() {
    let mut lobby = common::new_lobby().await;
    let (mut rx_a, mut rx_b) = two_users_in_channel(&mut lobby, "main").await;

    send(&mut lobby, 1, "SAYPRIVATE bob psst").await;
    assert!(drain(&mut rx_a).contains(&"SAYPRIVATE bob psst".to_string()));
    assert!(drain(&mut rx_b).contains(&"SAIDPRIVATE alice psst".to_string()));

    // bob ignores alice; her messages stop arriving
    send(&mut lobby, 2, "IGNORE alice being rude").await;
    drain(&mut rx_b);
    send(&mut lobby, 1, "SAYPRIVATE bob hello?").await;
    assert!(drain(&mut rx_a).contains(&"SAYPRIVATE bob hello?".to_string()));
    assert!(drain(&mut rx_b).is_empty());
}

#[tokio::test]
async fn muted_user_cannot_speak_until_expiry_sweep() {
    let mut lobby = common::new_lobby().await;
    let (mut rx_a, mut rx_b) = two_users_in_channel(&mut lobby, "main").await;

    // alice becomes a channel op so she may mute
    let alice_id = lobby.session(1).unwrap().user_id;
    let bob_id = lobby.session(2).unwrap().user_id;
    lobby.channels.get_mut("main").unwrap().ops.insert(alice_id);

    send(&mut lobby, 1, "MUTE main bob 5").await;
    let a_lines = drain(&mut rx_a);
    assert!(
        a_lines
            .iter()
            .any(|l| l.starts_with("CHANNELMESSAGE main <bob> muted"))
    );
    drain(&mut rx_b);

    send(&mut lobby, 2, "SAY main am i muted?").await;
    let b_lines = drain(&mut rx_b);
    assert!(b_lines.iter().any(|l| l == "SERVERMSG You are muted in main"));
    assert!(drain(&mut rx_a).iter().all(|l| !l.starts_with("SAID main bob")));

    // force the mute past its expiry, then run the 1 s sweep
    lobby
        .channels
        .get_mut("main")
        .unwrap()
        .mutes
        .get_mut(&bob_id)
        .unwrap()
        .expires = Some(lobby.now() - 1);
    lobby.sweep_mutes().await;

    let unmute: Vec<String> = drain(&mut rx_b);
    assert!(
        unmute
            .iter()
            .any(|l| l == "CHANNELMESSAGE main <bob> has been unmuted (mute expired).")
    );

    send(&mut lobby, 2, "SAY main free again").await;
    assert!(drain(&mut rx_a).contains(&"SAID main bob free again".to_string()));
}

#[tokio::test]
async fn sixth_rapid_message_triggers_auto_mute() {
    let mut lobby = common::new_lobby().await;
    let (mut rx_a, mut rx_b) = two_users_in_channel(&mut lobby, "main").await;
    lobby.channels.get_mut("main").unwrap().antispam.enabled = true;

    for i in 0..6 {
        send(&mut lobby, 2, &format!("SAY main spam {i}")).await;
    }

    let a_lines = drain(&mut rx_a);
    let relayed = a_lines.iter().filter(|l| l.starts_with("SAID main bob")).count();
    assert_eq!(relayed, 5, "the tripping message is swallowed: {a_lines:?}");
    assert!(
        a_lines
            .iter()
            .any(|l| l.starts_with("CHANNELMESSAGE main <bob> has been muted for spamming"))
    );

    let bob_id = lobby.session(2).unwrap().user_id;
    assert!(lobby.channels.get("main").unwrap().is_muted(bob_id, lobby.now()));
    drain(&mut rx_b);

    send(&mut lobby, 2, "SAY main more spam").await;
    assert!(
        drain(&mut rx_b)
            .iter()
            .any(|l| l == "SERVERMSG You are muted in main")
    );
}

#[tokio::test]
async fn topic_requires_op_and_broadcasts() {
    let mut lobby = common::new_lobby().await;
    let (mut rx_a, mut rx_b) = two_users_in_channel(&mut lobby, "main").await;

    send(&mut lobby, 1, "CHANNELTOPIC main welcome all").await;
    assert!(
        drain(&mut rx_a)
            .iter()
            .any(|l| l == "SERVERMSG You do not have permission to set the topic")
    );

    let alice_id = lobby.session(1).unwrap().user_id;
    lobby.channels.get_mut("main").unwrap().ops.insert(alice_id);
    send(&mut lobby, 1, "CHANNELTOPIC main welcome all").await;
    assert!(
        drain(&mut rx_b)
            .iter()
            .any(|l| l == "CHANNELTOPIC main alice welcome all")
    );

    // a later joiner sees the topic in the join burst
    let mut rx_c = connect(&mut lobby, 3);
    login_user(&mut lobby, 3, &mut rx_c, "carol", "pass").await;
    send(&mut lobby, 3, "JOIN main").await;
    assert!(
        drain(&mut rx_c)
            .iter()
            .any(|l| l == "CHANNELTOPIC main alice welcome all")
    );
}

#[tokio::test]
async fn force_leave_ejects_target() {
    let mut lobby = common::new_lobby().await;
    let (mut rx_a, mut rx_b) = two_users_in_channel(&mut lobby, "main").await;

    let alice_id = lobby.session(1).unwrap().user_id;
    lobby.channels.get_mut("main").unwrap().ops.insert(alice_id);

    send(&mut lobby, 1, "FORCELEAVECHANNEL main bob flooding").await;
    assert!(
        drain(&mut rx_b)
            .iter()
            .any(|l| l == "FORCELEAVECHANNEL main alice flooding")
    );
    assert!(!lobby.channels.get("main").unwrap().members.contains(&2));
    assert!(!lobby.session(2).unwrap().channels.contains("main"));
    drain(&mut rx_a);
}

#[tokio::test]
async fn channels_listing_ends_with_sentinel() {
    let mut lobby = common::new_lobby().await;
    let mut rx = connect(&mut lobby, 1);
    login_user(&mut lobby, 1, &mut rx, "alice", "pass").await;
    send(&mut lobby, 1, "JOIN main").await;
    drain(&mut rx);

    send(&mut lobby, 1, "CHANNELS").await;
    let replies = drain(&mut rx);
    assert!(replies.iter().any(|l| l.starts_with("CHANNEL main 1")));
    assert_eq!(replies.last().map(String::as_str), Some("ENDOFCHANNELS"));
}

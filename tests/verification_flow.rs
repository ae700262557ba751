//! Email verification lifecycle, with mail delivery enabled.

mod common;

use common::{connect, drain, send};

#[tokio::test]
async fn registration_waits_in_fresh_until_verified() {
    let mut lobby = common::new_lobby_with_mail().await;
    let mut rx = connect(&mut lobby, 1);
    let wire = uberd::password::wire_hash("pass");

    send(&mut lobby, 1, &format!("REGISTER alice {wire} alice@x.yz")).await;
    assert_eq!(drain(&mut rx), vec!["REGISTRATIONACCEPTED".to_string()]);

    send(&mut lobby, 1, &format!("LOGIN alice {wire} 0 * agent")).await;
    let replies = drain(&mut rx);
    assert_eq!(replies.last().map(String::as_str), Some("AGREEMENTEND"));

    // a bare CONFIRMAGREEMENT suffices; the emailed code is for VERIFY
    send(&mut lobby, 1, "CONFIRMAGREEMENT").await;
    assert!(drain(&mut rx).is_empty());

    let record = lobby
        .db
        .users()
        .find_by_username("alice")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.access, "fresh");

    // fresh accounts can log in...
    send(&mut lobby, 1, &format!("LOGIN alice {wire} 0 * agent")).await;
    let replies = drain(&mut rx);
    assert_eq!(replies.first().map(String::as_str), Some("ACCEPTED alice"));

    // ...but may only finish their verification
    send(&mut lobby, 1, "JOIN main").await;
    assert_eq!(
        drain(&mut rx),
        vec!["SERVERMSG You do not have permission to use this command".to_string()]
    );

    // a wrong code burns an attempt
    send(&mut lobby, 1, "VERIFY alice@x.yz 000000").await;
    let replies = drain(&mut rx);
    assert!(
        replies
            .iter()
            .any(|l| l.starts_with("SERVERMSG Incorrect verification code")),
        "wrong code should be refused: {replies:?}"
    );

    // the right code promotes the account
    let code = sqlx::query_scalar::<_, i64>("SELECT code FROM verifications WHERE user_id = ?")
        .bind(record.id)
        .fetch_one(lobby.db.pool())
        .await
        .unwrap();
    send(&mut lobby, 1, &format!("VERIFY alice@x.yz {code}")).await;
    let replies = drain(&mut rx);
    assert!(
        replies
            .iter()
            .any(|l| l == "SERVERMSG Email address verified"),
        "verification should succeed: {replies:?}"
    );

    assert_eq!(
        lobby.session(1).unwrap().access,
        uberd::access::Access::User
    );
    let record = lobby
        .db
        .users()
        .find_by_username("alice")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.access, "user");

    send(&mut lobby, 1, "JOIN main").await;
    let replies = drain(&mut rx);
    assert_eq!(replies.first().map(String::as_str), Some("JOIN main"));
}

#[tokio::test]
async fn confirm_without_email_goes_straight_to_user() {
    let mut lobby = common::new_lobby_with_mail().await;
    let mut rx = connect(&mut lobby, 1);
    let wire = uberd::password::wire_hash("pass");

    // no email given, so there is no verification to wait on
    send(&mut lobby, 1, &format!("REGISTER bob {wire}")).await;
    send(&mut lobby, 1, &format!("LOGIN bob {wire} 0 * agent")).await;
    send(&mut lobby, 1, "CONFIRMAGREEMENT").await;
    drain(&mut rx);

    let record = lobby
        .db
        .users()
        .find_by_username("bob")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.access, "user");

    send(&mut lobby, 1, &format!("LOGIN bob {wire} 0 * agent")).await;
    assert!(drain(&mut rx).iter().any(|l| l == "ACCEPTED bob"));
}

#[tokio::test]
async fn resend_is_reachable_before_verification() {
    let mut lobby = common::new_lobby_with_mail().await;
    let mut rx = connect(&mut lobby, 1);
    let wire = uberd::password::wire_hash("pass");

    send(&mut lobby, 1, &format!("REGISTER carol {wire} carol@x.yz")).await;
    send(&mut lobby, 1, &format!("LOGIN carol {wire} 0 * agent")).await;
    send(&mut lobby, 1, "CONFIRMAGREEMENT").await;
    send(&mut lobby, 1, &format!("LOGIN carol {wire} 0 * agent")).await;
    drain(&mut rx);

    // a fresh session can still ask for its code again
    send(&mut lobby, 1, "RESENDVERIFICATION carol@x.yz").await;
    let replies = drain(&mut rx);
    assert!(
        replies
            .iter()
            .any(|l| l == "SERVERMSG Verification code resent"),
        "resend should work for a fresh session: {replies:?}"
    );
}

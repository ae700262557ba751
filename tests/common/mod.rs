//! Integration test infrastructure.
//!
//! Drives the dispatcher in-process: sessions are attached with real
//! outbound queues and commands flow through `protocol::dispatch`, so
//! every test exercises the same code path as a TCP client.

// not every test binary uses every helper
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use clap::Parser;
use tokio::sync::mpsc;

use uberd::args::Args;
use uberd::config::{Config, HotConfig};
use uberd::db::Database;
use uberd::geo::UnknownCountry;
use uberd::mail::LogMailer;
use uberd::password;
use uberd::protocol;
use uberd::services::chanserv;
use uberd::state::{Lobby, Outbound, Session, SessionId};

/// A fresh lobby over an in-memory store, ChanServ installed.
pub async fn new_lobby() -> Lobby {
    lobby_from_args(Args::parse_from(["uberd"])).await
}

/// As [`new_lobby`], with email verification enabled.
pub async fn new_lobby_with_mail() -> Lobby {
    lobby_from_args(Args::parse_from(["uberd", "--mail-from", "no-reply@lobby.test"])).await
}

async fn lobby_from_args(args: Args) -> Lobby {
    let config = Config::from_args(&args);
    let db = Database::connect("sqlite://:memory:")
        .await
        .expect("in-memory database");
    let mut lobby = Lobby::new(
        config,
        HotConfig::default(),
        db,
        Arc::new(LogMailer),
        Arc::new(UnknownCountry),
    );
    lobby.boot().await.expect("boot");
    chanserv::install(&mut lobby);
    lobby
}

/// Attach an unauthenticated connection, as the gateway would.
pub fn connect(lobby: &mut Lobby, sid: SessionId) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let outbound = Outbound::Tcp {
        tx,
        queued_bytes: Arc::new(AtomicUsize::new(0)),
    };
    let now = lobby.now();
    let session = Session::new(
        sid,
        format!("127.0.0.{sid}:6000").parse().expect("test address"),
        "??".to_string(),
        outbound,
        now,
    );
    lobby.sessions.insert(sid, session);
    rx
}

/// Send one command line through the dispatcher.
pub async fn send(lobby: &mut Lobby, sid: SessionId, line: &str) {
    protocol::dispatch(lobby, sid, line).await;
}

/// Everything currently queued for one connection.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(line) = rx.try_recv() {
        lines.push(line);
    }
    lines
}

/// Register an account, confirm the agreement and log in.
///
/// Returns with the welcome burst drained.
pub async fn login_user(
    lobby: &mut Lobby,
    sid: SessionId,
    rx: &mut mpsc::UnboundedReceiver<String>,
    name: &str,
    plain_password: &str,
) {
    let wire = password::wire_hash(plain_password);
    send(lobby, sid, &format!("REGISTER {name} {wire}")).await;
    let replies = drain(rx);
    assert!(
        replies.iter().any(|l| l == "REGISTRATIONACCEPTED"),
        "registration of {name} failed: {replies:?}"
    );

    // first login delivers the agreement
    send(lobby, sid, &format!("LOGIN {name} {wire} 3200 * TestClient 0.1")).await;
    let replies = drain(rx);
    assert!(
        replies.iter().any(|l| l == "AGREEMENTEND"),
        "expected agreement for {name}: {replies:?}"
    );

    send(lobby, sid, "CONFIRMAGREEMENT").await;
    drain(rx);

    send(lobby, sid, &format!("LOGIN {name} {wire} 3200 * TestClient 0.1")).await;
    let replies = drain(rx);
    assert!(
        replies.iter().any(|l| l == &format!("ACCEPTED {name}")),
        "login of {name} failed: {replies:?}"
    );
}

/// Two logged-in users, both members of one channel.
pub async fn two_users_in_channel(
    lobby: &mut Lobby,
    chan: &str,
) -> (
    mpsc::UnboundedReceiver<String>,
    mpsc::UnboundedReceiver<String>,
) {
    let mut rx_a = connect(lobby, 1);
    let mut rx_b = connect(lobby, 2);
    login_user(lobby, 1, &mut rx_a, "alice", "pass").await;
    login_user(lobby, 2, &mut rx_b, "bob", "pass").await;

    send(lobby, 1, &format!("JOIN {chan}")).await;
    send(lobby, 2, &format!("JOIN {chan}")).await;
    drain(&mut rx_a);
    drain(&mut rx_b);
    (rx_a, rx_b)
}

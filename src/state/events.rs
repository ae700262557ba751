//! Events consumed by the dispatcher task.
//!
//! Connection tasks, the scheduler and the signal handler never touch the
//! state maps directly; everything funnels through this queue so that all
//! mutation is serialized onto one context.

use std::net::SocketAddr;

use super::session::Outbound;
use super::SessionId;

/// One unit of dispatcher work.
#[derive(Debug)]
pub enum Event {
    /// A TCP connection was accepted.
    Connected {
        sid: SessionId,
        addr: SocketAddr,
        outbound: Outbound,
    },
    /// A complete line arrived from a session.
    Line { sid: SessionId, line: String },
    /// A session's socket closed or failed.
    Disconnected { sid: SessionId, reason: String },
    /// 1 s tick: expire channel mutes.
    SweepMutes,
    /// 10 s tick: drop idle and flooded sessions.
    SweepIdle,
    /// 20 min tick: decay registration and rename throttles.
    DecayThrottles,
    /// 24 h tick: database clean + access audit.
    DailyClean,
    /// SIGHUP: re-read data files.
    Reload,
}

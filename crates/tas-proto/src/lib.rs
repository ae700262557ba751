//! # tas-proto
//!
//! Parsing and framing for the TASServer lobby protocol: newline-delimited
//! UTF-8 frames carrying a command word, optional arguments, and an
//! optional client-assigned message id to echo back.
//!
//! ## Quick Start
//!
//! ```rust
//! use tas_proto::{Command, Frame};
//!
//! let frame = Frame::parse("#4 JOIN main secret").unwrap();
//! assert_eq!(frame.msg_id, Some(4));
//! assert_eq!(
//!     frame.command,
//!     Command::Join { chan: "main".into(), key: Some("secret".into()) }
//! );
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod command;
pub mod error;
pub mod status;

#[cfg(feature = "tokio")]
pub mod line;

pub use self::command::{Command, Frame, NatType, OpenBattle};
pub use self::error::{ProtocolError, Result};
pub use self::status::{BattleStatus, ClientStatus, StatusRole, SyncStatus, rank_for_ingame_minutes};

#[cfg(feature = "tokio")]
pub use self::line::{LineCodec, MAX_LINE_LEN};

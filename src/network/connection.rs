//! Per-connection reader and writer tasks.
//!
//! The reader decodes newline frames and forwards them to the dispatcher
//! queue; the writer drains the session's outbound queue into the socket,
//! keeping the queued-byte counter honest. Neither task ever touches
//! shared state.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::{SinkExt, StreamExt};
use tas_proto::{LineCodec, ProtocolError};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use crate::state::events::Event;
use crate::state::{Outbound, SessionId};

/// Spawn the reader and writer tasks for an accepted stream.
pub fn spawn_connection(
    sid: SessionId,
    stream: TcpStream,
    addr: SocketAddr,
    events: mpsc::UnboundedSender<Event>,
) {
    let (read_half, write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let queued_bytes = Arc::new(AtomicUsize::new(0));

    // announce before the first line so ordering is connect-then-lines
    let _ = events.send(Event::Connected {
        sid,
        addr,
        outbound: Outbound::Tcp {
            tx,
            queued_bytes: Arc::clone(&queued_bytes),
        },
    });

    // Writer: drain the outbound queue into the socket.
    tokio::spawn(async move {
        let mut writer = FramedWrite::new(write_half, LineCodec::new());
        while let Some(line) = rx.recv().await {
            let len = line.len() + 1;
            let result = writer.send(line).await;
            queued_bytes.fetch_sub(len, Ordering::Relaxed);
            if result.is_err() {
                // the reader task reports the disconnect
                break;
            }
        }
    });

    // Reader: decode frames and forward them to the dispatcher.
    tokio::spawn(async move {
        let mut reader = FramedRead::new(read_half, LineCodec::new());
        loop {
            match reader.next().await {
                Some(Ok(line)) => {
                    if events.send(Event::Line { sid, line }).is_err() {
                        break;
                    }
                }
                Some(Err(ProtocolError::LineTooLong { actual, limit })) => {
                    warn!(sid, actual, limit, "Oversized line, dropping connection");
                    let _ = events.send(Event::Disconnected {
                        sid,
                        reason: "Protocol error: line too long".to_string(),
                    });
                    break;
                }
                Some(Err(e)) => {
                    debug!(sid, error = %e, "Read error");
                    let _ = events.send(Event::Disconnected {
                        sid,
                        reason: format!("Protocol error: {e}"),
                    });
                    break;
                }
                None => {
                    let _ = events.send(Event::Disconnected {
                        sid,
                        reason: "Connection closed by peer".to_string(),
                    });
                    break;
                }
            }
        }
    });
}

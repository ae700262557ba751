//! Outbound email contract.
//!
//! Verification and recovery mails are fire-and-forget: composed inside a
//! handler, delivered on a worker task, never blocking the dispatcher. The
//! SMTP transport itself is an external collaborator; the default
//! implementation records the send in the log and drops the body.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

/// Mail delivery failure.
#[derive(Debug, Error)]
#[error("mail delivery failed: {0}")]
pub struct MailError(pub String);

/// Fire-and-forget mail transport.
pub trait Mailer: Send + Sync {
    /// Deliver one message. May block; always called off the dispatcher.
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}

/// Transport that logs instead of speaking SMTP.
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), MailError> {
        info!(to, subject, "Mail send (log transport)");
        Ok(())
    }
}

/// Deliver a message on a blocking worker task.
pub fn send_in_background(mailer: Arc<dyn Mailer>, to: String, subject: String, body: String) {
    tokio::task::spawn_blocking(move || {
        if let Err(e) = mailer.send(&to, &subject, &body) {
            error!(to, error = %e, "Mail delivery failed");
        }
    });
}

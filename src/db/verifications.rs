//! Email verification repository.
//!
//! One active code per user and per email address, with a two-day expiry,
//! three verification attempts and three resends.

use super::DbError;
use rand::Rng;
use sqlx::SqlitePool;

/// Verification codes expire after two days.
const EXPIRY_SECS: i64 = 2 * 86_400;
/// Maximum wrong-code attempts before the code locks.
const MAX_ATTEMPTS: i64 = 3;
/// Maximum resends of one code.
const MAX_RESENDS: i64 = 3;

/// Outcome of requesting or resending a code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationResult {
    /// A code should be delivered to the user.
    Send { code: i64, reason: String },
    /// The request was refused with a user-visible explanation.
    Refused(String),
}

/// Repository for verification codes.
pub struct VerificationRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> VerificationRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Request a fresh code for `(user_id, email)`.
    ///
    /// Refuses while another unexpired code is active for either the email
    /// or the user; expired codes are replaced.
    pub async fn request(
        &self,
        user_id: i64,
        email: &str,
        digits: u32,
        reason: &str,
    ) -> Result<VerificationResult, DbError> {
        let now = chrono::Utc::now().timestamp();

        let email_row = sqlx::query_as::<_, (i64, i64)>(
            "SELECT user_id, expiry FROM verifications WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(self.pool)
        .await?;
        if let Some((owner, expiry)) = email_row {
            if expiry > now {
                return Ok(VerificationResult::Refused(format!(
                    "A verification attempt is already active for {email}, use that or wait for it to expire"
                )));
            }
            self.remove(owner).await?;
        }

        let user_row = sqlx::query_as::<_, (String, i64)>(
            "SELECT email, expiry FROM verifications WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;
        if let Some((active_email, expiry)) = user_row {
            if expiry > now {
                if active_email != email {
                    return Ok(VerificationResult::Refused(format!(
                        "A verification code is active for {active_email}, use that or wait for it to expire"
                    )));
                }
                return Ok(VerificationResult::Refused(
                    "Already sent a verification code, please check your spam filter!".to_string(),
                ));
            }
            self.remove(user_id).await?;
        }

        let code = random_code(digits);
        sqlx::query(
            "INSERT INTO verifications (user_id, email, code, expiry, reason) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(email)
        .bind(code)
        .bind(now + EXPIRY_SECS)
        .bind(reason)
        .execute(self.pool)
        .await?;

        Ok(VerificationResult::Send {
            code,
            reason: reason.to_string(),
        })
    }

    /// Re-deliver the active code for `user_id`.
    pub async fn resend(&self, user_id: i64, email: &str) -> Result<VerificationResult, DbError> {
        let now = chrono::Utc::now().timestamp();
        let row = sqlx::query_as::<_, (String, i64, i64, i64, String)>(
            "SELECT email, code, expiry, resends, reason FROM verifications WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;

        let Some((active_email, code, expiry, resends, reason)) = row else {
            return Ok(VerificationResult::Refused(
                "You do not have an active verification code".to_string(),
            ));
        };
        if expiry <= now {
            return Ok(VerificationResult::Refused(
                "Your verification code has expired, please request a new one".to_string(),
            ));
        }
        if active_email != email {
            return Ok(VerificationResult::Refused(format!(
                "Your verification code for {active_email} cannot be re-sent to a different address"
            )));
        }
        if resends >= MAX_RESENDS {
            return Ok(VerificationResult::Refused(
                "Too many resends, please try again later".to_string(),
            ));
        }

        sqlx::query("UPDATE verifications SET resends = resends + 1 WHERE user_id = ?")
            .bind(user_id)
            .execute(self.pool)
            .await?;

        Ok(VerificationResult::Send { code, reason })
    }

    /// Check a submitted code; on success the entry is consumed.
    pub async fn verify(
        &self,
        user_id: i64,
        email: &str,
        code: &str,
    ) -> Result<Result<(), String>, DbError> {
        let now = chrono::Utc::now().timestamp();
        if code.is_empty() {
            return Ok(Err(
                "A verification code is required -- check your email".to_string()
            ));
        }

        let row = sqlx::query_as::<_, (String, i64, i64, i64)>(
            "SELECT email, code, expiry, attempts FROM verifications WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;
        let Some((active_email, active_code, expiry, attempts)) = row else {
            return Ok(Err(
                "Unexpected verification attempt, please request a verification code".to_string(),
            ));
        };

        if expiry <= now {
            return Ok(Err(format!(
                "Your verification code for {active_email} has expired, please request a new one"
            )));
        }
        if attempts >= MAX_ATTEMPTS {
            return Ok(Err("Too many attempts, please try again later".to_string()));
        }
        if active_email != email {
            return Ok(Err("Failed to match email addresses".to_string()));
        }

        if code.parse::<i64>() == Ok(active_code) {
            self.remove(user_id).await?;
            Ok(Ok(()))
        } else {
            sqlx::query("UPDATE verifications SET attempts = attempts + 1 WHERE user_id = ?")
                .bind(user_id)
                .execute(self.pool)
                .await?;
            Ok(Err(format!(
                "Incorrect verification code, {}/{} attempts remaining",
                MAX_ATTEMPTS - attempts - 1,
                MAX_ATTEMPTS
            )))
        }
    }

    /// Whether an unexpired code is outstanding for one user.
    pub async fn pending_for(&self, user_id: i64) -> Result<bool, DbError> {
        let now = chrono::Utc::now().timestamp();
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM verifications WHERE user_id = ? AND expiry > ?",
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Drop every entry for one user.
    pub async fn remove(&self, user_id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM verifications WHERE user_id = ?")
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Drop expired entries.
    pub async fn clean(&self, now: i64) -> Result<(), DbError> {
        let expired = sqlx::query("DELETE FROM verifications WHERE expiry < ?")
            .bind(now)
            .execute(self.pool)
            .await?
            .rows_affected();
        tracing::info!(expired, "Pruned expired verifications");
        Ok(())
    }
}

fn random_code(digits: u32) -> i64 {
    let low = 10_i64.pow(digits - 1);
    let high = 10_i64.pow(digits);
    rand::thread_rng().gen_range(low..high)
}

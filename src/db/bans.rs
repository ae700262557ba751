//! Server ban repository and the email-domain blacklist.
//!
//! A ban row can match on any combination of account id, IP and email;
//! `check_ban` consults only rows whose `end_date` is still in the future.

use super::{DbError, retry_once};
use sqlx::SqlitePool;

/// A stored server ban.
#[derive(Debug, Clone)]
pub struct BanRow {
    pub id: i64,
    pub issuer_user_id: Option<i64>,
    pub user_id: Option<i64>,
    pub ip: Option<String>,
    pub email: Option<String>,
    pub reason: String,
    pub end_date: i64,
}

type BanTuple = (
    i64,
    Option<i64>,
    Option<i64>,
    Option<String>,
    Option<String>,
    String,
    i64,
);

const BAN_COLUMNS: &str = "id, issuer_user_id, user_id, ip, email, reason, end_date";

impl From<BanTuple> for BanRow {
    fn from(t: BanTuple) -> Self {
        BanRow {
            id: t.0,
            issuer_user_id: t.1,
            user_id: t.2,
            ip: t.3,
            email: t.4,
            reason: t.5,
            end_date: t.6,
        }
    }
}

/// One entry of the `LISTBANS` output.
#[derive(Debug, Clone)]
pub struct BanListEntry {
    pub username: Option<String>,
    pub ip: Option<String>,
    pub email: Option<String>,
    pub reason: String,
    pub end_date: i64,
    pub issuer: Option<String>,
}

/// Repository for server bans.
pub struct BanRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BanRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// First active ban matching the account id, IP or email.
    pub async fn check_ban(
        &self,
        user_id: Option<i64>,
        ip: Option<&str>,
        email: Option<&str>,
        now: i64,
    ) -> Result<Option<BanRow>, DbError> {
        let sql = format!(
            "SELECT {BAN_COLUMNS} FROM bans
             WHERE end_date >= ?
               AND ((user_id IS NOT NULL AND user_id = ?)
                 OR (ip IS NOT NULL AND ip = ?)
                 OR (email IS NOT NULL AND email = ?))
             LIMIT 1"
        );
        let row = retry_once!(
            sqlx::query_as::<_, BanTuple>(&sql)
                .bind(now)
                .bind(user_id)
                .bind(ip)
                .bind(email)
                .fetch_optional(self.pool)
                .await
        )?;
        Ok(row.map(BanRow::from))
    }

    /// Insert a ban covering any of the given identities.
    pub async fn add(
        &self,
        issuer_user_id: i64,
        user_id: Option<i64>,
        ip: Option<&str>,
        email: Option<&str>,
        reason: &str,
        end_date: i64,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO bans (issuer_user_id, user_id, ip, email, reason, end_date)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(issuer_user_id)
        .bind(user_id)
        .bind(ip)
        .bind(email)
        .bind(reason)
        .bind(end_date)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_by_user(&self, user_id: i64) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM bans WHERE user_id = ?")
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn remove_by_ip(&self, ip: &str) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM bans WHERE ip = ?")
            .bind(ip)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn remove_by_email(&self, email: &str) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM bans WHERE email = ?")
            .bind(email)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Every stored ban with usernames resolved.
    pub async fn list(&self) -> Result<Vec<BanListEntry>, DbError> {
        let rows = sqlx::query_as::<
            _,
            (
                Option<String>,
                Option<String>,
                Option<String>,
                String,
                i64,
                Option<String>,
            ),
        >(
            "SELECT u.username, b.ip, b.email, b.reason, b.end_date, i.username
             FROM bans b
             LEFT JOIN users u ON u.id = b.user_id
             LEFT JOIN users i ON i.id = b.issuer_user_id
             ORDER BY b.id",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(username, ip, email, reason, end_date, issuer)| BanListEntry {
                username,
                ip,
                email,
                reason,
                end_date,
                issuer,
            })
            .collect())
    }

    // ---- email-domain blacklist ----

    /// Blacklist entry matching the domain of `email`, if any.
    pub async fn check_blacklist(
        &self,
        email: &str,
    ) -> Result<Option<(String, Option<String>)>, DbError> {
        let Some((_, domain)) = email.split_once('@') else {
            return Ok(None);
        };
        let row = sqlx::query_as::<_, (String, Option<String>)>(
            "SELECT domain, reason FROM blacklisted_email_domains WHERE domain = ?",
        )
        .bind(domain)
        .fetch_optional(self.pool)
        .await?;
        Ok(row)
    }

    pub async fn add_blacklist(
        &self,
        issuer_user_id: i64,
        domain: &str,
        reason: Option<&str>,
    ) -> Result<(), DbError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT OR IGNORE INTO blacklisted_email_domains (issuer_user_id, domain, reason, start_time)
             VALUES (?, ?, ?, ?)",
        )
        .bind(issuer_user_id)
        .bind(domain)
        .bind(reason)
        .bind(now)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_blacklist(&self, domain: &str) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM blacklisted_email_domains WHERE domain = ?")
            .bind(domain)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Drop expired bans.
    pub async fn clean(&self, now: i64) -> Result<(), DbError> {
        let expired = sqlx::query("DELETE FROM bans WHERE end_date < ?")
            .bind(now)
            .execute(self.pool)
            .await?
            .rows_affected();
        tracing::info!(expired, "Pruned expired server bans");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_db;

    #[tokio::test]
    async fn ban_matches_any_identity() {
        let db = test_db().await;
        let mod_id = db.users().register("mod", "h", "", None, "mod").await.unwrap();
        let now = chrono::Utc::now().timestamp();

        db.bans()
            .add(mod_id, Some(42), Some("10.0.0.1"), Some("bad@evil.io"), "griefing", now + 3600)
            .await
            .unwrap();

        for (user, ip, email) in [
            (Some(42), None, None),
            (None, Some("10.0.0.1"), None),
            (None, None, Some("bad@evil.io")),
        ] {
            let hit = db.bans().check_ban(user, ip, email, now).await.unwrap();
            assert!(hit.is_some(), "expected match for {user:?} {ip:?} {email:?}");
        }

        // wrong identities and expired bans do not match
        assert!(db.bans().check_ban(Some(7), Some("10.0.0.2"), None, now).await.unwrap().is_none());
        assert!(db.bans().check_ban(Some(42), None, None, now + 7200).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unban_by_ip_removes_rows() {
        let db = test_db().await;
        let mod_id = db.users().register("mod", "h", "", None, "mod").await.unwrap();
        let now = chrono::Utc::now().timestamp();
        db.bans()
            .add(mod_id, None, Some("10.0.0.9"), None, "spam", now + 60)
            .await
            .unwrap();

        assert_eq!(db.bans().remove_by_ip("10.0.0.9").await.unwrap(), 1);
        assert!(db.bans().check_ban(None, Some("10.0.0.9"), None, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn blacklist_matches_domain() {
        let db = test_db().await;
        let mod_id = db.users().register("mod", "h", "", None, "mod").await.unwrap();
        db.bans()
            .add_blacklist(mod_id, "tempmail.io", Some("disposable"))
            .await
            .unwrap();

        assert!(db.bans().check_blacklist("x@tempmail.io").await.unwrap().is_some());
        assert!(db.bans().check_blacklist("x@gmail.com").await.unwrap().is_none());
        assert!(db.bans().check_blacklist("not-an-email").await.unwrap().is_none());
    }
}

//! User account repository.
//!
//! Accounts, their login/rename audit rows, and the ignore/friend graph.

use super::{DbError, retry_once};
use sqlx::SqlitePool;

/// A stored user account.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub register_date: i64,
    pub last_login: i64,
    pub last_ip: String,
    pub last_agent: String,
    pub last_sys_id: String,
    pub last_mac_id: String,
    pub ingame_time: i64,
    pub access: String,
    pub email: Option<String>,
    pub bot: bool,
}

type UserTuple = (
    i64,
    String,
    String,
    i64,
    i64,
    String,
    String,
    String,
    String,
    i64,
    String,
    Option<String>,
    bool,
);

const USER_COLUMNS: &str = "id, username, password, register_date, last_login, last_ip, \
     last_agent, last_sys_id, last_mac_id, ingame_time, access, email, bot";

impl From<UserTuple> for UserRecord {
    fn from(t: UserTuple) -> Self {
        UserRecord {
            id: t.0,
            username: t.1,
            password: t.2,
            register_date: t.3,
            last_login: t.4,
            last_ip: t.5,
            last_agent: t.6,
            last_sys_id: t.7,
            last_mac_id: t.8,
            ingame_time: t.9,
            access: t.10,
            email: t.11,
            bot: t.12,
        }
    }
}

/// Repository for account operations.
pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Exact-case lookup. Usernames are case-sensitive on the wire.
    pub async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, DbError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?");
        let row = retry_once!(
            sqlx::query_as::<_, UserTuple>(&sql)
                .bind(username)
                .fetch_optional(self.pool)
                .await
        )?;
        Ok(row.map(UserRecord::from))
    }

    /// Case-insensitive lookup, used for collision checks and "did you
    /// mean" hints.
    pub async fn find_by_username_nocase(
        &self,
        username: &str,
    ) -> Result<Option<UserRecord>, DbError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ? COLLATE NOCASE");
        let row = sqlx::query_as::<_, UserTuple>(&sql)
            .bind(username)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.map(UserRecord::from))
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>, DbError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
        let row = sqlx::query_as::<_, UserTuple>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.map(UserRecord::from))
    }

    /// Oldest account registered with this email address.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, DbError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ? ORDER BY register_date ASC LIMIT 1"
        );
        let row = sqlx::query_as::<_, UserTuple>(&sql)
            .bind(email)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.map(UserRecord::from))
    }

    /// Create an account. `password` is the storage hash.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        ip: &str,
        email: Option<&str>,
        access: &str,
    ) -> Result<i64, DbError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "INSERT INTO users (username, password, register_date, last_login, last_ip, access, email)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(username)
        .bind(password)
        .bind(now)
        .bind(now)
        .bind(ip)
        .bind(access)
        .bind(email)
        .execute(self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return DbError::UserExists(username.to_string());
            }
            DbError::from(e)
        })?;
        Ok(result.last_insert_rowid())
    }

    /// Rename an account, keeping an audit row with the old name.
    pub async fn rename(&self, user_id: i64, old_name: &str, new_name: &str) -> Result<(), DbError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO renames (user_id, original, time) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(old_name)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE users SET username = ? WHERE id = ?")
            .bind(new_name)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.is_unique_violation()
                {
                    return DbError::UserExists(new_name.to_string());
                }
                DbError::from(e)
            })?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn set_password(&self, user_id: i64, password: &str) -> Result<(), DbError> {
        sqlx::query("UPDATE users SET password = ? WHERE id = ?")
            .bind(password)
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_access(&self, user_id: i64, access: &str) -> Result<(), DbError> {
        sqlx::query("UPDATE users SET access = ? WHERE id = ?")
            .bind(access)
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_email(&self, user_id: i64, email: &str) -> Result<(), DbError> {
        sqlx::query("UPDATE users SET email = ? WHERE id = ?")
            .bind(email)
            .bind(user_id)
            .execute(self.pool)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.is_unique_violation()
                {
                    return DbError::EmailExists;
                }
                DbError::from(e)
            })?;
        Ok(())
    }

    /// Persist the session-mutable account fields on logout.
    pub async fn save_presence(
        &self,
        user_id: i64,
        ingame_time: i64,
        access: &str,
        bot: bool,
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE users SET ingame_time = ?, access = ?, bot = ? WHERE id = ?")
            .bind(ingame_time)
            .bind(access)
            .bind(bot)
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Append a login row and refresh the last-seen columns.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_login(
        &self,
        user_id: i64,
        ip: &str,
        agent: &str,
        sys_id: &str,
        mac_id: &str,
        local_ip: &str,
        country: &str,
    ) -> Result<(), DbError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO logins (user_id, ip_address, time, agent, sys_id, mac_id, local_ip, country)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(ip)
        .bind(now)
        .bind(agent)
        .bind(sys_id)
        .bind(mac_id)
        .bind(local_ip)
        .bind(country)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE users SET last_login = ?, last_ip = ?, last_agent = ?, last_sys_id = ?, last_mac_id = ?
             WHERE id = ?",
        )
        .bind(now)
        .bind(ip)
        .bind(agent)
        .bind(sys_id)
        .bind(mac_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Close the open login row and bump last-seen.
    pub async fn end_session(&self, user_id: i64) -> Result<(), DbError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE logins SET \"end\" = ? WHERE id =
               (SELECT id FROM logins WHERE user_id = ? AND \"end\" IS NULL ORDER BY id DESC LIMIT 1)",
        )
        .bind(now)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(now)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    // ---- ignores ----

    pub async fn add_ignore(
        &self,
        user_id: i64,
        ignored_user_id: i64,
        reason: Option<&str>,
    ) -> Result<(), DbError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO ignores (user_id, ignored_user_id, reason, time) VALUES (?, ?, ?, ?)")
            .bind(user_id)
            .bind(ignored_user_id)
            .bind(reason)
            .bind(now)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_ignore(&self, user_id: i64, ignored_user_id: i64) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM ignores WHERE user_id = ? AND ignored_user_id = ?")
            .bind(user_id)
            .bind(ignored_user_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn is_ignored(&self, user_id: i64, ignored_user_id: i64) -> Result<bool, DbError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM ignores WHERE user_id = ? AND ignored_user_id = ?",
        )
        .bind(user_id)
        .bind(ignored_user_id)
        .fetch_one(self.pool)
        .await?;
        Ok(count > 0)
    }

    /// `(ignored_user_id, username, reason)` rows for one user.
    pub async fn ignore_list(
        &self,
        user_id: i64,
    ) -> Result<Vec<(i64, String, Option<String>)>, DbError> {
        let rows = sqlx::query_as::<_, (i64, String, Option<String>)>(
            "SELECT i.ignored_user_id, u.username, i.reason
             FROM ignores i JOIN users u ON u.id = i.ignored_user_id
             WHERE i.user_id = ? ORDER BY i.id",
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn ignored_ids(&self, user_id: i64) -> Result<Vec<i64>, DbError> {
        let rows =
            sqlx::query_scalar::<_, i64>("SELECT ignored_user_id FROM ignores WHERE user_id = ?")
                .bind(user_id)
                .fetch_all(self.pool)
                .await?;
        Ok(rows)
    }

    // ---- friends ----

    pub async fn add_friend(&self, first: i64, second: i64) -> Result<(), DbError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO friends (first_user_id, second_user_id, time) VALUES (?, ?, ?)")
            .bind(first)
            .bind(second)
            .bind(now)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_friend(&self, first: i64, second: i64) -> Result<u64, DbError> {
        let result = sqlx::query(
            "DELETE FROM friends WHERE (first_user_id = ? AND second_user_id = ?)
               OR (first_user_id = ? AND second_user_id = ?)",
        )
        .bind(first)
        .bind(second)
        .bind(second)
        .bind(first)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn are_friends(&self, first: i64, second: i64) -> Result<bool, DbError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM friends WHERE (first_user_id = ? AND second_user_id = ?)
               OR (first_user_id = ? AND second_user_id = ?)",
        )
        .bind(first)
        .bind(second)
        .bind(second)
        .bind(first)
        .fetch_one(self.pool)
        .await?;
        Ok(count > 0)
    }

    /// `(user_id, username)` of every friend of one user.
    pub async fn friend_list(&self, user_id: i64) -> Result<Vec<(i64, String)>, DbError> {
        let rows = sqlx::query_as::<_, (i64, String)>(
            "SELECT u.id, u.username FROM users u WHERE u.id IN (
                SELECT second_user_id FROM friends WHERE first_user_id = ?
                UNION
                SELECT first_user_id FROM friends WHERE second_user_id = ?
             ) ORDER BY u.username",
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    // ---- friend requests ----

    pub async fn add_friend_request(
        &self,
        user_id: i64,
        friend_user_id: i64,
        msg: Option<&str>,
    ) -> Result<(), DbError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO friend_requests (user_id, friend_user_id, msg, time) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(friend_user_id)
        .bind(msg)
        .bind(now)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_friend_request(
        &self,
        user_id: i64,
        friend_user_id: i64,
    ) -> Result<u64, DbError> {
        let result =
            sqlx::query("DELETE FROM friend_requests WHERE user_id = ? AND friend_user_id = ?")
                .bind(user_id)
                .bind(friend_user_id)
                .execute(self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    pub async fn has_friend_request(
        &self,
        user_id: i64,
        friend_user_id: i64,
    ) -> Result<bool, DbError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM friend_requests WHERE user_id = ? AND friend_user_id = ?",
        )
        .bind(user_id)
        .bind(friend_user_id)
        .fetch_one(self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Requests sent *to* one user: `(sender_id, sender_name, msg)`.
    pub async fn friend_requests_for(
        &self,
        user_id: i64,
    ) -> Result<Vec<(i64, String, Option<String>)>, DbError> {
        let rows = sqlx::query_as::<_, (i64, String, Option<String>)>(
            "SELECT r.user_id, u.username, r.msg
             FROM friend_requests r JOIN users u ON u.id = r.user_id
             WHERE r.friend_user_id = ? ORDER BY r.id",
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    // ---- maintenance ----

    /// Prune stale accounts per the retention rules.
    pub async fn clean(&self, now: i64) -> Result<(), DbError> {
        const DAY: i64 = 86_400;

        // never confirmed the agreement within three days
        let unverified = sqlx::query(
            "DELETE FROM users WHERE register_date < ? AND access = 'agreement'",
        )
        .bind(now - 3 * DAY)
        .execute(self.pool)
        .await?
        .rows_affected();

        // no ingame time, idle for a month, plain users only
        let inactive = sqlx::query(
            "DELETE FROM users WHERE ingame_time = 0 AND last_login < ? AND bot = 0 AND access = 'user'",
        )
        .bind(now - 28 * DAY)
        .execute(self.pool)
        .await?
        .rows_affected();

        // idle for five years regardless of role
        let ancient = sqlx::query("DELETE FROM users WHERE last_login < ?")
            .bind(now - 1825 * DAY)
            .execute(self.pool)
            .await?
            .rows_affected();

        tracing::info!(unverified, inactive, ancient, "Pruned stale accounts");
        Ok(())
    }

    /// Demote privileged flags unused for over a year.
    pub async fn audit_access(&self, now: i64) -> Result<(), DbError> {
        let cutoff = now - 365 * 86_400;

        let bots = sqlx::query("UPDATE users SET bot = 0 WHERE last_login < ? AND bot = 1")
            .bind(cutoff)
            .execute(self.pool)
            .await?
            .rows_affected();
        let demoted = sqlx::query(
            "UPDATE users SET access = 'user' WHERE last_login < ? AND access IN ('admin', 'mod')",
        )
        .bind(cutoff)
        .execute(self.pool)
        .await?
        .rows_affected();

        tracing::info!(bots, demoted, "Audited stale privileged accounts");
        Ok(())
    }
}

//! Database module for persistent storage.
//!
//! Async SQLite access via SQLx for:
//! - user accounts with login, rename, ignore and friend child rows
//! - channel registration, operators, moderation lists and history
//! - server bans and the email-domain blacklist
//! - email verification codes
//!
//! The schema is created on startup; every statement is idempotent.

mod bans;
mod channels;
mod users;
mod verifications;

pub use bans::{BanListEntry, BanRepository, BanRow};
pub use channels::{
    ChannelBanRow, ChannelMuteRow, ChannelRecord, ChannelRepository, HistoryRow,
};
pub use users::{UserRecord, UserRepository};
pub use verifications::{VerificationRepository, VerificationResult};

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("username already in use: {0}")]
    UserExists(String),
    #[error("email address already in use")]
    EmailExists,
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("channel not found: {0}")]
    ChannelNotFound(String),
    #[error("password hashing failed")]
    Hash,
}

/// True for failures worth a single retry before surfacing.
pub(crate) fn is_transient(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_))
}

/// Evaluate a query expression, retrying once on a transient failure.
macro_rules! retry_once {
    ($e:expr) => {{
        match $e {
            Err(err) if $crate::db::is_transient(&err) => $e,
            other => other,
        }
    }};
}
pub(crate) use retry_once;

/// Statements run at startup. Order matters for foreign keys.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        password TEXT NOT NULL,
        register_date INTEGER NOT NULL,
        last_login INTEGER NOT NULL,
        last_ip TEXT NOT NULL DEFAULT '',
        last_agent TEXT NOT NULL DEFAULT '',
        last_sys_id TEXT NOT NULL DEFAULT '',
        last_mac_id TEXT NOT NULL DEFAULT '',
        ingame_time INTEGER NOT NULL DEFAULT 0,
        access TEXT NOT NULL DEFAULT 'agreement',
        email TEXT UNIQUE,
        bot INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS logins (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        ip_address TEXT NOT NULL,
        time INTEGER NOT NULL,
        agent TEXT NOT NULL DEFAULT '',
        sys_id TEXT NOT NULL DEFAULT '',
        mac_id TEXT NOT NULL DEFAULT '',
        local_ip TEXT NOT NULL DEFAULT '',
        country TEXT NOT NULL DEFAULT '',
        \"end\" INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_logins_user ON logins(user_id)",
    "CREATE TABLE IF NOT EXISTS renames (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        original TEXT NOT NULL,
        time INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS ignores (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        ignored_user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        reason TEXT,
        time INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS friends (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        first_user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        second_user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        time INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS friend_requests (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        friend_user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        msg TEXT,
        time INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS channels (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        key TEXT,
        owner_user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
        topic TEXT,
        topic_user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
        antispam INTEGER NOT NULL DEFAULT 0,
        censor INTEGER NOT NULL DEFAULT 0,
        store_history INTEGER NOT NULL DEFAULT 0,
        last_used INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS channel_ops (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        channel_id INTEGER NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS channel_bans (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        channel_id INTEGER NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
        issuer_user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        ip_address TEXT,
        expires INTEGER,
        reason TEXT
    )",
    "CREATE TABLE IF NOT EXISTS channel_mutes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        channel_id INTEGER NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
        issuer_user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        expires INTEGER,
        reason TEXT
    )",
    "CREATE TABLE IF NOT EXISTS channel_forwards (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        channel_from_id INTEGER NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
        channel_to_id INTEGER NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
        UNIQUE(channel_from_id, channel_to_id)
    )",
    "CREATE TABLE IF NOT EXISTS channel_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        channel_id INTEGER NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
        user_id INTEGER REFERENCES users(id) ON DELETE CASCADE,
        time INTEGER NOT NULL,
        msg TEXT NOT NULL,
        ex_msg INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_channel_history_channel ON channel_history(channel_id, id)",
    "CREATE TABLE IF NOT EXISTS bans (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        issuer_user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
        user_id INTEGER REFERENCES users(id) ON DELETE CASCADE,
        ip TEXT,
        email TEXT,
        reason TEXT NOT NULL,
        end_date INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS blacklisted_email_domains (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        issuer_user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
        domain TEXT NOT NULL UNIQUE,
        reason TEXT,
        start_time INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS verifications (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        email TEXT NOT NULL UNIQUE,
        code INTEGER NOT NULL,
        expiry INTEGER NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        resends INTEGER NOT NULL DEFAULT 0,
        reason TEXT NOT NULL DEFAULT ''
    )",
    "CREATE TABLE IF NOT EXISTS min_spring_version (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        min_spring_version TEXT NOT NULL,
        start_time INTEGER NOT NULL
    )",
];

/// Database handle with connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connection acquire timeout - prevents connection storms from blocking indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Open the database from a `sqlite://` URL, creating the schema.
    pub async fn connect(sql_url: &str) -> Result<Self, DbError> {
        let path = sql_url.strip_prefix("sqlite://").unwrap_or(sql_url);

        let options = if path == ":memory:" {
            SqliteConnectOptions::new()
                .filename("file::memory:")
                .shared_cache(true)
                .create_if_missing(true)
        } else {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Self::ACQUIRE_TIMEOUT)
            .idle_timeout(Some(Self::IDLE_TIMEOUT))
            .test_before_acquire(true)
            .connect_with(options)
            .await?;

        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&pool).await?;
        }
        info!(url = %sql_url, "Database connected");

        Ok(Self { pool })
    }

    /// Reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// User account repository.
    pub fn users(&self) -> UserRepository<'_> {
        UserRepository::new(&self.pool)
    }

    /// Channel metadata repository.
    pub fn channels(&self) -> ChannelRepository<'_> {
        ChannelRepository::new(&self.pool)
    }

    /// Server-ban repository.
    pub fn bans(&self) -> BanRepository<'_> {
        BanRepository::new(&self.pool)
    }

    /// Email verification repository.
    pub fn verifications(&self) -> VerificationRepository<'_> {
        VerificationRepository::new(&self.pool)
    }

    /// Lowest client engine version accepted, `*` when unset.
    pub async fn min_spring_version(&self) -> Result<String, DbError> {
        let version = sqlx::query_scalar::<_, String>(
            "SELECT min_spring_version FROM min_spring_version ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(version.unwrap_or_else(|| "*".to_string()))
    }

    /// Replace the minimum client engine version.
    pub async fn set_min_spring_version(&self, version: &str) -> Result<(), DbError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM min_spring_version")
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO min_spring_version (min_spring_version, start_time) VALUES (?, ?)")
            .bind(version)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Daily maintenance: prune stale accounts, history and moderation rows.
    pub async fn clean(&self) -> Result<(), DbError> {
        let now = chrono::Utc::now().timestamp();
        self.users().clean(now).await?;
        self.channels().clean(now).await?;
        self.bans().clean(now).await?;
        self.verifications().clean(now).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) async fn test_db() -> Database {
    Database::connect("sqlite://:memory:")
        .await
        .expect("in-memory database")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_creation_is_idempotent() {
        let db = test_db().await;
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(db.pool()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn min_spring_version_round_trip() {
        let db = test_db().await;
        assert_eq!(db.min_spring_version().await.unwrap(), "*");
        db.set_min_spring_version("104.0").await.unwrap();
        assert_eq!(db.min_spring_version().await.unwrap(), "104.0");
    }

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/server.db", dir.path().display());

        let db = Database::connect(&url).await.unwrap();
        let id = db
            .users()
            .register("alice", "hash", "127.0.0.1", None, "user")
            .await
            .unwrap();
        drop(db);

        let reopened = Database::connect(&url).await.unwrap();
        let user = reopened.users().find_by_id(id).await.unwrap().unwrap();
        assert_eq!(user.username, "alice");
    }
}

//! Channel metadata repository.
//!
//! Registered channels survive restarts: name, key, founder, topic,
//! operator set, moderation lists, forwards and optional message history.

use super::DbError;
use sqlx::SqlitePool;

/// A registered channel row.
#[derive(Debug, Clone)]
pub struct ChannelRecord {
    pub id: i64,
    pub name: String,
    pub key: Option<String>,
    pub owner_user_id: Option<i64>,
    pub topic: Option<String>,
    pub topic_user_id: Option<i64>,
    pub antispam: bool,
    pub censor: bool,
    pub store_history: bool,
    pub last_used: i64,
}

type ChannelTuple = (
    i64,
    String,
    Option<String>,
    Option<i64>,
    Option<String>,
    Option<i64>,
    bool,
    bool,
    bool,
    i64,
);

const CHANNEL_COLUMNS: &str =
    "id, name, key, owner_user_id, topic, topic_user_id, antispam, censor, store_history, last_used";

impl From<ChannelTuple> for ChannelRecord {
    fn from(t: ChannelTuple) -> Self {
        ChannelRecord {
            id: t.0,
            name: t.1,
            key: t.2,
            owner_user_id: t.3,
            topic: t.4,
            topic_user_id: t.5,
            antispam: t.6,
            censor: t.7,
            store_history: t.8,
            last_used: t.9,
        }
    }
}

/// A stored channel mute.
#[derive(Debug, Clone)]
pub struct ChannelMuteRow {
    pub channel_id: i64,
    pub user_id: i64,
    pub expires: Option<i64>,
    pub reason: Option<String>,
}

/// A stored channel ban.
#[derive(Debug, Clone)]
pub struct ChannelBanRow {
    pub channel_id: i64,
    pub user_id: i64,
    pub ip_address: Option<String>,
    pub expires: Option<i64>,
    pub reason: Option<String>,
}

/// One replayed history line.
#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub id: i64,
    pub time: i64,
    pub username: String,
    pub msg: String,
    pub ex_msg: bool,
}

/// Repository for channel persistence.
pub struct ChannelRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ChannelRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<ChannelRecord>, DbError> {
        let sql = format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE name = ?");
        let row = sqlx::query_as::<_, ChannelTuple>(&sql)
            .bind(name)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.map(ChannelRecord::from))
    }

    pub async fn load_all(&self) -> Result<Vec<ChannelRecord>, DbError> {
        let sql = format!("SELECT {CHANNEL_COLUMNS} FROM channels ORDER BY name");
        let rows = sqlx::query_as::<_, ChannelTuple>(&sql)
            .fetch_all(self.pool)
            .await?;
        Ok(rows.into_iter().map(ChannelRecord::from).collect())
    }

    /// `(channel_id, user_id)` pairs for every stored operator.
    pub async fn ops_all(&self) -> Result<Vec<(i64, i64)>, DbError> {
        let rows =
            sqlx::query_as::<_, (i64, i64)>("SELECT channel_id, user_id FROM channel_ops")
                .fetch_all(self.pool)
                .await?;
        Ok(rows)
    }

    pub async fn mutes_all(&self) -> Result<Vec<ChannelMuteRow>, DbError> {
        let rows = sqlx::query_as::<_, (i64, i64, Option<i64>, Option<String>)>(
            "SELECT channel_id, user_id, expires, reason FROM channel_mutes",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(channel_id, user_id, expires, reason)| ChannelMuteRow {
                channel_id,
                user_id,
                expires,
                reason,
            })
            .collect())
    }

    pub async fn bans_all(&self) -> Result<Vec<ChannelBanRow>, DbError> {
        let rows = sqlx::query_as::<_, (i64, i64, Option<String>, Option<i64>, Option<String>)>(
            "SELECT channel_id, user_id, ip_address, expires, reason FROM channel_bans",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(
                |(channel_id, user_id, ip_address, expires, reason)| ChannelBanRow {
                    channel_id,
                    user_id,
                    ip_address,
                    expires,
                    reason,
                },
            )
            .collect())
    }

    /// `(from_id, to_id)` pairs of every stored forward.
    pub async fn forwards_all(&self) -> Result<Vec<(i64, i64)>, DbError> {
        let rows = sqlx::query_as::<_, (i64, i64)>(
            "SELECT channel_from_id, channel_to_id FROM channel_forwards",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// Register a channel to a founder, creating the row if needed.
    pub async fn register(
        &self,
        name: &str,
        owner_user_id: i64,
        topic: Option<(&str, i64)>,
    ) -> Result<i64, DbError> {
        let now = chrono::Utc::now().timestamp();
        let (topic_text, topic_user) = match topic {
            Some((text, user)) => (Some(text), Some(user)),
            None => (None, None),
        };
        sqlx::query(
            "INSERT INTO channels (name, owner_user_id, topic, topic_user_id, last_used)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET owner_user_id = excluded.owner_user_id,
                 last_used = excluded.last_used",
        )
        .bind(name)
        .bind(owner_user_id)
        .bind(topic_text)
        .bind(topic_user)
        .bind(now)
        .execute(self.pool)
        .await?;

        let id = sqlx::query_scalar::<_, i64>("SELECT id FROM channels WHERE name = ?")
            .bind(name)
            .fetch_one(self.pool)
            .await?;
        Ok(id)
    }

    pub async fn unregister(&self, name: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM channels WHERE name = ?")
            .bind(name)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_topic(
        &self,
        channel_id: i64,
        topic: &str,
        user_id: i64,
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE channels SET topic = ?, topic_user_id = ? WHERE id = ?")
            .bind(topic)
            .bind(user_id)
            .bind(channel_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_key(&self, channel_id: i64, key: Option<&str>) -> Result<(), DbError> {
        sqlx::query("UPDATE channels SET key = ? WHERE id = ?")
            .bind(key)
            .bind(channel_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_founder(&self, channel_id: i64, user_id: i64) -> Result<(), DbError> {
        sqlx::query("UPDATE channels SET owner_user_id = ? WHERE id = ?")
            .bind(user_id)
            .bind(channel_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_antispam(&self, channel_id: i64, enabled: bool) -> Result<(), DbError> {
        sqlx::query("UPDATE channels SET antispam = ? WHERE id = ?")
            .bind(enabled)
            .bind(channel_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_history(&self, channel_id: i64, enabled: bool) -> Result<(), DbError> {
        sqlx::query("UPDATE channels SET store_history = ? WHERE id = ?")
            .bind(enabled)
            .bind(channel_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn record_use(&self, channel_id: i64) -> Result<(), DbError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE channels SET last_used = ? WHERE id = ?")
            .bind(now)
            .bind(channel_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn add_op(&self, channel_id: i64, user_id: i64) -> Result<(), DbError> {
        sqlx::query("INSERT INTO channel_ops (channel_id, user_id) VALUES (?, ?)")
            .bind(channel_id)
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_op(&self, channel_id: i64, user_id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM channel_ops WHERE channel_id = ? AND user_id = ?")
            .bind(channel_id)
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn add_mute(
        &self,
        channel_id: i64,
        issuer_user_id: i64,
        user_id: i64,
        expires: Option<i64>,
        reason: Option<&str>,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO channel_mutes (channel_id, issuer_user_id, user_id, expires, reason)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(channel_id)
        .bind(issuer_user_id)
        .bind(user_id)
        .bind(expires)
        .bind(reason)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_mute(&self, channel_id: i64, user_id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM channel_mutes WHERE channel_id = ? AND user_id = ?")
            .bind(channel_id)
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn add_ban(
        &self,
        channel_id: i64,
        issuer_user_id: i64,
        user_id: i64,
        ip_address: Option<&str>,
        expires: Option<i64>,
        reason: Option<&str>,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO channel_bans (channel_id, issuer_user_id, user_id, ip_address, expires, reason)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(channel_id)
        .bind(issuer_user_id)
        .bind(user_id)
        .bind(ip_address)
        .bind(expires)
        .bind(reason)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_ban(&self, channel_id: i64, user_id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM channel_bans WHERE channel_id = ? AND user_id = ?")
            .bind(channel_id)
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn add_forward(&self, from_id: i64, to_id: i64) -> Result<(), DbError> {
        sqlx::query(
            "INSERT OR IGNORE INTO channel_forwards (channel_from_id, channel_to_id) VALUES (?, ?)",
        )
        .bind(from_id)
        .bind(to_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_forward(&self, from_id: i64, to_id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM channel_forwards WHERE channel_from_id = ? AND channel_to_id = ?")
            .bind(from_id)
            .bind(to_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Append one history line, returning its id.
    pub async fn append_history(
        &self,
        channel_id: i64,
        user_id: i64,
        msg: &str,
        ex_msg: bool,
    ) -> Result<i64, DbError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "INSERT INTO channel_history (channel_id, user_id, time, msg, ex_msg)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(channel_id)
        .bind(user_id)
        .bind(now)
        .bind(msg)
        .bind(ex_msg)
        .execute(self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// History lines newer than `after_id`, oldest first.
    pub async fn history_after(
        &self,
        channel_id: i64,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<HistoryRow>, DbError> {
        let rows = sqlx::query_as::<_, (i64, i64, Option<String>, String, bool)>(
            "SELECT h.id, h.time, u.username, h.msg, h.ex_msg
             FROM channel_history h LEFT JOIN users u ON u.id = h.user_id
             WHERE h.channel_id = ? AND h.id > ?
             ORDER BY h.id LIMIT ?",
        )
        .bind(channel_id)
        .bind(after_id)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, time, username, msg, ex_msg)| HistoryRow {
                id,
                time,
                username: username.unwrap_or_else(|| "?".to_string()),
                msg,
                ex_msg,
            })
            .collect())
    }

    /// The newest `limit` history lines, oldest first.
    pub async fn recent_history(
        &self,
        channel_id: i64,
        limit: i64,
    ) -> Result<Vec<HistoryRow>, DbError> {
        let mut rows = sqlx::query_as::<_, (i64, i64, Option<String>, String, bool)>(
            "SELECT h.id, h.time, u.username, h.msg, h.ex_msg
             FROM channel_history h LEFT JOIN users u ON u.id = h.user_id
             WHERE h.channel_id = ?
             ORDER BY h.id DESC LIMIT ?",
        )
        .bind(channel_id)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        rows.reverse();
        Ok(rows
            .into_iter()
            .map(|(id, time, username, msg, ex_msg)| HistoryRow {
                id,
                time,
                username: username.unwrap_or_else(|| "?".to_string()),
                msg,
                ex_msg,
            })
            .collect())
    }

    /// Prune expired moderation rows, old history and abandoned channels.
    pub async fn clean(&self, now: i64) -> Result<(), DbError> {
        const DAY: i64 = 86_400;

        let mutes = sqlx::query("DELETE FROM channel_mutes WHERE expires IS NOT NULL AND expires < ?")
            .bind(now)
            .execute(self.pool)
            .await?
            .rows_affected();
        let bans = sqlx::query("DELETE FROM channel_bans WHERE expires IS NOT NULL AND expires < ?")
            .bind(now)
            .execute(self.pool)
            .await?
            .rows_affected();
        let history = sqlx::query("DELETE FROM channel_history WHERE time < ?")
            .bind(now - 14 * DAY)
            .execute(self.pool)
            .await?
            .rows_affected();
        let channels = sqlx::query("DELETE FROM channels WHERE last_used < ?")
            .bind(now - 180 * DAY)
            .execute(self.pool)
            .await?
            .rows_affected();

        tracing::info!(mutes, bans, history, channels, "Pruned channel rows");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_db;

    #[tokio::test]
    async fn register_is_idempotent_and_keeps_id() {
        let db = test_db().await;
        let alice = db.users().register("alice", "h", "", None, "user").await.unwrap();

        let id1 = db.channels().register("main", alice, None).await.unwrap();
        let id2 = db.channels().register("main", alice, None).await.unwrap();
        assert_eq!(id1, id2);

        let record = db.channels().find_by_name("main").await.unwrap().unwrap();
        assert_eq!(record.owner_user_id, Some(alice));
    }

    #[tokio::test]
    async fn topic_persists() {
        let db = test_db().await;
        let alice = db.users().register("alice", "h", "", None, "user").await.unwrap();
        let id = db.channels().register("dev", alice, None).await.unwrap();

        db.channels().set_topic(id, "welcome", alice).await.unwrap();
        let record = db.channels().find_by_name("dev").await.unwrap().unwrap();
        assert_eq!(record.topic.as_deref(), Some("welcome"));
        assert_eq!(record.topic_user_id, Some(alice));
    }

    #[tokio::test]
    async fn history_after_filters_by_id() {
        let db = test_db().await;
        let alice = db.users().register("alice", "h", "", None, "user").await.unwrap();
        let chan = db.channels().register("log", alice, None).await.unwrap();

        let first = db
            .channels()
            .append_history(chan, alice, "one", false)
            .await
            .unwrap();
        db.channels()
            .append_history(chan, alice, "two", true)
            .await
            .unwrap();

        let rows = db.channels().history_after(chan, first, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].msg, "two");
        assert!(rows[0].ex_msg);
        assert_eq!(rows[0].username, "alice");
    }

    #[tokio::test]
    async fn clean_drops_expired_moderation_rows() {
        let db = test_db().await;
        let alice = db.users().register("alice", "h", "", None, "user").await.unwrap();
        let mallory = db.users().register("mallory", "h", "", None, "user").await.unwrap();
        let chan = db.channels().register("main", alice, None).await.unwrap();

        let now = chrono::Utc::now().timestamp();
        db.channels()
            .add_mute(chan, alice, mallory, Some(now - 10), None)
            .await
            .unwrap();
        // indefinite mutes survive the sweep
        db.channels()
            .add_mute(chan, alice, alice, None, None)
            .await
            .unwrap();

        db.channels().clean(now).await.unwrap();
        let mutes = db.channels().mutes_all().await.unwrap();
        assert_eq!(mutes.len(), 1);
        assert_eq!(mutes[0].user_id, alice);
    }
}

//! SQLite-based mail storage

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};

use super::traits::MailStore;
use crate::models::{Account, MessageId, MessageRecord, SyncCheckpoint, ThreadId};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Linked Gmail accounts, one per local user
            CREATE TABLE accounts (
                id INTEGER PRIMARY KEY,
                email TEXT NOT NULL,
                added_at TEXT NOT NULL,
                token_data TEXT
            );

            -- Bearer session tokens issued by the auth layer
            CREATE TABLE sessions (
                token TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_sessions_user ON sessions(user_id);

            -- Full-sync checkpoint per user
            CREATE TABLE sync_checkpoints (
                user_id INTEGER PRIMARY KEY,
                history_id TEXT,
                sync_in_progress INTEGER NOT NULL DEFAULT 0,
                last_sync_time TEXT
            );

            -- Thread references
            CREATE TABLE threads (
                user_id INTEGER NOT NULL,
                id TEXT NOT NULL,
                PRIMARY KEY (user_id, id)
            );

            -- Messages with encrypted subject/body/snippet envelopes
            CREATE TABLE messages (
                user_id INTEGER NOT NULL,
                id TEXT NOT NULL,
                thread_id TEXT NOT NULL,
                from_addr TEXT NOT NULL,
                to_addr TEXT NOT NULL,
                subject_enc TEXT NOT NULL,
                body_enc TEXT NOT NULL,
                snippet_enc TEXT NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                is_starred INTEGER NOT NULL DEFAULT 0,
                internal_date INTEGER NOT NULL,
                PRIMARY KEY (user_id, id),
                FOREIGN KEY (user_id, thread_id) REFERENCES threads(user_id, id)
            );

            CREATE INDEX idx_messages_thread ON messages(user_id, thread_id);
            CREATE INDEX idx_messages_internal_date ON messages(user_id, internal_date DESC);

            -- Labels on messages (many-to-many)
            CREATE TABLE message_labels (
                user_id INTEGER NOT NULL,
                message_id TEXT NOT NULL,
                label_id TEXT NOT NULL,
                PRIMARY KEY (user_id, message_id, label_id),
                FOREIGN KEY (user_id, message_id) REFERENCES messages(user_id, id) ON DELETE CASCADE
            );

            CREATE INDEX idx_message_labels_label ON message_labels(user_id, label_id);
            "#,
        ),
    ])
}

/// SQLite-based mail storage
pub struct SqliteMailStore {
    conn: Mutex<Connection>,
}

impl SqliteMailStore {
    /// Open (or create) a SQLite mail store and bring its schema up to date
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        // WAL lets status reads proceed while a sync transaction is open;
        // foreign_keys is needed for ON DELETE CASCADE.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("[STORE] database mutex poisoned"))
    }

    /// Load labels for a message
    fn load_labels(&self, conn: &Connection, user_id: i64, message_id: &str) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT label_id FROM message_labels
             WHERE user_id = ? AND message_id = ?
             ORDER BY label_id",
        )?;

        let labels = stmt
            .query_map(params![user_id, message_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(labels)
    }
}

fn parse_time(value: Option<String>) -> Option<DateTime<Utc>> {
    value.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

impl MailStore for SqliteMailStore {
    fn get_account(&self, user_id: i64) -> Result<Option<Account>> {
        let conn = self.conn()?;
        let row: Option<(i64, String, String, Option<String>)> = conn
            .query_row(
                "SELECT id, email, added_at, token_data FROM accounts WHERE id = ?",
                [user_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        Ok(row.map(|(id, email, added_at, token_data)| Account {
            id,
            email,
            added_at: parse_time(Some(added_at)).unwrap_or_else(Utc::now),
            token_data,
        }))
    }

    fn save_account(&self, account: &Account) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO accounts (id, email, added_at, token_data)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                token_data = excluded.token_data",
            params![
                account.id,
                account.email,
                account.added_at.to_rfc3339(),
                account.token_data
            ],
        )?;
        Ok(())
    }

    fn find_session_user(&self, token: &str) -> Result<Option<i64>> {
        let conn = self.conn()?;
        let user_id = conn
            .query_row(
                "SELECT user_id FROM sessions WHERE token = ?",
                [token],
                |row| row.get(0),
            )
            .optional()?;
        Ok(user_id)
    }

    fn save_session(&self, token: &str, user_id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO sessions (token, user_id) VALUES (?, ?)",
            params![token, user_id],
        )?;
        Ok(())
    }

    fn get_checkpoint(&self, user_id: i64) -> Result<Option<SyncCheckpoint>> {
        let conn = self.conn()?;
        let row: Option<(Option<String>, bool, Option<String>)> = conn
            .query_row(
                "SELECT history_id, sync_in_progress, last_sync_time
                 FROM sync_checkpoints WHERE user_id = ?",
                [user_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        Ok(row.map(|(history_id, sync_in_progress, last_sync_time)| SyncCheckpoint {
            user_id,
            history_id,
            sync_in_progress,
            last_sync_time: parse_time(last_sync_time),
        }))
    }

    fn save_checkpoint(&self, checkpoint: &SyncCheckpoint) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_checkpoints (user_id, history_id, sync_in_progress, last_sync_time)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                history_id = excluded.history_id,
                sync_in_progress = excluded.sync_in_progress,
                last_sync_time = excluded.last_sync_time",
            params![
                checkpoint.user_id,
                checkpoint.history_id,
                checkpoint.sync_in_progress,
                checkpoint.last_sync_time.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn insert_messages(&self, records: &[MessageRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        let mut inserted = 0;

        {
            let mut thread_stmt =
                tx.prepare("INSERT OR IGNORE INTO threads (user_id, id) VALUES (?, ?)")?;
            for record in records {
                thread_stmt.execute(params![record.user_id, record.thread_id.as_str()])?;
            }

            let mut message_stmt = tx.prepare(
                "INSERT OR IGNORE INTO messages
                    (user_id, id, thread_id, from_addr, to_addr, subject_enc, body_enc,
                     snippet_enc, is_read, is_starred, internal_date)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            let mut label_stmt = tx.prepare(
                "INSERT OR IGNORE INTO message_labels (user_id, message_id, label_id)
                 VALUES (?, ?, ?)",
            )?;

            for record in records {
                let changed = message_stmt.execute(params![
                    record.user_id,
                    record.id.as_str(),
                    record.thread_id.as_str(),
                    record.from,
                    record.to,
                    record.subject_enc,
                    record.body_enc,
                    record.snippet_enc,
                    record.is_read,
                    record.is_starred,
                    record.internal_date,
                ])?;

                // Existing rows keep their labels too
                if changed == 0 {
                    continue;
                }
                inserted += 1;

                for label in &record.label_ids {
                    label_stmt.execute(params![record.user_id, record.id.as_str(), label])?;
                }
            }
        }

        tx.commit().context("Failed to commit message batch")?;
        Ok(inserted)
    }

    fn get_message(&self, user_id: i64, id: &MessageId) -> Result<Option<MessageRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT thread_id, from_addr, to_addr, subject_enc, body_enc, snippet_enc,
                        is_read, is_starred, internal_date
                 FROM messages WHERE user_id = ? AND id = ?",
                params![user_id, id.as_str()],
                |row| {
                    Ok(MessageRecord {
                        id: id.clone(),
                        thread_id: ThreadId::new(row.get::<_, String>(0)?),
                        user_id,
                        from: row.get(1)?,
                        to: row.get(2)?,
                        subject_enc: row.get(3)?,
                        body_enc: row.get(4)?,
                        snippet_enc: row.get(5)?,
                        is_read: row.get(6)?,
                        is_starred: row.get(7)?,
                        label_ids: Vec::new(),
                        internal_date: row.get(8)?,
                    })
                },
            )
            .optional()?;

        let Some(mut record) = row else {
            return Ok(None);
        };
        record.label_ids = self.load_labels(&conn, user_id, id.as_str())?;
        Ok(Some(record))
    }

    fn has_message(&self, user_id: i64, id: &MessageId) -> Result<bool> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM messages WHERE user_id = ? AND id = ?)",
            params![user_id, id.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn count_messages(&self, user_id: i64) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE user_id = ?",
            [user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

//! SQLite-backed storage with zstd-compressed message bodies

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use rusqlite_migration::{M, Migrations};
use serde::{Deserialize, Serialize};

use super::{RecordStore, SyncStateStore};
use crate::models::{
    Attachment, BacklogMode, CanonicalRecord, EmailAddress, Label, LabelOrigin, MessageId,
    SearchIndexEntry, SyncState, SyncStateUpdate, ThreadId, UserId,
};

/// Database migrations
///
/// Applied in order; the user_version pragma tracks progress.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        r#"
        -- Sync state per user
        CREATE TABLE sync_state (
            user_id TEXT PRIMARY KEY,
            checkpoint TEXT,
            full_sync_completed INTEGER NOT NULL DEFAULT 0,
            backlog_cursor TEXT,
            backlog_mode TEXT NOT NULL DEFAULT 'none',
            last_synced_at TEXT,
            backlog_last_processed_at TEXT,
            updated_at TEXT NOT NULL
        );

        -- Canonical records, bodies zstd compressed
        CREATE TABLE records (
            user_id TEXT NOT NULL,
            message_id TEXT NOT NULL,
            thread_id TEXT NOT NULL,
            checkpoint TEXT,
            subject TEXT NOT NULL,
            from_name TEXT,
            from_address TEXT NOT NULL,
            recipients TEXT NOT NULL,
            received_at INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            body_text BLOB,
            body_html BLOB,
            snippet TEXT NOT NULL,
            unread INTEGER NOT NULL DEFAULT 0,
            attachments TEXT NOT NULL,
            message_id_header TEXT,
            references_header TEXT,
            in_reply_to TEXT,
            PRIMARY KEY (user_id, message_id)
        );

        CREATE INDEX idx_records_user_received
            ON records(user_id, received_at DESC);

        -- Labels on records (many-to-many)
        CREATE TABLE record_labels (
            user_id TEXT NOT NULL,
            message_id TEXT NOT NULL,
            label_id TEXT NOT NULL,
            PRIMARY KEY (user_id, message_id, label_id)
        );

        CREATE INDEX idx_record_labels_label
            ON record_labels(user_id, label_id);

        -- Denormalized search index entries
        CREATE TABLE index_entries (
            user_id TEXT NOT NULL,
            message_id TEXT NOT NULL,
            thread_id TEXT NOT NULL,
            checkpoint TEXT,
            subject TEXT NOT NULL,
            from_name TEXT NOT NULL,
            from_address TEXT NOT NULL,
            snippet TEXT NOT NULL,
            received_at INTEGER NOT NULL,
            labels TEXT NOT NULL,
            recipients TEXT NOT NULL,
            unread INTEGER NOT NULL DEFAULT 0,
            embedded INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (user_id, message_id)
        );

        CREATE INDEX idx_index_entries_embedding
            ON index_entries(user_id, embedded, received_at DESC);

        -- Per-user label catalog
        CREATE TABLE labels (
            user_id TEXT NOT NULL,
            label_id TEXT NOT NULL,
            name TEXT NOT NULL,
            origin TEXT NOT NULL,
            PRIMARY KEY (user_id, label_id)
        );
        "#,
    )])
}

/// Recipient lists serialized into one JSON column; the engine never
/// queries by recipient.
#[derive(Serialize, Deserialize, Default)]
struct RecipientsColumn {
    to: Vec<EmailAddress>,
    cc: Vec<EmailAddress>,
    bcc: Vec<EmailAddress>,
}

/// SQLite-backed implementation of RecordStore and SyncStateStore
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::setup(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (tests, throwaway runs)
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        Self::setup(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn setup(conn: &mut Connection) -> Result<()> {
        // WAL for concurrent readers, NORMAL sync is safe under WAL
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
            .to_latest(conn)
            .context("Failed to run database migrations")?;
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
        Ok(RecordRow {
            user_id: row.get("user_id")?,
            message_id: row.get("message_id")?,
            thread_id: row.get("thread_id")?,
            checkpoint: row.get("checkpoint")?,
            subject: row.get("subject")?,
            from_name: row.get("from_name")?,
            from_address: row.get("from_address")?,
            recipients: row.get("recipients")?,
            received_at: row.get("received_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            body_text: row.get("body_text")?,
            body_html: row.get("body_html")?,
            snippet: row.get("snippet")?,
            unread: row.get("unread")?,
            attachments: row.get("attachments")?,
            message_id_header: row.get("message_id_header")?,
            references_header: row.get("references_header")?,
            in_reply_to: row.get("in_reply_to")?,
        })
    }

    fn load_labels(
        conn: &Connection,
        user_id: &str,
        message_id: &str,
    ) -> Result<Vec<String>> {
        let mut stmt = conn.prepare_cached(
            "SELECT label_id FROM record_labels
             WHERE user_id = ?1 AND message_id = ?2",
        )?;
        let labels = stmt
            .query_map(params![user_id, message_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(labels)
    }
}

/// Intermediate row shape before labels are joined in
struct RecordRow {
    user_id: String,
    message_id: String,
    thread_id: String,
    checkpoint: Option<String>,
    subject: String,
    from_name: Option<String>,
    from_address: String,
    recipients: String,
    received_at: i64,
    created_at: String,
    updated_at: String,
    body_text: Option<Vec<u8>>,
    body_html: Option<Vec<u8>>,
    snippet: String,
    unread: bool,
    attachments: String,
    message_id_header: Option<String>,
    references_header: Option<String>,
    in_reply_to: Option<String>,
}

impl RecordRow {
    fn into_record(self, labels: Vec<String>) -> Result<CanonicalRecord> {
        let recipients: RecipientsColumn =
            serde_json::from_str(&self.recipients).context("Corrupt recipients column")?;
        let attachments: Vec<Attachment> =
            serde_json::from_str(&self.attachments).context("Corrupt attachments column")?;

        let body_text = decompress(self.body_text)?;
        let body_html = decompress(self.body_html)?;
        let processed_html = if body_html.is_empty() {
            format!("<pre>{}</pre>", body_text)
        } else {
            body_html.clone()
        };

        Ok(CanonicalRecord {
            user_id: UserId::new(self.user_id),
            message_id: MessageId::new(self.message_id),
            thread_id: ThreadId::new(self.thread_id),
            checkpoint: self.checkpoint,
            subject: self.subject,
            from: EmailAddress {
                name: self.from_name,
                address: self.from_address,
            },
            to: recipients.to,
            cc: recipients.cc,
            bcc: recipients.bcc,
            received_at: parse_millis(self.received_at),
            created_at: parse_rfc3339(&self.created_at)?,
            updated_at: parse_rfc3339(&self.updated_at)?,
            body_text,
            body_html,
            processed_html,
            snippet: self.snippet,
            unread: self.unread,
            has_attachments: !attachments.is_empty(),
            attachments,
            labels,
            message_id_header: self.message_id_header,
            references: self.references_header,
            in_reply_to: self.in_reply_to,
        })
    }
}

impl RecordStore for SqliteStore {
    fn upsert_record(&self, record: CanonicalRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        let recipients = serde_json::to_string(&RecipientsColumn {
            to: record.to.clone(),
            cc: record.cc.clone(),
            bcc: record.bcc.clone(),
        })?;
        let attachments = serde_json::to_string(&record.attachments)?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            r#"
            INSERT INTO records (
                user_id, message_id, thread_id, checkpoint, subject,
                from_name, from_address, recipients, received_at,
                created_at, updated_at, body_text, body_html, snippet,
                unread, attachments, message_id_header, references_header,
                in_reply_to
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                ?14, ?15, ?16, ?17, ?18, ?19
            )
            ON CONFLICT (user_id, message_id) DO UPDATE SET
                thread_id = excluded.thread_id,
                checkpoint = excluded.checkpoint,
                subject = excluded.subject,
                from_name = excluded.from_name,
                from_address = excluded.from_address,
                recipients = excluded.recipients,
                received_at = excluded.received_at,
                updated_at = excluded.updated_at,
                body_text = excluded.body_text,
                body_html = excluded.body_html,
                snippet = excluded.snippet,
                unread = excluded.unread,
                attachments = excluded.attachments,
                message_id_header = excluded.message_id_header,
                references_header = excluded.references_header,
                in_reply_to = excluded.in_reply_to
            "#,
            params![
                record.user_id.as_str(),
                record.message_id.as_str(),
                record.thread_id.as_str(),
                record.checkpoint,
                record.subject,
                record.from.name,
                record.from.address,
                recipients,
                record.received_at.timestamp_millis(),
                record.created_at.to_rfc3339(),
                now,
                compress(&record.body_text)?,
                compress(&record.body_html)?,
                record.snippet,
                record.unread,
                attachments,
                record.message_id_header,
                record.references,
                record.in_reply_to,
            ],
        )?;

        // Replace the label rows for this record
        conn.execute(
            "DELETE FROM record_labels WHERE user_id = ?1 AND message_id = ?2",
            params![record.user_id.as_str(), record.message_id.as_str()],
        )?;
        let mut insert = conn.prepare_cached(
            "INSERT OR IGNORE INTO record_labels (user_id, message_id, label_id)
             VALUES (?1, ?2, ?3)",
        )?;
        for label in &record.labels {
            insert.execute(params![
                record.user_id.as_str(),
                record.message_id.as_str(),
                label
            ])?;
        }

        Ok(())
    }

    fn upsert_index_entry(&self, entry: SearchIndexEntry) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO index_entries (
                user_id, message_id, thread_id, checkpoint, subject,
                from_name, from_address, snippet, received_at, labels,
                recipients, unread, embedded
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT (user_id, message_id) DO UPDATE SET
                thread_id = excluded.thread_id,
                checkpoint = excluded.checkpoint,
                subject = excluded.subject,
                from_name = excluded.from_name,
                from_address = excluded.from_address,
                snippet = excluded.snippet,
                received_at = excluded.received_at,
                labels = excluded.labels,
                recipients = excluded.recipients,
                unread = excluded.unread,
                embedded = excluded.embedded
            "#,
            params![
                entry.user_id.as_str(),
                entry.message_id.as_str(),
                entry.thread_id.as_str(),
                entry.checkpoint,
                entry.subject,
                entry.from_name,
                entry.from_address,
                entry.snippet,
                entry.received_at.timestamp_millis(),
                serde_json::to_string(&entry.labels)?,
                serde_json::to_string(&entry.to)?,
                entry.unread,
                entry.embedded,
            ],
        )?;
        Ok(())
    }

    fn get_record(&self, user: &UserId, id: &MessageId) -> Result<Option<CanonicalRecord>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT * FROM records WHERE user_id = ?1 AND message_id = ?2",
                params![user.as_str(), id.as_str()],
                Self::row_to_record,
            )
            .optional()?;

        match row {
            Some(row) => {
                let labels = Self::load_labels(&conn, user.as_str(), id.as_str())?;
                Ok(Some(row.into_record(labels)?))
            }
            None => Ok(None),
        }
    }

    fn get_index_entry(
        &self,
        user: &UserId,
        id: &MessageId,
    ) -> Result<Option<SearchIndexEntry>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM index_entries WHERE user_id = ?1 AND message_id = ?2",
            params![user.as_str(), id.as_str()],
            row_to_entry,
        )
        .optional()
        .map_err(Into::into)
    }

    fn existing_ids(&self, user: &UserId, ids: &[MessageId]) -> Result<HashSet<MessageId>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let conn = self.conn.lock().unwrap();
        let placeholders = vec!["?"; ids.len()].join(", ");
        let mut existing = HashSet::new();

        for table in ["records", "index_entries"] {
            let sql = format!(
                "SELECT message_id FROM {table}
                 WHERE user_id = ? AND message_id IN ({placeholders})"
            );
            let mut stmt = conn.prepare(&sql)?;
            let param_iter = std::iter::once(user.as_str().to_string())
                .chain(ids.iter().map(|id| id.as_str().to_string()));
            let found = stmt
                .query_map(params_from_iter(param_iter), |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            existing.extend(found.into_iter().map(MessageId::new));
        }

        Ok(existing)
    }

    fn count_records(&self, user: &UserId) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE user_id = ?1",
            params![user.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn query_records(
        &self,
        user: &UserId,
        label: Option<&str>,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
        limit: usize,
    ) -> Result<Vec<CanonicalRecord>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = String::from("SELECT r.* FROM records r WHERE r.user_id = :user");
        if label.is_some() {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM record_labels l
                   WHERE l.user_id = r.user_id AND l.message_id = r.message_id
                     AND l.label_id = :label)",
            );
        }
        if range.is_some() {
            sql.push_str(" AND r.received_at BETWEEN :start AND :end");
        }
        sql.push_str(" ORDER BY r.received_at DESC LIMIT :limit");

        let mut stmt = conn.prepare(&sql)?;
        let mut named: Vec<(&str, Box<dyn rusqlite::ToSql>)> = vec![
            (":user", Box::new(user.as_str().to_string())),
            (":limit", Box::new(limit as i64)),
        ];
        if let Some(label) = label {
            named.push((":label", Box::new(label.to_string())));
        }
        if let Some((start, end)) = range {
            named.push((":start", Box::new(start.timestamp_millis())));
            named.push((":end", Box::new(end.timestamp_millis())));
        }
        let params_ref: Vec<(&str, &dyn rusqlite::ToSql)> =
            named.iter().map(|(n, v)| (*n, v.as_ref())).collect();

        let rows = stmt
            .query_map(params_ref.as_slice(), Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<RecordRow>>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let labels = Self::load_labels(&conn, &row.user_id, &row.message_id)?;
            records.push(row.into_record(labels)?);
        }
        Ok(records)
    }

    fn list_unembedded(&self, user: &UserId, limit: usize) -> Result<Vec<SearchIndexEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM index_entries
             WHERE user_id = ?1 AND embedded = 0
             ORDER BY received_at DESC LIMIT ?2",
        )?;
        let entries = stmt
            .query_map(params![user.as_str(), limit as i64], row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn mark_embedded(&self, user: &UserId, ids: &[MessageId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock().unwrap();
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "UPDATE index_entries SET embedded = 1
             WHERE user_id = ? AND message_id IN ({placeholders})"
        );
        let param_iter = std::iter::once(user.as_str().to_string())
            .chain(ids.iter().map(|id| id.as_str().to_string()));
        conn.execute(&sql, params_from_iter(param_iter))?;
        Ok(())
    }

    fn list_index_entries(&self, user: &UserId) -> Result<Vec<SearchIndexEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM index_entries WHERE user_id = ?1
             ORDER BY received_at DESC",
        )?;
        let entries = stmt
            .query_map(params![user.as_str()], row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn upsert_label(&self, user: &UserId, label: Label) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let origin = match label.origin {
            LabelOrigin::Provider => "provider",
            LabelOrigin::Local => "local",
        };
        conn.execute(
            "INSERT INTO labels (user_id, label_id, name, origin)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (user_id, label_id) DO UPDATE SET
                 name = excluded.name,
                 origin = excluded.origin",
            params![user.as_str(), label.id, label.name, origin],
        )?;
        Ok(())
    }

    fn list_labels(&self, user: &UserId) -> Result<Vec<Label>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT label_id, name, origin FROM labels WHERE user_id = ?1",
        )?;
        let labels = stmt
            .query_map(params![user.as_str()], |row| {
                let origin: String = row.get(2)?;
                Ok(Label {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    origin: if origin == "local" {
                        LabelOrigin::Local
                    } else {
                        LabelOrigin::Provider
                    },
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(labels)
    }

    fn local_label_ids(&self, user: &UserId) -> Result<HashSet<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT label_id FROM labels WHERE user_id = ?1 AND origin = 'local'",
        )?;
        let ids = stmt
            .query_map(params![user.as_str()], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(ids)
    }
}

impl SyncStateStore for SqliteStore {
    fn get(&self, user: &UserId) -> Result<Option<SyncState>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM sync_state WHERE user_id = ?1",
            params![user.as_str()],
            row_to_state,
        )
        .optional()
        .map_err(Into::into)
    }

    fn upsert(&self, user: &UserId, update: SyncStateUpdate) -> Result<SyncState> {
        let conn = self.conn.lock().unwrap();

        // Read-modify-write under the connection lock; merge semantics
        // live in SyncStateUpdate::apply.
        let mut state = conn
            .query_row(
                "SELECT * FROM sync_state WHERE user_id = ?1",
                params![user.as_str()],
                row_to_state,
            )
            .optional()?
            .unwrap_or_else(|| SyncState::new(user.clone()));
        update.apply(&mut state);

        conn.execute(
            r#"
            INSERT INTO sync_state (
                user_id, checkpoint, full_sync_completed, backlog_cursor,
                backlog_mode, last_synced_at, backlog_last_processed_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (user_id) DO UPDATE SET
                checkpoint = excluded.checkpoint,
                full_sync_completed = excluded.full_sync_completed,
                backlog_cursor = excluded.backlog_cursor,
                backlog_mode = excluded.backlog_mode,
                last_synced_at = excluded.last_synced_at,
                backlog_last_processed_at = excluded.backlog_last_processed_at,
                updated_at = excluded.updated_at
            "#,
            params![
                state.user_id.as_str(),
                state.checkpoint,
                state.full_sync_completed,
                state.backlog_cursor,
                match state.backlog_mode {
                    BacklogMode::None => "none",
                    BacklogMode::Paged => "paged",
                },
                state.last_synced_at.map(|t| t.to_rfc3339()),
                state.backlog_last_processed_at.map(|t| t.to_rfc3339()),
                state.updated_at.to_rfc3339(),
            ],
        )?;

        Ok(state)
    }

    fn users_with_backlog(&self) -> Result<Vec<UserId>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT user_id FROM sync_state WHERE backlog_cursor IS NOT NULL",
        )?;
        let users = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(users.into_iter().map(UserId::new).collect())
    }

    fn reset(&self, user: &UserId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sync_state SET
                 checkpoint = NULL,
                 full_sync_completed = 0,
                 backlog_cursor = NULL,
                 backlog_mode = 'none',
                 updated_at = ?2
             WHERE user_id = ?1",
            params![user.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<SearchIndexEntry> {
    let labels: String = row.get("labels")?;
    let recipients: String = row.get("recipients")?;
    Ok(SearchIndexEntry {
        user_id: UserId::new(row.get::<_, String>("user_id")?),
        message_id: MessageId::new(row.get::<_, String>("message_id")?),
        thread_id: ThreadId::new(row.get::<_, String>("thread_id")?),
        checkpoint: row.get("checkpoint")?,
        subject: row.get("subject")?,
        from_name: row.get("from_name")?,
        from_address: row.get("from_address")?,
        snippet: row.get("snippet")?,
        received_at: parse_millis(row.get("received_at")?),
        labels: serde_json::from_str(&labels).unwrap_or_default(),
        to: serde_json::from_str(&recipients).unwrap_or_default(),
        unread: row.get("unread")?,
        embedded: row.get("embedded")?,
    })
}

fn row_to_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncState> {
    let mode: String = row.get("backlog_mode")?;
    let last_synced_at: Option<String> = row.get("last_synced_at")?;
    let backlog_last: Option<String> = row.get("backlog_last_processed_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(SyncState {
        user_id: UserId::new(row.get::<_, String>("user_id")?),
        checkpoint: row.get("checkpoint")?,
        full_sync_completed: row.get("full_sync_completed")?,
        backlog_cursor: row.get("backlog_cursor")?,
        backlog_mode: if mode == "paged" {
            BacklogMode::Paged
        } else {
            BacklogMode::None
        },
        last_synced_at: last_synced_at.and_then(|s| parse_rfc3339(&s).ok()),
        backlog_last_processed_at: backlog_last.and_then(|s| parse_rfc3339(&s).ok()),
        updated_at: parse_rfc3339(&updated_at).unwrap_or_else(|_| Utc::now()),
    })
}

fn parse_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Bad timestamp: {s}"))?
        .with_timezone(&Utc))
}

fn compress(text: &str) -> Result<Option<Vec<u8>>> {
    if text.is_empty() {
        return Ok(None);
    }
    Ok(Some(zstd::encode_all(text.as_bytes(), 3)?))
}

fn decompress(blob: Option<Vec<u8>>) -> Result<String> {
    match blob {
        Some(bytes) => {
            let decoded = zstd::decode_all(&bytes[..])?;
            Ok(String::from_utf8_lossy(&decoded).into_owned())
        }
        None => Ok(String::new()),
    }
}

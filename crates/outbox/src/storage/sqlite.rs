//! SQLite-based outbox storage

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use rusqlite_migration::{M, Migrations};

use super::traits::{Directory, OutboxStore};
use crate::models::{
    ConversationKey, ConversationThread, Credential, Delivery, DirectoryUser, LabelBinding,
    NewSendRecord, Role, SendRecord, SendStatus, Team, TenderInfo,
};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Outbox state
        M::up(
            r#"
            -- One row per logical email and its attempt series
            CREATE TABLE email_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                reference_type TEXT NOT NULL,
                reference_id INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                from_user_id INTEGER NOT NULL,
                from_email TEXT NOT NULL,
                to_emails TEXT NOT NULL,             -- JSON array
                cc_emails TEXT NOT NULL DEFAULT '[]', -- JSON array
                cc_suppressed INTEGER NOT NULL DEFAULT 0,
                subject TEXT NOT NULL,
                template_name TEXT NOT NULL,
                template_data TEXT NOT NULL DEFAULT '{}',
                body_html TEXT NOT NULL,
                label_path TEXT,
                attachments TEXT NOT NULL DEFAULT '[]', -- JSON array
                status TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                last_attempt_at TEXT,
                sent_at TEXT,
                provider_message_id TEXT,
                provider_thread_id TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX idx_email_logs_retry ON email_logs(status, attempts);
            CREATE INDEX idx_email_logs_reference
                ON email_logs(reference_type, reference_id);

            -- Provider thread per business entity
            CREATE TABLE email_threads (
                reference_type TEXT NOT NULL,
                reference_id INTEGER NOT NULL,
                provider_thread_id TEXT NOT NULL,
                seed_message_id TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (reference_type, reference_id)
            );

            -- Cache of provider label IDs per user mailbox
            CREATE TABLE email_labels (
                user_id INTEGER NOT NULL,
                label_name TEXT NOT NULL,
                label_id TEXT NOT NULL,
                PRIMARY KEY (user_id, label_name)
            );

            -- Google OAuth tokens per user
            CREATE TABLE oauth_accounts (
                user_id INTEGER PRIMARY KEY,
                provider_email TEXT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                expires_at TEXT,
                updated_at TEXT NOT NULL
            );
            "#,
        ),
        // Migration 2: Directory tables (owned by the host application)
        M::up(
            r#"
            CREATE TABLE IF NOT EXISTS teams (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                primary_team_id INTEGER
            );

            CREATE TABLE IF NOT EXISTS roles (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS user_roles (
                user_id INTEGER NOT NULL,
                role_id INTEGER NOT NULL,
                PRIMARY KEY (user_id, role_id)
            );

            CREATE TABLE IF NOT EXISTS tenders (
                id INTEGER PRIMARY KEY,
                team_id INTEGER NOT NULL,
                name TEXT NOT NULL
            );
            "#,
        ),
    ])
}

const RECORD_COLUMNS: &str = "id, reference_type, reference_id, event_type, from_user_id,
    from_email, to_emails, cc_emails, cc_suppressed, subject, template_name, template_data,
    body_html, label_path, attachments, status, attempts, last_attempt_at, sent_at,
    provider_message_id, provider_thread_id, error_message, created_at";

/// Raw column values of an `email_logs` row, decoded outside the row callback
struct RecordRow {
    id: i64,
    reference_type: String,
    reference_id: i64,
    event_type: String,
    from_user_id: i64,
    from_email: String,
    to_emails: String,
    cc_emails: String,
    cc_suppressed: bool,
    subject: String,
    template_name: String,
    template_data: String,
    body_html: String,
    label_path: Option<String>,
    attachments: String,
    status: String,
    attempts: i64,
    last_attempt_at: Option<String>,
    sent_at: Option<String>,
    provider_message_id: Option<String>,
    provider_thread_id: Option<String>,
    error_message: Option<String>,
    created_at: String,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            reference_type: row.get(1)?,
            reference_id: row.get(2)?,
            event_type: row.get(3)?,
            from_user_id: row.get(4)?,
            from_email: row.get(5)?,
            to_emails: row.get(6)?,
            cc_emails: row.get(7)?,
            cc_suppressed: row.get(8)?,
            subject: row.get(9)?,
            template_name: row.get(10)?,
            template_data: row.get(11)?,
            body_html: row.get(12)?,
            label_path: row.get(13)?,
            attachments: row.get(14)?,
            status: row.get(15)?,
            attempts: row.get(16)?,
            last_attempt_at: row.get(17)?,
            sent_at: row.get(18)?,
            provider_message_id: row.get(19)?,
            provider_thread_id: row.get(20)?,
            error_message: row.get(21)?,
            created_at: row.get(22)?,
        })
    }

    fn into_record(self) -> Result<SendRecord> {
        Ok(SendRecord {
            id: self.id,
            conversation: ConversationKey::new(self.reference_type, self.reference_id),
            event_type: self.event_type,
            from_user_id: self.from_user_id,
            from_email: self.from_email,
            to_emails: serde_json::from_str(&self.to_emails)
                .with_context(|| format!("Invalid to_emails on record {}", self.id))?,
            cc_emails: serde_json::from_str(&self.cc_emails)
                .with_context(|| format!("Invalid cc_emails on record {}", self.id))?,
            cc_suppressed: self.cc_suppressed,
            subject: self.subject,
            template_name: self.template_name,
            template_data: serde_json::from_str(&self.template_data)
                .with_context(|| format!("Invalid template_data on record {}", self.id))?,
            body_html: self.body_html,
            label_path: self.label_path,
            attachments: serde_json::from_str(&self.attachments)
                .with_context(|| format!("Invalid attachments on record {}", self.id))?,
            status: self.status.parse()?,
            attempts: u32::try_from(self.attempts).unwrap_or(0),
            last_attempt_at: parse_optional_timestamp(self.last_attempt_at)?,
            sent_at: parse_optional_timestamp(self.sent_at)?,
            provider_message_id: self.provider_message_id,
            provider_thread_id: self.provider_thread_id,
            error_message: self.error_message,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp: {}", value))
}

fn parse_optional_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_timestamp).transpose()
}

/// SQLite-based outbox storage
///
/// Also serves the directory tables when the host application shares the
/// same database file.
pub struct SqliteOutboxStore {
    conn: Mutex<Connection>,
}

impl SqliteOutboxStore {
    /// Open (or create) the outbox database at `db_path`
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // WAL lets the retry pass read while detached transmissions write
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            "#,
        )?;

        Self::with_connection(conn)
    }

    /// Open a private in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(mut conn: Connection) -> Result<Self> {
        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Outbox database lock poisoned"))
    }

    fn load_record(conn: &Connection, id: i64) -> Result<Option<SendRecord>> {
        let row = conn
            .query_row(
                &format!("SELECT {} FROM email_logs WHERE id = ?", RECORD_COLUMNS),
                [id],
                RecordRow::from_row,
            )
            .optional()?;

        row.map(RecordRow::into_record).transpose()
    }
}

impl OutboxStore for SqliteOutboxStore {
    fn insert_record(&self, record: NewSendRecord) -> Result<SendRecord> {
        let conn = self.lock()?;
        let created_at = Utc::now();

        conn.execute(
            "INSERT INTO email_logs
             (reference_type, reference_id, event_type, from_user_id, from_email,
              to_emails, cc_emails, cc_suppressed, subject, template_name, template_data,
              body_html, label_path, attachments, status, attempts, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
            params![
                record.conversation.reference_type,
                record.conversation.reference_id,
                record.event_type,
                record.from_user_id,
                record.from_email,
                serde_json::to_string(&record.to_emails)?,
                serde_json::to_string(&record.cc_emails)?,
                record.cc_suppressed,
                record.subject,
                record.template_name,
                serde_json::to_string(&record.template_data)?,
                record.body_html,
                record.label_path,
                serde_json::to_string(&record.attachments)?,
                SendStatus::Pending.as_str(),
                created_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert send record")?;

        let id = conn.last_insert_rowid();
        Ok(SendRecord::from_new(id, record, created_at))
    }

    fn get_record(&self, id: i64) -> Result<Option<SendRecord>> {
        let conn = self.lock()?;
        Self::load_record(&conn, id)
    }

    fn mark_sending(&self, id: i64, at: DateTime<Utc>) -> Result<Option<SendRecord>> {
        let conn = self.lock()?;

        let changed = conn.execute(
            "UPDATE email_logs
             SET status = 'sending', attempts = attempts + 1, last_attempt_at = ?
             WHERE id = ? AND status IN ('pending', 'failed')",
            params![at.to_rfc3339(), id],
        )?;

        if changed == 0 {
            return Ok(None);
        }

        Self::load_record(&conn, id)
    }

    fn mark_sent(&self, id: i64, delivery: &Delivery) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE email_logs
             SET status = 'sent', provider_message_id = ?, provider_thread_id = ?,
                 sent_at = ?, error_message = NULL
             WHERE id = ?",
            params![
                delivery.message_id,
                delivery.thread_id,
                delivery.sent_at.to_rfc3339(),
                id
            ],
        )?;
        Ok(())
    }

    fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE email_logs SET status = 'failed', error_message = ? WHERE id = ?",
            params![error, id],
        )?;
        Ok(())
    }

    fn list_retryable(&self, max_retries: u32) -> Result<Vec<SendRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM email_logs
             WHERE status = 'failed' AND COALESCE(attempts, 0) < ?
             ORDER BY id ASC",
            RECORD_COLUMNS
        ))?;

        let rows = stmt
            .query_map([max_retries], RecordRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RecordRow::into_record).collect()
    }

    fn get_conversation(&self, key: &ConversationKey) -> Result<Option<ConversationThread>> {
        let conn = self.lock()?;
        let row: Option<(String, String, String)> = conn
            .query_row(
                "SELECT provider_thread_id, seed_message_id, updated_at FROM email_threads
                 WHERE reference_type = ? AND reference_id = ?",
                params![key.reference_type, key.reference_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((provider_thread_id, seed_message_id, updated_at)) = row else {
            return Ok(None);
        };

        Ok(Some(ConversationThread {
            key: key.clone(),
            provider_thread_id,
            seed_message_id,
            updated_at: parse_timestamp(&updated_at)?,
        }))
    }

    fn upsert_conversation(&self, thread: ConversationThread) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO email_threads
             (reference_type, reference_id, provider_thread_id, seed_message_id, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(reference_type, reference_id) DO UPDATE SET
                provider_thread_id = excluded.provider_thread_id,
                seed_message_id = excluded.seed_message_id,
                updated_at = excluded.updated_at",
            params![
                thread.key.reference_type,
                thread.key.reference_id,
                thread.provider_thread_id,
                thread.seed_message_id,
                thread.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get_label_binding(&self, user_id: i64, label_name: &str) -> Result<Option<LabelBinding>> {
        let conn = self.lock()?;
        let label_id: Option<String> = conn
            .query_row(
                "SELECT label_id FROM email_labels WHERE user_id = ? AND label_name = ?",
                params![user_id, label_name],
                |row| row.get(0),
            )
            .optional()?;

        Ok(label_id.map(|id| LabelBinding::new(user_id, label_name, id)))
    }

    fn save_label_binding(&self, binding: LabelBinding) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO email_labels (user_id, label_name, label_id) VALUES (?, ?, ?)
             ON CONFLICT(user_id, label_name) DO UPDATE SET label_id = excluded.label_id",
            params![binding.user_id, binding.label_name, binding.label_id],
        )?;
        Ok(())
    }

    fn get_credential(&self, user_id: i64) -> Result<Option<Credential>> {
        let conn = self.lock()?;
        let row: Option<(String, String, Option<String>, Option<String>)> = conn
            .query_row(
                "SELECT provider_email, access_token, refresh_token, expires_at
                 FROM oauth_accounts WHERE user_id = ?",
                [user_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let Some((provider_email, access_token, refresh_token, expires_at)) = row else {
            return Ok(None);
        };

        Ok(Some(Credential {
            user_id,
            access_token,
            refresh_token,
            expires_at: parse_optional_timestamp(expires_at)?,
            provider_email,
        }))
    }

    fn save_credential(&self, credential: Credential) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO oauth_accounts
             (user_id, provider_email, access_token, refresh_token, expires_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                provider_email = excluded.provider_email,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at",
            params![
                credential.user_id,
                credential.provider_email,
                credential.access_token,
                credential.refresh_token,
                credential.expires_at.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn update_access_token(
        &self,
        user_id: i64,
        access_token: &str,
        expires_at: Option<DateTime<Utc>>,
        refresh_token: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE oauth_accounts
             SET access_token = ?, expires_at = ?,
                 refresh_token = COALESCE(?, refresh_token), updated_at = ?
             WHERE user_id = ?",
            params![
                access_token,
                expires_at.map(|t| t.to_rfc3339()),
                refresh_token,
                Utc::now().to_rfc3339(),
                user_id,
            ],
        )?;

        if changed == 0 {
            anyhow::bail!("No credential stored for user {}", user_id);
        }
        Ok(())
    }

    fn find_connected_user_ids(&self, emails: &[String]) -> Result<Vec<i64>> {
        if emails.is_empty() {
            return Ok(Vec::new());
        }

        let wanted: HashSet<String> = emails.iter().map(|e| e.to_lowercase()).collect();
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT user_id, provider_email FROM oauth_accounts ORDER BY user_id")?;

        let accounts = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(accounts
            .into_iter()
            .filter(|(_, email)| wanted.contains(&email.to_lowercase()))
            .map(|(user_id, _)| user_id)
            .collect())
    }
}

impl Directory for SqliteOutboxStore {
    fn get_user(&self, id: i64) -> Result<Option<DirectoryUser>> {
        let conn = self.lock()?;
        let user = conn
            .query_row(
                "SELECT id, name, email, is_active, primary_team_id FROM users WHERE id = ?",
                [id],
                |row| {
                    Ok(DirectoryUser {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                        is_active: row.get(3)?,
                        primary_team_id: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    fn list_roles(&self) -> Result<Vec<Role>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, name FROM roles ORDER BY id")?;
        let roles = stmt
            .query_map([], |row| {
                Ok(Role {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(roles)
    }

    fn list_teams(&self) -> Result<Vec<Team>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, name FROM teams ORDER BY id")?;
        let teams = stmt
            .query_map([], |row| {
                Ok(Team {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(teams)
    }

    fn active_emails_by_role(&self, role_id: i64, team_id: i64) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT u.email FROM users u
             INNER JOIN user_roles ur ON ur.user_id = u.id
             WHERE ur.role_id = ? AND u.primary_team_id = ? AND u.is_active = 1
             ORDER BY u.id",
        )?;
        let emails = stmt
            .query_map(params![role_id, team_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(emails)
    }

    fn get_tender(&self, id: i64) -> Result<Option<TenderInfo>> {
        let conn = self.lock()?;
        let tender = conn
            .query_row(
                "SELECT id, team_id, name FROM tenders WHERE id = ?",
                [id],
                |row| {
                    Ok(TenderInfo {
                        id: row.get(0)?,
                        team_id: row.get(1)?,
                        name: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(tender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Attachment;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn create_test_store() -> (SqliteOutboxStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        // Use .test.sqlite extension to clearly distinguish from production databases
        let db_path = dir.path().join("outbox.test.sqlite");
        let store = SqliteOutboxStore::new(&db_path).unwrap();
        (store, dir)
    }

    fn make_new_record(reference_id: i64) -> NewSendRecord {
        NewSendRecord {
            conversation: ConversationKey::new("tender", reference_id),
            event_type: "tender.assigned".to_string(),
            from_user_id: 1,
            from_email: "sender@example.com".to_string(),
            to_emails: vec!["a@example.com".to_string(), "b@example.com".to_string()],
            cc_emails: vec!["c@example.com".to_string()],
            cc_suppressed: true,
            subject: "Tender assigned".to_string(),
            template_name: "tender-assigned".to_string(),
            template_data: serde_json::json!({"tenderNo": "T-1"}),
            body_html: "<p>Assigned</p>".to_string(),
            label_path: Some("Tendering/AC/Road".to_string()),
            attachments: vec![Attachment {
                filename: "boq.pdf".to_string(),
                path: PathBuf::from("/srv/uploads/boq.pdf"),
            }],
        }
    }

    fn seed_directory(store: &SqliteOutboxStore) {
        let conn = store.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO teams (id, name) VALUES (1, 'AC'), (2, 'Accounts');
            INSERT INTO roles (id, name) VALUES (10, 'Admin'), (11, 'Team Leader');
            INSERT INTO users (id, name, email, is_active, primary_team_id) VALUES
                (1, 'Asha', 'asha@example.com', 1, 1),
                (2, 'Ben', 'ben@example.com', 1, 1),
                (3, 'Cy', 'cy@example.com', 0, 1),
                (4, 'Dee', 'dee@example.com', 1, 2);
            INSERT INTO user_roles (user_id, role_id) VALUES (1, 10), (2, 11), (3, 10), (4, 10);
            INSERT INTO tenders (id, team_id, name) VALUES (7, 1, 'Road Works');
            "#,
        )
        .unwrap();
    }

    #[test]
    fn test_record_round_trip() {
        let (store, _dir) = create_test_store();

        let inserted = store.insert_record(make_new_record(7)).unwrap();
        let loaded = store.get_record(inserted.id).unwrap().unwrap();

        assert_eq!(loaded.status, SendStatus::Pending);
        assert_eq!(loaded.attempts, 0);
        assert_eq!(loaded.to_emails, vec!["a@example.com", "b@example.com"]);
        assert_eq!(loaded.cc_emails, vec!["c@example.com"]);
        assert!(loaded.cc_suppressed);
        assert_eq!(loaded.template_data["tenderNo"], "T-1");
        assert_eq!(loaded.attachments.len(), 1);
        assert_eq!(loaded.label_path.as_deref(), Some("Tendering/AC/Road"));
        assert!(store.get_record(inserted.id + 100).unwrap().is_none());
    }

    #[test]
    fn test_lifecycle_transitions() {
        let (store, _dir) = create_test_store();
        let record = store.insert_record(make_new_record(7)).unwrap();

        let sending = store.mark_sending(record.id, Utc::now()).unwrap().unwrap();
        assert_eq!(sending.status, SendStatus::Sending);
        assert_eq!(sending.attempts, 1);
        assert!(sending.last_attempt_at.is_some());

        // A record already in flight cannot be claimed again
        assert!(store.mark_sending(record.id, Utc::now()).unwrap().is_none());

        store.mark_failed(record.id, "503 backend error").unwrap();
        let failed = store.get_record(record.id).unwrap().unwrap();
        assert_eq!(failed.status, SendStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("503 backend error"));

        store.mark_sending(record.id, Utc::now()).unwrap().unwrap();
        store
            .mark_sent(
                record.id,
                &Delivery {
                    message_id: "gm-1".to_string(),
                    thread_id: Some("th-1".to_string()),
                    sent_at: Utc::now(),
                },
            )
            .unwrap();

        let sent = store.get_record(record.id).unwrap().unwrap();
        assert_eq!(sent.status, SendStatus::Sent);
        assert_eq!(sent.attempts, 2);
        assert!(sent.error_message.is_none());
        assert_eq!(sent.provider_message_id.as_deref(), Some("gm-1"));
        assert_eq!(sent.provider_thread_id.as_deref(), Some("th-1"));
        assert!(sent.sent_at.is_some());
    }

    #[test]
    fn test_list_retryable_respects_ceiling() {
        let (store, _dir) = create_test_store();

        let once = store.insert_record(make_new_record(1)).unwrap();
        store.mark_sending(once.id, Utc::now()).unwrap();
        store.mark_failed(once.id, "err").unwrap();

        let twice = store.insert_record(make_new_record(2)).unwrap();
        for _ in 0..2 {
            store.mark_sending(twice.id, Utc::now()).unwrap();
            store.mark_failed(twice.id, "err").unwrap();
        }

        let pending = store.insert_record(make_new_record(3)).unwrap();

        let retryable: Vec<i64> = store
            .list_retryable(2)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(retryable, vec![once.id]);
        assert!(!retryable.contains(&pending.id));
    }

    #[test]
    fn test_conversation_upsert() {
        let (store, _dir) = create_test_store();
        let key = ConversationKey::new("tender", 7);
        assert!(store.get_conversation(&key).unwrap().is_none());

        store
            .upsert_conversation(ConversationThread::new(key.clone(), "th-1", "<a@x>"))
            .unwrap();
        store
            .upsert_conversation(ConversationThread::new(key.clone(), "th-2", "<b@x>"))
            .unwrap();

        let thread = store.get_conversation(&key).unwrap().unwrap();
        assert_eq!(thread.provider_thread_id, "th-2");
        assert_eq!(thread.seed_message_id, "<b@x>");
    }

    #[test]
    fn test_label_binding_overwrite() {
        let (store, _dir) = create_test_store();
        store
            .save_label_binding(LabelBinding::new(1, "Tendering", "Label_1"))
            .unwrap();
        store
            .save_label_binding(LabelBinding::new(1, "Tendering", "Label_9"))
            .unwrap();

        let binding = store.get_label_binding(1, "Tendering").unwrap().unwrap();
        assert_eq!(binding.label_id, "Label_9");
        assert!(store.get_label_binding(2, "Tendering").unwrap().is_none());
    }

    #[test]
    fn test_credentials() {
        let (store, _dir) = create_test_store();
        let expires = Utc::now();
        store
            .save_credential(
                Credential::new(5, "Five@Example.com", "old")
                    .with_refresh_token("refresh")
                    .with_expires_at(expires),
            )
            .unwrap();

        store
            .update_access_token(5, "new", Some(expires + chrono::Duration::hours(1)), None)
            .unwrap();

        let cred = store.get_credential(5).unwrap().unwrap();
        assert_eq!(cred.access_token, "new");
        assert_eq!(cred.refresh_token.as_deref(), Some("refresh"));
        assert!(store.update_access_token(6, "x", None, None).is_err());

        let ids = store
            .find_connected_user_ids(&["five@example.com".to_string(), "nobody@x.com".to_string()])
            .unwrap();
        assert_eq!(ids, vec![5]);
    }

    #[test]
    fn test_directory_queries() {
        let (store, _dir) = create_test_store();
        seed_directory(&store);

        assert_eq!(store.get_user(1).unwrap().unwrap().name, "Asha");
        assert!(!store.get_user(3).unwrap().unwrap().is_active);
        assert_eq!(store.list_roles().unwrap().len(), 2);
        assert_eq!(store.list_teams().unwrap()[1].name, "Accounts");

        // Inactive admin (user 3) and other-team admin (user 4) are excluded
        assert_eq!(
            store.active_emails_by_role(10, 1).unwrap(),
            vec!["asha@example.com"]
        );
        assert_eq!(store.get_tender(7).unwrap().unwrap().name, "Road Works");
        assert!(store.get_tender(8).unwrap().is_none());
    }
}

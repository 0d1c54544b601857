//! SQLite record stores, one file per user
//!
//! Every store is an r2d2 pool over a single database file. Connections are
//! configured with a busy timeout and, unless disabled, WAL journaling so the
//! auto-importer and an interactive upload can write to the same store.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Result, SbvError};
use crate::models::{RecordKind, UnifiedRecord};
use crate::repository::RecordRepository;
use crate::schema::{self, messages};
use crate::validation::InputValidator;

/// Connection pool for one store
pub type DbPool = Pool<SqliteConnectionManager>;
/// Connection checked out of a [`DbPool`]
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

const INSERT_RECORD_SQL: &str = "INSERT INTO messages (
        record_type, address, body, type, date, read, thread_id, subject,
        media_type, media_data, protocol, status, service_center, sub_id,
        contact_name, sender, content_type, read_report, read_status,
        message_id, message_size, message_type, sim_slot, addresses,
        duration, presentation, subscription_id
    ) VALUES (
        ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
        ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27
    ) ON CONFLICT DO NOTHING";

/// Connection settings shared by every store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// WAL journaling; turn off for network filesystems
    pub use_wal: bool,
    /// How long a writer waits on a locked database
    pub busy_timeout: Duration,
    /// Pool size per store
    pub max_connections: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            use_wal: true,
            busy_timeout: Duration::from_millis(5000),
            max_connections: 4,
        }
    }
}

/// Media blob stored with a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMedia {
    /// Declared MIME type
    pub mime_type: String,
    /// Raw payload as imported
    pub data: Vec<u8>,
}

/// Database manager for one user's store
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    path: PathBuf,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("path", &self.path).finish()
    }
}

impl Database {
    /// Open (creating if needed) the store at `path` and apply migrations
    pub fn open(path: &Path, options: StoreOptions) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let StoreOptions {
            use_wal,
            busy_timeout,
            max_connections,
        } = options;
        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            let journal = if use_wal { "WAL" } else { "DELETE" };
            conn.pragma_update_and_check(None, "journal_mode", journal, |row| {
                row.get::<_, String>(0)
            })
            .map(|_| ())
        });
        let pool = Pool::builder().max_size(max_connections.max(1)).build(manager)?;

        let conn = pool.get()?;
        Self::run_migrations(&conn)?;
        debug!(path = %path.display(), use_wal, "Opened record store");

        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    /// Run database migrations
    fn run_migrations(conn: &Connection) -> Result<()> {
        for (name, sql) in schema::MIGRATIONS {
            conn.execute_batch(sql).map_err(|e| {
                SbvError::Other(format!("Failed to run migration {name}: {e}"))
            })?;
        }
        Ok(())
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> Result<DbConnection> {
        Ok(self.pool.get()?)
    }

    /// Location of the database file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert one record, ignoring it if the dedup tuple already exists
    pub fn insert_record(&self, record: &UnifiedRecord) -> Result<i64> {
        let conn = self.get_connection()?;
        let is_call = record.kind == RecordKind::Call;
        let (media_type, media_data) = record
            .media
            .as_ref()
            .map_or((None, None), |m| (Some(m.mime_type.as_str()), Some(m.data.as_slice())));

        conn.execute(
            INSERT_RECORD_SQL,
            params![
                record.kind.code(),
                record.address,
                (!is_call).then_some(record.body.as_str()),
                record.direction_type,
                record.unix_seconds(),
                record.read,
                record.thread_id,
                record.subject,
                media_type,
                media_data,
                record.protocol,
                record.status,
                record.service_center,
                record.sub_id,
                record.contact_name,
                record.sender,
                record.content_type,
                record.read_report,
                record.read_status,
                record.message_id,
                record.message_size,
                record.message_type,
                record.sim_slot,
                record.joined_participants(),
                record.duration,
                record.presentation,
                record.subscription_id,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Count stored records, optionally of one kind
    pub fn count_records(&self, kind: Option<RecordKind>) -> Result<i64> {
        let conn = self.get_connection()?;
        let count = match kind {
            Some(kind) => conn.query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE {} = ?1",
                    messages::TABLE,
                    messages::RECORD_TYPE
                ),
                params![kind.code()],
                |row| row.get(0),
            )?,
            None => conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", messages::TABLE),
                [],
                |row| row.get(0),
            )?,
        };
        Ok(count)
    }

    /// Media attached to a message record, if any
    pub fn get_media(&self, id: i64) -> Result<Option<StoredMedia>> {
        let conn = self.get_connection()?;
        let row: Option<(Option<String>, Option<Vec<u8>>)> = conn
            .query_row(
                &format!(
                    "SELECT {}, {} FROM {} WHERE {} = ?1 AND {} IN (?2, ?3)",
                    messages::MEDIA_TYPE,
                    messages::MEDIA_DATA,
                    messages::TABLE,
                    messages::ID,
                    messages::RECORD_TYPE
                ),
                params![id, RecordKind::Sms.code(), RecordKind::Mms.code()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(match row {
            Some((Some(mime_type), Some(data))) if !data.is_empty() => {
                Some(StoredMedia { mime_type, data })
            }
            _ => None,
        })
    }

    /// Ids of records whose body matches a full-text query
    pub fn search_body(&self, query: &str, limit: u32) -> Result<Vec<i64>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT rowid FROM {table} WHERE {table} MATCH ?1 ORDER BY rowid LIMIT ?2",
            table = schema::messages_fts::TABLE
        ))?;
        let ids = stmt
            .query_map(params![query, limit], |row| row.get(0))?
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        Ok(ids)
    }
}

impl RecordRepository for Database {
    fn insert_record(&self, record: &UnifiedRecord) -> Result<i64> {
        Self::insert_record(self, record)
    }
}

/// Lazily opened per-user stores under one directory
#[derive(Debug, Clone)]
pub struct StoreRegistry {
    root: PathBuf,
    options: StoreOptions,
    stores: Arc<RwLock<HashMap<String, Database>>>,
}

impl StoreRegistry {
    /// Stores live at `{root}/sbv_{user_id}.db`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, options: StoreOptions) -> Self {
        Self {
            root: root.into(),
            options,
            stores: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Path of a user's store file
    pub fn store_path(&self, user_id: &str) -> Result<PathBuf> {
        InputValidator::validate_user_id(user_id)?;
        Ok(self.root.join(format!("sbv_{user_id}.db")))
    }

    /// The user's store, opening and migrating it on first use
    pub fn get(&self, user_id: &str) -> Result<Database> {
        if let Some(db) = self.stores.read().get(user_id) {
            return Ok(db.clone());
        }

        let path = self.store_path(user_id)?;
        let mut stores = self.stores.write();
        if let Some(db) = stores.get(user_id) {
            return Ok(db.clone());
        }
        let db = Database::open(&path, self.options)?;
        info!(user_id, path = %path.display(), "Opened user store");
        stores.insert(user_id.to_string(), db.clone());
        Ok(db)
    }

    /// Directory holding the store files
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

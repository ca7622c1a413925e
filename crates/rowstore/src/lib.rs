//! # Rowstore
//!
//! SQLite-backed row store for desired infrastructure.
//!
//! This crate provides:
//! - Module bookkeeping (installed modules, their dependencies and tables)
//! - Transactional schema changes for module installs and removals
//! - Change logging through per-table triggers into `rc_audit_log`
//! - Ad-hoc statements with JSON-shaped results
//!
//! ## Example
//!
//! ```no_run
//! use rowstore::Store;
//! use std::path::Path;
//!
//! let store = Store::open(Path::new("/path/to/rowcloud.db"))?;
//!
//! for module in store.installed_modules()? {
//!     println!("{module}: {:?}", store.module_tables(&module)?);
//! }
//!
//! let result = store.query("SELECT name FROM network")?;
//! println!("{} rows", result.rows.len());
//! # Ok::<(), rowstore::Error>(())
//! ```

mod error;
mod types;

pub use error::{Error, Result};
pub use types::{AuditEntry, QueryResult};

use converge::{ModuleStore, ModuleTransaction, TransactionWork};
use log::debug;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, params};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Prefix reserved for bookkeeping tables
pub const METADATA_PREFIX: &str = "rc_";

const METADATA_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS rc_module (
        name TEXT PRIMARY KEY,
        installed_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS rc_module_dependency (
        module TEXT NOT NULL REFERENCES rc_module(name) ON DELETE CASCADE,
        dependency TEXT NOT NULL,
        PRIMARY KEY (module, dependency)
    );

    CREATE TABLE IF NOT EXISTS rc_module_table (
        module TEXT NOT NULL REFERENCES rc_module(name) ON DELETE CASCADE,
        table_name TEXT NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS rc_audit_log (
        id INTEGER PRIMARY KEY,
        table_name TEXT NOT NULL,
        op TEXT NOT NULL,
        old_row TEXT,
        new_row TEXT,
        changed_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_audit_table ON rc_audit_log(table_name);
";

/// A shared handle on the row database
///
/// Cloning is cheap; every clone talks to the same connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open or create a store at the given path
    ///
    /// Creates the database file and the bookkeeping tables if they don't exist.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        debug!("opening store at {}", db_path.display());
        Self::init(Connection::open(db_path)?)
    }

    /// Throwaway store, mostly for tests and dry runs
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(METADATA_SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with exclusive access to the connection
    pub fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        Ok(f(&self.lock())?)
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.lock().execute_batch(sql)?;
        Ok(())
    }

    /// Run one statement, collecting any rows it returns
    pub fn query(&self, sql: &str) -> Result<QueryResult> {
        let conn = self.lock();
        let mut stmt = conn.prepare(sql)?;

        if stmt.column_count() == 0 {
            let changes = stmt.execute([])?;
            return Ok(QueryResult {
                changes,
                ..Default::default()
            });
        }

        let columns: Vec<String> = stmt.column_names().iter().map(ToString::to_string).collect();
        let width = columns.len();
        let mut rows = Vec::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(json_value(row.get_ref(i)?));
            }
            rows.push(values);
        }

        Ok(QueryResult {
            columns,
            rows,
            changes: 0,
        })
    }

    /// Installed modules, in install order
    pub fn installed_modules(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM rc_module ORDER BY rowid")?;
            stmt.query_map([], |row| row.get(0))?.collect()
        })
    }

    pub fn module_dependencies(&self, module: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT dependency FROM rc_module_dependency WHERE module = ?1 ORDER BY rowid",
            )?;
            stmt.query_map([module], |row| row.get(0))?.collect()
        })
    }

    pub fn module_tables(&self, module: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT table_name FROM rc_module_table WHERE module = ?1 ORDER BY rowid",
            )?;
            stmt.query_map([module], |row| row.get(0))?.collect()
        })
    }

    /// User tables, bookkeeping tables excluded
    pub fn table_names(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table'
                   AND name NOT LIKE 'sqlite_%'
                   AND substr(name, 1, 3) <> ?1
                 ORDER BY name",
            )?;
            stmt.query_map([METADATA_PREFIX], |row| row.get(0))?
                .collect()
        })
    }

    /// Most recent row changes first
    pub fn audit_log(&self, limit: usize, table: Option<&str>) -> Result<Vec<AuditEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let raw: Vec<(i64, String, String, Option<String>, Option<String>, String)> = self
            .with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, table_name, op, old_row, new_row, changed_at
                     FROM rc_audit_log
                     WHERE ?1 IS NULL OR table_name = ?1
                     ORDER BY id DESC
                     LIMIT ?2",
                )?;
                stmt.query_map(params![table, limit], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                })?
                .collect()
            })?;

        raw.into_iter()
            .map(|(id, table_name, operation, old_row, new_row, changed_at)| {
                Ok(AuditEntry {
                    id,
                    table_name,
                    operation,
                    old_row: parse_snapshot(old_row)?,
                    new_row: parse_snapshot(new_row)?,
                    changed_at,
                })
            })
            .collect()
    }
}

impl ModuleStore for Store {
    fn installed_modules(&self) -> anyhow::Result<Vec<String>> {
        Ok(Self::installed_modules(self)?)
    }

    fn table_names(&self) -> anyhow::Result<Vec<String>> {
        Ok(Self::table_names(self)?)
    }

    /// Commits when `work` succeeds; dropping the transaction rolls it back
    fn transaction(&self, work: &mut TransactionWork<'_>) -> anyhow::Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        work(&mut SqliteTransaction { conn: &tx })?;
        tx.commit()?;
        Ok(())
    }
}

/// Schema and bookkeeping changes inside an open transaction
struct SqliteTransaction<'t> {
    conn: &'t Connection,
}

impl ModuleTransaction for SqliteTransaction<'_> {
    fn execute(&mut self, sql: &str) -> anyhow::Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn register_module(
        &mut self,
        module: &str,
        dependencies: &[String],
        tables: &[String],
    ) -> anyhow::Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO rc_module (name, installed_at) VALUES (?1, ?2)",
            params![module, now],
        )?;
        for dependency in dependencies {
            self.conn.execute(
                "INSERT INTO rc_module_dependency (module, dependency) VALUES (?1, ?2)",
                params![module, dependency],
            )?;
        }
        for table in tables {
            self.conn.execute(
                "INSERT INTO rc_module_table (module, table_name) VALUES (?1, ?2)",
                params![module, table],
            )?;
        }
        Ok(())
    }

    fn deregister_module(&mut self, module: &str) -> anyhow::Result<()> {
        self.conn
            .execute("DELETE FROM rc_module WHERE name = ?1", [module])?;
        Ok(())
    }

    fn attach_change_log(&mut self, table: &str) -> anyhow::Result<()> {
        let sql = change_log_triggers(self.conn, table)?;
        self.conn.execute_batch(&sql)?;
        debug!("change log attached to {table}");
        Ok(())
    }

    fn detach_change_log(&mut self, table: &str) -> anyhow::Result<()> {
        validate_identifier(table)?;
        self.conn.execute_batch(&format!(
            "DROP TRIGGER IF EXISTS \"{table}_audit_insert\";
             DROP TRIGGER IF EXISTS \"{table}_audit_update\";
             DROP TRIGGER IF EXISTS \"{table}_audit_delete\";"
        ))?;
        debug!("change log detached from {table}");
        Ok(())
    }
}

/// Three triggers copying each row change into `rc_audit_log` as JSON
fn change_log_triggers(conn: &Connection, table: &str) -> Result<String> {
    validate_identifier(table)?;
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\")"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if columns.is_empty() {
        return Err(Error::TableNotFound(table.to_string()));
    }

    let snapshot = |alias: &str| {
        let pairs: Vec<String> = columns
            .iter()
            .map(|c| format!("'{c}', {alias}.\"{c}\""))
            .collect();
        format!("json_object({})", pairs.join(", "))
    };
    let new_row = snapshot("NEW");
    let old_row = snapshot("OLD");
    let now = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

    Ok(format!(
        "CREATE TRIGGER IF NOT EXISTS \"{table}_audit_insert\" AFTER INSERT ON \"{table}\"
         BEGIN
             INSERT INTO rc_audit_log (table_name, op, old_row, new_row, changed_at)
             VALUES ('{table}', 'INSERT', NULL, {new_row}, {now});
         END;
         CREATE TRIGGER IF NOT EXISTS \"{table}_audit_update\" AFTER UPDATE ON \"{table}\"
         BEGIN
             INSERT INTO rc_audit_log (table_name, op, old_row, new_row, changed_at)
             VALUES ('{table}', 'UPDATE', {old_row}, {new_row}, {now});
         END;
         CREATE TRIGGER IF NOT EXISTS \"{table}_audit_delete\" AFTER DELETE ON \"{table}\"
         BEGIN
             INSERT INTO rc_audit_log (table_name, op, old_row, new_row, changed_at)
             VALUES ('{table}', 'DELETE', {old_row}, NULL, {now});
         END;"
    ))
}

// ============================================================================
// Utility functions
// ============================================================================

/// Accept `[A-Za-z_][A-Za-z0-9_]*`, the only names we interpolate into SQL
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 64;
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidIdentifier(name.to_string()))
    }
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(bytes) => Value::from(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::from(format!("<{} bytes>", bytes.len())),
    }
}

fn parse_snapshot(raw: Option<String>) -> Result<Option<Value>> {
    raw.map(|text| serde_json::from_str(&text))
        .transpose()
        .map_err(Error::from)
}

// ============================================================================
// Tests
// ============================================================================

// Store of record: one SQLite connection behind a mutex.
//
// Every caller gets exclusive use of the connection for the duration of its
// closure; async callers run on the blocking pool via [`Database::call`].

pub mod clients;
pub mod migrations;
pub mod store;
pub mod users;

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use rusqlite::Connection;

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database parent directory `{}`", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open server database at `{}`", path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory server database")?;
        Self::init(conn)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            ",
        )
        .context("failed to configure sqlite pragmas for server database")?;

        migrations::run_migrations(&mut conn)?;

        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Run `f` with the connection on the current thread.
    pub fn with_conn<R>(&self, f: impl FnOnce(&mut Connection) -> R) -> Result<R> {
        let mut conn = self.conn.lock().map_err(|_| anyhow!("server database lock poisoned"))?;
        Ok(f(&mut conn))
    }

    /// Run `f` with the connection on the blocking pool.
    pub async fn call<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> R + Send + 'static,
        R: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .context("database task panicked")?
    }

    pub fn schema_version(&self) -> Result<i64> {
        self.with_conn(|conn| migrations::current_schema_version(conn))?
    }
}

use rusqlite::Connection;
use std::path::Path;
use tokio::task;
use crate::error::{Result, ImpactError};

const PRAGMAS: &str = "PRAGMA journal_mode = WAL; \
     PRAGMA synchronous = NORMAL; \
     PRAGMA foreign_keys = ON; \
     PRAGMA temp_store = MEMORY; \
     PRAGMA busy_timeout = 5000;";

/// Database connection wrapper
#[derive(Debug, Clone)]
pub struct Db {
    path: std::path::PathBuf,
}

impl Db {
    /// Create a new database connection manager
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
        }
    }

    /// Path of the SQLite file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new database connection with the store pragmas applied
    pub fn open_connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .map_err(ImpactError::Database)?;

        // WAL for concurrent readers while a writer upserts cache blobs;
        // busy_timeout so concurrent workers wait instead of failing on lock
        conn.execute_batch(PRAGMAS)?;

        Ok(conn)
    }

    /// Execute a closure with a database connection in a blocking task
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        task::spawn_blocking(move || {
            let mut conn = db.open_connection()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| ImpactError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("database task failed: {}", e),
        )))?
    }

    /// Open the database and apply pending migrations from `migrations_dir`
    pub async fn open_migrated(db_path: &Path, migrations_dir: &Path) -> Result<Self> {
        let db = Db::new(db_path);
        let dir = migrations_dir.to_path_buf();
        db.with_connection(move |conn| migrate::run_migrations(conn, &dir)).await?;
        Ok(db)
    }
}

pub mod migrate;

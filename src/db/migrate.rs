use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use crate::error::{Result, ImpactError};

/// One `NNN_name.sql` file
#[derive(Debug)]
struct Migration {
    version: u32,
    name: String,
    sql: String,
}

/// `./migrations` when present, else the directory shipped with the crate
pub fn default_migrations_dir() -> PathBuf {
    let local = PathBuf::from("migrations");
    if local.is_dir() {
        local
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    }
}

fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );",
    )?;
    Ok(())
}

/// Names of applied migrations, oldest first
pub fn get_applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM schema_migrations ORDER BY version")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names)
}

fn applied_versions(conn: &Connection) -> Result<HashSet<u32>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations")?;
    let versions = stmt
        .query_map([], |row| row.get::<_, u32>(0))?
        .collect::<std::result::Result<HashSet<_>, _>>()?;
    Ok(versions)
}

/// Highest applied version, if any
pub fn schema_version(conn: &Connection) -> Result<Option<u32>> {
    let version = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get::<_, Option<u32>>(0))
        .optional()?
        .flatten();
    Ok(version)
}

fn parse_migration(path: &Path) -> Result<Option<Migration>> {
    if path.extension().and_then(|s| s.to_str()) != Some("sql") {
        return Ok(None);
    }
    let stem = path
        .file_stem()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ImpactError::Config(format!("Invalid migration filename: {}", path.display())))?;

    // "001_kv_store" -> 1
    let (prefix, _) = stem
        .split_once('_')
        .ok_or_else(|| ImpactError::Config(format!("Migration {} lacks a NNN_ prefix", stem)))?;
    let version: u32 = prefix
        .parse()
        .map_err(|_| ImpactError::Config(format!("Invalid migration version in {}", stem)))?;

    Ok(Some(Migration {
        version,
        name: stem.to_string(),
        sql: fs::read_to_string(path)?,
    }))
}

fn load_migrations(migrations_dir: &Path) -> Result<Vec<Migration>> {
    let mut migrations = Vec::new();
    for entry in fs::read_dir(migrations_dir)? {
        if let Some(migration) = parse_migration(&entry?.path())? {
            migrations.push(migration);
        }
    }
    migrations.sort_by_key(|m| m.version);

    if let Some(pair) = migrations.windows(2).find(|w| w[0].version == w[1].version) {
        return Err(ImpactError::Config(format!(
            "Migrations {} and {} share version {}",
            pair[0].name, pair[1].name, pair[0].version
        )));
    }
    Ok(migrations)
}

/// Apply pending migrations, each in its own transaction. Returns how many ran.
pub fn run_migrations(conn: &mut Connection, migrations_dir: &Path) -> Result<usize> {
    ensure_migrations_table(conn)?;
    let applied = applied_versions(conn)?;

    let mut ran = 0;
    for migration in load_migrations(migrations_dir)? {
        if applied.contains(&migration.version) {
            continue;
        }
        log::info!("Applying migration {}", migration.name);

        let tx = conn.transaction()?;
        tx.execute_batch(&migration.sql).map_err(|e| {
            ImpactError::Config(format!("Migration {} failed: {}", migration.name, e))
        })?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![migration.version, migration.name],
        )?;
        tx.commit()?;
        ran += 1;
    }

    if ran > 0 {
        log::info!("Cache schema now at version {:?}", schema_version(conn)?);
    }
    Ok(ran)
}

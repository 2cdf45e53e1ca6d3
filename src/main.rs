use anyhow::Result;
use impactmap::cache::CacheFamilies;
use impactmap::db::{migrate, Db};
use impactmap::server::HttpServer;
use impactmap::{AnalysisContext, Config, ImpactError};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger from environment variable or default to info level
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("verify");

    match command {
        "serve-http" => run_http_server().await?,
        _ => run_verification().await?,
    }

    Ok(())
}

/// Run the HTTP analysis server
async fn run_http_server() -> Result<()> {
    log::info!("Starting impactmap HTTP server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    if !config.http_server.enabled {
        log::warn!("http_server.enabled is false in config; starting anyway because serve-http was requested");
    }

    let context = Arc::new(AnalysisContext::from_config(&config).await?);
    let server = HttpServer::new(context, &config.http_server);
    server.run(config.http_server.port).await?;

    Ok(())
}

/// Load configuration, migrate the cache database and check its schema
async fn run_verification() -> Result<()> {
    log::info!("Starting impactmap v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    log::info!("Configuration loaded successfully");
    log::info!("Directory: {}", config.directory.base_url);
    log::info!(
        "Rate plan: {} ({} requests/min, {:?} between pages)",
        config.plan().name(),
        config.plan().requests_per_minute(),
        config.page_delay()
    );
    log::info!("Cache database: {} (scope '{}')", config.db_path().display(), config.cache.scope);

    let db = Db::open_migrated(config.db_path(), &migrate::default_migrations_dir()).await?;
    log::info!("Database initialized successfully");

    verify_database_schema(&db).await?;

    for family in CacheFamilies::from_config(&config.cache).all() {
        log::info!("Cache family {} v{} ttl {:?}", family.prefix, family.version, family.ttl);
    }

    if config.api_key().is_err() {
        log::warn!(
            "{} is not set; live analysis will fail until it is",
            config.directory.api_key_env
        );
    }

    log::info!("✓ Verification complete");
    Ok(())
}

/// Verify that the expected database objects exist
async fn verify_database_schema(db: &Db) -> Result<()> {
    db.with_connection(|conn| {
        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

        for table in ["kv_store", "schema_migrations"] {
            if !tables.iter().any(|t| t == table) {
                return Err(ImpactError::Config(format!("Missing table: {}", table)));
            }
            log::debug!("✓ Table exists: {}", table);
        }

        let applied = migrate::get_applied_migrations(conn)?;
        log::info!(
            "✓ Cache schema version {:?} ({} migrations applied)",
            migrate::schema_version(conn)?,
            applied.len()
        );

        let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        if journal_mode.to_uppercase() != "WAL" {
            return Err(ImpactError::Config(format!("Journal mode is not WAL: {}", journal_mode)));
        }
        log::debug!("✓ Journal mode: WAL");

        let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if integrity != "ok" {
            return Err(ImpactError::Config(format!("Database integrity check failed: {}", integrity)));
        }
        log::info!("✓ Database integrity: OK");

        Ok(())
    })
    .await?;

    Ok(())
}

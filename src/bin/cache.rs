//! Cache maintenance: per-family entry counts and eager purge of expired or
//! stale-version entries.

use clap::{Parser, Subcommand};
use impactmap::cache::{CacheFamilies, SqliteStore, TtlCache};
use impactmap::db::{migrate, Db};
use impactmap::Config;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "cache")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Count valid and invalid entries per family.
    Stats,
    /// Delete invalid entries.
    Purge {
        /// Only this family (identity, asset, relationships, search, asset_types).
        #[arg(long)]
        family: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args = Args::parse();
    let config = Config::load()?;
    let db = Db::open_migrated(config.db_path(), &migrate::default_migrations_dir()).await?;
    let store = Arc::new(SqliteStore::new(db, config.cache.scope.clone()));
    let cache = TtlCache::new(store.clone());
    let families = CacheFamilies::from_config(&config.cache);

    match args.command {
        Command::Stats => {
            println!("\n=== impactmap cache (scope '{}') ===\n", store.scope());
            println!("{:<15} {:>8} {:>10} {:>10} {:>12}", "Family", "Version", "Valid", "Invalid", "TTL (s)");
            println!("{:-<59}", "");
            for family in families.all() {
                let (valid, invalid) = cache.census(family).await;
                println!(
                    "{:<15} {:>8} {:>10} {:>10} {:>12}",
                    family.prefix,
                    family.version,
                    valid.len(),
                    invalid.len(),
                    family.ttl.as_secs()
                );
            }
            println!("{:-<59}", "");
            println!("Total rows: {}", store.count().await?);
        }
        Command::Purge { family } => {
            let selected = match family.as_deref() {
                Some(name) => vec![families
                    .by_prefix(name)
                    .ok_or_else(|| anyhow::anyhow!("Unknown cache family '{}'", name))?],
                None => families.all().to_vec(),
            };
            for family in selected {
                let (kept, removed) = cache.purge(family).await;
                println!("{:<15} kept {:>6}  removed {:>6}", family.prefix, kept, removed);
            }
        }
    }

    Ok(())
}

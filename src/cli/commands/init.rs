use crate::config::Config;
use crate::db::log;

use crate::cli::parser::Cli;
use crate::db::initialize::init_db;
use crate::db::pool::DbPool;
use crate::errors::AppResult;
use crate::remote::store::RemoteDb;
use crate::ui::messages::{success, warning};

/// Handle the `init` command
///
/// This initializes:
///  - the config directory (if missing)
///  - the configuration file (skipped in test mode)
///  - the on-device SQLite database with all pending migrations
///  - the remote store schema
pub fn handle(cli: &Cli) -> AppResult<()> {
    let mut cfg = Config::init_all(cli.db.clone(), cli.test)?;
    if let Some(remote) = &cli.remote {
        cfg.remote_database = remote.clone();
    }

    println!("⚙️  Initializing rFieldTrack…");
    println!("📄 Config file : {}", Config::config_file().display());
    println!("🗄️  Database   : {}", &cfg.database);
    println!("🛰️  Remote     : {}", &cfg.remote_database);

    let pool = DbPool::new(&cfg.database)?;
    init_db(&pool.conn)?;
    RemoteDb::open(&cfg.remote_database, &cfg)?;

    // internal log is best effort
    if let Err(e) = log::ttlog(
        &pool.conn,
        "init",
        "Database initialized",
        &format!("Database initialized at {}", &cfg.database),
    ) {
        warning(format!("Failed to write internal log: {}", e));
    }

    success("rFieldTrack initialization completed!");
    Ok(())
}

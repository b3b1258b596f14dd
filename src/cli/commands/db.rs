use crate::cli::parser::Commands;
use crate::config::Config;
use crate::db::migrate::run_pending_migrations;
use crate::db::pool::DbPool;
use crate::db::stats;
use crate::errors::AppResult;
use crate::remote::store::RemoteDb;
use crate::ui::messages::{info, success, warning};
use rusqlite::Connection;

fn integrity(conn: &Connection) -> AppResult<String> {
    Ok(conn.query_row("PRAGMA integrity_check;", [], |row| row.get(0))?)
}

/// Maintenance of the device database. `--migrate` and `--check` also cover
/// the remote store, whose schema evolves with the same engine.
pub fn handle(cmd: &Commands, cfg: &Config) -> AppResult<()> {
    let Commands::Db {
        migrate,
        check,
        vacuum,
        info: show_info,
    } = cmd
    else {
        return Ok(());
    };

    let pool = DbPool::new(&cfg.database)?;

    if *migrate {
        info("Running device migrations…");
        run_pending_migrations(&pool.conn)?;
        // opening the remote applies its pending migrations
        RemoteDb::open(&cfg.remote_database, cfg)?;
        success("Device and remote schemas are up to date.");
    }

    if *show_info {
        stats::print_db_info(&pool, &cfg.database, cfg.sync.max_attempts)?;
    }

    if *check {
        for (name, result) in [
            ("device", integrity(&pool.conn)?),
            ("remote", integrity(RemoteDb::open(&cfg.remote_database, cfg)?.conn())?),
        ] {
            if result == "ok" {
                success(format!("Integrity check passed ({name})."));
            } else {
                warning(format!("Integrity check failed ({name}): {result}"));
            }
        }
    }

    if *vacuum {
        info("Running VACUUM…");
        pool.conn.execute_batch("VACUUM;")?;
        success("Vacuum completed.");
    }

    Ok(())
}

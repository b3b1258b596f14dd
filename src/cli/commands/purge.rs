use crate::cli::parser::Commands;
use crate::config::Config;
use crate::core::retention::{purge_local, purge_remote};
use crate::db::log::ttlog;
use crate::db::pool::DbPool;
use crate::errors::AppResult;
use crate::remote::store::RemoteDb;
use crate::ui::messages::{success, warning};
use crate::utils::time::timestamp_or_now;

pub fn handle(cmd: &Commands, cfg: &Config) -> AppResult<()> {
    if let Commands::Purge { at } = cmd {
        let now = timestamp_or_now(at.as_deref())?;
        let pool = DbPool::new(&cfg.database)?;
        let remote = RemoteDb::open(&cfg.remote_database, cfg)?;

        let local = purge_local(&pool.conn, &cfg.retention, now)?;
        let server = purge_remote(&remote, &cfg.retention, now)?;

        success(format!(
            "Device: {} uploaded samples, {} timeline events removed.",
            local.samples, local.events
        ));
        success(format!(
            "Remote: {} samples, {} resolved alerts removed.",
            server.samples, server.alerts
        ));

        if let Err(e) = ttlog(
            &pool.conn,
            "purge",
            &now.to_rfc3339(),
            &format!(
                "local {}/{} remote {}/{}",
                local.samples, local.events, server.samples, server.alerts
            ),
        ) {
            warning(format!("Failed to write internal log: {}", e));
        }
    }

    Ok(())
}

use crate::config::Config;
use crate::db::log::ttlog;
use crate::db::pool::DbPool;
use crate::db::queue;
use crate::errors::AppResult;
use crate::ui::messages::{info, success};

/// Give samples past the attempt ceiling a fresh set of attempts.
pub fn handle(cfg: &Config) -> AppResult<()> {
    let pool = DbPool::new(&cfg.database)?;
    let n = queue::reset_exhausted(&pool.conn, cfg.sync.max_attempts)?;

    if n == 0 {
        info("Backlog is empty, nothing to recover.");
        return Ok(());
    }

    ttlog(&pool.conn, "recover", "location_samples", &format!("{n} samples re-queued"))?;
    success(format!("{n} samples re-queued for upload."));
    Ok(())
}

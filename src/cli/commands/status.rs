use crate::config::Config;
use crate::db::pool::DbPool;
use crate::db::{queue, sessions};
use crate::errors::AppResult;
use crate::ui::messages::{header, info};
use crate::utils::colors::{CYAN, RESET, color_for_backlog};
use crate::utils::format_distance;

/// Active sessions and the health of the upload queue.
pub fn handle(cfg: &Config) -> AppResult<()> {
    let pool = DbPool::new(&cfg.database)?;

    header("Active sessions");
    let active: Vec<_> = sessions::list_sessions(&pool.conn, None)?
        .into_iter()
        .filter(|s| s.is_active())
        .collect();
    if active.is_empty() {
        info("No active session.");
    }
    for s in &active {
        println!(
            "{}• {}{}  {}  since {}  {}",
            CYAN,
            s.employee_id,
            RESET,
            s.id,
            s.started_at.format("%Y-%m-%d %H:%M:%S"),
            format_distance(s.total_distance_m)
        );
    }

    let pending = queue::count_pending(&pool.conn, cfg.sync.max_attempts)?;
    let backlog = queue::count_backlog(&pool.conn, cfg.sync.max_attempts)?;
    println!();
    println!("{}• Pending samples:{} {}", CYAN, RESET, pending);
    println!(
        "{}• Backlog:{} {}{}{}",
        CYAN,
        RESET,
        color_for_backlog(backlog),
        backlog,
        RESET
    );
    if backlog > 0 {
        info("Run `rfieldtrack recover` to retry samples past the attempt ceiling.");
    }

    Ok(())
}

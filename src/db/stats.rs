use crate::db::pool::DbPool;
use crate::db::queue;
use crate::errors::AppResult;
use crate::utils::colors::{CYAN, GREEN, GREY, RESET, YELLOW, color_for_backlog};
use crate::utils::time::from_millis;
use std::fs;

pub fn print_db_info(pool: &DbPool, db_path: &str, max_attempts: u32) -> AppResult<()> {
    println!();

    //
    // 1) FILE SIZE
    //
    let file_size = fs::metadata(db_path).map(|m| m.len()).unwrap_or(0);
    let file_mb = (file_size as f64) / (1024.0 * 1024.0);

    println!("{}• File:{} {}{}{}", CYAN, RESET, YELLOW, db_path, RESET);
    println!("{}• Size:{} {:.2} MB", CYAN, RESET, file_mb);

    //
    // 2) SESSIONS
    //
    let (active, completed): (i64, i64) = pool.conn.query_row(
        "SELECT COALESCE(SUM(status = 'active'), 0), COALESCE(SUM(status = 'completed'), 0)
         FROM sessions",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    println!(
        "{}• Sessions:{} {}{}{} active, {} completed",
        CYAN, RESET, GREEN, active, RESET, completed
    );

    //
    // 3) QUEUE
    //
    let total: i64 = pool
        .conn
        .query_row("SELECT COUNT(*) FROM location_samples", [], |row| row.get(0))?;
    let pending = queue::count_pending(&pool.conn, max_attempts)?;
    let backlog = queue::count_backlog(&pool.conn, max_attempts)?;
    println!("{}• Samples:{} {}", CYAN, RESET, total);
    println!("    pending: {}", pending);
    println!(
        "    backlog: {}{}{}",
        color_for_backlog(backlog),
        backlog,
        RESET
    );

    //
    // 4) RECORDED RANGE
    //
    let (first, last): (Option<i64>, Option<i64>) = pool.conn.query_row(
        "SELECT MIN(recorded_at), MAX(recorded_at) FROM location_samples",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let fmt = |ms: Option<i64>| -> AppResult<String> {
        Ok(match ms {
            Some(ms) => from_millis(ms)?.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => format!("{GREY}--{RESET}"),
        })
    };
    println!("{}• Recorded range:{}", CYAN, RESET);
    println!("    from: {}", fmt(first)?);
    println!("    to:   {}", fmt(last)?);

    //
    // 5) TIMELINE
    //
    let events: i64 = pool
        .conn
        .query_row("SELECT COUNT(*) FROM timeline_events", [], |row| row.get(0))?;
    println!("{}• Timeline events:{} {}", CYAN, RESET, events);

    println!();
    Ok(())
}

use crate::cli::parser::{Commands, SessionAction};
use crate::config::Config;
use crate::core::tracker::{Tracker, force_close_session};
use crate::db::pool::DbPool;
use crate::db::sessions;
use crate::errors::AppResult;
use crate::models::session::Session;
use crate::ui::messages::{info, success};
use crate::utils::table::Table;
use crate::utils::time::timestamp_or_now;
use crate::utils::{format_distance, format_duration};

pub fn handle(cmd: &Commands, cfg: &Config) -> AppResult<()> {
    let Commands::Session { action } = cmd else {
        return Ok(());
    };
    let pool = DbPool::new(&cfg.database)?;

    match action {
        SessionAction::Start { employee, at } => {
            let at = timestamp_or_now(at.as_deref())?;
            let mut tracker = Tracker::resume(&pool.conn, cfg, employee)?;
            let session = tracker.start_session(&pool.conn, at)?;
            success(format!("Session {} started for {}.", session.id, employee));
        }

        SessionAction::End { employee, at } => {
            let at = timestamp_or_now(at.as_deref())?;
            let mut tracker = Tracker::resume(&pool.conn, cfg, employee)?;
            let session = tracker.end_session(&pool.conn, at)?;
            success(format!(
                "Session {} ended: {} in {}.",
                session.id,
                format_distance(session.total_distance_m),
                elapsed(&session)
            ));
        }

        SessionAction::Close { session_id, at } => {
            let at = timestamp_or_now(at.as_deref())?;
            let was_active = sessions::get_session(&pool.conn, session_id)?
                .is_some_and(|s| s.is_active());
            let session = force_close_session(&pool.conn, cfg, session_id, at)?;
            if was_active {
                success(format!(
                    "Session {} force-closed: {}.",
                    session.id,
                    format_distance(session.total_distance_m)
                ));
            } else {
                info(format!("Session {} was already closed.", session.id));
            }
        }

        SessionAction::List { employee } => {
            let list = sessions::list_sessions(&pool.conn, employee.as_deref())?;
            if list.is_empty() {
                info("No sessions recorded.");
                return Ok(());
            }

            let mut table = Table::new(vec![
                "ID", "EMPLOYEE", "STATUS", "STARTED", "ENDED", "DURATION", "DISTANCE",
            ]);
            for s in &list {
                // plain cells: escape codes would break column widths
                let status = match s.close_reason {
                    Some(r) => format!("closed ({})", r.to_db_str()),
                    None => s.status.to_db_str().to_string(),
                };
                table.add_row(vec![
                    s.id.clone(),
                    s.employee_id.clone(),
                    status,
                    s.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    s.ended_at.map_or_else(
                        || "--".to_string(),
                        |t| t.format("%Y-%m-%d %H:%M:%S").to_string(),
                    ),
                    elapsed(s),
                    format_distance(s.total_distance_m),
                ]);
            }
            print!("{}", table.render());
        }
    }

    Ok(())
}

fn elapsed(s: &Session) -> String {
    match s.ended_at {
        Some(end) => format_duration((end - s.started_at).num_seconds()),
        None => "--".to_string(),
    }
}

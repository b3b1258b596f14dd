use crate::cli::parser::Commands;
use crate::config::Config;
use crate::db::pool::DbPool;
use crate::db::{sessions, timeline};
use crate::errors::{AppError, AppResult};
use crate::models::timeline::{EventKind, TimelineEvent};
use crate::utils::table::Table;
use crate::utils::{format_distance, format_duration};

fn place(ev: &TimelineEvent) -> String {
    match (ev.kind, ev.end_latitude, ev.end_longitude) {
        (EventKind::Move, Some(lat), Some(lon)) => format!(
            "{:.5},{:.5} → {:.5},{:.5}",
            ev.latitude, ev.longitude, lat, lon
        ),
        _ => format!("{:.5},{:.5}", ev.latitude, ev.longitude),
    }
}

pub fn handle(cmd: &Commands, cfg: &Config) -> AppResult<()> {
    if let Commands::Timeline { session_id } = cmd {
        let pool = DbPool::new(&cfg.database)?;
        let session = sessions::get_session(&pool.conn, session_id)?
            .ok_or_else(|| AppError::SessionNotFound(session_id.clone()))?;
        let events = timeline::load_events(&pool.conn, session_id)?;

        let mut table = Table::new(vec![
            "#", "KIND", "DAY", "START", "END", "DURATION", "DISTANCE", "POINTS", "PLACE",
        ]);
        for ev in &events {
            let ordinal = ev.id.rsplit(':').next().unwrap_or_default();
            table.add_row(vec![
                ordinal.to_string(),
                if ev.finalized {
                    ev.kind.to_db_str().to_string()
                } else {
                    format!("{}*", ev.kind.to_db_str())
                },
                ev.day.to_string(),
                ev.started_at.format("%H:%M:%S").to_string(),
                ev.ended_at.format("%H:%M:%S").to_string(),
                format_duration(ev.duration_secs),
                format_distance(ev.distance_m),
                ev.point_count.to_string(),
                place(ev),
            ]);
        }

        println!("📍 Session {} ({})\n", session.id, session.employee_id);
        print!("{}", table.render());
        println!(
            "\nTotal distance: {} ({} events, * = still open)",
            format_distance(session.total_distance_m),
            events.len()
        );
    }

    Ok(())
}

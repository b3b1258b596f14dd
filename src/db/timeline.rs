//! Timeline event storage. Events are upserted by id; a finalized row is
//! never rewritten.

use crate::errors::{AppError, AppResult};
use crate::models::timeline::{EventKind, TimelineEvent};
use crate::utils::time::{millis_column, to_millis};
use chrono::NaiveDate;
use rusqlite::{Connection, Row, params};

fn map_row(row: &Row) -> rusqlite::Result<TimelineEvent> {
    let kind_str: String = row.get("kind")?;
    let kind = EventKind::from_db_str(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(AppError::InvalidInput(format!("Invalid kind: {}", kind_str))),
        )
    })?;

    let day_str: String = row.get("day")?;
    let day = NaiveDate::parse_from_str(&day_str, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(TimelineEvent {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        kind,
        started_at: millis_column(row.get("started_at")?)?,
        ended_at: millis_column(row.get("ended_at")?)?,
        duration_secs: row.get("duration_secs")?,
        day,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        end_latitude: row.get("end_latitude")?,
        end_longitude: row.get("end_longitude")?,
        distance_m: row.get("distance_m")?,
        point_count: row.get("point_count")?,
        finalized: row.get::<_, i64>("finalized")? == 1,
    })
}

/// Insert or update an event by id. Returns `false` when the stored row is
/// already finalized (the write is ignored).
pub fn upsert_event(conn: &Connection, ev: &TimelineEvent) -> AppResult<bool> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO timeline_events (
             id, session_id, kind, started_at, ended_at, duration_secs, day,
             latitude, longitude, end_latitude, end_longitude, distance_m,
             point_count, finalized)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
         ON CONFLICT(id) DO UPDATE SET
             ended_at      = excluded.ended_at,
             duration_secs = excluded.duration_secs,
             day           = excluded.day,
             latitude      = excluded.latitude,
             longitude     = excluded.longitude,
             end_latitude  = excluded.end_latitude,
             end_longitude = excluded.end_longitude,
             distance_m    = excluded.distance_m,
             point_count   = excluded.point_count,
             finalized     = excluded.finalized
         WHERE timeline_events.finalized = 0",
    )?;

    let n = stmt.execute(params![
        ev.id,
        ev.session_id,
        ev.kind.to_db_str(),
        to_millis(ev.started_at),
        to_millis(ev.ended_at),
        ev.duration_secs,
        ev.day.format("%Y-%m-%d").to_string(),
        ev.latitude,
        ev.longitude,
        ev.end_latitude,
        ev.end_longitude,
        ev.distance_m,
        ev.point_count,
        ev.finalized as i64,
    ])?;
    Ok(n == 1)
}

/// Events of a session ordered by start time.
pub fn load_events(conn: &Connection, session_id: &str) -> AppResult<Vec<TimelineEvent>> {
    let mut stmt = conn.prepare_cached(
        "SELECT * FROM timeline_events
         WHERE session_id = ?1
         ORDER BY started_at ASC, rowid ASC",
    )?;
    let rows = stmt.query_map([session_id], map_row)?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// Delete all events of the given sessions.
pub fn purge_sessions(conn: &Connection, session_ids: &[String]) -> AppResult<usize> {
    let mut stmt = conn.prepare_cached("DELETE FROM timeline_events WHERE session_id = ?1")?;
    let mut removed = 0;
    for id in session_ids {
        removed += stmt.execute([id])?;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrate::run_pending_migrations;
    use crate::utils::time::offset;
    use chrono::{TimeZone, Utc};

    #[test]
    fn finalized_events_are_immutable() {
        let c = Connection::open_in_memory().unwrap();
        run_pending_migrations(&c).unwrap();

        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let mut ev = TimelineEvent::new("s", 1, EventKind::Stop, t0, 12.9, 77.5, offset(0));
        assert!(upsert_event(&c, &ev).unwrap());

        ev.ended_at = t0 + chrono::Duration::seconds(300);
        ev.point_count = 3;
        ev.finalized = true;
        ev.recompute_derived(offset(0));
        assert!(upsert_event(&c, &ev).unwrap());

        let mut late = ev.clone();
        late.ended_at = t0 + chrono::Duration::seconds(900);
        late.recompute_derived(offset(0));
        assert!(!upsert_event(&c, &late).unwrap());

        let stored = load_events(&c, "s").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0], ev);
    }
}

//! Remote rollup aggregator.
//!
//! Runs once per newly accepted sample, inside the transaction that inserted
//! it. Because insertion is keyed by the sample hash, a duplicate never gets
//! here and contributes nothing.
//!
//! The delta is measured against the sample's neighbours in recorded order,
//! not arrival order. For a sample `s` landing between accepted `p` and `n`:
//!
//! ```text
//! delta = d(p, s) + d(s, n) - d(p, n)
//! ```
//!
//! which is never negative (triangle inequality) and keeps the totals equal to
//! the path length through all accepted samples, whatever order they came in.
//!
//! Neighbours come from the `accepted_samples` ledger, which retention never
//! purges, so deltas stay correct after old sample payloads are gone.

use crate::core::geo::{GeoPoint, haversine_distance};
use crate::core::payload::UploadSample;
use crate::errors::AppResult;
use crate::models::rollup::{DayRollup, SessionRollup};
use crate::utils::time::{local_day, millis_column, to_millis};
use chrono::{FixedOffset, NaiveDate};
use rusqlite::{Connection, OptionalExtension, Row, params};

/// Extra path length from inserting `s` between its neighbours.
pub fn insertion_delta(prev: Option<GeoPoint>, s: GeoPoint, next: Option<GeoPoint>) -> f64 {
    let delta = match (prev, next) {
        (Some(p), Some(n)) => {
            haversine_distance(&p, &s) + haversine_distance(&s, &n) - haversine_distance(&p, &n)
        }
        (Some(p), None) => haversine_distance(&p, &s),
        (None, Some(n)) => haversine_distance(&s, &n),
        (None, None) => 0.0,
    };
    delta.max(0.0)
}

fn neighbour(conn: &Connection, s: &UploadSample, before: bool) -> AppResult<Option<GeoPoint>> {
    let sql = if before {
        "SELECT latitude, longitude FROM accepted_samples
         WHERE session_id = ?1
           AND (recorded_at < ?2 OR (recorded_at = ?2 AND hash < ?3))
         ORDER BY recorded_at DESC, hash DESC
         LIMIT 1"
    } else {
        "SELECT latitude, longitude FROM accepted_samples
         WHERE session_id = ?1
           AND (recorded_at > ?2 OR (recorded_at = ?2 AND hash > ?3))
         ORDER BY recorded_at ASC, hash ASC
         LIMIT 1"
    };
    let mut stmt = conn.prepare_cached(sql)?;
    Ok(stmt
        .query_row(params![s.session_id, to_millis(s.recorded_at), s.hash], |row| {
            Ok(GeoPoint::new(row.get(0)?, row.get(1)?))
        })
        .optional()?)
}

/// Fold one newly inserted sample into session, day and session-total
/// aggregates. Returns the distance delta applied.
pub fn fold_sample(conn: &Connection, s: &UploadSample, offset: FixedOffset) -> AppResult<f64> {
    let point = GeoPoint::new(s.latitude, s.longitude);
    let delta = insertion_delta(neighbour(conn, s, true)?, point, neighbour(conn, s, false)?);
    let recorded = to_millis(s.recorded_at);
    let day = local_day(s.recorded_at, offset).format("%Y-%m-%d").to_string();

    conn.prepare_cached(
        "INSERT INTO session_rollups (
             session_id, employee_id, distance_m, sample_count,
             last_latitude, last_longitude, last_recorded_at)
         VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6)
         ON CONFLICT(session_id) DO UPDATE SET
             distance_m       = distance_m + excluded.distance_m,
             sample_count     = sample_count + 1,
             last_latitude    = CASE WHEN excluded.last_recorded_at >= last_recorded_at
                                     THEN excluded.last_latitude ELSE last_latitude END,
             last_longitude   = CASE WHEN excluded.last_recorded_at >= last_recorded_at
                                     THEN excluded.last_longitude ELSE last_longitude END,
             last_recorded_at = MAX(last_recorded_at, excluded.last_recorded_at)",
    )?
    .execute(params![s.session_id, s.employee_id, delta, s.latitude, s.longitude, recorded])?;

    conn.prepare_cached(
        "INSERT INTO daily_rollups (
             employee_id, day, distance_m, sample_count,
             last_latitude, last_longitude, last_recorded_at)
         VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6)
         ON CONFLICT(employee_id, day) DO UPDATE SET
             distance_m       = distance_m + excluded.distance_m,
             sample_count     = sample_count + 1,
             last_latitude    = CASE WHEN excluded.last_recorded_at >= last_recorded_at
                                     THEN excluded.last_latitude ELSE last_latitude END,
             last_longitude   = CASE WHEN excluded.last_recorded_at >= last_recorded_at
                                     THEN excluded.last_longitude ELSE last_longitude END,
             last_recorded_at = MAX(last_recorded_at, excluded.last_recorded_at)",
    )?
    .execute(params![s.employee_id, day, delta, s.latitude, s.longitude, recorded])?;

    conn.prepare_cached(
        "INSERT INTO remote_sessions (id, employee_id, total_distance_m)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET
             total_distance_m = total_distance_m + excluded.total_distance_m",
    )?
    .execute(params![s.session_id, s.employee_id, delta])?;

    log::debug!("folded {} into session {}: +{:.2} m", s.hash, s.session_id, delta);
    Ok(delta)
}

const SESSION_ROLLUP_COLUMNS: &str = "session_id, employee_id, distance_m, sample_count,
     last_latitude, last_longitude, last_recorded_at";

fn map_session_rollup(row: &Row) -> rusqlite::Result<SessionRollup> {
    Ok(SessionRollup {
        session_id: row.get(0)?,
        employee_id: row.get(1)?,
        distance_m: row.get(2)?,
        sample_count: row.get(3)?,
        last_latitude: row.get(4)?,
        last_longitude: row.get(5)?,
        last_recorded_at: millis_column(row.get(6)?)?,
    })
}

pub fn session_rollup(conn: &Connection, session_id: &str) -> AppResult<Option<SessionRollup>> {
    let sql = format!("SELECT {SESSION_ROLLUP_COLUMNS} FROM session_rollups WHERE session_id = ?1");
    Ok(conn.query_row(&sql, [session_id], map_session_rollup).optional()?)
}

pub fn session_rollups(conn: &Connection) -> AppResult<Vec<SessionRollup>> {
    let sql = format!("SELECT {SESSION_ROLLUP_COLUMNS} FROM session_rollups ORDER BY last_recorded_at ASC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], map_session_rollup)?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// Day rollups, optionally for one employee, oldest day first.
pub fn day_rollups(conn: &Connection, employee_id: Option<&str>) -> AppResult<Vec<DayRollup>> {
    let mut stmt = conn.prepare(
        "SELECT employee_id, day, distance_m, sample_count,
                last_latitude, last_longitude, last_recorded_at
         FROM daily_rollups
         WHERE ?1 IS NULL OR employee_id = ?1
         ORDER BY day ASC, employee_id ASC",
    )?;
    let rows = stmt.query_map([employee_id], |row| {
        let day: String = row.get(1)?;
        Ok(DayRollup {
            employee_id: row.get(0)?,
            day: NaiveDate::parse_from_str(&day, "%Y-%m-%d").map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
            })?,
            distance_m: row.get(2)?,
            sample_count: row.get(3)?,
            last_latitude: row.get(4)?,
            last_longitude: row.get(5)?,
            last_recorded_at: millis_column(row.get(6)?)?,
        })
    })?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// Authoritative distance of a session as seen by the remote.
pub fn session_total(conn: &Connection, session_id: &str) -> AppResult<Option<f64>> {
    Ok(conn
        .query_row(
            "SELECT total_distance_m FROM remote_sessions WHERE id = ?1",
            [session_id],
            |row| row.get(0),
        )
        .optional()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn delta_is_never_negative() {
        let p = GeoPoint::new(12.90, 77.50);
        let s = GeoPoint::new(12.91, 77.50);
        let n = GeoPoint::new(12.92, 77.50);

        // s lies on the way from p to n: almost nothing added
        assert!(insertion_delta(Some(p), s, Some(n)) < 1e-3);
        assert!(insertion_delta(Some(p), GeoPoint::new(12.91, 77.51), Some(n)) > 0.0);
        assert_relative_eq!(insertion_delta(Some(p), s, None), haversine_distance(&p, &s));
        assert_relative_eq!(insertion_delta(None, s, Some(n)), haversine_distance(&s, &n));
        assert_eq!(insertion_delta(None, s, None), 0.0);
    }
}

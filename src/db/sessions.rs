//! On-device session records.

use crate::core::sync::SessionClosure;
use crate::errors::{AppError, AppResult};
use crate::models::session::{CloseReason, Session, SessionStatus};
use crate::utils::time::{millis_column, to_millis};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

fn map_row(row: &Row) -> rusqlite::Result<Session> {
    let status_str: String = row.get("status")?;
    let status = SessionStatus::from_db_str(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(AppError::InvalidInput(format!("Invalid status: {}", status_str))),
        )
    })?;
    let reason: Option<String> = row.get("close_reason")?;
    let ended: Option<i64> = row.get("ended_at")?;

    Ok(Session {
        id: row.get("id")?,
        employee_id: row.get("employee_id")?,
        started_at: millis_column(row.get("started_at")?)?,
        ended_at: ended.map(millis_column).transpose()?,
        total_distance_m: row.get("total_distance_m")?,
        status,
        close_reason: reason.as_deref().and_then(CloseReason::from_db_str),
    })
}

/// Insert a new active session. Fails with `SessionStateConflict` when the
/// employee already has one (partial unique index).
pub fn insert_session(conn: &Connection, s: &Session) -> AppResult<()> {
    let res = conn.execute(
        "INSERT INTO sessions (id, employee_id, started_at, ended_at, total_distance_m, status, close_reason)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            s.id,
            s.employee_id,
            to_millis(s.started_at),
            s.ended_at.map(to_millis),
            s.total_distance_m,
            s.status.to_db_str(),
            s.close_reason.map(|r| r.to_db_str()),
        ],
    );

    match res {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(AppError::SessionStateConflict(format!(
                "employee {} already has an active session",
                s.employee_id
            )))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn get_session(conn: &Connection, id: &str) -> AppResult<Option<Session>> {
    Ok(conn
        .query_row("SELECT * FROM sessions WHERE id = ?1", [id], map_row)
        .optional()?)
}

pub fn active_session_for(conn: &Connection, employee_id: &str) -> AppResult<Option<Session>> {
    Ok(conn
        .query_row(
            "SELECT * FROM sessions WHERE employee_id = ?1 AND status = 'active'",
            [employee_id],
            map_row,
        )
        .optional()?)
}

pub fn list_sessions(conn: &Connection, employee_id: Option<&str>) -> AppResult<Vec<Session>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM sessions
         WHERE ?1 IS NULL OR employee_id = ?1
         ORDER BY started_at ASC",
    )?;
    let rows = stmt.query_map([employee_id], map_row)?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// Store the running distance of an active session. The stored value never
/// decreases.
pub fn set_distance(conn: &Connection, id: &str, total_m: f64) -> AppResult<()> {
    conn.execute(
        "UPDATE sessions SET total_distance_m = ?1
         WHERE id = ?2 AND status = 'active' AND total_distance_m < ?1",
        params![total_m, id],
    )?;
    Ok(())
}

/// Complete an active session. Returns `false` if it was not active, in
/// which case nothing changes.
pub fn complete_session(
    conn: &Connection,
    id: &str,
    ended_at: DateTime<Utc>,
    reason: CloseReason,
) -> AppResult<bool> {
    let n = conn.execute(
        "UPDATE sessions SET status = 'completed', ended_at = ?1, close_reason = ?2
         WHERE id = ?3 AND status = 'active'",
        params![to_millis(ended_at), reason.to_db_str(), id],
    )?;
    Ok(n == 1)
}

/// Completed sessions whose closure the remote has not been told about yet.
pub fn unreported_closures(conn: &Connection) -> AppResult<Vec<SessionClosure>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, employee_id, ended_at FROM sessions
         WHERE status = 'completed' AND close_reported = 0
         ORDER BY ended_at ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(SessionClosure {
            session_id: row.get(0)?,
            employee_id: row.get(1)?,
            ended_at: millis_column(row.get(2)?)?,
        })
    })?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

pub fn mark_closure_reported(conn: &Connection, id: &str) -> AppResult<()> {
    conn.execute("UPDATE sessions SET close_reported = 1 WHERE id = ?1", [id])?;
    Ok(())
}

/// Completed sessions that ended before `cutoff`.
pub fn completed_before(conn: &Connection, cutoff: DateTime<Utc>) -> AppResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM sessions WHERE status = 'completed' AND ended_at < ?1",
    )?;
    let rows = stmt.query_map([to_millis(cutoff)], |row| row.get(0))?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrate::run_pending_migrations;
    use chrono::TimeZone;

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        run_pending_migrations(&c).unwrap();
        c
    }

    #[test]
    fn second_active_session_is_a_state_conflict() {
        let c = conn();
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        insert_session(&c, &Session::new("emp", t0)).unwrap();

        let err = insert_session(&c, &Session::new("emp", t0)).unwrap_err();
        assert!(matches!(err, AppError::SessionStateConflict(_)));
        insert_session(&c, &Session::new("other", t0)).unwrap();
    }

    #[test]
    fn complete_only_once() {
        let c = conn();
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let s = Session::new("emp", t0);
        insert_session(&c, &s).unwrap();
        set_distance(&c, &s.id, 120.0).unwrap();
        set_distance(&c, &s.id, 80.0).unwrap();

        let t1 = t0 + chrono::Duration::hours(1);
        assert!(complete_session(&c, &s.id, t1, CloseReason::Ended).unwrap());
        assert!(!complete_session(&c, &s.id, t1 + chrono::Duration::hours(1), CloseReason::Forced).unwrap());

        // distance is frozen once completed
        set_distance(&c, &s.id, 500.0).unwrap();

        let stored = get_session(&c, &s.id).unwrap().unwrap();
        assert_eq!(stored.ended_at, Some(t1));
        assert_eq!(stored.close_reason, Some(CloseReason::Ended));
        assert_eq!(stored.total_distance_m, 120.0);
        assert!(active_session_for(&c, "emp").unwrap().is_none());
    }
}

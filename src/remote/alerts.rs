//! Alert persistence.
//!
//! At most one unresolved alert exists per session and kind (partial unique
//! index), so a condition that keeps firing maps to a single alert for its
//! whole onset. Clearing the condition resolves it; the next onset opens a
//! new one.

use crate::config::AlertConfig;
use crate::core::alerts::{StuckAnchor, Verdict, should_escalate};
use crate::core::geo::GeoPoint;
use crate::errors::{AppError, AppResult};
use crate::models::alert::{Alert, AlertKind, AlertState, Severity};
use crate::utils::time::{millis_column, to_millis};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

fn conversion_error(what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(AppError::InvalidInput(format!("Invalid {}: {}", what, value))),
    )
}

fn map_row(row: &Row) -> rusqlite::Result<Alert> {
    let kind: String = row.get("kind")?;
    let severity: String = row.get("severity")?;
    let state: String = row.get("state")?;
    let acknowledged: Option<i64> = row.get("acknowledged_at")?;
    let resolved: Option<i64> = row.get("resolved_at")?;

    Ok(Alert {
        id: row.get("id")?,
        employee_id: row.get("employee_id")?,
        session_id: row.get("session_id")?,
        kind: AlertKind::from_db_str(&kind).ok_or_else(|| conversion_error("kind", &kind))?,
        severity: Severity::from_db_str(&severity)
            .ok_or_else(|| conversion_error("severity", &severity))?,
        state: AlertState::from_db_str(&state).ok_or_else(|| conversion_error("state", &state))?,
        escalated: row.get::<_, i64>("escalated")? == 1,
        opened_at: millis_column(row.get("opened_at")?)?,
        acknowledged_at: acknowledged.map(millis_column).transpose()?,
        resolved_at: resolved.map(millis_column).transpose()?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        detail: row.get("detail")?,
    })
}

/// Record a rule verdict. Returns `true` when an alert was opened or
/// resolved by it.
pub fn apply_verdict(
    conn: &Connection,
    employee_id: &str,
    session_id: &str,
    verdict: &Verdict,
) -> AppResult<bool> {
    match verdict {
        Verdict::Raise {
            kind,
            at,
            point,
            detail,
        } => {
            let n = conn
                .prepare_cached(
                    "INSERT INTO alerts (
                         employee_id, session_id, kind, severity, state,
                         opened_at, latitude, longitude, detail)
                     VALUES (?1, ?2, ?3, ?4, 'open', ?5, ?6, ?7, ?8)
                     ON CONFLICT DO NOTHING",
                )?
                .execute(params![
                    employee_id,
                    session_id,
                    kind.to_db_str(),
                    kind.initial_severity().to_db_str(),
                    to_millis(*at),
                    point.map(|p| p.latitude),
                    point.map(|p| p.longitude),
                    detail,
                ])?;
            if n == 1 {
                log::warn!("alert {} opened for session {}: {}", kind.to_db_str(), session_id, detail);
            }
            Ok(n == 1)
        }
        Verdict::Clear { kind, at } => {
            let n = resolve(conn, session_id, &[*kind], *at)?;
            Ok(n > 0)
        }
    }
}

/// Resolve unresolved alerts of the given kinds for a session.
pub fn resolve(
    conn: &Connection,
    session_id: &str,
    kinds: &[AlertKind],
    at: DateTime<Utc>,
) -> AppResult<usize> {
    let mut stmt = conn.prepare_cached(
        "UPDATE alerts SET state = 'resolved', resolved_at = ?1
         WHERE session_id = ?2 AND kind = ?3 AND state != 'resolved'",
    )?;
    let mut resolved = 0;
    for kind in kinds {
        resolved += stmt.execute(params![to_millis(at), session_id, kind.to_db_str()])?;
    }
    if resolved > 0 {
        log::info!("{} alert(s) resolved for session {}", resolved, session_id);
    }
    Ok(resolved)
}

/// Supervisor acknowledgement. Only open alerts can be acknowledged; the
/// alert then stays until its condition clears.
pub fn acknowledge(conn: &Connection, id: i64, at: DateTime<Utc>) -> AppResult<bool> {
    let n = conn.execute(
        "UPDATE alerts SET state = 'acknowledged', acknowledged_at = ?1
         WHERE id = ?2 AND state = 'open'",
        params![to_millis(at), id],
    )?;
    Ok(n == 1)
}

pub fn get_alert(conn: &Connection, id: i64) -> AppResult<Option<Alert>> {
    Ok(conn
        .query_row("SELECT * FROM alerts WHERE id = ?1", [id], map_row)
        .optional()?)
}

/// Alerts ordered by opening time; resolved ones only when asked for.
pub fn list_alerts(conn: &Connection, include_resolved: bool) -> AppResult<Vec<Alert>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM alerts
         WHERE ?1 = 1 OR state != 'resolved'
         ORDER BY opened_at ASC, id ASC",
    )?;
    let rows = stmt.query_map([include_resolved as i64], map_row)?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// Raise the severity of open alerts nobody acknowledged in time.
pub fn escalate_due(conn: &Connection, cfg: &AlertConfig, now: DateTime<Utc>) -> AppResult<usize> {
    let due: Vec<Alert> = list_alerts(conn, false)?
        .into_iter()
        .filter(|a| should_escalate(cfg, a, now))
        .collect();

    let mut stmt = conn.prepare_cached(
        "UPDATE alerts SET severity = ?1, escalated = 1 WHERE id = ?2 AND escalated = 0",
    )?;
    let mut escalated = 0;
    for a in &due {
        escalated += stmt.execute(params![a.severity.escalated().to_db_str(), a.id])?;
        log::warn!("alert {} ({}) escalated", a.id, a.kind.to_db_str());
    }
    Ok(escalated)
}

pub fn purge_resolved_before(conn: &Connection, cutoff: DateTime<Utc>) -> AppResult<usize> {
    Ok(conn.execute(
        "DELETE FROM alerts WHERE state = 'resolved' AND resolved_at < ?1",
        [to_millis(cutoff)],
    )?)
}

pub fn load_stuck_anchor(conn: &Connection, session_id: &str) -> AppResult<Option<StuckAnchor>> {
    Ok(conn
        .query_row(
            "SELECT anchor_lat, anchor_lon, anchor_since, last_at
             FROM session_alert_state WHERE session_id = ?1",
            [session_id],
            |row| {
                Ok(StuckAnchor {
                    point: GeoPoint::new(row.get(0)?, row.get(1)?),
                    since: millis_column(row.get(2)?)?,
                    last_at: millis_column(row.get(3)?)?,
                })
            },
        )
        .optional()?)
}

pub fn save_stuck_anchor(conn: &Connection, session_id: &str, anchor: &StuckAnchor) -> AppResult<()> {
    conn.prepare_cached(
        "INSERT INTO session_alert_state (session_id, anchor_lat, anchor_lon, anchor_since, last_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(session_id) DO UPDATE SET
             anchor_lat   = excluded.anchor_lat,
             anchor_lon   = excluded.anchor_lon,
             anchor_since = excluded.anchor_since,
             last_at      = excluded.last_at",
    )?
    .execute(params![
        session_id,
        anchor.point.latitude,
        anchor.point.longitude,
        to_millis(anchor.since),
        to_millis(anchor.last_at),
    ])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::schema::run_remote_migrations;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        run_remote_migrations(&c).unwrap();
        c
    }

    fn raise(kind: AlertKind, secs: i64) -> Verdict {
        Verdict::Raise {
            kind,
            at: t(secs),
            point: Some(GeoPoint::new(12.9, 77.5)),
            detail: "test".into(),
        }
    }

    #[test]
    fn one_alert_per_onset() {
        let c = conn();
        assert!(apply_verdict(&c, "emp", "s", &raise(AlertKind::Stuck, 0)).unwrap());
        assert!(!apply_verdict(&c, "emp", "s", &raise(AlertKind::Stuck, 60)).unwrap());
        // other kinds and sessions are independent
        assert!(apply_verdict(&c, "emp", "s", &raise(AlertKind::MockLocation, 60)).unwrap());
        assert!(apply_verdict(&c, "emp", "s2", &raise(AlertKind::Stuck, 60)).unwrap());
        assert_eq!(list_alerts(&c, false).unwrap().len(), 3);

        let clear = Verdict::Clear {
            kind: AlertKind::Stuck,
            at: t(120),
        };
        assert!(apply_verdict(&c, "emp", "s", &clear).unwrap());
        assert!(apply_verdict(&c, "emp", "s", &raise(AlertKind::Stuck, 180)).unwrap());
        assert_eq!(list_alerts(&c, true).unwrap().len(), 5);
    }

    #[test]
    fn acknowledged_alert_is_not_reopened_while_condition_holds() {
        let c = conn();
        apply_verdict(&c, "emp", "s", &raise(AlertKind::NoSignal, 0)).unwrap();
        let id = list_alerts(&c, false).unwrap()[0].id;
        assert!(acknowledge(&c, id, t(10)).unwrap());
        assert!(!acknowledge(&c, id, t(20)).unwrap());

        assert!(!apply_verdict(&c, "emp", "s", &raise(AlertKind::NoSignal, 30)).unwrap());
        let a = get_alert(&c, id).unwrap().unwrap();
        assert_eq!(a.state, AlertState::Acknowledged);
        assert_eq!(a.acknowledged_at, Some(t(10)));
    }

    #[test]
    fn escalation_happens_once_for_unacknowledged_alerts() {
        let c = conn();
        let cfg = AlertConfig::default();
        apply_verdict(&c, "emp", "s", &raise(AlertKind::Stuck, 0)).unwrap();
        apply_verdict(&c, "emp", "s", &raise(AlertKind::NoSignal, 0)).unwrap();
        let ack = list_alerts(&c, false).unwrap()[1].id;
        acknowledge(&c, ack, t(5)).unwrap();

        assert_eq!(escalate_due(&c, &cfg, t(100)).unwrap(), 0);
        assert_eq!(escalate_due(&c, &cfg, t(3600)).unwrap(), 1);
        assert_eq!(escalate_due(&c, &cfg, t(9000)).unwrap(), 0);

        let alerts = list_alerts(&c, false).unwrap();
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert!(alerts[0].escalated);
        assert_eq!(alerts[1].severity, Severity::Warning);
    }

    #[test]
    fn resolved_alerts_expire() {
        let c = conn();
        apply_verdict(&c, "emp", "s", &raise(AlertKind::ClockDrift, 0)).unwrap();
        apply_verdict(&c, "emp", "s", &raise(AlertKind::Stuck, 0)).unwrap();
        resolve(&c, "s", &[AlertKind::ClockDrift], t(10)).unwrap();

        assert_eq!(purge_resolved_before(&c, t(5)).unwrap(), 0);
        assert_eq!(purge_resolved_before(&c, t(20)).unwrap(), 1);
        assert_eq!(list_alerts(&c, true).unwrap().len(), 1);
    }
}

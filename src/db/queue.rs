//! Local durable queue of captured samples.
//!
//! Two actors share this table: the capture path (INSERT only) and the sync
//! engine (claim, then mark uploaded or bump attempts). Every operation is a
//! single statement or a short transaction, so neither side holds a lock
//! across network I/O.
//!
//! A sample is never deleted before it has been uploaded: once it exceeds the
//! attempt ceiling it drops out of sync batches (the "backlog") but stays in
//! the table until retention or `reset_exhausted`.

use crate::errors::{AppError, AppResult};
use crate::models::sample::{LocationSample, SampleMeta, SegmentPhase};
use crate::utils::time::{millis_column, to_millis};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, TransactionBehavior, params, params_from_iter};

const SAMPLE_COLUMNS: &str = "id, hash, employee_id, session_id, latitude, longitude, accuracy,
     speed, altitude, heading, is_moving, recorded_at, created_at, uploaded, attempts,
     last_attempt_at, provider, address, is_mock, phase";

pub fn map_sample_row(row: &Row) -> rusqlite::Result<LocationSample> {
    let last_attempt: Option<i64> = row.get("last_attempt_at")?;
    let phase: Option<String> = row.get("phase")?;

    Ok(LocationSample {
        id: row.get("id")?,
        employee_id: row.get("employee_id")?,
        session_id: row.get("session_id")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        accuracy: row.get("accuracy")?,
        speed: row.get("speed")?,
        altitude: row.get("altitude")?,
        heading: row.get("heading")?,
        is_moving: row.get::<_, i64>("is_moving")? == 1,
        recorded_at: millis_column(row.get("recorded_at")?)?,
        created_at: millis_column(row.get("created_at")?)?,
        uploaded: row.get::<_, i64>("uploaded")? == 1,
        attempts: row.get("attempts")?,
        last_attempt_at: last_attempt.map(millis_column).transpose()?,
        hash: row.get("hash")?,
        meta: SampleMeta {
            provider: row.get("provider")?,
            address: row.get("address")?,
            is_mock: row.get::<_, i64>("is_mock")? == 1,
            phase: phase.as_deref().and_then(SegmentPhase::from_db_str),
        },
    })
}

fn insert(conn: &Connection, s: &LocationSample) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO location_samples (
             hash, employee_id, session_id, latitude, longitude, accuracy,
             speed, altitude, heading, is_moving, recorded_at, created_at,
             provider, address, is_mock, phase)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
         ON CONFLICT(hash) DO NOTHING",
    )?;
    stmt.execute(params![
        s.hash,
        s.employee_id,
        s.session_id,
        s.latitude,
        s.longitude,
        s.accuracy,
        s.speed,
        s.altitude,
        s.heading,
        s.is_moving as i64,
        to_millis(s.recorded_at),
        to_millis(s.created_at),
        s.meta.provider,
        s.meta.address,
        s.meta.is_mock as i64,
        s.meta.phase.map(|p| p.to_db_str()),
    ])
}

/// Persist one sample. Returns `false` when the hash was already queued.
pub fn enqueue(conn: &Connection, sample: &LocationSample) -> AppResult<bool> {
    let n = insert(conn, sample).map_err(|e| AppError::QueuePersistFailure(e.to_string()))?;
    Ok(n == 1)
}

/// Persist many samples atomically. Returns how many were new.
pub fn enqueue_many(conn: &Connection, samples: &[LocationSample]) -> AppResult<usize> {
    let persist = || -> rusqlite::Result<usize> {
        let tx = conn.unchecked_transaction()?;
        let mut added = 0;
        for s in samples {
            added += insert(&tx, s)?;
        }
        tx.commit()?;
        Ok(added)
    };
    persist().map_err(|e| AppError::QueuePersistFailure(e.to_string()))
}

fn pending_filter() -> &'static str {
    "uploaded = 0 AND attempts < ?1"
}

/// Read-only view of the oldest pending samples below the attempt ceiling.
pub fn fetch_pending(
    conn: &Connection,
    limit: usize,
    max_attempts: u32,
) -> AppResult<Vec<LocationSample>> {
    let sql = format!(
        "SELECT {SAMPLE_COLUMNS} FROM location_samples
         WHERE {}
         ORDER BY recorded_at ASC, id ASC
         LIMIT ?2",
        pending_filter()
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![max_attempts, limit as i64], map_sample_row)?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// Atomically claim the oldest pending batch for upload.
///
/// Samples already claimed by another uploader are skipped unless the claim
/// is older than `claim_ttl_secs` (the uploader died mid-flight).
pub fn claim_batch(
    conn: &mut Connection,
    limit: usize,
    max_attempts: u32,
    now: DateTime<Utc>,
    claim_ttl_secs: i64,
) -> AppResult<Vec<LocationSample>> {
    let now_ms = to_millis(now);
    let stale_before = now_ms - claim_ttl_secs.max(0) * 1000;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let batch = {
        let sql = format!(
            "SELECT {SAMPLE_COLUMNS} FROM location_samples
             WHERE {} AND (claimed_at IS NULL OR claimed_at < ?3)
             ORDER BY recorded_at ASC, id ASC
             LIMIT ?2",
            pending_filter()
        );
        let mut stmt = tx.prepare_cached(&sql)?;
        let rows = stmt.query_map(
            params![max_attempts, limit as i64, stale_before],
            map_sample_row,
        )?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        out
    };

    {
        let mut stmt =
            tx.prepare_cached("UPDATE location_samples SET claimed_at = ?1 WHERE id = ?2")?;
        for s in &batch {
            stmt.execute(params![now_ms, s.id])?;
        }
    }
    tx.commit()?;

    Ok(batch)
}

fn update_ids(
    conn: &Connection,
    set_clause: &str,
    now: DateTime<Utc>,
    ids: &[i64],
) -> AppResult<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    let placeholders = vec!["?"; ids.len()].join(",");
    let sql = format!(
        "UPDATE location_samples SET {set_clause}, claimed_at = NULL WHERE id IN ({placeholders})"
    );

    // ?1 is `now`; the anonymous placeholders continue from ?2
    let mut values: Vec<i64> = Vec::with_capacity(ids.len() + 1);
    values.push(to_millis(now));
    values.extend_from_slice(ids);

    Ok(conn.execute(&sql, params_from_iter(values))?)
}

/// Mark accepted samples; releases the claim.
pub fn mark_uploaded(conn: &Connection, ids: &[i64], now: DateTime<Utc>) -> AppResult<usize> {
    update_ids(conn, "uploaded = 1, uploaded_at = ?1", now, ids)
}

/// Record a failed attempt for each id; releases the claim.
pub fn increment_attempts(conn: &Connection, ids: &[i64], now: DateTime<Utc>) -> AppResult<usize> {
    update_ids(
        conn,
        "last_attempt_at = ?1, attempts = attempts + 1",
        now,
        ids,
    )
}

/// Delete uploaded samples of completed sessions recorded before `cutoff`.
/// Pending samples and every sample of an active session are kept: resume
/// and forced closure replay the full stream.
pub fn purge_uploaded_before(conn: &Connection, cutoff: DateTime<Utc>) -> AppResult<usize> {
    Ok(conn.execute(
        "DELETE FROM location_samples
         WHERE uploaded = 1
           AND recorded_at < ?1
           AND session_id IN (SELECT id FROM sessions WHERE status = 'completed')",
        [to_millis(cutoff)],
    )?)
}

/// Samples still eligible for sync.
pub fn count_pending(conn: &Connection, max_attempts: u32) -> AppResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM location_samples WHERE uploaded = 0 AND attempts < ?1",
        [max_attempts],
        |row| row.get(0),
    )?)
}

/// Samples past the attempt ceiling: stored, not synced.
pub fn count_backlog(conn: &Connection, max_attempts: u32) -> AppResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM location_samples WHERE uploaded = 0 AND attempts >= ?1",
        [max_attempts],
        |row| row.get(0),
    )?)
}

/// Manual recovery: give backlog samples a fresh set of attempts.
pub fn reset_exhausted(conn: &Connection, max_attempts: u32) -> AppResult<usize> {
    Ok(conn.execute(
        "UPDATE location_samples SET attempts = 0, claimed_at = NULL
         WHERE uploaded = 0 AND attempts >= ?1",
        [max_attempts],
    )?)
}

/// Every stored sample of a session in recorded order.
pub fn load_session_samples(conn: &Connection, session_id: &str) -> AppResult<Vec<LocationSample>> {
    let sql = format!(
        "SELECT {SAMPLE_COLUMNS} FROM location_samples
         WHERE session_id = ?1
         ORDER BY recorded_at ASC, id ASC"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map([session_id], map_sample_row)?;

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
    use crate::models::sample::PositionFix;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        run_pending_migrations(&c).unwrap();
        c
    }

    fn sample(i: i64) -> LocationSample {
        let fix = PositionFix::new(12.9 + i as f64 * 0.001, 77.5, 10.0, t(i * 30));
        LocationSample::from_fix("emp", "s1", &fix, true, t(i * 30))
    }

    #[test]
    fn enqueue_is_idempotent_by_hash() {
        let c = conn();
        assert!(enqueue(&c, &sample(0)).unwrap());
        assert!(!enqueue(&c, &sample(0)).unwrap());
        assert_eq!(enqueue_many(&c, &[sample(0), sample(1), sample(2)]).unwrap(), 2);
        assert_eq!(count_pending(&c, 8).unwrap(), 3);
    }

    #[test]
    fn fetch_is_oldest_first_and_bounded() {
        let c = conn();
        // inserted out of recorded order
        enqueue_many(&c, &[sample(2), sample(0), sample(1)]).unwrap();

        let got = fetch_pending(&c, 2, 8).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].recorded_at, t(0));
        assert_eq!(got[1].recorded_at, t(30));
    }

    #[test]
    fn claimed_samples_are_not_claimed_twice_until_stale() {
        let mut c = conn();
        enqueue_many(&c, &[sample(0), sample(1), sample(2)]).unwrap();

        let first = claim_batch(&mut c, 2, 8, t(100), 300).unwrap();
        assert_eq!(first.len(), 2);
        let second = claim_batch(&mut c, 10, 8, t(101), 300).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].recorded_at, t(60));

        // claim of `first` expired
        let third = claim_batch(&mut c, 10, 8, t(1000), 300).unwrap();
        assert_eq!(third.len(), 3);
    }

    #[test]
    fn exhausted_samples_become_backlog_but_stay_stored() {
        let mut c = conn();
        enqueue(&c, &sample(0)).unwrap();

        for i in 0..3 {
            let batch = claim_batch(&mut c, 10, 3, t(100 + i), 300).unwrap();
            assert_eq!(batch.len(), 1);
            let ids: Vec<i64> = batch.iter().map(|s| s.id).collect();
            increment_attempts(&c, &ids, t(100 + i)).unwrap();
        }

        assert!(claim_batch(&mut c, 10, 3, t(200), 300).unwrap().is_empty());
        assert_eq!(count_pending(&c, 3).unwrap(), 0);
        assert_eq!(count_backlog(&c, 3).unwrap(), 1);

        // retention never deletes what was not uploaded
        assert_eq!(purge_uploaded_before(&c, t(1_000_000)).unwrap(), 0);

        assert_eq!(reset_exhausted(&c, 3).unwrap(), 1);
        let again = fetch_pending(&c, 10, 3).unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].attempts, 0);
        assert_eq!(again[0].last_attempt_at, Some(t(102)));
    }

    #[test]
    fn uploaded_samples_leave_the_queue_and_are_purged() {
        let mut c = conn();
        enqueue_many(&c, &[sample(0), sample(1)]).unwrap();
        let batch = claim_batch(&mut c, 10, 8, t(100), 300).unwrap();
        let ids: Vec<i64> = batch.iter().map(|s| s.id).collect();

        assert_eq!(mark_uploaded(&c, &ids, t(100)).unwrap(), 2);
        assert_eq!(count_pending(&c, 8).unwrap(), 0);
        assert!(load_session_samples(&c, "s1").unwrap().iter().all(|s| s.uploaded));

        assert_eq!(purge_uploaded_before(&c, t(15)).unwrap(), 1);
        assert_eq!(load_session_samples(&c, "s1").unwrap().len(), 1);
    }

    #[test]
    fn metadata_round_trips_through_the_row_mapper() {
        let c = conn();
        let mut s = sample(0);
        s.meta.provider = Some("gps".into());
        s.meta.is_mock = true;
        s.meta.phase = Some(SegmentPhase::CandidateStop);
        s.speed = Some(1.5);
        enqueue(&c, &s).unwrap();

        let stored = &load_session_samples(&c, "s1").unwrap()[0];
        assert_eq!(stored.meta, s.meta);
        assert_eq!(stored.speed, Some(1.5));
        assert_eq!(stored.hash, s.hash);
        assert!(stored.id > 0);
    }
}

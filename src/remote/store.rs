//! SQLite-backed remote store.
//!
//! Accepts upload batches by sample hash, folds new samples into rollups and
//! evaluates alert rules, all in one transaction per batch. The unique hash
//! is the only concurrency control: a duplicate insert is a no-op and
//! therefore never reaches the aggregator.

use crate::config::{AlertConfig, Config};
use crate::core::alerts::{self as rules, Verdict};
use crate::core::geo::GeoPoint;
use crate::core::payload::{PayloadVersion, UploadBatch, UploadSample};
use crate::core::sync::{RemoteStore, SessionClosure, UploadError, UploadReceipt};
use crate::db::pool::DbPool;
use crate::errors::{AppError, AppResult};
use crate::models::alert::AlertKind;
use crate::remote::schema::run_remote_migrations;
use crate::remote::{aggregator, alerts};
use crate::utils::time::{millis_column, offset, to_millis};
use chrono::{DateTime, FixedOffset, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub no_signal_opened: usize,
    pub escalated: usize,
}

pub struct RemoteDb {
    conn: Connection,
    alerts: AlertConfig,
    offset: FixedOffset,
    max_version: PayloadVersion,
}

impl RemoteDb {
    pub fn open(path: &str, cfg: &Config) -> AppResult<Self> {
        let pool = DbPool::new(path)?;
        Self::with_connection(pool.conn, cfg)
    }

    pub fn in_memory(cfg: &Config) -> AppResult<Self> {
        let pool = DbPool::in_memory()?;
        Self::with_connection(pool.conn, cfg)
    }

    fn with_connection(conn: Connection, cfg: &Config) -> AppResult<Self> {
        run_remote_migrations(&conn)?;
        Ok(Self {
            conn,
            alerts: cfg.alerts.clone(),
            offset: offset(cfg.utc_offset_minutes),
            max_version: PayloadVersion::LATEST,
        })
    }

    /// Pretend to be an older server that only understands up to `version`.
    pub fn with_max_version(mut self, version: PayloadVersion) -> Self {
        self.max_version = version;
        self
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Accept a batch received at `received_at`.
    pub fn ingest_batch(
        &mut self,
        batch: &UploadBatch,
        received_at: DateTime<Utc>,
    ) -> AppResult<UploadReceipt> {
        for s in &batch.samples {
            if !GeoPoint::new(s.latitude, s.longitude).is_valid() {
                return Err(AppError::InvalidInput(format!(
                    "sample {} has invalid coordinates",
                    s.hash
                )));
            }
        }

        let tx = self.conn.transaction()?;
        let mut receipt = UploadReceipt::default();
        // employee of each session seen in this batch
        let mut sessions: BTreeMap<&str, &str> = BTreeMap::new();

        for s in &batch.samples {
            sessions.insert(&s.session_id, &s.employee_id);
            if !insert_sample(&tx, s, batch.version, received_at)? {
                receipt.duplicates += 1;
                continue;
            }
            receipt.accepted += 1;
            aggregator::fold_sample(&tx, s, self.offset)?;
            if session_is_active(&tx, &s.session_id)? {
                evaluate_sample(&tx, &self.alerts, s, received_at)?;
            }
        }

        let drift = rules::evaluate_clock_drift(&self.alerts, batch.sent_at, received_at);
        for (session_id, employee_id) in sessions {
            alerts::apply_verdict(&tx, employee_id, session_id, &drift)?;
        }
        tx.commit()?;

        log::info!(
            "accepted {} samples ({} duplicates) as {}",
            receipt.accepted,
            receipt.duplicates,
            batch.version
        );
        Ok(receipt)
    }

    /// Mark a session closed; its stuck and no-signal alerts are resolved.
    pub fn close_session(&mut self, closure: &SessionClosure) -> AppResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO remote_sessions (id, employee_id, status, ended_at)
             VALUES (?1, ?2, 'closed', ?3)
             ON CONFLICT(id) DO UPDATE SET status = 'closed', ended_at = excluded.ended_at",
            params![closure.session_id, closure.employee_id, to_millis(closure.ended_at)],
        )?;
        alerts::resolve(
            &tx,
            &closure.session_id,
            &[AlertKind::Stuck, AlertKind::NoSignal],
            closure.ended_at,
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Periodic evaluation: no-signal for every active session, then
    /// escalation of unattended alerts.
    pub fn tick(&mut self, now: DateTime<Utc>) -> AppResult<TickReport> {
        let tx = self.conn.transaction()?;
        let mut report = TickReport::default();

        let active: Vec<(String, String, i64, f64, f64)> = {
            let mut stmt = tx.prepare(
                "SELECT s.id, s.employee_id, r.last_recorded_at, r.last_latitude, r.last_longitude
                 FROM remote_sessions s
                 JOIN session_rollups r ON r.session_id = s.id
                 WHERE s.status = 'active'",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?;
            rows.collect::<Result<_, _>>()?
        };

        for (session_id, employee_id, last_ms, lat, lon) in active {
            let verdict = rules::evaluate_signal(
                &self.alerts,
                millis_column(last_ms)?,
                Some(GeoPoint::new(lat, lon)),
                now,
            );
            let changed = alerts::apply_verdict(&tx, &employee_id, &session_id, &verdict)?;
            if changed && matches!(verdict, Verdict::Raise { .. }) {
                report.no_signal_opened += 1;
            }
        }

        report.escalated = alerts::escalate_due(&tx, &self.alerts, now)?;
        tx.commit()?;
        Ok(report)
    }

    /// Drop sample payloads recorded before `cutoff`. The accepted ledger
    /// stays, so a late re-send of a purged sample is still a duplicate.
    pub fn purge_samples_before(&self, cutoff: DateTime<Utc>) -> AppResult<usize> {
        Ok(self.conn.execute(
            "DELETE FROM remote_samples WHERE recorded_at < ?1",
            [to_millis(cutoff)],
        )?)
    }

    pub fn purge_alerts_before(&self, cutoff: DateTime<Utc>) -> AppResult<usize> {
        alerts::purge_resolved_before(&self.conn, cutoff)
    }

    pub fn sample_count(&self) -> AppResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM remote_samples", [], |row| row.get(0))?)
    }
}

/// Record `s` in the accepted ledger and store its payload. Returns `false`
/// for a hash accepted before, even if its payload was purged since.
fn insert_sample(
    conn: &Connection,
    s: &UploadSample,
    version: PayloadVersion,
    received_at: DateTime<Utc>,
) -> AppResult<bool> {
    let first_seen = conn
        .prepare_cached(
            "INSERT INTO accepted_samples (hash, session_id, latitude, longitude, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(hash) DO NOTHING",
        )?
        .execute(params![
            s.hash,
            s.session_id,
            s.latitude,
            s.longitude,
            to_millis(s.recorded_at)
        ])?;
    if first_seen == 0 {
        return Ok(false);
    }

    conn.prepare_cached(
            "INSERT INTO remote_samples (
                 hash, employee_id, session_id, latitude, longitude, accuracy,
                 speed, altitude, heading, is_moving, recorded_at, received_at,
                 payload_version, provider, address, is_mock, phase)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
             ON CONFLICT(hash) DO NOTHING",
        )?
        .execute(params![
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
            to_millis(received_at),
            version.as_u8(),
            s.provider,
            s.address,
            s.is_mock.map(i64::from),
            s.phase.map(|p| p.to_db_str()),
        ])?;
    Ok(true)
}

fn session_is_active(conn: &Connection, session_id: &str) -> AppResult<bool> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM remote_sessions WHERE id = ?1",
            [session_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(status.as_deref() != Some("closed"))
}

fn evaluate_sample(
    conn: &Connection,
    cfg: &AlertConfig,
    s: &UploadSample,
    received_at: DateTime<Utc>,
) -> AppResult<()> {
    let point = GeoPoint::new(s.latitude, s.longitude);

    let anchor = alerts::load_stuck_anchor(conn, &s.session_id)?;
    let (anchor, stuck) = rules::evaluate_stuck(cfg, anchor, point, s.recorded_at, s.phase);
    if let Some(anchor) = anchor {
        alerts::save_stuck_anchor(conn, &s.session_id, &anchor)?;
    }

    let signal_back = Verdict::Clear {
        kind: AlertKind::NoSignal,
        at: received_at,
    };
    let verdicts = [stuck, rules::evaluate_mock(s.is_mock, point, s.recorded_at), Some(signal_back)];
    for v in verdicts.iter().flatten() {
        alerts::apply_verdict(conn, &s.employee_id, &s.session_id, v)?;
    }
    Ok(())
}

impl RemoteStore for RemoteDb {
    fn upload(&mut self, batch: &UploadBatch) -> Result<UploadReceipt, UploadError> {
        if batch.version > self.max_version {
            return Err(UploadError::SchemaMismatch {
                supported: self.max_version,
            });
        }
        if let Some(s) = batch.samples.iter().find(|s| s.exceeds(batch.version)) {
            return Err(UploadError::Permanent(format!(
                "sample {} carries fields unknown to {}",
                s.hash, batch.version
            )));
        }

        self.ingest_batch(batch, Utc::now()).map_err(|e| match e {
            AppError::InvalidInput(msg) => UploadError::Permanent(msg),
            other => UploadError::Transient(other.to_string()),
        })
    }

    fn report_closure(&mut self, closure: &SessionClosure) -> Result<(), UploadError> {
        self.close_session(closure)
            .map_err(|e| UploadError::Transient(e.to_string()))
    }
}

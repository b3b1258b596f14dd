//! Sync engine: claims a bounded batch from the local queue, uploads it to
//! the remote store and records the result.
//!
//! Upload is an upsert keyed by sample hash, so re-sending a batch the remote
//! already accepted (e.g. after a lost acknowledgement) is harmless.

use crate::config::SyncConfig;
use crate::core::payload::{PayloadVersion, UploadBatch};
use crate::db::{queue, sessions};
use crate::errors::{AppError, AppResult};
use crate::models::sample::LocationSample;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::fmt;

/// Typed upload failure reported by a remote store.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadError {
    /// Network or server trouble; retry later.
    Transient(String),
    /// The remote does not understand this payload version.
    SchemaMismatch { supported: PayloadVersion },
    /// The remote refuses the batch as-is.
    Permanent(String),
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::Transient(msg) => write!(f, "transient: {msg}"),
            UploadError::SchemaMismatch { supported } => {
                write!(f, "schema mismatch (remote supports up to {supported})")
            }
            UploadError::Permanent(msg) => write!(f, "permanent: {msg}"),
        }
    }
}

impl From<UploadError> for AppError {
    fn from(e: UploadError) -> Self {
        match e {
            UploadError::Transient(msg) => AppError::UploadTransient(msg),
            UploadError::SchemaMismatch { supported } => {
                AppError::UploadSchemaMismatch(format!("remote supports up to {supported}"))
            }
            UploadError::Permanent(msg) => AppError::UploadPermanent(msg),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Samples the remote had not seen before.
    pub accepted: usize,
    /// Samples already known by hash (no effect).
    pub duplicates: usize,
}

/// Notice that a session was completed on the device.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionClosure {
    pub session_id: String,
    pub employee_id: String,
    pub ended_at: DateTime<Utc>,
}

/// Server-side counterpart of the sync engine.
pub trait RemoteStore {
    fn upload(&mut self, batch: &UploadBatch) -> Result<UploadReceipt, UploadError>;

    fn report_closure(&mut self, closure: &SessionClosure) -> Result<(), UploadError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncOutcome {
    pub claimed: usize,
    pub uploaded: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub closures_reported: usize,
    pub pending: i64,
    pub backlog: i64,
    pub payload_version: Option<PayloadVersion>,
    pub error: Option<UploadError>,
}

/// Cycles spent on a downgraded payload version before the configured one is
/// tried again, so an upgraded remote gets the richer payload back.
pub const VERSION_RECHECK_CYCLES: u32 = 20;

pub struct SyncEngine {
    cfg: SyncConfig,
    preferred: PayloadVersion,
    version: PayloadVersion,
    cycles_downgraded: u32,
}

impl SyncEngine {
    pub fn new(cfg: SyncConfig) -> Self {
        let preferred = PayloadVersion::try_from(cfg.payload_version).unwrap_or(PayloadVersion::LATEST);
        Self {
            cfg,
            preferred,
            version: preferred,
            cycles_downgraded: 0,
        }
    }

    /// Payload version the next batch will be sent with.
    pub fn version(&self) -> PayloadVersion {
        self.version
    }

    /// One sync cycle. Upload failures are recorded on the batch and reported
    /// in the outcome; only local storage errors are returned as `Err`.
    pub fn run_cycle<R: RemoteStore + ?Sized>(
        &mut self,
        conn: &mut Connection,
        remote: &mut R,
        now: DateTime<Utc>,
    ) -> AppResult<SyncOutcome> {
        self.recheck_version();

        let batch = queue::claim_batch(
            conn,
            self.cfg.batch_size,
            self.cfg.max_attempts,
            now,
            self.cfg.claim_ttl_secs,
        )?;

        let mut outcome = SyncOutcome {
            claimed: batch.len(),
            ..SyncOutcome::default()
        };

        if !batch.is_empty() {
            let ids: Vec<i64> = batch.iter().map(|s| s.id).collect();
            match self.upload(remote, &batch, now) {
                Ok((receipt, version)) => {
                    queue::mark_uploaded(conn, &ids, now)?;
                    log::info!(
                        "uploaded {} samples ({} new, {} known) as {}",
                        ids.len(),
                        receipt.accepted,
                        receipt.duplicates,
                        version
                    );
                    outcome.uploaded = ids.len();
                    outcome.duplicates = receipt.duplicates;
                    outcome.payload_version = Some(version);
                }
                Err(e) => {
                    log::warn!("upload of {} samples failed: {}", ids.len(), e);
                    queue::increment_attempts(conn, &ids, now)?;
                    outcome.failed = ids.len();
                    outcome.error = Some(e);
                }
            }
        }

        outcome.closures_reported = self.report_closures(conn, remote)?;
        outcome.pending = queue::count_pending(conn, self.cfg.max_attempts)?;
        outcome.backlog = queue::count_backlog(conn, self.cfg.max_attempts)?;
        if outcome.backlog > 0 {
            log::warn!("{} samples exceeded the attempt ceiling", outcome.backlog);
        }
        Ok(outcome)
    }

    fn recheck_version(&mut self) {
        if self.version >= self.preferred {
            return;
        }
        self.cycles_downgraded += 1;
        if self.cycles_downgraded >= VERSION_RECHECK_CYCLES {
            log::info!("trying payload {} again after running as {}", self.preferred, self.version);
            self.version = self.preferred;
            self.cycles_downgraded = 0;
        }
    }

    fn upload<R: RemoteStore + ?Sized>(
        &mut self,
        remote: &mut R,
        samples: &[LocationSample],
        now: DateTime<Utc>,
    ) -> Result<(UploadReceipt, PayloadVersion), UploadError> {
        let batch = UploadBatch::build(samples, self.version, now);
        match remote.upload(&batch) {
            Ok(receipt) => Ok((receipt, batch.version)),
            Err(UploadError::SchemaMismatch { supported }) if supported < batch.version => {
                log::warn!(
                    "remote rejected payload {}; retrying once as {}",
                    batch.version,
                    supported
                );
                let retry = batch.sanitized(supported);
                match remote.upload(&retry) {
                    Ok(receipt) => {
                        self.version = supported;
                        self.cycles_downgraded = 0;
                        Ok((receipt, supported))
                    }
                    Err(e) => Err(UploadError::Permanent(format!(
                        "sanitized {supported} retry failed: {e}"
                    ))),
                }
            }
            Err(UploadError::SchemaMismatch { supported }) => Err(UploadError::Permanent(format!(
                "remote supports up to {supported}, batch is already {}",
                batch.version
            ))),
            Err(e) => Err(e),
        }
    }

    fn report_closures<R: RemoteStore + ?Sized>(
        &self,
        conn: &Connection,
        remote: &mut R,
    ) -> AppResult<usize> {
        let mut reported = 0;
        for closure in sessions::unreported_closures(conn)? {
            match remote.report_closure(&closure) {
                Ok(()) => {
                    sessions::mark_closure_reported(conn, &closure.session_id)?;
                    reported += 1;
                }
                Err(e) => {
                    log::warn!("closure of session {} not reported: {}", closure.session_id, e);
                    break;
                }
            }
        }
        Ok(reported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrate::run_pending_migrations;
    use crate::models::sample::PositionFix;
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    #[derive(Default)]
    struct FakeRemote {
        seen: HashSet<String>,
        batches: Vec<UploadBatch>,
        max_version: Option<PayloadVersion>,
        fail_next: Option<UploadError>,
        closures: Vec<SessionClosure>,
    }

    impl RemoteStore for FakeRemote {
        fn upload(&mut self, batch: &UploadBatch) -> Result<UploadReceipt, UploadError> {
            self.batches.push(batch.clone());
            if let Some(e) = self.fail_next.take() {
                return Err(e);
            }
            if let Some(max) = self.max_version
                && batch.version > max
            {
                return Err(UploadError::SchemaMismatch { supported: max });
            }
            let mut receipt = UploadReceipt::default();
            for s in &batch.samples {
                if self.seen.insert(s.hash.clone()) {
                    receipt.accepted += 1;
                } else {
                    receipt.duplicates += 1;
                }
            }
            Ok(receipt)
        }

        fn report_closure(&mut self, closure: &SessionClosure) -> Result<(), UploadError> {
            self.closures.push(closure.clone());
            Ok(())
        }
    }

    fn queue_with(n: i64) -> Connection {
        let c = Connection::open_in_memory().unwrap();
        run_pending_migrations(&c).unwrap();
        for i in 0..n {
            let mut fix = PositionFix::new(12.9 + i as f64 * 0.001, 77.5, 5.0, t(i * 30));
            fix.provider = Some("gps".into());
            queue::enqueue(&c, &LocationSample::from_fix("emp", "s", &fix, true, t(i * 30))).unwrap();
        }
        c
    }

    #[test]
    fn successful_cycle_drains_the_queue() {
        let mut c = queue_with(3);
        let mut remote = FakeRemote::default();
        let mut engine = SyncEngine::new(SyncConfig::default());

        let out = engine.run_cycle(&mut c, &mut remote, t(100)).unwrap();
        assert_eq!(out.claimed, 3);
        assert_eq!(out.uploaded, 3);
        assert_eq!(out.pending, 0);
        assert_eq!(out.payload_version, Some(PayloadVersion::V2));

        let again = engine.run_cycle(&mut c, &mut remote, t(200)).unwrap();
        assert_eq!(again.claimed, 0);
        assert_eq!(remote.batches.len(), 1);
    }

    #[test]
    fn transient_failure_keeps_batch_for_next_cycle() {
        let mut c = queue_with(2);
        let mut remote = FakeRemote {
            fail_next: Some(UploadError::Transient("timeout".into())),
            ..FakeRemote::default()
        };
        let mut engine = SyncEngine::new(SyncConfig::default());

        let out = engine.run_cycle(&mut c, &mut remote, t(100)).unwrap();
        assert_eq!(out.failed, 2);
        assert_eq!(out.pending, 2);
        assert!(matches!(out.error, Some(UploadError::Transient(_))));

        let pending = queue::fetch_pending(&c, 10, 8).unwrap();
        assert!(pending.iter().all(|s| s.attempts == 1 && s.last_attempt_at == Some(t(100))));

        let out = engine.run_cycle(&mut c, &mut remote, t(200)).unwrap();
        assert_eq!(out.uploaded, 2);
        assert_eq!(out.pending, 0);
    }

    #[test]
    fn schema_mismatch_retries_once_sanitized() {
        let mut c = queue_with(2);
        let mut remote = FakeRemote {
            max_version: Some(PayloadVersion::V1),
            ..FakeRemote::default()
        };
        let mut engine = SyncEngine::new(SyncConfig::default());

        let out = engine.run_cycle(&mut c, &mut remote, t(100)).unwrap();
        assert_eq!(out.uploaded, 2);
        assert_eq!(out.payload_version, Some(PayloadVersion::V1));
        assert_eq!(remote.batches.len(), 2);
        assert!(remote.batches[1].samples.iter().all(|s| s.provider.is_none()));
        assert_eq!(engine.version(), PayloadVersion::V1);
    }

    #[test]
    fn downgraded_version_is_retried_after_a_while() {
        let mut c = queue_with(1);
        let mut remote = FakeRemote {
            max_version: Some(PayloadVersion::V1),
            ..FakeRemote::default()
        };
        let mut engine = SyncEngine::new(SyncConfig::default());
        engine.run_cycle(&mut c, &mut remote, t(100)).unwrap();
        assert_eq!(engine.version(), PayloadVersion::V1);

        // the remote gets upgraded in the meantime
        remote.max_version = None;
        for i in 1..VERSION_RECHECK_CYCLES {
            engine.run_cycle(&mut c, &mut remote, t(100 + i as i64)).unwrap();
            assert_eq!(engine.version(), PayloadVersion::V1);
        }

        let fix = PositionFix::new(12.95, 77.5, 5.0, t(900));
        queue::enqueue(&c, &LocationSample::from_fix("emp", "s", &fix, true, t(900))).unwrap();
        let out = engine.run_cycle(&mut c, &mut remote, t(1000)).unwrap();
        assert_eq!(out.uploaded, 1);
        assert_eq!(out.payload_version, Some(PayloadVersion::V2));
        assert_eq!(engine.version(), PayloadVersion::V2);
    }

    #[test]
    fn recheck_against_an_old_remote_falls_back_again() {
        let mut c = queue_with(1);
        let mut remote = FakeRemote {
            max_version: Some(PayloadVersion::V1),
            ..FakeRemote::default()
        };
        let mut engine = SyncEngine::new(SyncConfig::default());
        for i in 0..VERSION_RECHECK_CYCLES {
            engine.run_cycle(&mut c, &mut remote, t(100 + i as i64)).unwrap();
        }

        let fix = PositionFix::new(12.95, 77.5, 5.0, t(900));
        queue::enqueue(&c, &LocationSample::from_fix("emp", "s", &fix, true, t(900))).unwrap();
        let out = engine.run_cycle(&mut c, &mut remote, t(1000)).unwrap();
        assert_eq!(out.uploaded, 1);
        assert_eq!(out.payload_version, Some(PayloadVersion::V1));
        assert_eq!(engine.version(), PayloadVersion::V1);
        // one rejected v2 attempt per recheck, no more
        assert_eq!(remote.batches.len(), 4);
    }

    #[test]
    fn upload_errors_map_to_app_errors() {
        assert!(matches!(
            AppError::from(UploadError::Transient("timeout".into())),
            AppError::UploadTransient(_)
        ));
        assert!(matches!(
            AppError::from(UploadError::SchemaMismatch {
                supported: PayloadVersion::V1
            }),
            AppError::UploadSchemaMismatch(_)
        ));
        assert!(matches!(
            AppError::from(UploadError::Permanent("bad".into())),
            AppError::UploadPermanent(_)
        ));
    }

    #[test]
    fn failing_sanitized_retry_is_permanent() {
        let mut c = queue_with(1);
        let remote = FakeRemote {
            max_version: Some(PayloadVersion::V1),
            ..FakeRemote::default()
        };
        let mut engine = SyncEngine::new(SyncConfig::default());
        // the first call answers the mismatch, the sanitized retry fails
        let mut wrapped = FailSecond {
            inner: remote,
            calls: 0,
        };

        let out = engine.run_cycle(&mut c, &mut wrapped, t(100)).unwrap();
        assert_eq!(out.failed, 1);
        assert!(matches!(out.error, Some(UploadError::Permanent(_))));
        assert_eq!(engine.version(), PayloadVersion::V2);
    }

    struct FailSecond {
        inner: FakeRemote,
        calls: usize,
    }

    impl RemoteStore for FailSecond {
        fn upload(&mut self, batch: &UploadBatch) -> Result<UploadReceipt, UploadError> {
            self.calls += 1;
            if self.calls == 2 {
                return Err(UploadError::Permanent("missing column".into()));
            }
            self.inner.upload(batch)
        }

        fn report_closure(&mut self, closure: &SessionClosure) -> Result<(), UploadError> {
            self.inner.report_closure(closure)
        }
    }

    #[test]
    fn exhausted_samples_become_backlog() {
        let mut c = queue_with(1);
        let cfg = SyncConfig {
            max_attempts: 2,
            ..SyncConfig::default()
        };
        let mut engine = SyncEngine::new(cfg);
        let mut remote = FakeRemote::default();

        for i in 0..2 {
            remote.fail_next = Some(UploadError::Transient("offline".into()));
            engine.run_cycle(&mut c, &mut remote, t(100 + i)).unwrap();
        }
        let out = engine.run_cycle(&mut c, &mut remote, t(300)).unwrap();
        assert_eq!(out.claimed, 0);
        assert_eq!(out.pending, 0);
        assert_eq!(out.backlog, 1);
    }
}

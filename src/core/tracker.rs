//! Per-employee tracking session: sampler, queue and classifier glued
//! together. Every accepted fix is persisted with its timeline updates and
//! the new session distance in one local transaction.

use crate::config::{ClassifierConfig, Config, SamplerConfig};
use crate::core::classifier::{Classifier, ClassifierOutput};
use crate::core::sampler::{RejectReason, Sampler};
use crate::db::log::ttlog;
use crate::db::{queue, sessions, timeline};
use crate::errors::{AppError, AppResult};
use crate::models::sample::{PositionFix, SegmentPhase};
use crate::models::session::{CloseReason, Session};
use crate::utils::time::offset;
use chrono::{DateTime, FixedOffset, Utc};
use rusqlite::Connection;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Accepted { hash: String, phase: SegmentPhase },
    Rejected(RejectReason),
}

#[derive(Debug, Clone)]
struct ActiveSession {
    session: Session,
    sampler: Sampler,
    classifier: Classifier,
}

pub struct Tracker {
    employee_id: String,
    sampler_cfg: SamplerConfig,
    classifier_cfg: ClassifierConfig,
    offset: FixedOffset,
    active: Option<ActiveSession>,
}

impl Tracker {
    pub fn new(cfg: &Config, employee_id: &str) -> Self {
        Self {
            employee_id: employee_id.to_string(),
            sampler_cfg: cfg.sampler.clone(),
            classifier_cfg: cfg.classifier.clone(),
            offset: offset(cfg.utc_offset_minutes),
            active: None,
        }
    }

    /// Reload the employee's active session (if any) and replay its samples
    /// so capture can continue after a restart.
    pub fn resume(conn: &Connection, cfg: &Config, employee_id: &str) -> AppResult<Self> {
        let mut tracker = Self::new(cfg, employee_id);
        let Some(session) = sessions::active_session_for(conn, employee_id)? else {
            return Ok(tracker);
        };

        let samples = queue::load_session_samples(conn, &session.id)?;
        let (classifier, events) = Classifier::replay(
            tracker.classifier_cfg.clone(),
            tracker.offset,
            &session.id,
            session.started_at,
            &samples,
        );
        for ev in &events {
            timeline::upsert_event(conn, ev)?;
        }

        let mut sampler = Sampler::new(tracker.sampler_cfg.clone(), employee_id, &session.id);
        if let Some(last) = samples.last() {
            sampler.resume_from(last);
        }

        log::info!(
            "resumed session {} with {} samples ({:.1} m)",
            session.id,
            samples.len(),
            classifier.total_distance()
        );
        tracker.active = Some(ActiveSession {
            session,
            sampler,
            classifier,
        });
        Ok(tracker)
    }

    pub fn employee_id(&self) -> &str {
        &self.employee_id
    }

    pub fn session(&self) -> Option<&Session> {
        self.active.as_ref().map(|a| &a.session)
    }

    /// Provider interval to request next, if tracking.
    pub fn next_interval(&self) -> Option<Duration> {
        self.active.as_ref().map(|a| a.sampler.next_interval())
    }

    pub fn start_session(&mut self, conn: &Connection, at: DateTime<Utc>) -> AppResult<Session> {
        if let Some(active) = &self.active {
            return Err(AppError::SessionStateConflict(format!(
                "session {} is still active",
                active.session.id
            )));
        }

        let session = Session::new(&self.employee_id, at);
        let (classifier, start) =
            Classifier::start(self.classifier_cfg.clone(), self.offset, &session.id, at);

        let tx = conn.unchecked_transaction()?;
        sessions::insert_session(&tx, &session)?;
        timeline::upsert_event(&tx, &start)?;
        ttlog(&tx, "session_start", &session.id, &format!("employee {}", self.employee_id))?;
        tx.commit()?;

        log::info!("session {} started for {}", session.id, self.employee_id);
        self.active = Some(ActiveSession {
            sampler: Sampler::new(self.sampler_cfg.clone(), &self.employee_id, &session.id),
            session: session.clone(),
            classifier,
        });
        Ok(session)
    }

    /// Run one provider fix through the sampler and, if accepted, persist it.
    ///
    /// On a storage failure the in-memory state is rolled back so the same
    /// fix can be offered again.
    pub fn capture(
        &mut self,
        conn: &Connection,
        fix: &PositionFix,
        now: DateTime<Utc>,
    ) -> AppResult<CaptureOutcome> {
        let Some(active) = self.active.as_mut() else {
            return Err(AppError::NoActiveSession(self.employee_id.clone()));
        };

        let snapshot = active.clone();
        let mut sample = match active.sampler.evaluate(fix, now) {
            Ok(sample) => sample,
            Err(reason) => {
                log::debug!("fix at {} rejected: {}", fix.recorded_at, reason);
                return Ok(CaptureOutcome::Rejected(reason));
            }
        };

        let output = active.classifier.ingest(&sample);
        let phase = active.classifier.phase();
        sample.meta.phase = Some(phase);

        let persisted = (|| -> AppResult<()> {
            let tx = conn.unchecked_transaction()?;
            ensure_still_active(&tx, &active.session.id)?;
            queue::enqueue(&tx, &sample)?;
            persist_output(&tx, &active.session.id, &output)?;
            tx.commit()?;
            Ok(())
        })();

        match persisted {
            Ok(()) => {
                active.session.total_distance_m = output.session_distance_m;
                Ok(CaptureOutcome::Accepted {
                    hash: sample.hash,
                    phase,
                })
            }
            Err(e @ AppError::SessionStateConflict(_)) => {
                log::warn!("dropping fix at {}: {}", fix.recorded_at, e);
                self.active = None;
                Err(e)
            }
            Err(e) => {
                log::error!("failed to persist sample {}: {}", sample.hash, e);
                *active = snapshot;
                Err(match e {
                    AppError::QueuePersistFailure(_) => e,
                    other => AppError::QueuePersistFailure(other.to_string()),
                })
            }
        }
    }

    /// End the active session: finalize open events, write "end" and mark
    /// the session completed.
    pub fn end_session(&mut self, conn: &Connection, at: DateTime<Utc>) -> AppResult<Session> {
        let Some(session_id) = self.active.as_ref().map(|a| a.session.id.clone()) else {
            return Err(AppError::NoActiveSession(self.employee_id.clone()));
        };

        // closed behind our back (forced closure): nothing left to finalize
        if let Some(stored) = sessions::get_session(conn, &session_id)?
            && !stored.is_active()
        {
            log::info!("session {} was already closed", stored.id);
            self.active = None;
            return Ok(stored);
        }

        let Some(mut active) = self.active.take() else {
            return Err(AppError::NoActiveSession(self.employee_id.clone()));
        };

        match close_with(conn, &active.session, &mut active.classifier, at, CloseReason::Ended) {
            Ok(session) => Ok(session),
            Err(e) => {
                self.active = Some(active);
                Err(e)
            }
        }
    }
}

/// Fails with `SessionStateConflict` once the stored session is no longer
/// active, e.g. after an administrative closure from another connection.
fn ensure_still_active(conn: &Connection, session_id: &str) -> AppResult<()> {
    match sessions::get_session(conn, session_id)? {
        Some(s) if s.is_active() => Ok(()),
        Some(_) => Err(AppError::SessionStateConflict(format!(
            "session {session_id} was closed"
        ))),
        None => Err(AppError::SessionNotFound(session_id.to_string())),
    }
}

fn persist_output(conn: &Connection, session_id: &str, output: &ClassifierOutput) -> AppResult<()> {
    for ev in &output.upserts {
        timeline::upsert_event(conn, ev)?;
    }
    sessions::set_distance(conn, session_id, output.session_distance_m)
}

fn close_with(
    conn: &Connection,
    session: &Session,
    classifier: &mut Classifier,
    at: DateTime<Utc>,
    reason: CloseReason,
) -> AppResult<Session> {
    let mut attempt = classifier.clone();
    let output = attempt.close(at);
    let ended_at = output
        .upserts
        .iter()
        .rev()
        .find(|e| e.kind == crate::models::timeline::EventKind::End)
        .map_or(at, |e| e.started_at);

    let tx = conn.unchecked_transaction()?;
    persist_output(&tx, &session.id, &output)?;
    sessions::complete_session(&tx, &session.id, ended_at, reason)?;
    ttlog(
        &tx,
        match reason {
            CloseReason::Ended => "session_end",
            CloseReason::Forced => "session_force_close",
        },
        &session.id,
        &format!("{:.1} m", output.session_distance_m),
    )?;
    tx.commit()?;
    *classifier = attempt;

    log::info!("session {} closed ({})", session.id, reason.to_db_str());
    sessions::get_session(conn, &session.id)?
        .ok_or_else(|| AppError::SessionNotFound(session.id.clone()))
}

/// Administrative closure of any session, tracked or not.
///
/// Closing a session that is already completed is a no-op success that
/// returns the stored record unchanged.
pub fn force_close_session(
    conn: &Connection,
    cfg: &Config,
    session_id: &str,
    at: DateTime<Utc>,
) -> AppResult<Session> {
    let session = sessions::get_session(conn, session_id)?
        .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;
    if !session.is_active() {
        log::debug!("session {} already closed", session_id);
        return Ok(session);
    }

    let samples = queue::load_session_samples(conn, session_id)?;
    let (mut classifier, events) = Classifier::replay(
        cfg.classifier.clone(),
        offset(cfg.utc_offset_minutes),
        session_id,
        session.started_at,
        &samples,
    );
    for ev in &events {
        timeline::upsert_event(conn, ev)?;
    }
    close_with(conn, &session, &mut classifier, at, CloseReason::Forced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrate::run_pending_migrations;
    use crate::models::timeline::EventKind;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        run_pending_migrations(&c).unwrap();
        c
    }

    #[test]
    fn poor_accuracy_never_reaches_the_queue() {
        let c = conn();
        let cfg = Config::default();
        let mut tracker = Tracker::new(&cfg, "emp");
        tracker.start_session(&c, t(0)).unwrap();

        let outcome = tracker.capture(&c, &PositionFix::new(12.9, 77.5, 80.0, t(10)), t(10)).unwrap();
        assert!(matches!(
            outcome,
            CaptureOutcome::Rejected(RejectReason::PoorAccuracy { .. })
        ));
        assert_eq!(queue::count_pending(&c, 8).unwrap(), 0);
    }

    #[test]
    fn accepted_fix_is_queued_with_its_phase() {
        let c = conn();
        let mut tracker = Tracker::new(&Config::default(), "emp");
        let session = tracker.start_session(&c, t(0)).unwrap();

        let outcome = tracker.capture(&c, &PositionFix::new(12.9, 77.5, 5.0, t(10)), t(10)).unwrap();
        let CaptureOutcome::Accepted { phase, .. } = outcome else {
            panic!("expected acceptance");
        };
        assert_eq!(phase, SegmentPhase::CandidateStop);

        let stored = queue::load_session_samples(&c, &session.id).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].meta.phase, Some(SegmentPhase::CandidateStop));

        let events = timeline::load_events(&c, &session.id).unwrap();
        assert_eq!(events[0].kind, EventKind::Start);
        assert!(events[0].finalized);
        assert_eq!(events[0].latitude, 12.9);
    }

    #[test]
    fn second_start_is_a_conflict() {
        let c = conn();
        let cfg = Config::default();
        let mut tracker = Tracker::new(&cfg, "emp");
        tracker.start_session(&c, t(0)).unwrap();
        assert!(matches!(
            tracker.start_session(&c, t(5)),
            Err(AppError::SessionStateConflict(_))
        ));

        // a second tracker for the same employee hits the unique index
        let mut other = Tracker::new(&cfg, "emp");
        assert!(matches!(
            other.start_session(&c, t(5)),
            Err(AppError::SessionStateConflict(_))
        ));
    }

    #[test]
    fn force_close_is_idempotent() {
        let c = conn();
        let cfg = Config::default();
        let mut tracker = Tracker::new(&cfg, "emp");
        let session = tracker.start_session(&c, t(0)).unwrap();
        for (i, lat) in [12.900, 12.902, 12.904, 12.906].iter().enumerate() {
            let secs = 30 * (i as i64 + 1);
            tracker
                .capture(&c, &PositionFix::new(*lat, 77.5, 5.0, t(secs)), t(secs))
                .unwrap();
        }

        let closed = force_close_session(&c, &cfg, &session.id, t(600)).unwrap();
        assert!(!closed.is_active());
        assert_eq!(closed.close_reason, Some(CloseReason::Forced));
        assert_eq!(closed.ended_at, Some(t(600)));
        assert!(closed.total_distance_m > 600.0);

        let again = force_close_session(&c, &cfg, &session.id, t(9000)).unwrap();
        assert_eq!(again.ended_at, closed.ended_at);
        assert_eq!(again.total_distance_m, closed.total_distance_m);

        let events = timeline::load_events(&c, &session.id).unwrap();
        assert!(events.iter().all(|e| e.finalized));
        assert_eq!(events.iter().filter(|e| e.kind == EventKind::End).count(), 1);
    }

    #[test]
    fn resume_continues_where_capture_stopped() {
        let c = conn();
        let cfg = Config::default();
        let mut tracker = Tracker::new(&cfg, "emp");
        let session = tracker.start_session(&c, t(0)).unwrap();
        for secs in [30, 60] {
            tracker
                .capture(&c, &PositionFix::new(12.9, 77.5, 5.0, t(secs)), t(secs))
                .unwrap();
        }
        drop(tracker);

        let mut resumed = Tracker::resume(&c, &cfg, "emp").unwrap();
        assert_eq!(resumed.session().unwrap().id, session.id);

        // out of order relative to the stored samples
        let outcome = resumed
            .capture(&c, &PositionFix::new(12.9, 77.5, 5.0, t(45)), t(70))
            .unwrap();
        assert_eq!(outcome, CaptureOutcome::Rejected(RejectReason::OutOfOrder));

        let outcome = resumed
            .capture(&c, &PositionFix::new(12.9, 77.5, 5.0, t(400)), t(400))
            .unwrap();
        assert!(matches!(
            outcome,
            CaptureOutcome::Accepted {
                phase: SegmentPhase::Stopped,
                ..
            }
        ));

        let closed = resumed.end_session(&c, t(500)).unwrap();
        assert_eq!(closed.close_reason, Some(CloseReason::Ended));
        assert_eq!(closed.total_distance_m, 0.0);
        assert!(resumed.session().is_none());
    }

    #[test]
    fn capture_after_forced_close_is_refused() {
        let c = conn();
        let cfg = Config::default();
        let mut tracker = Tracker::new(&cfg, "emp");
        let session = tracker.start_session(&c, t(0)).unwrap();
        tracker
            .capture(&c, &PositionFix::new(12.9, 77.5, 5.0, t(30)), t(30))
            .unwrap();

        let closed = force_close_session(&c, &cfg, &session.id, t(100)).unwrap();

        let res = tracker.capture(&c, &PositionFix::new(12.902, 77.5, 5.0, t(130)), t(130));
        assert!(matches!(res, Err(AppError::SessionStateConflict(_))));
        assert!(tracker.session().is_none());

        assert_eq!(queue::load_session_samples(&c, &session.id).unwrap().len(), 1);
        let stored = sessions::get_session(&c, &session.id).unwrap().unwrap();
        assert_eq!(stored.total_distance_m, closed.total_distance_m);
        assert_eq!(stored.ended_at, Some(t(100)));
    }

    #[test]
    fn ending_a_session_closed_elsewhere_changes_nothing() {
        let c = conn();
        let cfg = Config::default();
        let mut tracker = Tracker::new(&cfg, "emp");
        let session = tracker.start_session(&c, t(0)).unwrap();
        tracker
            .capture(&c, &PositionFix::new(12.9, 77.5, 5.0, t(30)), t(30))
            .unwrap();
        force_close_session(&c, &cfg, &session.id, t(100)).unwrap();

        let ended = tracker.end_session(&c, t(500)).unwrap();
        assert_eq!(ended.close_reason, Some(CloseReason::Forced));
        assert_eq!(ended.ended_at, Some(t(100)));
        assert!(tracker.session().is_none());

        let events = timeline::load_events(&c, &session.id).unwrap();
        assert_eq!(events.iter().filter(|e| e.kind == EventKind::End).count(), 1);
    }
}

//! Background workers.
//!
//! Capture and sync run on their own threads, each with its own SQLite
//! connection on the same file. They only meet in the sample queue, whose
//! operations are short transactions, so an upload in flight never blocks a
//! capture. Both stop on a shutdown message; `stop()` joins the thread.

use crate::config::{Config, SyncConfig};
use crate::core::sync::{RemoteStore, SyncEngine};
use crate::core::tracker::{CaptureOutcome, Tracker};
use crate::db::pool::DbPool;
use crate::errors::{AppError, AppResult};
use crate::models::sample::PositionFix;
use chrono::Utc;
use crossbeam::channel::{Receiver, Sender, bounded, select, tick};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub struct Worker<T> {
    name: &'static str,
    shutdown: Sender<()>,
    handle: JoinHandle<AppResult<T>>,
}

impl<T> Worker<T> {
    /// Ask the worker to finish and wait for its result.
    pub fn stop(self) -> AppResult<T> {
        // the worker may already have exited on its own
        let _ = self.shutdown.send(());
        self.handle
            .join()
            .map_err(|_| AppError::Other(format!("{} worker panicked", self.name)))?
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub accepted: usize,
    pub rejected: usize,
    pub failed: usize,
}

/// Attempts per fix when the queue write fails, and the first pause between
/// them. The pause doubles after every attempt.
const PERSIST_ATTEMPTS: u32 = 6;
const PERSIST_BACKOFF: Duration = Duration::from_millis(50);

impl CaptureStats {
    /// Returns false once the tracker has lost its session and the worker
    /// should stop.
    fn record(&mut self, result: AppResult<CaptureOutcome>) -> bool {
        match result {
            Ok(CaptureOutcome::Accepted { .. }) => self.accepted += 1,
            Ok(CaptureOutcome::Rejected(_)) => self.rejected += 1,
            Err(e @ (AppError::SessionStateConflict(_) | AppError::NoActiveSession(_))) => {
                log::warn!("capture stopped: {}", e);
                self.failed += 1;
                return false;
            }
            Err(e) => {
                log::error!("capture failed: {}", e);
                self.failed += 1;
            }
        }
        true
    }
}

/// Capture one fix, retrying queue write failures with a doubling pause.
/// The tracker rolls back on each failure, so the same fix is offered again.
fn capture_with_retry(tracker: &mut Tracker, pool: &DbPool, fix: &PositionFix) -> AppResult<CaptureOutcome> {
    let mut pause = PERSIST_BACKOFF;
    let mut attempt = 1;
    loop {
        match tracker.capture(&pool.conn, fix, Utc::now()) {
            Err(AppError::QueuePersistFailure(e)) if attempt < PERSIST_ATTEMPTS => {
                log::warn!("queue write failed (attempt {attempt}), retrying in {pause:?}: {e}");
                thread::sleep(pause);
                pause *= 2;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Capture worker for the employee's active session. Fixes arrive on
/// `fixes`; the worker ends when told to or when the sender is dropped.
/// Fixes already queued at shutdown are still processed.
pub fn spawn_capture(
    db_path: &str,
    cfg: &Config,
    employee_id: &str,
    fixes: Receiver<PositionFix>,
) -> Worker<CaptureStats> {
    let (shutdown, stop_rx) = bounded::<()>(1);
    let db_path = db_path.to_string();
    let cfg = cfg.clone();
    let employee_id = employee_id.to_string();

    let handle = thread::spawn(move || -> AppResult<CaptureStats> {
        let pool = DbPool::new(&db_path)?;
        let mut tracker = Tracker::resume(&pool.conn, &cfg, &employee_id)?;
        if tracker.session().is_none() {
            return Err(AppError::NoActiveSession(employee_id));
        }

        let mut stats = CaptureStats::default();
        loop {
            select! {
                recv(stop_rx) -> _ => {
                    for fix in fixes.try_iter() {
                        if !stats.record(capture_with_retry(&mut tracker, &pool, &fix)) {
                            break;
                        }
                    }
                    break;
                }
                recv(fixes) -> msg => match msg {
                    Ok(fix) => {
                        if !stats.record(capture_with_retry(&mut tracker, &pool, &fix)) {
                            break;
                        }
                    }
                    Err(_) => break,
                },
            }
        }
        log::info!(
            "capture worker done: {} accepted, {} rejected, {} failed",
            stats.accepted,
            stats.rejected,
            stats.failed
        );
        Ok(stats)
    });

    Worker {
        name: "capture",
        shutdown,
        handle,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub cycles: usize,
    pub uploaded: usize,
    pub failed: usize,
}

/// Sync worker: one cycle right away, then one per `interval`.
pub fn spawn_sync(
    db_path: &str,
    cfg: &SyncConfig,
    mut remote: Box<dyn RemoteStore + Send>,
    interval: Duration,
) -> Worker<SyncStats> {
    let (shutdown, stop_rx) = bounded::<()>(1);
    let db_path = db_path.to_string();
    let cfg = cfg.clone();

    let handle = thread::spawn(move || -> AppResult<SyncStats> {
        let mut pool = DbPool::new(&db_path)?;
        let mut engine = SyncEngine::new(cfg);
        let ticker = tick(interval);
        let mut stats = SyncStats::default();

        let mut cycle = |pool: &mut DbPool, stats: &mut SyncStats| {
            match engine.run_cycle(&mut pool.conn, remote.as_mut(), Utc::now()) {
                Ok(outcome) => {
                    stats.uploaded += outcome.uploaded;
                    stats.failed += outcome.failed;
                }
                Err(e) => log::error!("sync cycle failed: {}", e),
            }
            stats.cycles += 1;
        };

        cycle(&mut pool, &mut stats);
        loop {
            select! {
                recv(stop_rx) -> _ => break,
                recv(ticker) -> _ => cycle(&mut pool, &mut stats),
            }
        }
        Ok(stats)
    });

    Worker {
        name: "sync",
        shutdown,
        handle,
    }
}

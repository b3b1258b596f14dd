//! Retention windows for the device database and the remote store.

use crate::config::RetentionConfig;
use crate::db::{queue, sessions, timeline};
use crate::errors::AppResult;
use crate::remote::store::RemoteDb;
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalPurge {
    pub samples: usize,
    pub events: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemotePurge {
    pub samples: usize,
    pub alerts: usize,
}

/// Drop uploaded samples and the timelines of completed sessions older than
/// the retention window. Pending samples are never touched.
pub fn purge_local(conn: &Connection, cfg: &RetentionConfig, now: DateTime<Utc>) -> AppResult<LocalPurge> {
    let cutoff = now - Duration::days(cfg.retention_days);

    let tx = conn.unchecked_transaction()?;
    let samples = queue::purge_uploaded_before(&tx, cutoff)?;
    let expired = sessions::completed_before(&tx, cutoff)?;
    let events = timeline::purge_sessions(&tx, &expired)?;
    tx.commit()?;

    log::info!("local purge: {} samples, {} timeline events", samples, events);
    Ok(LocalPurge { samples, events })
}

/// Drop accepted samples after the sample window and resolved alerts after
/// the (longer) alert window. Rollups are kept.
pub fn purge_remote(remote: &RemoteDb, cfg: &RetentionConfig, now: DateTime<Utc>) -> AppResult<RemotePurge> {
    let samples = remote.purge_samples_before(now - Duration::days(cfg.retention_days))?;
    let alerts = remote.purge_alerts_before(now - Duration::days(cfg.alert_retention_days))?;

    log::info!("remote purge: {} samples, {} alerts", samples, alerts);
    Ok(RemotePurge { samples, alerts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::tracker::Tracker;
    use crate::db::migrate::run_pending_migrations;
    use crate::models::sample::PositionFix;
    use chrono::TimeZone;

    #[test]
    fn only_uploaded_and_completed_data_expires() {
        let c = Connection::open_in_memory().unwrap();
        run_pending_migrations(&c).unwrap();
        let cfg = Config::default();
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();

        let mut tracker = Tracker::new(&cfg, "emp");
        let session = tracker.start_session(&c, t0).unwrap();
        for i in 1..=3 {
            let at = t0 + Duration::seconds(30 * i);
            tracker
                .capture(&c, &PositionFix::new(12.9 + i as f64 * 0.002, 77.5, 5.0, at), at)
                .unwrap();
        }
        tracker.end_session(&c, t0 + Duration::minutes(10)).unwrap();

        let pending = queue::fetch_pending(&c, 10, 8).unwrap();
        queue::mark_uploaded(&c, &[pending[0].id], t0).unwrap();

        // a forgotten session still active two months later
        let mut forgotten = Tracker::new(&cfg, "other");
        let open = forgotten.start_session(&c, t0).unwrap();
        for i in 1..=2 {
            let at = t0 + Duration::seconds(30 * i);
            forgotten
                .capture(&c, &PositionFix::new(13.5 + i as f64 * 0.002, 77.5, 5.0, at), at)
                .unwrap();
        }
        let ids: Vec<i64> = queue::load_session_samples(&c, &open.id)
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        queue::mark_uploaded(&c, &ids, t0).unwrap();

        let later = t0 + Duration::days(60);
        let purged = purge_local(&c, &cfg.retention, later).unwrap();
        assert_eq!(purged.samples, 1);
        assert!(purged.events >= 2);
        assert_eq!(queue::count_pending(&c, 8).unwrap(), 2);
        assert!(timeline::load_events(&c, &session.id).unwrap().is_empty());
        assert_eq!(queue::load_session_samples(&c, &open.id).unwrap().len(), 2);
        assert!(!timeline::load_events(&c, &open.id).unwrap().is_empty());

        // nothing is old enough yet
        let purged = purge_local(&c, &cfg.retention, t0 + Duration::days(1)).unwrap();
        assert_eq!(purged, LocalPurge::default());
    }
}

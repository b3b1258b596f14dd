//! Anomaly rules. Pure functions: they look at one sample (or a tick) plus
//! a little per-session state and say whether a condition is present.
//! Persistence and the one-alert-per-onset rule live in `remote::alerts`.

use crate::config::AlertConfig;
use crate::core::geo::{GeoPoint, haversine_distance};
use crate::models::alert::{Alert, AlertKind, AlertState};
use crate::models::sample::SegmentPhase;
use chrono::{DateTime, Utc};

/// Outcome of a rule for one observation.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Raise {
        kind: AlertKind,
        at: DateTime<Utc>,
        point: Option<GeoPoint>,
        detail: String,
    },
    Clear {
        kind: AlertKind,
        at: DateTime<Utc>,
    },
}

impl Verdict {
    pub fn kind(&self) -> AlertKind {
        match self {
            Verdict::Raise { kind, .. } | Verdict::Clear { kind, .. } => *kind,
        }
    }
}

/// Where a session has been sitting, for the stuck rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StuckAnchor {
    pub point: GeoPoint,
    pub since: DateTime<Utc>,
    pub last_at: DateTime<Utc>,
}

/// Stuck: the position stays within `stuck_radius_m` of an anchor for more
/// than `stuck_duration_secs` while no stop has been recognised.
///
/// Samples older than the last one seen do not move the anchor. An unknown
/// phase (older payloads) counts as "not stopped".
pub fn evaluate_stuck(
    cfg: &AlertConfig,
    anchor: Option<StuckAnchor>,
    point: GeoPoint,
    at: DateTime<Utc>,
    phase: Option<SegmentPhase>,
) -> (Option<StuckAnchor>, Option<Verdict>) {
    let Some(mut anchor) = anchor else {
        let fresh = StuckAnchor {
            point,
            since: at,
            last_at: at,
        };
        return (Some(fresh), None);
    };

    if at <= anchor.last_at {
        return (Some(anchor), None);
    }

    if haversine_distance(&anchor.point, &point) > cfg.stuck_radius_m {
        let fresh = StuckAnchor {
            point,
            since: at,
            last_at: at,
        };
        return (
            Some(fresh),
            Some(Verdict::Clear {
                kind: AlertKind::Stuck,
                at,
            }),
        );
    }

    anchor.last_at = at;
    if phase == Some(SegmentPhase::Stopped) {
        return (
            Some(anchor),
            Some(Verdict::Clear {
                kind: AlertKind::Stuck,
                at,
            }),
        );
    }

    let held = (at - anchor.since).num_seconds();
    if held > cfg.stuck_duration_secs {
        let verdict = Verdict::Raise {
            kind: AlertKind::Stuck,
            at: anchor.since,
            point: Some(anchor.point),
            detail: format!("within {:.0} m for {}s", cfg.stuck_radius_m, held),
        };
        return (Some(anchor), Some(verdict));
    }
    (Some(anchor), None)
}

/// Mock location: raised while the provider flags samples as synthetic.
pub fn evaluate_mock(is_mock: Option<bool>, point: GeoPoint, at: DateTime<Utc>) -> Option<Verdict> {
    match is_mock? {
        true => Some(Verdict::Raise {
            kind: AlertKind::MockLocation,
            at,
            point: Some(point),
            detail: "provider reported a synthetic position".to_string(),
        }),
        false => Some(Verdict::Clear {
            kind: AlertKind::MockLocation,
            at,
        }),
    }
}

/// Clock drift between the device send time and server receipt time.
pub fn evaluate_clock_drift(
    cfg: &AlertConfig,
    sent_at: DateTime<Utc>,
    received_at: DateTime<Utc>,
) -> Verdict {
    let drift = (received_at - sent_at).num_seconds();
    if drift.abs() > cfg.clock_drift_secs {
        Verdict::Raise {
            kind: AlertKind::ClockDrift,
            at: received_at,
            point: None,
            detail: format!("device clock off by {drift}s"),
        }
    } else {
        Verdict::Clear {
            kind: AlertKind::ClockDrift,
            at: received_at,
        }
    }
}

/// No signal: nothing recorded for longer than the timeout.
pub fn evaluate_signal(
    cfg: &AlertConfig,
    last_recorded_at: DateTime<Utc>,
    last_point: Option<GeoPoint>,
    now: DateTime<Utc>,
) -> Verdict {
    let silent = (now - last_recorded_at).num_seconds();
    if silent > cfg.signal_timeout_secs {
        Verdict::Raise {
            kind: AlertKind::NoSignal,
            at: last_recorded_at,
            point: last_point,
            detail: format!("no sample for {silent}s"),
        }
    } else {
        Verdict::Clear {
            kind: AlertKind::NoSignal,
            at: now,
        }
    }
}

/// An open alert nobody acknowledged escalates once.
pub fn should_escalate(cfg: &AlertConfig, alert: &Alert, now: DateTime<Utc>) -> bool {
    alert.state == AlertState::Open
        && !alert.escalated
        && (now - alert.opened_at).num_seconds() >= cfg.escalate_after_secs
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn here() -> GeoPoint {
        GeoPoint::new(12.9, 77.5)
    }

    #[test]
    fn stuck_raises_after_duration_unless_stopped() {
        let cfg = AlertConfig::default();
        let (anchor, v) = evaluate_stuck(&cfg, None, here(), t(0), None);
        assert!(v.is_none());

        let (anchor, v) = evaluate_stuck(&cfg, anchor, here(), t(600), Some(SegmentPhase::Moving));
        assert!(v.is_none());

        let (anchor, v) = evaluate_stuck(&cfg, anchor, here(), t(1900), None);
        assert!(matches!(
            v,
            Some(Verdict::Raise {
                kind: AlertKind::Stuck,
                ..
            })
        ));

        let (_, v) = evaluate_stuck(&cfg, anchor, here(), t(2000), Some(SegmentPhase::Stopped));
        assert!(matches!(v, Some(Verdict::Clear { .. })));
    }

    #[test]
    fn leaving_the_radius_resets_the_anchor() {
        let cfg = AlertConfig::default();
        let (anchor, _) = evaluate_stuck(&cfg, None, here(), t(0), None);
        let away = GeoPoint::new(12.91, 77.5);
        let (anchor, v) = evaluate_stuck(&cfg, anchor, away, t(2000), None);
        assert!(matches!(v, Some(Verdict::Clear { .. })));
        assert_eq!(anchor.unwrap().since, t(2000));
    }

    #[test]
    fn late_samples_do_not_move_the_anchor() {
        let cfg = AlertConfig::default();
        let (anchor, _) = evaluate_stuck(&cfg, None, here(), t(100), None);
        let (after, v) = evaluate_stuck(&cfg, anchor, GeoPoint::new(13.0, 77.5), t(50), None);
        assert!(v.is_none());
        assert_eq!(after, anchor);
    }

    #[test]
    fn drift_and_signal_thresholds() {
        let cfg = AlertConfig::default();
        assert!(matches!(
            evaluate_clock_drift(&cfg, t(0), t(301)),
            Verdict::Raise { .. }
        ));
        assert!(matches!(
            evaluate_clock_drift(&cfg, t(400), t(200)),
            Verdict::Clear { .. }
        ));
        assert!(matches!(
            evaluate_signal(&cfg, t(0), None, t(901)),
            Verdict::Raise { .. }
        ));
        assert!(matches!(
            evaluate_signal(&cfg, t(0), None, t(900)),
            Verdict::Clear { .. }
        ));
    }

    #[test]
    fn mock_flag_unknown_on_old_payloads() {
        assert!(evaluate_mock(None, here(), t(0)).is_none());
        assert!(matches!(
            evaluate_mock(Some(true), here(), t(0)),
            Some(Verdict::Raise { .. })
        ));
    }
}

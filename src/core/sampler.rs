//! Position sampler: filters provider candidates and paces capture.

use crate::config::SamplerConfig;
use crate::core::geo::{GeoPoint, haversine_distance, implied_speed};
use crate::models::sample::{LocationSample, PositionFix};
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Why a candidate was filtered out. Expected behaviour, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    InvalidCoordinates,
    PoorAccuracy { accuracy: f64, ceiling: f64 },
    OutOfOrder,
    TooSoon { elapsed_secs: i64, minimum_secs: i64 },
    Teleport { speed_mps: f64, ceiling_mps: f64 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InvalidCoordinates => write!(f, "invalid coordinates"),
            RejectReason::PoorAccuracy { accuracy, ceiling } => {
                write!(f, "accuracy {accuracy:.0} m worse than {ceiling:.0} m")
            }
            RejectReason::OutOfOrder => write!(f, "recorded before the last accepted sample"),
            RejectReason::TooSoon {
                elapsed_secs,
                minimum_secs,
            } => write!(f, "only {elapsed_secs}s since last sample (min {minimum_secs}s)"),
            RejectReason::Teleport {
                speed_mps,
                ceiling_mps,
            } => write!(f, "implied speed {speed_mps:.1} m/s above {ceiling_mps:.1} m/s"),
        }
    }
}

impl RejectReason {
    /// Short stable label, used to group rejections in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            RejectReason::InvalidCoordinates => "invalid_coordinates",
            RejectReason::PoorAccuracy { .. } => "poor_accuracy",
            RejectReason::OutOfOrder => "out_of_order",
            RejectReason::TooSoon { .. } => "too_soon",
            RejectReason::Teleport { .. } => "teleport",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Accepted {
    point: GeoPoint,
    recorded_at: DateTime<Utc>,
    moving: bool,
}

/// Per-session sampler state. One instance per active session.
#[derive(Debug, Clone)]
pub struct Sampler {
    cfg: SamplerConfig,
    employee_id: String,
    session_id: String,
    last: Option<Accepted>,
}

impl Sampler {
    pub fn new(cfg: SamplerConfig, employee_id: &str, session_id: &str) -> Self {
        Self {
            cfg,
            employee_id: employee_id.to_string(),
            session_id: session_id.to_string(),
            last: None,
        }
    }

    /// Seed with the last accepted sample after a restart.
    pub fn resume_from(&mut self, last: &LocationSample) {
        self.last = Some(Accepted {
            point: last.point(),
            recorded_at: last.recorded_at,
            moving: last.is_moving,
        });
    }

    /// Decide whether `fix` becomes a sample. On success the sampler advances;
    /// on rejection its state is untouched.
    pub fn evaluate(
        &mut self,
        fix: &PositionFix,
        now: DateTime<Utc>,
    ) -> Result<LocationSample, RejectReason> {
        let point = GeoPoint::new(fix.latitude, fix.longitude);
        if !point.is_valid() || !fix.accuracy.is_finite() || fix.accuracy < 0.0 {
            return Err(RejectReason::InvalidCoordinates);
        }

        if fix.accuracy > self.cfg.max_accuracy_m {
            return Err(RejectReason::PoorAccuracy {
                accuracy: fix.accuracy,
                ceiling: self.cfg.max_accuracy_m,
            });
        }

        let mut displacement = 0.0;
        if let Some(last) = &self.last {
            if fix.recorded_at <= last.recorded_at {
                return Err(RejectReason::OutOfOrder);
            }

            let elapsed = fix.recorded_at - last.recorded_at;
            if elapsed.num_seconds() < self.cfg.min_interval_secs {
                return Err(RejectReason::TooSoon {
                    elapsed_secs: elapsed.num_seconds(),
                    minimum_secs: self.cfg.min_interval_secs,
                });
            }

            let secs = elapsed.num_milliseconds() as f64 / 1000.0;
            let speed = implied_speed(&last.point, &point, secs);
            if speed > self.cfg.teleport_speed_mps {
                return Err(RejectReason::Teleport {
                    speed_mps: speed,
                    ceiling_mps: self.cfg.teleport_speed_mps,
                });
            }
            displacement = haversine_distance(&last.point, &point);
        }

        let moving = fix.speed.unwrap_or(0.0) >= self.cfg.moving_speed_mps
            || displacement >= self.cfg.moving_distance_m;

        self.last = Some(Accepted {
            point,
            recorded_at: fix.recorded_at,
            moving,
        });

        Ok(LocationSample::from_fix(
            &self.employee_id,
            &self.session_id,
            fix,
            moving,
            now,
        ))
    }

    /// Capture interval to request from the provider: short while moving,
    /// long while stationary.
    pub fn next_interval(&self) -> Duration {
        let secs = match &self.last {
            Some(last) if last.moving => self.cfg.moving_interval_secs,
            Some(_) => self.cfg.stationary_interval_secs,
            None => self.cfg.moving_interval_secs,
        };
        Duration::from_secs(secs.max(self.cfg.min_interval_secs).max(1) as u64)
    }
}

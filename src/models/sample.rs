use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Classifier phase at the moment a sample was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentPhase {
    Moving,
    CandidateStop,
    Stopped,
}

impl SegmentPhase {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            SegmentPhase::Moving => "moving",
            SegmentPhase::CandidateStop => "candidate_stop",
            SegmentPhase::Stopped => "stopped",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "moving" => Some(SegmentPhase::Moving),
            "candidate_stop" => Some(SegmentPhase::CandidateStop),
            "stopped" => Some(SegmentPhase::Stopped),
            _ => None,
        }
    }
}

/// Raw candidate delivered by the platform location provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    /// Provider reports the position as synthetic (developer mock location).
    #[serde(default)]
    pub is_mock: bool,
}

impl PositionFix {
    pub fn new(latitude: f64, longitude: f64, accuracy: f64, recorded_at: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
            speed: None,
            altitude: None,
            heading: None,
            recorded_at,
            provider: None,
            address: None,
            is_mock: false,
        }
    }
}

/// Optional metadata only carried by newer payload versions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleMeta {
    pub provider: Option<String>,
    pub address: Option<String>,
    pub is_mock: bool,
    pub phase: Option<SegmentPhase>,
}

/// An accepted position sample, as stored in the local queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    /// Local row id (0 until persisted).
    pub id: i64,
    pub employee_id: String,
    pub session_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub speed: Option<f64>,
    pub altitude: Option<f64>,
    pub heading: Option<f64>,
    pub is_moving: bool,
    pub recorded_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub uploaded: bool,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub hash: String,
    pub meta: SampleMeta,
}

impl LocationSample {
    pub fn from_fix(
        employee_id: &str,
        session_id: &str,
        fix: &PositionFix,
        is_moving: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            employee_id: employee_id.to_string(),
            session_id: session_id.to_string(),
            latitude: fix.latitude,
            longitude: fix.longitude,
            accuracy: fix.accuracy,
            speed: fix.speed,
            altitude: fix.altitude,
            heading: fix.heading,
            is_moving,
            recorded_at: fix.recorded_at,
            created_at,
            uploaded: false,
            attempts: 0,
            last_attempt_at: None,
            hash: sample_hash(employee_id, session_id, fix.latitude, fix.longitude, fix.recorded_at),
            meta: SampleMeta {
                provider: fix.provider.clone(),
                address: fix.address.clone(),
                is_mock: fix.is_mock,
                phase: None,
            },
        }
    }

    pub fn point(&self) -> crate::core::geo::GeoPoint {
        crate::core::geo::GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Coordinates are fingerprinted at 1e-6 degrees (~0.11 m).
const COORD_SCALE: f64 = 1_000_000.0;

/// Deterministic idempotency key of a logical sample.
///
/// Depends only on employee, session, rounded coordinates and recorded time,
/// so every retry of the same capture produces the same value.
pub fn sample_hash(
    employee_id: &str,
    session_id: &str,
    latitude: f64,
    longitude: f64,
    recorded_at: DateTime<Utc>,
) -> String {
    let lat = (latitude * COORD_SCALE).round() as i64;
    let lon = (longitude * COORD_SCALE).round() as i64;

    let mut hasher = Sha256::new();
    hasher.update(employee_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(session_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(lat.to_be_bytes());
    hasher.update(lon.to_be_bytes());
    hasher.update(recorded_at.timestamp_millis().to_be_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn hash_is_stable_and_rounds_coordinates() {
        let a = sample_hash("emp-1", "s-1", 12.9, 77.5, t0());
        let b = sample_hash("emp-1", "s-1", 12.900_000_04, 77.499_999_98, t0());
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn hash_changes_with_identity_fields() {
        let base = sample_hash("emp-1", "s-1", 12.9, 77.5, t0());
        assert_ne!(base, sample_hash("emp-2", "s-1", 12.9, 77.5, t0()));
        assert_ne!(base, sample_hash("emp-1", "s-2", 12.9, 77.5, t0()));
        assert_ne!(base, sample_hash("emp-1", "s-1", 12.9001, 77.5, t0()));
        assert_ne!(
            base,
            sample_hash("emp-1", "s-1", 12.9, 77.5, t0() + chrono::Duration::milliseconds(1))
        );
    }

    #[test]
    fn separator_prevents_field_shifting() {
        assert_ne!(
            sample_hash("emp-1", "s", 0.0, 0.0, t0()),
            sample_hash("emp-", "1s", 0.0, 0.0, t0())
        );
    }
}

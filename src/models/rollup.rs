use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// Incrementally maintained per-session aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRollup {
    pub session_id: String,
    pub employee_id: String,
    pub distance_m: f64,
    pub sample_count: i64,
    pub last_latitude: f64,
    pub last_longitude: f64,
    pub last_recorded_at: DateTime<Utc>,
}

/// Incrementally maintained per-employee, per-local-day aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayRollup {
    pub employee_id: String,
    pub day: NaiveDate,
    pub distance_m: f64,
    pub sample_count: i64,
    pub last_latitude: f64,
    pub last_longitude: f64,
    pub last_recorded_at: DateTime<Utc>,
}

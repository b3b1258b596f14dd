use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
}

impl SessionStatus {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SessionStatus::Active),
            "completed" => Some(SessionStatus::Completed),
            _ => None,
        }
    }
}

/// How a completed session was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Employee ended tracking.
    Ended,
    /// Administrative forced closure.
    Forced,
}

impl CloseReason {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            CloseReason::Ended => "ended",
            CloseReason::Forced => "forced",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "ended" => Some(CloseReason::Ended),
            "forced" => Some(CloseReason::Forced),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: String,
    pub employee_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Sum of move segment distances, metres.
    pub total_distance_m: f64,
    pub status: SessionStatus,
    pub close_reason: Option<CloseReason>,
}

impl Session {
    pub fn new(employee_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            employee_id: employee_id.to_string(),
            started_at,
            ended_at: None,
            total_distance_m: 0.0,
            status: SessionStatus::Active,
            close_reason: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

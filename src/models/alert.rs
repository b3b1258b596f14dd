use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Stuck,
    NoSignal,
    MockLocation,
    ClockDrift,
}

impl AlertKind {
    pub const ALL: [AlertKind; 4] = [
        AlertKind::Stuck,
        AlertKind::NoSignal,
        AlertKind::MockLocation,
        AlertKind::ClockDrift,
    ];

    pub fn to_db_str(&self) -> &'static str {
        match self {
            AlertKind::Stuck => "stuck",
            AlertKind::NoSignal => "no_signal",
            AlertKind::MockLocation => "mock_location",
            AlertKind::ClockDrift => "clock_drift",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.to_db_str() == s)
    }

    /// Severity an alert starts with.
    pub fn initial_severity(&self) -> Severity {
        match self {
            AlertKind::MockLocation => Severity::Critical,
            AlertKind::Stuck | AlertKind::NoSignal => Severity::Warning,
            AlertKind::ClockDrift => Severity::Info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Severity::Info),
            "warning" => Some(Severity::Warning),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }

    pub fn escalated(&self) -> Severity {
        match self {
            Severity::Info => Severity::Warning,
            Severity::Warning | Severity::Critical => Severity::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Open,
    Acknowledged,
    Resolved,
}

impl AlertState {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            AlertState::Open => "open",
            AlertState::Acknowledged => "acknowledged",
            AlertState::Resolved => "resolved",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "open" => Some(AlertState::Open),
            "acknowledged" => Some(AlertState::Acknowledged),
            "resolved" => Some(AlertState::Resolved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: i64,
    pub employee_id: String,
    pub session_id: String,
    pub kind: AlertKind,
    pub severity: Severity,
    pub state: AlertState,
    pub escalated: bool,
    pub opened_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub detail: String,
}

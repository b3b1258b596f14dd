//! Upload wire format.
//!
//! The payload is versioned explicitly. `V1` carries only the core sample
//! fields; `V2` adds provider metadata, the mock flag and the segment phase.
//! A remote that does not understand a version answers with the highest one
//! it supports and the client re-sends a sanitized batch at that version.

use crate::errors::{AppError, AppResult};
use crate::models::sample::{LocationSample, SegmentPhase};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PayloadVersion {
    V1,
    V2,
}

impl PayloadVersion {
    pub const LATEST: PayloadVersion = PayloadVersion::V2;

    pub fn as_u8(self) -> u8 {
        match self {
            PayloadVersion::V1 => 1,
            PayloadVersion::V2 => 2,
        }
    }
}

impl TryFrom<u8> for PayloadVersion {
    type Error = AppError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(PayloadVersion::V1),
            2 => Ok(PayloadVersion::V2),
            other => Err(AppError::InvalidInput(format!(
                "unknown payload version {other}"
            ))),
        }
    }
}

impl From<PayloadVersion> for u8 {
    fn from(v: PayloadVersion) -> u8 {
        v.as_u8()
    }
}

impl fmt::Display for PayloadVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.as_u8())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSample {
    pub hash: String,
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

    // V2 only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_mock: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<SegmentPhase>,
}

impl UploadSample {
    fn from_sample(s: &LocationSample, version: PayloadVersion) -> Self {
        let mut out = Self {
            hash: s.hash.clone(),
            employee_id: s.employee_id.clone(),
            session_id: s.session_id.clone(),
            latitude: s.latitude,
            longitude: s.longitude,
            accuracy: s.accuracy,
            speed: s.speed,
            altitude: s.altitude,
            heading: s.heading,
            is_moving: s.is_moving,
            recorded_at: s.recorded_at,
            provider: s.meta.provider.clone(),
            address: s.meta.address.clone(),
            is_mock: Some(s.meta.is_mock),
            phase: s.meta.phase,
        };
        out.strip_to(version);
        out
    }

    fn strip_to(&mut self, version: PayloadVersion) {
        if version < PayloadVersion::V2 {
            self.provider = None;
            self.address = None;
            self.is_mock = None;
            self.phase = None;
        }
    }

    /// True if the sample carries fields newer than `version`.
    pub fn exceeds(&self, version: PayloadVersion) -> bool {
        version < PayloadVersion::V2
            && (self.provider.is_some()
                || self.address.is_some()
                || self.is_mock.is_some()
                || self.phase.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadBatch {
    pub version: PayloadVersion,
    /// Device clock at send time, compared with server receipt time.
    pub sent_at: DateTime<Utc>,
    pub samples: Vec<UploadSample>,
}

impl UploadBatch {
    pub fn build(samples: &[LocationSample], version: PayloadVersion, sent_at: DateTime<Utc>) -> Self {
        Self {
            version,
            sent_at,
            samples: samples
                .iter()
                .map(|s| UploadSample::from_sample(s, version))
                .collect(),
        }
    }

    /// The same batch with every field newer than `version` removed.
    pub fn sanitized(&self, version: PayloadVersion) -> Self {
        let mut out = self.clone();
        out.version = version.min(self.version);
        for s in &mut out.samples {
            s.strip_to(out.version);
        }
        out
    }

    pub fn hashes(&self) -> Vec<&str> {
        self.samples.iter().map(|s| s.hash.as_str()).collect()
    }

    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> AppResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

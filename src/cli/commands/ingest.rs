//! Feed recorded provider fixes into an employee's active session.
//!
//! Each row goes through the same sampler/classifier path as live capture,
//! so replaying a provider log reproduces the timeline the device would
//! have built.

use crate::cli::parser::{Commands, FixFormat};
use crate::config::Config;
use crate::core::tracker::{CaptureOutcome, Tracker};
use crate::db::log::ttlog;
use crate::db::pool::DbPool;
use crate::errors::{AppError, AppResult};
use crate::models::sample::PositionFix;
use crate::ui::messages::{info, success, warning};
use crate::utils::format_distance;
use crate::utils::time::parse_timestamp;
use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// One input row. Timestamps accept the same formats as `--at`.
#[derive(Debug, Deserialize)]
struct FixRecord {
    latitude: f64,
    longitude: f64,
    accuracy: f64,
    #[serde(default)]
    speed: Option<f64>,
    #[serde(default)]
    altitude: Option<f64>,
    #[serde(default)]
    heading: Option<f64>,
    recorded_at: String,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    is_mock: Option<bool>,
}

impl FixRecord {
    fn into_fix(self) -> AppResult<PositionFix> {
        Ok(PositionFix {
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy: self.accuracy,
            speed: self.speed,
            altitude: self.altitude,
            heading: self.heading,
            recorded_at: parse_timestamp(&self.recorded_at)?,
            provider: self.provider.filter(|p| !p.trim().is_empty()),
            address: self.address.filter(|a| !a.trim().is_empty()),
            is_mock: self.is_mock.unwrap_or(false),
        })
    }
}

fn detect_format(path: &Path) -> AppResult<FixFormat> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => Ok(FixFormat::Csv),
        Some(ext) if ext.eq_ignore_ascii_case("jsonl") || ext.eq_ignore_ascii_case("json") => {
            Ok(FixFormat::Jsonl)
        }
        _ => Err(AppError::InvalidInput(format!(
            "cannot infer input format of {}, use --format",
            path.display()
        ))),
    }
}

fn read_fixes(path: &Path, format: FixFormat) -> AppResult<Vec<PositionFix>> {
    let mut fixes = Vec::new();
    match format {
        FixFormat::Csv => {
            let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
            for rec in rdr.deserialize::<FixRecord>() {
                fixes.push(rec?.into_fix()?);
            }
        }
        FixFormat::Jsonl => {
            let reader = BufReader::new(File::open(path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let rec: FixRecord = serde_json::from_str(&line)?;
                fixes.push(rec.into_fix()?);
            }
        }
    }
    Ok(fixes)
}

pub fn handle(cmd: &Commands, cfg: &Config) -> AppResult<()> {
    if let Commands::Ingest {
        file,
        employee,
        format,
    } = cmd
    {
        let path = Path::new(file);
        let format = match format {
            Some(f) => *f,
            None => detect_format(path)?,
        };
        let fixes = read_fixes(path, format)?;

        let pool = DbPool::new(&cfg.database)?;
        let mut tracker = Tracker::resume(&pool.conn, cfg, employee)?;
        let Some(session_id) = tracker.session().map(|s| s.id.clone()) else {
            return Err(AppError::NoActiveSession(employee.clone()));
        };

        let mut accepted = 0usize;
        let mut rejected: BTreeMap<String, usize> = BTreeMap::new();
        for fix in &fixes {
            match tracker.capture(&pool.conn, fix, Utc::now())? {
                CaptureOutcome::Accepted { .. } => accepted += 1,
                CaptureOutcome::Rejected(reason) => {
                    *rejected.entry(reason.kind().to_string()).or_default() += 1;
                }
            }
        }

        let distance = tracker.session().map_or(0.0, |s| s.total_distance_m);
        success(format!(
            "{} of {} fixes accepted into session {} ({}).",
            accepted,
            fixes.len(),
            session_id,
            format_distance(distance)
        ));
        if rejected.is_empty() {
            info("No fixes rejected.");
        } else {
            for (kind, n) in &rejected {
                warning(format!("{n} rejected: {kind}"));
            }
        }

        if let Err(e) = ttlog(
            &pool.conn,
            "ingest",
            &session_id,
            &format!("{} accepted, {} rejected from {}", accepted, fixes.len() - accepted, file),
        ) {
            warning(format!("Failed to write internal log: {}", e));
        }
    }

    Ok(())
}

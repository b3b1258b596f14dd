use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub mod migrate; // use submodule at src/config/migrate.rs

/// Position sampler thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Candidates with a worse horizontal accuracy are rejected (metres).
    pub max_accuracy_m: f64,
    /// Implied speed above this is treated as a spoofed jump (m/s).
    pub teleport_speed_mps: f64,
    /// Minimum spacing between two accepted samples.
    pub min_interval_secs: i64,
    /// Capture interval while moving.
    pub moving_interval_secs: i64,
    /// Capture interval while stationary.
    pub stationary_interval_secs: i64,
    /// Reported speed at or above which the device counts as moving (m/s).
    pub moving_speed_mps: f64,
    /// Displacement at or above which the device counts as moving (metres).
    pub moving_distance_m: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            max_accuracy_m: 50.0,
            teleport_speed_mps: 70.0,
            min_interval_secs: 5,
            moving_interval_secs: 15,
            stationary_interval_secs: 120,
            moving_speed_mps: 1.0,
            moving_distance_m: 25.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub stop_radius_m: f64,
    pub min_stop_duration_secs: i64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            stop_radius_m: 150.0,
            min_stop_duration_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub batch_size: usize,
    pub max_attempts: u32,
    pub interval_secs: u64,
    /// A claim older than this is considered abandoned (crashed uploader).
    pub claim_ttl_secs: i64,
    /// Highest payload version this client emits.
    pub payload_version: u8,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_attempts: 8,
            interval_secs: 60,
            claim_ttl_secs: 300,
            payload_version: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub stuck_radius_m: f64,
    pub stuck_duration_secs: i64,
    pub signal_timeout_secs: i64,
    pub clock_drift_secs: i64,
    pub escalate_after_secs: i64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            stuck_radius_m: 50.0,
            stuck_duration_secs: 1800,
            signal_timeout_secs: 900,
            clock_drift_secs: 300,
            escalate_after_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub retention_days: i64,
    pub alert_retention_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            alert_retention_days: 180,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub database: String,
    #[serde(default = "default_remote_database")]
    pub remote_database: String,
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

fn default_remote_database() -> String {
    Config::config_dir()
        .join("rfieldtrack-remote.sqlite")
        .to_string_lossy()
        .to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: Self::database_file().to_string_lossy().to_string(),
            remote_database: default_remote_database(),
            utc_offset_minutes: 0,
            sampler: SamplerConfig::default(),
            classifier: ClassifierConfig::default(),
            sync: SyncConfig::default(),
            alerts: AlertConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl Config {
    /// Return the standard configuration directory depending on the platform
    pub fn config_dir() -> PathBuf {
        if cfg!(target_os = "windows") {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("rfieldtrack")
        } else {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".rfieldtrack")
        }
    }

    /// Return the full path of the config file
    pub fn config_file() -> PathBuf {
        Self::config_dir().join("rfieldtrack.conf")
    }

    /// Return the full path of the on-device SQLite database
    pub fn database_file() -> PathBuf {
        Self::config_dir().join("rfieldtrack.sqlite")
    }

    /// Load configuration from the standard file, or return defaults if not found
    pub fn load() -> AppResult<Self> {
        Self::load_from(&Self::config_file())
    }

    pub fn load_from(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would make the engine misbehave silently.
    pub fn validate(&self) -> AppResult<()> {
        let checks = [
            (self.sampler.max_accuracy_m > 0.0, "sampler.max_accuracy_m must be > 0"),
            (self.sampler.teleport_speed_mps > 0.0, "sampler.teleport_speed_mps must be > 0"),
            (self.sampler.min_interval_secs >= 0, "sampler.min_interval_secs must be >= 0"),
            (self.classifier.stop_radius_m > 0.0, "classifier.stop_radius_m must be > 0"),
            (
                self.classifier.min_stop_duration_secs > 0,
                "classifier.min_stop_duration_secs must be > 0",
            ),
            (self.sync.batch_size > 0, "sync.batch_size must be > 0"),
            (self.sync.max_attempts > 0, "sync.max_attempts must be > 0"),
            (
                matches!(self.sync.payload_version, 1 | 2),
                "sync.payload_version must be 1 or 2",
            ),
            (self.alerts.stuck_radius_m > 0.0, "alerts.stuck_radius_m must be > 0"),
            (self.retention.retention_days > 0, "retention.retention_days must be > 0"),
            (
                self.retention.alert_retention_days >= self.retention.retention_days,
                "retention.alert_retention_days must be >= retention.retention_days",
            ),
            (
                (-14 * 60..=14 * 60).contains(&self.utc_offset_minutes),
                "utc_offset_minutes must be within +/- 14h",
            ),
        ];

        for (ok, msg) in checks {
            if !ok {
                return Err(AppError::Config(msg.to_string()));
            }
        }
        Ok(())
    }

    /// Initialize configuration and database files
    pub fn init_all(custom_db: Option<String>, is_test: bool) -> AppResult<Self> {
        let dir = Self::config_dir();
        fs::create_dir_all(&dir)?;

        let db_path = match custom_db {
            Some(name) => {
                let p = Path::new(&name);
                if p.is_absolute() {
                    p.to_path_buf()
                } else {
                    dir.join(p)
                }
            }
            None => Self::database_file(),
        };

        let config = Config {
            database: db_path.to_string_lossy().to_string(),
            ..Config::default()
        };

        // Write config file
        if !is_test {
            let yaml = serde_yaml::to_string(&config)?;
            let mut file = fs::File::create(Self::config_file())?;
            file.write_all(yaml.as_bytes())?;
            println!("✅ Config file: {:?}", Self::config_file());
        }

        println!("✅ Database:    {:?}", db_path);

        Ok(config)
    }
}

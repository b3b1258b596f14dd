//! Configuration file upgrades.
//!
//! Older config files lack the sections added in later releases. Loading still
//! works (every section has serde defaults), but `config --check` reports the
//! gaps and `config --migrate` writes the defaults back into the file, keeping
//! every value the user already set.

use super::Config;
use crate::errors::{AppError, AppResult};
use crate::ui::messages::{info, success};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::Path;

fn defaults_as_yaml() -> AppResult<Value> {
    Ok(serde_yaml::to_value(Config::default())?)
}

fn collect_missing(prefix: &str, defaults: &Mapping, actual: &Mapping, out: &mut Vec<String>) {
    for (key, default_val) in defaults {
        let Some(name) = key.as_str() else { continue };
        let path = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}.{name}")
        };

        match (actual.get(key), default_val) {
            (None, _) => out.push(path),
            (Some(Value::Mapping(a)), Value::Mapping(d)) => collect_missing(&path, d, a, out),
            _ => {}
        }
    }
}

/// Keys present in the default config but absent from `content`, dotted.
pub fn missing_keys(content: &str) -> AppResult<Vec<String>> {
    let actual: Value = serde_yaml::from_str(content)?;
    let Value::Mapping(actual) = actual else {
        return Err(AppError::Config("configuration root is not a mapping".into()));
    };
    let Value::Mapping(defaults) = defaults_as_yaml()? else {
        return Err(AppError::Other("default configuration is not a mapping".into()));
    };

    let mut out = Vec::new();
    collect_missing("", &defaults, &actual, &mut out);
    Ok(out)
}

fn merge_missing(defaults: &Mapping, actual: &mut Mapping) {
    for (key, default_val) in defaults {
        match actual.get_mut(key) {
            None => {
                actual.insert(key.clone(), default_val.clone());
            }
            Some(Value::Mapping(a)) => {
                if let Value::Mapping(d) = default_val {
                    merge_missing(d, a);
                }
            }
            Some(_) => {}
        }
    }
}

/// Fill missing keys in the config file with defaults.
///   Returns:
///   Ok(true)  → config updated
///   Ok(false) → no change needed
pub fn migrate_config_file(path: &Path) -> AppResult<bool> {
    if !path.exists() {
        info(format!("No configuration file at {:?}, nothing to migrate.", path));
        return Ok(false);
    }

    let content = fs::read_to_string(path)?;
    let missing = missing_keys(&content)?;
    if missing.is_empty() {
        return Ok(false);
    }

    let mut actual: Value = serde_yaml::from_str(&content)?;
    let (Value::Mapping(actual_map), Value::Mapping(defaults)) =
        (&mut actual, defaults_as_yaml()?)
    else {
        return Err(AppError::Config("configuration root is not a mapping".into()));
    };
    merge_missing(&defaults, actual_map);

    // must still deserialize cleanly before we overwrite anything
    let merged: Config = serde_yaml::from_value(actual.clone())?;
    merged.validate()?;

    fs::write(path, serde_yaml::to_string(&actual)?)?;
    success(format!(
        "Configuration migrated, added {} key(s): {}",
        missing.len(),
        missing.join(", ")
    ));
    Ok(true)
}

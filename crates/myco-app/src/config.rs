//! Layered settings: device-class defaults, then a JSON file, then `--set`
//! knobs. Every layer goes through the same checked merge so a typo in a
//! path or a mismatched type is reported instead of silently ignored.

use std::fs;
use std::path::Path;

use myco_core::{DeviceClass, Settings};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("{0}")]
    InvalidPatch(String),
    #[error("unknown settings path: {0}")]
    UnknownPath(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },
    #[error(transparent)]
    Rejected(#[from] myco_core::ConfigError),
}

impl ConfigLoadError {
    fn serialization(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Builds settings for `class`, overlays `file` and the `knobs`, and validates
/// the result.
pub fn load_settings(
    class: DeviceClass,
    file: Option<&Path>,
    knobs: &[String],
) -> Result<Settings, ConfigLoadError> {
    let mut settings = Settings::for_device(class);
    if let Some(path) = file {
        let text = fs::read_to_string(path).map_err(|e| ConfigLoadError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let patch: Value = serde_json::from_str(&text).map_err(ConfigLoadError::serialization)?;
        settings = apply_patch(&settings, &patch)?;
    }
    if !knobs.is_empty() {
        let mut patch = Map::new();
        for knob in knobs {
            let (path, raw) = knob.split_once('=').ok_or_else(|| {
                ConfigLoadError::InvalidPatch(format!("expected PATH=VALUE, got `{knob}`"))
            })?;
            // Bare words that are not JSON are taken as strings.
            let value = serde_json::from_str(raw.trim())
                .unwrap_or_else(|_| Value::String(raw.trim().to_owned()));
            insert_path(&mut patch, path.trim(), value)?;
        }
        settings = apply_patch(&settings, &Value::Object(patch))?;
    }
    settings.validate()?;
    Ok(settings)
}

/// Merges a JSON object into `base` and deserializes the result.
pub fn apply_patch(base: &Settings, patch: &Value) -> Result<Settings, ConfigLoadError> {
    if !patch.is_object() {
        return Err(ConfigLoadError::InvalidPatch(
            "settings patch must be a JSON object".into(),
        ));
    }
    let mut merged = serde_json::to_value(base).map_err(ConfigLoadError::serialization)?;
    let mut path = Vec::new();
    merge_value(&mut merged, patch, &mut path)?;
    serde_json::from_value(merged).map_err(ConfigLoadError::serialization)
}

fn insert_path(
    map: &mut Map<String, Value>,
    path: &str,
    value: Value,
) -> Result<(), ConfigLoadError> {
    let mut segments = path.split('.').filter(|s| !s.is_empty()).peekable();
    let mut cur = map;
    while let Some(seg) = segments.next() {
        if segments.peek().is_none() {
            cur.insert(seg.to_owned(), value);
            return Ok(());
        }
        let entry = cur
            .entry(seg.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        cur = entry.as_object_mut().ok_or_else(|| {
            ConfigLoadError::InvalidPatch(format!("intermediate segment '{seg}' is not an object"))
        })?;
    }
    Err(ConfigLoadError::InvalidPatch("empty settings path".into()))
}

fn mismatch(path: &[&str]) -> ConfigLoadError {
    ConfigLoadError::InvalidPatch(format!("type mismatch at {}", path.join(".")))
}

fn merge_value<'a>(
    target: &mut Value,
    patch: &'a Value,
    path: &mut Vec<&'a str>,
) -> Result<(), ConfigLoadError> {
    match target {
        Value::Object(target_map) => {
            let Value::Object(patch_map) = patch else {
                return Err(mismatch(path));
            };
            for (key, patch_value) in patch_map {
                path.push(key);
                let Some(target_value) = target_map.get_mut(key) else {
                    return Err(ConfigLoadError::UnknownPath(path.join(".")));
                };
                merge_value(target_value, patch_value, path)?;
                path.pop();
            }
            Ok(())
        }
        // Optional values (`rng_seed`, `dla.max_aggregate`) accept anything.
        Value::Null => {
            *target = patch.clone();
            Ok(())
        }
        Value::Number(_) => match patch {
            Value::Number(_) | Value::Null => {
                *target = patch.clone();
                Ok(())
            }
            Value::String(s) => {
                let parsed: f64 = s
                    .trim()
                    .parse()
                    .map_err(|_| ConfigLoadError::InvalidPatch(path.join(".")))?;
                *target = if parsed.fract() == 0.0 && parsed >= 0.0 && target.is_u64() {
                    Value::from(parsed as u64)
                } else {
                    serde_json::Number::from_f64(parsed)
                        .map(Value::Number)
                        .ok_or_else(|| ConfigLoadError::InvalidPatch(path.join(".")))?
                };
                Ok(())
            }
            _ => Err(mismatch(path)),
        },
        Value::Bool(_) => match patch {
            Value::Bool(_) => {
                *target = patch.clone();
                Ok(())
            }
            Value::String(s) => {
                let flag = s
                    .trim()
                    .parse::<bool>()
                    .map_err(|_| ConfigLoadError::InvalidPatch(path.join(".")))?;
                *target = Value::Bool(flag);
                Ok(())
            }
            _ => Err(mismatch(path)),
        },
        Value::String(_) => match patch {
            Value::String(_) => {
                *target = patch.clone();
                Ok(())
            }
            _ => Err(mismatch(path)),
        },
        Value::Array(_) => match patch {
            Value::Array(_) => {
                *target = patch.clone();
                Ok(())
            }
            _ => Err(mismatch(path)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use myco_core::{Algorithm, SlimeSpawn, SpawnStrategy};
    use serde_json::json;

    #[test]
    fn file_patch_overlays_device_defaults() {
        let mobile = Settings::for_device(DeviceClass::Mobile);
        let patched = apply_patch(
            &mobile,
            &json!({ "algorithm": "slime", "slime": { "spawn_mode": "uniform" } }),
        )
        .expect("patch");
        assert_eq!(patched.algorithm, Algorithm::Slime);
        assert_eq!(patched.slime.spawn_mode, SlimeSpawn::Uniform);
        assert_eq!(patched.walkers, mobile.walkers, "untouched fields keep mobile values");
    }

    #[test]
    fn unknown_paths_are_rejected() {
        let err = apply_patch(&Settings::default(), &json!({ "dla": { "sticky": 3 } }))
            .expect_err("unknown path");
        assert!(matches!(err, ConfigLoadError::UnknownPath(path) if path == "dla.sticky"));
    }

    #[test]
    fn type_mismatch_is_reported() {
        let err = apply_patch(&Settings::default(), &json!({ "walkers": "lots" }))
            .expect_err("mismatch");
        assert!(matches!(err, ConfigLoadError::InvalidPatch(_)));
    }

    #[test]
    fn knobs_parse_json_or_bare_words() {
        let knobs = vec![
            "walkers=64".to_owned(),
            "rng_seed=7".to_owned(),
            "dla.spawn=annulus".to_owned(),
            "dla.adaptive.enabled=false".to_owned(),
        ];
        let settings = load_settings(DeviceClass::Desktop, None, &knobs).expect("settings");
        assert_eq!(settings.walkers, 64);
        assert_eq!(settings.rng_seed, Some(7));
        assert_eq!(settings.dla.spawn, SpawnStrategy::Annulus);
        assert!(!settings.dla.adaptive.enabled);
    }

    #[test]
    fn invalid_values_fail_validation() {
        let knobs = vec!["walkers=0".to_owned()];
        let err = load_settings(DeviceClass::Desktop, None, &knobs).expect_err("invalid");
        assert!(matches!(err, ConfigLoadError::Rejected(_)));
        let err = load_settings(DeviceClass::Desktop, None, &["walkers".to_owned()])
            .expect_err("no equals");
        assert!(matches!(err, ConfigLoadError::InvalidPatch(_)));
    }
}

//! Preset files and `name=value` overrides

use super::HParams;
use crate::error::{Error, Result};
use serde_json::Value;
use std::path::Path;

/// Load a preset from JSON or YAML (chosen by extension); unnamed fields keep defaults
pub fn load_preset(path: &Path) -> Result<HParams> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::io(format!("reading preset {}", path.display()), e))?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    );
    if is_yaml {
        serde_yaml::from_str(&text)
            .map_err(|e| Error::ConfigError(format!("preset {}: {e}", path.display())))
    } else {
        serde_json::from_str(&text)
            .map_err(|e| Error::ConfigError(format!("preset {}: {e}", path.display())))
    }
}

/// Apply a comma-separated list of `name=value` overrides.
///
/// Values are read as JSON when they parse (`0.5`, `true`, `[10,10]`,
/// `null`, `{"kind":"noam"}`) and as bare strings otherwise. Commas inside
/// brackets or braces do not split. Unknown names are rejected.
pub fn apply_overrides(hparams: &HParams, overrides: &str) -> Result<HParams> {
    let mut value = serde_json::to_value(hparams).map_err(|e| Error::Serialization(e.to_string()))?;
    let Value::Object(fields) = &mut value else {
        return Err(Error::Serialization("hparams did not serialize to an object".into()));
    };

    for item in split_top_level(overrides) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (name, raw) = item
            .split_once('=')
            .ok_or_else(|| Error::ConfigError(format!("override '{item}' is not name=value")))?;
        let name = name.trim();
        let raw = raw.trim();
        let Some(slot) = fields.get_mut(name) else {
            return Err(Error::ConfigError(format!("unknown hyperparameter '{name}'")));
        };
        *slot = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    }

    serde_json::from_value(value).map_err(|e| Error::ConfigError(format!("invalid override: {e}")))
}

fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '[' | '{' => depth += 1,
            ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputType;
    use crate::optim::LrSchedule;
    use tempfile::tempdir;

    #[test]
    fn test_overrides_parse_typed_values() {
        let hp = apply_overrides(
            &HParams::default(),
            "batch_size=8, amsgrad=true,input_type=mulaw,iaf_layers=[2,3],max_time_steps=null",
        )
        .unwrap();
        assert_eq!(hp.batch_size, 8);
        assert!(hp.amsgrad);
        assert_eq!(hp.input_type, InputType::Mulaw);
        assert_eq!(hp.iaf_layers, vec![2, 3]);
        assert_eq!(hp.max_time_steps, None);
    }

    #[test]
    fn test_override_nested_schedule() {
        let hp = apply_overrides(
            &HParams::default(),
            r#"lr_schedule={"kind":"step_decay","anneal_rate":0.5,"anneal_interval":100}"#,
        )
        .unwrap();
        assert_eq!(
            hp.lr_schedule,
            LrSchedule::StepDecay { anneal_rate: 0.5, anneal_interval: 100 }
        );
    }

    #[test]
    fn test_unknown_override_is_rejected() {
        let err = apply_overrides(&HParams::default(), "no_such_field=1").unwrap_err();
        assert!(err.to_string().contains("no_such_field"));
        assert!(apply_overrides(&HParams::default(), "batch_size").is_err());
        assert!(apply_overrides(&HParams::default(), "batch_size=lots").is_err());
    }

    #[test]
    fn test_empty_override_string_is_identity() {
        assert_eq!(apply_overrides(&HParams::default(), "").unwrap(), HParams::default());
    }

    #[test]
    fn test_load_json_and_yaml_presets() {
        let dir = tempdir().unwrap();
        let json = dir.path().join("preset.json");
        std::fs::write(&json, r#"{"sample_rate": 16000, "hop_size": 200}"#).unwrap();
        let hp = load_preset(&json).unwrap();
        assert_eq!(hp.sample_rate, 16000);
        assert_eq!(hp.hop_size, 200);
        assert_eq!(hp.batch_size, HParams::default().batch_size);

        let yaml = dir.path().join("preset.yaml");
        std::fs::write(&yaml, "residual_channels: 8\nlr_schedule:\n  kind: constant\n").unwrap();
        let hp = load_preset(&yaml).unwrap();
        assert_eq!(hp.residual_channels, 8);
        assert_eq!(hp.lr_schedule, LrSchedule::Constant);

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, r#"{"not_a_field": 1}"#).unwrap();
        assert!(matches!(load_preset(&bad), Err(Error::ConfigError(_))));
    }
}

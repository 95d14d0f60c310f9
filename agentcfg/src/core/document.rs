//! Structured document helpers for managed blocks in JSON and TOML configs.
//!
//! A managed block is the subset of a config file written by agentcfg. Merge
//! writes it over whatever the user has; prune removes it again, but only when
//! every managed leaf still holds the value agentcfg wrote.
//!
//! Parsing is strict: absent or whitespace-only input is an empty document,
//! anything else that fails to parse is a [`EngineError::Transform`].

use std::path::Path;

use serde_json::{Map, Value};

use crate::error::EngineError;

/// Parse a JSON object, treating absent or blank content as `{}`.
pub fn parse_json_object(
    path: &Path,
    content: Option<&str>,
) -> Result<Map<String, Value>, EngineError> {
    let Some(raw) = content.filter(|raw| !raw.trim().is_empty()) else {
        return Ok(Map::new());
    };
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| EngineError::transform(path, format!("parse json: {err}")))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(EngineError::transform(
            path,
            format!("expected a JSON object, found {}", json_type(&other)),
        )),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Deep-merge `patch` into `target`. Objects merge key by key; every other
/// value replaces what was there.
pub fn merge_json(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_json(existing, incoming);
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// True when every leaf of `managed` is present in `doc` with the same value.
pub fn json_contains(doc: &Map<String, Value>, managed: &Map<String, Value>) -> bool {
    managed.iter().all(|(key, expected)| match (doc.get(key), expected) {
        (Some(Value::Object(actual)), Value::Object(expected)) => json_contains(actual, expected),
        (Some(actual), expected) => actual == expected,
        (None, _) => false,
    })
}

/// Remove the managed block from `doc`.
///
/// Returns `false` and leaves `doc` untouched unless every managed leaf still
/// matches. Objects emptied by the removal are dropped as well.
pub fn prune_json(doc: &mut Map<String, Value>, managed: &Map<String, Value>) -> bool {
    if managed.is_empty() || !json_contains(doc, managed) {
        return false;
    }
    remove_json_leaves(doc, managed);
    true
}

fn remove_json_leaves(doc: &mut Map<String, Value>, managed: &Map<String, Value>) {
    for (key, expected) in managed {
        let emptied = match (doc.get_mut(key), expected) {
            (Some(Value::Object(actual)), Value::Object(expected)) => {
                remove_json_leaves(actual, expected);
                actual.is_empty()
            }
            _ => true,
        };
        if emptied {
            doc.remove(key);
        }
    }
}

/// Pretty JSON with a trailing newline.
pub fn to_json_string(path: &Path, doc: &Map<String, Value>) -> Result<String, EngineError> {
    let mut buf = serde_json::to_string_pretty(doc)
        .map_err(|err| EngineError::transform(path, format!("serialize json: {err}")))?;
    buf.push('\n');
    Ok(buf)
}

/// Parse a TOML table, treating absent or blank content as empty.
pub fn parse_toml_table(path: &Path, content: Option<&str>) -> Result<toml::Table, EngineError> {
    let Some(raw) = content.filter(|raw| !raw.trim().is_empty()) else {
        return Ok(toml::Table::new());
    };
    toml::from_str(raw).map_err(|err| EngineError::transform(path, format!("parse toml: {err}")))
}

/// Deep-merge `patch` into `target`, tables key by key.
pub fn merge_toml(target: &mut toml::Table, patch: &toml::Table) {
    for (key, value) in patch {
        match (target.get_mut(key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_toml(existing, incoming);
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

pub fn toml_contains(doc: &toml::Table, managed: &toml::Table) -> bool {
    managed.iter().all(|(key, expected)| match (doc.get(key), expected) {
        (Some(toml::Value::Table(actual)), toml::Value::Table(expected)) => {
            toml_contains(actual, expected)
        }
        (Some(actual), expected) => actual == expected,
        (None, _) => false,
    })
}

/// TOML counterpart of [`prune_json`].
pub fn prune_toml(doc: &mut toml::Table, managed: &toml::Table) -> bool {
    if managed.is_empty() || !toml_contains(doc, managed) {
        return false;
    }
    remove_toml_leaves(doc, managed);
    true
}

fn remove_toml_leaves(doc: &mut toml::Table, managed: &toml::Table) {
    for (key, expected) in managed {
        let emptied = match (doc.get_mut(key), expected) {
            (Some(toml::Value::Table(actual)), toml::Value::Table(expected)) => {
                remove_toml_leaves(actual, expected);
                actual.is_empty()
            }
            _ => true,
        };
        if emptied {
            doc.remove(key);
        }
    }
}

pub fn to_toml_string(path: &Path, doc: &toml::Table) -> Result<String, EngineError> {
    toml::to_string_pretty(doc)
        .map_err(|err| EngineError::transform(path, format!("serialize toml: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn blank_and_absent_json_parse_as_empty() {
        let path = Path::new("/h/settings.json");
        assert!(parse_json_object(path, None).expect("absent").is_empty());
        assert!(parse_json_object(path, Some("  \n")).expect("blank").is_empty());
    }

    #[test]
    fn invalid_json_is_a_transform_error() {
        let err = parse_json_object(Path::new("/h/settings.json"), Some("{ nope")).unwrap_err();
        assert!(matches!(err, EngineError::Transform { .. }));
        let err = parse_json_object(Path::new("/h/settings.json"), Some("[1]")).unwrap_err();
        assert!(err.to_string().contains("found array"));
    }

    #[test]
    fn merge_keeps_user_keys_and_overrides_managed_ones() {
        let mut doc = object(json!({
            "theme": "dark",
            "env": { "FOO": "1", "ANTHROPIC_BASE_URL": "https://old" }
        }));
        merge_json(
            &mut doc,
            &object(json!({ "env": { "ANTHROPIC_BASE_URL": "https://new" } })),
        );
        assert_eq!(
            Value::Object(doc),
            json!({
                "theme": "dark",
                "env": { "FOO": "1", "ANTHROPIC_BASE_URL": "https://new" }
            })
        );
    }

    #[test]
    fn prune_removes_matching_block_and_empty_parents() {
        let managed = object(json!({ "env": { "ANTHROPIC_BASE_URL": "https://x" }, "model": "m" }));
        let mut doc = object(json!({
            "theme": "dark",
            "env": { "ANTHROPIC_BASE_URL": "https://x" },
            "model": "m"
        }));
        assert!(prune_json(&mut doc, &managed));
        assert_eq!(Value::Object(doc), json!({ "theme": "dark" }));
    }

    #[test]
    fn prune_refuses_when_a_field_was_hand_edited() {
        let managed = object(json!({ "env": { "ANTHROPIC_BASE_URL": "https://x" }, "model": "m" }));
        let original = json!({
            "env": { "ANTHROPIC_BASE_URL": "https://x" },
            "model": "edited-by-hand"
        });
        let mut doc = object(original.clone());
        assert!(!prune_json(&mut doc, &managed));
        assert_eq!(Value::Object(doc), original);
    }

    #[test]
    fn toml_merge_and_prune_are_symmetric() {
        let path = Path::new("/h/.codex/config.toml");
        let mut doc = parse_toml_table(path, Some("approval_policy = \"never\"\n")).expect("parse");
        let managed: toml::Table = toml::from_str(
            "model_provider = \"poe\"\n[model_providers.poe]\nbase_url = \"https://x\"\n",
        )
        .expect("managed");

        merge_toml(&mut doc, &managed);
        assert!(toml_contains(&doc, &managed));
        assert!(prune_toml(&mut doc, &managed));
        assert_eq!(to_toml_string(path, &doc).expect("render"), "approval_policy = \"never\"\n");
    }

    #[test]
    fn invalid_toml_is_a_transform_error() {
        let err = parse_toml_table(Path::new("/h/config.toml"), Some("= broken")).unwrap_err();
        assert!(err.to_string().contains("parse toml"));
    }
}

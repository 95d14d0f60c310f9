//! Manifests for the integrated tools, plus the managed-block transforms they
//! share.

mod claude_code;
mod codex;
mod opencode;

use std::path::Path;

use serde_json::{Map, Value};
use tracing::debug;

use crate::core::document::{
    merge_toml, parse_json_object, parse_toml_table, prune_json, prune_toml, to_json_string,
    to_toml_string, toml_contains,
};
use crate::error::EngineError;
use crate::io::templates::GENERATED_MARKER;
use crate::mutation::{Manifest, TransformOutput};
use crate::prerequisites::{InstallCommand, InstallDefinition};

/// Ids of every known service, in display order.
pub const SERVICE_IDS: [&str; 3] = [claude_code::ID, codex::ID, opencode::ID];

/// Every known manifest, in display order.
pub fn all() -> Vec<Manifest> {
    vec![claude_code::manifest(), codex::manifest(), opencode::manifest()]
}

/// Look a manifest up by id.
pub fn find(id: &str) -> Result<Manifest, EngineError> {
    match id {
        claude_code::ID => Ok(claude_code::manifest()),
        codex::ID => Ok(codex::manifest()),
        opencode::ID => Ok(opencode::manifest()),
        other => Err(EngineError::UnknownService(other.to_string())),
    }
}

/// Deterministic prompt for health checks.
fn exact_output_prompt(token: &str) -> String {
    format!("Output exactly: {token}")
}

fn npm_install(id: &str, summary: &str, binary: &str, package: &str) -> InstallDefinition {
    InstallDefinition {
        id: id.to_string(),
        summary: summary.to_string(),
        binary: binary.to_string(),
        steps: vec![InstallCommand::new("npm", &["install", "-g", package])],
    }
}

/// Strip `managed` from a JSON config. The file is deleted when nothing else
/// is left in it, and left alone when any managed leaf was edited.
fn prune_json_file(
    target: &Path,
    current: Option<&str>,
    managed: &Map<String, Value>,
) -> Result<TransformOutput, EngineError> {
    let Some(raw) = current else {
        return Ok(TransformOutput::unchanged(None));
    };
    let mut doc = parse_json_object(target, Some(raw))?;
    if !prune_json(&mut doc, managed) {
        debug!(target = %target.display(), "managed block not found or edited; leaving file");
        return Ok(TransformOutput::unchanged(Some(raw)));
    }
    if doc.is_empty() {
        return Ok(TransformOutput::delete());
    }
    Ok(TransformOutput::write(to_json_string(target, &doc)?))
}

/// Merge `block` into a TOML config unless it is already there.
fn merge_toml_file(
    target: &Path,
    current: Option<&str>,
    block: &toml::Table,
) -> Result<TransformOutput, EngineError> {
    let mut doc = parse_toml_table(target, current)?;
    if current.is_some() && toml_contains(&doc, block) {
        return Ok(TransformOutput::unchanged(current));
    }
    merge_toml(&mut doc, block);
    Ok(TransformOutput::write(to_toml_string(target, &doc)?))
}

/// TOML counterpart of [`prune_json_file`].
fn prune_toml_file(
    target: &Path,
    current: Option<&str>,
    managed: &toml::Table,
) -> Result<TransformOutput, EngineError> {
    let Some(raw) = current else {
        return Ok(TransformOutput::unchanged(None));
    };
    let mut doc = parse_toml_table(target, Some(raw))?;
    if !prune_toml(&mut doc, managed) {
        debug!(target = %target.display(), "managed block not found or edited; leaving file");
        return Ok(TransformOutput::unchanged(Some(raw)));
    }
    if doc.is_empty() {
        return Ok(TransformOutput::delete());
    }
    Ok(TransformOutput::write(to_toml_string(target, &doc)?))
}

/// Delete a file agentcfg generated. Anything without the marker is kept.
fn remove_generated_file(current: Option<&str>) -> TransformOutput {
    match current {
        Some(raw) if raw.contains(GENERATED_MARKER) => TransformOutput::delete(),
        other => TransformOutput::unchanged(other),
    }
}

/// `serde_json::json!` object literal as a map; any other value is empty.
fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::options;
    use serde_json::json;
    use std::path::PathBuf;

    #[test]
    fn every_manifest_is_valid_and_findable() {
        for manifest in all() {
            manifest.validate().expect("valid manifest");
            assert_eq!(find(&manifest.id).expect("find").id, manifest.id);
            assert!(SERVICE_IDS.contains(&manifest.id.as_str()));
            assert!(!manifest.backup_targets(&options("/h")).is_empty());
        }
    }

    #[test]
    fn unknown_service_is_an_error() {
        let err = find("roo").unwrap_err();
        assert!(matches!(err, EngineError::UnknownService(ref id) if id == "roo"));
    }

    #[test]
    fn prune_keeps_user_fields_and_deletes_emptied_files() {
        let target = PathBuf::from("/h/settings.json");
        let managed = object(json!({ "env": { "BASE": "x" }, "model": "m" }));

        let shared = r#"{"env": {"BASE": "x", "OTHER": "1"}, "model": "m", "theme": "dark"}"#;
        let output = prune_json_file(&target, Some(shared), &managed).expect("prune");
        let remaining: Value =
            serde_json::from_str(output.content.as_deref().expect("content")).expect("json");
        assert_eq!(remaining, json!({ "env": { "OTHER": "1" }, "theme": "dark" }));

        let only_ours = r#"{"env": {"BASE": "x"}, "model": "m"}"#;
        let output = prune_json_file(&target, Some(only_ours), &managed).expect("prune");
        assert_eq!(output, TransformOutput::delete());

        let edited = r#"{"env": {"BASE": "x"}, "model": "mine"}"#;
        let output = prune_json_file(&target, Some(edited), &managed).expect("prune");
        assert_eq!(output, TransformOutput::unchanged(Some(edited)));
    }

    #[test]
    fn generated_files_are_only_removed_with_marker() {
        assert_eq!(
            remove_generated_file(Some("#!/bin/sh\n# Generated by agentcfg.\n")),
            TransformOutput::delete()
        );
        assert_eq!(
            remove_generated_file(Some("#!/bin/sh\necho mine\n")),
            TransformOutput::unchanged(Some("#!/bin/sh\necho mine\n"))
        );
        assert_eq!(remove_generated_file(None), TransformOutput::unchanged(None));
    }
}

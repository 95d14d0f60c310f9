//! Claude Code: `~/.claude/settings.json` points the CLI at the provider and
//! reads the key from a generated helper script.

use std::path::PathBuf;

use serde_json::{Map, Value, json};
use tracing::debug;

use super::{exact_output_prompt, npm_install, object, prune_json_file, remove_generated_file};
use crate::core::document::parse_json_object;
use crate::error::EngineError;
use crate::io::fs::read_optional;
use crate::io::templates::API_KEY_HELPER;
use crate::mutation::{
    Manifest, Mutation, PrerequisiteSet, ServiceOptions, TransformContext, TransformOutput,
};
use crate::prerequisites::{binary_exists_check, health_check};

pub const ID: &str = "claude-code";
const BINARY: &str = "claude";
const HEALTH_TOKEN: &str = "CLAUDE_CODE_OK";

fn config_dir(options: &ServiceOptions) -> PathBuf {
    options.home.join(".claude")
}

fn settings_path(options: &ServiceOptions) -> PathBuf {
    config_dir(options).join("settings.json")
}

fn helper_path(options: &ServiceOptions) -> PathBuf {
    config_dir(options).join("agentcfg-api-key.sh")
}

/// Claude Code talks the Anthropic wire format and appends `/v1` itself.
fn anthropic_base_url(base_url: &str) -> &str {
    let trimmed = base_url.trim_end_matches('/');
    trimmed.strip_suffix("/v1").unwrap_or(trimmed)
}

fn managed_settings(options: &ServiceOptions) -> Map<String, Value> {
    object(json!({
        "apiKeyHelper": helper_path(options).to_string_lossy(),
        "env": {
            "ANTHROPIC_BASE_URL": anthropic_base_url(&options.base_url),
        },
        "model": options.model,
    }))
}

/// True while settings.json, as left by the earlier steps of this run,
/// still points `apiKeyHelper` at the generated script.
fn settings_use_helper(ctx: &TransformContext<'_>) -> Result<bool, EngineError> {
    let path = settings_path(ctx.options);
    let Some(raw) = read_optional(ctx.fs, &path)? else {
        return Ok(false);
    };
    let settings = parse_json_object(&path, Some(&raw))?;
    let helper = ctx.target.to_string_lossy();
    Ok(settings.get("apiKeyHelper").and_then(Value::as_str) == Some(helper.as_ref()))
}

pub fn manifest() -> Manifest {
    let install = npm_install(ID, "Claude Code", BINARY, "@anthropic-ai/claude-code");
    Manifest {
        id: ID.to_string(),
        summary: "Claude Code CLI".to_string(),
        prerequisites: PrerequisiteSet {
            before: vec![binary_exists_check(install.check_id(), BINARY)],
            after: vec![health_check(
                "claude-code-health",
                "Claude Code answers through the provider",
                BINARY,
                vec!["-p".to_string(), exact_output_prompt(HEALTH_TOKEN)],
                HEALTH_TOKEN,
            )],
        },
        install: Some(install),
        configure: vec![
            Mutation::ensure_directory("Create ~/.claude", config_dir),
            Mutation::create_backup("Back up settings.json", settings_path),
            Mutation::write_template(
                "Write API key helper",
                helper_path,
                API_KEY_HELPER,
                |options| json!({ "service": ID, "api_key": options.api_key }),
            )
            .with_mode(0o700),
            Mutation::json_merge("Merge provider settings", settings_path, |options| {
                Value::Object(managed_settings(options))
            }),
        ],
        remove: vec![
            Mutation::create_backup("Back up settings.json", settings_path),
            Mutation::transform_file("Remove provider settings", settings_path, |current, ctx| {
                prune_json_file(ctx.target, current, &managed_settings(ctx.options))
            }),
            Mutation::transform_file("Remove API key helper", helper_path, |current, ctx| {
                if settings_use_helper(ctx)? {
                    debug!("settings.json still uses the API key helper; keeping it");
                    return Ok(TransformOutput::unchanged(current));
                }
                Ok(remove_generated_file(current))
            }),
        ],
    }
}

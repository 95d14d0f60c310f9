//! Codex: a `poe` model provider in `~/.codex/config.toml`.

use std::path::PathBuf;

use toml::{Table, Value};

use super::{exact_output_prompt, merge_toml_file, npm_install, prune_toml_file};
use crate::core::document::parse_toml_table;
use crate::mutation::{Manifest, Mutation, PrerequisiteSet, ServiceOptions};
use crate::prerequisites::{binary_exists_check, health_check};

pub const ID: &str = "codex";
const BINARY: &str = "codex";
const HEALTH_TOKEN: &str = "CODEX_OK";
const PROVIDER: &str = "poe";
const TOKEN_KEY: &str = "experimental_bearer_token";

fn config_dir(options: &ServiceOptions) -> PathBuf {
    options.home.join(".codex")
}

fn config_path(options: &ServiceOptions) -> PathBuf {
    config_dir(options).join("config.toml")
}

fn string(value: &str) -> Value {
    Value::String(value.to_string())
}

/// The block agentcfg owns. `token` is the bearer token to write or match.
fn provider_block(options: &ServiceOptions, token: &str) -> Table {
    let mut provider = Table::new();
    provider.insert("name".to_string(), string("Poe"));
    provider.insert("base_url".to_string(), string(&options.base_url));
    provider.insert("wire_api".to_string(), string("chat"));
    provider.insert(TOKEN_KEY.to_string(), string(token));

    let mut providers = Table::new();
    providers.insert(PROVIDER.to_string(), Value::Table(provider));

    let mut block = Table::new();
    block.insert("model_provider".to_string(), string(PROVIDER));
    block.insert("model".to_string(), string(&options.model));
    block.insert("model_providers".to_string(), Value::Table(providers));
    block
}

/// Token currently stored for the provider. Removal adopts it so the key does
/// not have to be known to take the block out again.
fn stored_token(doc: &Table) -> Option<&str> {
    doc.get("model_providers")?
        .get(PROVIDER)?
        .get(TOKEN_KEY)?
        .as_str()
}

pub fn manifest() -> Manifest {
    let install = npm_install(ID, "Codex", BINARY, "@openai/codex");
    Manifest {
        id: ID.to_string(),
        summary: "OpenAI Codex CLI".to_string(),
        prerequisites: PrerequisiteSet {
            before: vec![binary_exists_check(install.check_id(), BINARY)],
            after: vec![health_check(
                "codex-health",
                "Codex answers through the provider",
                BINARY,
                vec![
                    "exec".to_string(),
                    "--skip-git-repo-check".to_string(),
                    exact_output_prompt(HEALTH_TOKEN),
                ],
                HEALTH_TOKEN,
            )],
        },
        install: Some(install),
        configure: vec![
            Mutation::ensure_directory("Create ~/.codex", config_dir),
            Mutation::create_backup("Back up config.toml", config_path),
            Mutation::transform_file("Merge poe provider", config_path, |current, ctx| {
                let block = provider_block(ctx.options, &ctx.options.api_key);
                merge_toml_file(ctx.target, current, &block)
            }),
        ],
        remove: vec![
            Mutation::create_backup("Back up config.toml", config_path),
            Mutation::transform_file("Remove poe provider", config_path, |current, ctx| {
                let doc = parse_toml_table(ctx.target, current)?;
                let token = stored_token(&doc).unwrap_or(ctx.options.api_key.as_str());
                let block = provider_block(ctx.options, token);
                prune_toml_file(ctx.target, current, &block)
            }),
        ],
    }
}

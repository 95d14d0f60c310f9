//! OpenCode: a `poe` provider in `opencode.json` and the matching credential
//! in the data dir's `auth.json`.

use std::path::PathBuf;

use serde_json::{Map, Value, json};

use super::{exact_output_prompt, npm_install, object, prune_json_file};
use crate::core::document::parse_json_object;
use crate::mutation::{Manifest, Mutation, PrerequisiteSet, ServiceOptions};
use crate::prerequisites::{binary_exists_check, health_check};

pub const ID: &str = "opencode";
const BINARY: &str = "opencode";
const HEALTH_TOKEN: &str = "OPENCODE_OK";
const PROVIDER: &str = "poe";

fn config_dir(options: &ServiceOptions) -> PathBuf {
    options.home.join(".config").join("opencode")
}

fn config_path(options: &ServiceOptions) -> PathBuf {
    config_dir(options).join("opencode.json")
}

fn data_dir(options: &ServiceOptions) -> PathBuf {
    options.home.join(".local").join("share").join("opencode")
}

fn auth_path(options: &ServiceOptions) -> PathBuf {
    data_dir(options).join("auth.json")
}

fn provider_config(options: &ServiceOptions) -> Map<String, Value> {
    object(json!({
        "provider": {
            PROVIDER: {
                "npm": "@ai-sdk/openai-compatible",
                "name": "Poe",
                "options": { "baseURL": options.base_url },
                "models": { options.model.as_str(): { "name": options.model } },
            },
        },
        "model": format!("{PROVIDER}/{}", options.model),
    }))
}

fn credential(key: &str) -> Map<String, Value> {
    object(json!({ PROVIDER: { "type": "api", "key": key } }))
}

pub fn manifest() -> Manifest {
    let install = npm_install(ID, "OpenCode", BINARY, "opencode-ai");
    Manifest {
        id: ID.to_string(),
        summary: "OpenCode CLI".to_string(),
        prerequisites: PrerequisiteSet {
            before: vec![binary_exists_check(install.check_id(), BINARY)],
            after: vec![health_check(
                "opencode-health",
                "OpenCode answers through the provider",
                BINARY,
                vec!["run".to_string(), exact_output_prompt(HEALTH_TOKEN)],
                HEALTH_TOKEN,
            )],
        },
        install: Some(install),
        configure: vec![
            Mutation::ensure_directory("Create opencode config dir", config_dir),
            Mutation::ensure_directory("Create opencode data dir", data_dir),
            Mutation::create_backup("Back up opencode.json", config_path),
            Mutation::create_backup("Back up auth.json", auth_path),
            Mutation::json_merge("Merge poe provider", config_path, |options| {
                Value::Object(provider_config(options))
            }),
            Mutation::json_merge("Store poe credential", auth_path, |options| {
                Value::Object(credential(&options.api_key))
            }),
        ],
        remove: vec![
            Mutation::create_backup("Back up opencode.json", config_path),
            Mutation::create_backup("Back up auth.json", auth_path),
            Mutation::transform_file("Remove poe provider", config_path, |current, ctx| {
                prune_json_file(ctx.target, current, &provider_config(ctx.options))
            }),
            Mutation::transform_file("Remove poe credential", auth_path, |current, ctx| {
                let doc = parse_json_object(ctx.target, current)?;
                let key = doc
                    .get(PROVIDER)
                    .and_then(|entry| entry.get("key"))
                    .and_then(Value::as_str)
                    .unwrap_or(ctx.options.api_key.as_str());
                prune_json_file(ctx.target, current, &credential(key))
            }),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{NoopObserver, any_changed, run_service_configure, run_service_remove};
    use crate::io::templates::BuiltinTemplates;
    use crate::test_support::{MemoryFileSystem, execution_context, options};

    fn read_json(fs: &MemoryFileSystem, path: &str) -> Value {
        serde_json::from_str(&fs.contents(path).expect("file")).expect("json")
    }

    #[test]
    fn configure_writes_provider_and_credential() {
        let fs = MemoryFileSystem::new();
        fs.insert_file(
            "/h/.local/share/opencode/auth.json",
            r#"{"anthropic": {"type": "oauth", "refresh": "r"}}"#,
        );
        let opts = options("/h");
        let templates = BuiltinTemplates::new();
        let ctx = execution_context(&fs, &opts, &templates);

        let records = run_service_configure(&manifest(), &ctx, &mut NoopObserver).expect("run");
        assert!(any_changed(&records));

        let config = read_json(&fs, "/h/.config/opencode/opencode.json");
        assert_eq!(config["model"], "poe/Test-Model");
        assert_eq!(
            config["provider"]["poe"]["options"]["baseURL"],
            "https://api.example.test/v1"
        );
        assert_eq!(config["provider"]["poe"]["models"]["Test-Model"]["name"], "Test-Model");

        let auth = read_json(&fs, "/h/.local/share/opencode/auth.json");
        assert_eq!(auth["poe"], json!({ "type": "api", "key": "sk-test" }));
        assert_eq!(auth["anthropic"]["type"], "oauth");

        let again = run_service_configure(&manifest(), &ctx, &mut NoopObserver).expect("again");
        assert!(!any_changed(&again));
    }

    #[test]
    fn remove_drops_only_the_poe_entries() {
        let fs = MemoryFileSystem::new();
        fs.insert_file(
            "/h/.config/opencode/opencode.json",
            r#"{"$schema": "https://opencode.ai/config.json"}"#,
        );
        let opts = options("/h");
        let templates = BuiltinTemplates::new();
        let ctx = execution_context(&fs, &opts, &templates);
        run_service_configure(&manifest(), &ctx, &mut NoopObserver).expect("configure");

        let rotated = ServiceOptions {
            api_key: "sk-rotated".to_string(),
            ..options("/h")
        };
        let ctx = execution_context(&fs, &rotated, &templates);
        run_service_remove(&manifest(), &ctx, &mut NoopObserver).expect("remove");

        assert_eq!(
            read_json(&fs, "/h/.config/opencode/opencode.json"),
            json!({ "$schema": "https://opencode.ai/config.json" })
        );
        assert!(!fs.exists("/h/.local/share/opencode/auth.json"));
    }
}

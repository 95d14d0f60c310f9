//! Template rendering for generated files.

use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value;

use crate::error::EngineError;

/// First comment line of every generated file. Removal only deletes files
/// that still carry it.
pub const GENERATED_MARKER: &str = "# Generated by agentcfg.";

pub const API_KEY_HELPER: &str = "api-key-helper.sh";

const API_KEY_HELPER_TEMPLATE: &str = include_str!("../templates/api-key-helper.sh");

/// Renders a named template with a JSON context.
pub trait TemplateRenderer {
    fn render(&self, template_id: &str, context: &Value) -> Result<String, EngineError>;
}

/// Templates compiled into the binary.
pub struct BuiltinTemplates {
    env: Environment<'static>,
}

impl BuiltinTemplates {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        env.add_filter("shell_quote", shell_quote);
        env.add_template(API_KEY_HELPER, API_KEY_HELPER_TEMPLATE)
            .expect("api key helper template should be valid");
        Self { env }
    }
}

/// Single-quote `value` for POSIX `sh`.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

impl Default for BuiltinTemplates {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer for BuiltinTemplates {
    fn render(&self, template_id: &str, context: &Value) -> Result<String, EngineError> {
        let template_error = |err: minijinja::Error| EngineError::Template {
            id: template_id.to_string(),
            message: err.to_string(),
        };
        let template = self.env.get_template(template_id).map_err(template_error)?;
        template.render(context).map_err(template_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn api_key_helper_renders_marker_and_key() {
        let rendered = BuiltinTemplates::new()
            .render(
                API_KEY_HELPER,
                &json!({ "service": "claude-code", "api_key": "sk-test" }),
            )
            .expect("render");
        assert!(rendered.starts_with("#!/bin/sh\n"));
        assert!(rendered.contains(GENERATED_MARKER));
        assert!(rendered.contains("'sk-test'"));
        assert!(rendered.ends_with('\n'));
    }

    #[test]
    fn quotes_in_the_key_are_escaped() {
        assert_eq!(shell_quote("sk-a'b"), r"'sk-a'\''b'");
        let rendered = BuiltinTemplates::new()
            .render(
                API_KEY_HELPER,
                &json!({ "service": "claude-code", "api_key": "sk-a'b $(touch pwned)" }),
            )
            .expect("render");
        assert!(rendered.contains(r"'sk-a'\''b $(touch pwned)'"));
    }

    #[cfg(unix)]
    #[test]
    fn rendered_helper_prints_the_key_verbatim() {
        let key = "sk-a'b\"c $(echo no) `x`";
        let rendered = BuiltinTemplates::new()
            .render(API_KEY_HELPER, &json!({ "service": "claude-code", "api_key": key }))
            .expect("render");
        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(&rendered)
            .output()
            .expect("run sh");
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout), format!("{key}\n"));
    }

    #[test]
    fn missing_context_variable_is_an_error() {
        let err = BuiltinTemplates::new()
            .render(API_KEY_HELPER, &json!({ "service": "claude-code" }))
            .unwrap_err();
        assert!(matches!(err, EngineError::Template { .. }));
    }

    #[test]
    fn unknown_template_is_an_error() {
        let err = BuiltinTemplates::new()
            .render("nope", &json!({}))
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}

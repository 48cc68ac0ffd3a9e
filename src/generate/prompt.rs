//! Prompt templates and rendering.
//!
//! Templates use `{{placeholder}}` markers. Built-in defaults can be replaced
//! per template through the `[prompts]` table.

use super::ModuleSpecContext;
use crate::config::PromptsConfig;
use crate::error::JauntError;
use crate::registry::SpecKind;
use std::path::Path;

const BUILD_SYSTEM: &str = "\
You are a senior Python engineer. You write complete, production-quality Python
modules that implement the given specification stubs exactly.

Rules:
- Output only Python source code. No markdown fences, no commentary.
- Define every expected top-level name: {{expected_names}}.
- Preserve each stub's signature and documented behavior.
- Do not import from the spec module `{{spec_module}}` itself.
- Dependencies may be imported from their generated modules.
";

const BUILD_MODULE: &str = "\
Generate the module `{{generated_module}}` implementing the specs declared in
`{{spec_module}}`.

Expected top-level names: {{expected_names}}

## Specs
{{specs_block}}
## Dependency APIs
{{deps_api_block}}
## Generated dependency modules
{{deps_generated_block}}
## Errors from previous attempts
{{error_context_block}}";

const TEST_SYSTEM: &str = "\
You are a senior Python engineer writing pytest test modules.

Rules:
- Output only Python source code. No markdown fences, no commentary.
- Define every expected top-level test function: {{expected_names}}.
- Import the code under test from its real modules as shown in the API reference.
- Tests must be deterministic and must not touch the network.
";

const TEST_MODULE: &str = "\
Generate the pytest module `{{generated_module}}` for the test specs declared in
`{{spec_module}}`.

Expected top-level names: {{expected_names}}

## Test specs
{{specs_block}}
## API reference
{{deps_api_block}}
## Generated dependency modules
{{deps_generated_block}}
## Errors from previous attempts
{{error_context_block}}";

/// System and user prompt for one generation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

/// The four templates a backend renders from.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    pub build_system: String,
    pub build_module: String,
    pub test_system: String,
    pub test_module: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            build_system: BUILD_SYSTEM.to_string(),
            build_module: BUILD_MODULE.to_string(),
            test_system: TEST_SYSTEM.to_string(),
            test_module: TEST_MODULE.to_string(),
        }
    }
}

impl PromptTemplates {
    /// Defaults with overrides from `prompts` (paths relative to `root`).
    pub fn load(root: &Path, prompts: &PromptsConfig) -> Result<Self, JauntError> {
        let defaults = Self::default();
        let read = |override_path: &Option<String>, default: String| match override_path {
            Some(rel) if !rel.trim().is_empty() => {
                let path = root.join(rel);
                std::fs::read_to_string(&path).map_err(|e| {
                    JauntError::Config(format!(
                        "Cannot read prompt template {}: {}",
                        path.display(),
                        e
                    ))
                })
            }
            _ => Ok(default),
        };
        Ok(Self {
            build_system: read(&prompts.build_system, defaults.build_system)?,
            build_module: read(&prompts.build_module, defaults.build_module)?,
            test_system: read(&prompts.test_system, defaults.test_system)?,
            test_module: read(&prompts.test_module, defaults.test_module)?,
        })
    }

    pub fn render(&self, ctx: &ModuleSpecContext, extra_error_context: &[String]) -> RenderedPrompt {
        let mapping = placeholder_values(ctx, extra_error_context);
        let (system, user) = match ctx.kind {
            SpecKind::Implementation => (&self.build_system, &self.build_module),
            SpecKind::Test => (&self.test_system, &self.test_module),
        };
        RenderedPrompt {
            system: format!("{}\n", render_template(system, &mapping).trim()),
            user: format!("{}\n", render_template(user, &mapping).trim()),
        }
    }
}

fn placeholder_values(
    ctx: &ModuleSpecContext,
    extra_error_context: &[String],
) -> Vec<(&'static str, String)> {
    let specs: Vec<(String, String)> = ctx
        .spec_sources
        .iter()
        .map(|(spec_ref, source)| {
            let body = match ctx.decorator_prompts.get(spec_ref) {
                Some(prompt) if !prompt.is_empty() => format!(
                    "{}\n\n# Decorator prompt\n{}\n",
                    source.trim_end(),
                    prompt.trim_end()
                ),
                _ => source.clone(),
            };
            (spec_ref.to_string(), body)
        })
        .collect();
    let deps_api: Vec<(String, String)> = ctx
        .dependency_apis
        .iter()
        .map(|(r, api)| (r.to_string(), api.clone()))
        .collect();
    let deps_generated: Vec<(String, String)> = ctx
        .dependency_generated_modules
        .iter()
        .map(|(m, src)| (m.clone(), src.clone()))
        .collect();
    let errors: Vec<(String, String)> = extra_error_context
        .iter()
        .enumerate()
        .map(|(i, line)| (format!("error_context[{}]", i + 1), line.clone()))
        .collect();

    vec![
        ("spec_module", ctx.spec_module.clone()),
        ("generated_module", ctx.generated_module.clone()),
        ("expected_names", ctx.expected_names.join(", ")),
        ("specs_block", fmt_kv_block(&specs)),
        ("deps_api_block", fmt_kv_block(&deps_api)),
        ("deps_generated_block", fmt_kv_block(&deps_generated)),
        ("error_context_block", fmt_kv_block(&errors)),
    ]
}

/// Replace each `{{key}}` with its value.
pub fn render_template(template: &str, mapping: &[(&str, String)]) -> String {
    mapping.iter().fold(template.to_string(), |text, (key, value)| {
        text.replace(&format!("{{{{{}}}}}", key), value)
    })
}

/// `# key\nvalue\n` chunks separated by blank lines; `(none)` when empty.
pub fn fmt_kv_block(items: &[(String, String)]) -> String {
    if items.is_empty() {
        return "(none)".to_string();
    }
    let chunks: Vec<String> = items
        .iter()
        .map(|(key, value)| format!("# {}\n{}\n", key, value.trim_end()))
        .collect();
    format!("{}\n", chunks.join("\n").trim_end())
}

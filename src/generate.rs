//! Generation backends
//!
//! A backend turns a [`ModuleSpecContext`] into Python source. The provided
//! [`GeneratorBackend::generate_with_retry`] validates each attempt and feeds
//! the errors back into the next one; it never returns an error, so one
//! module's failure cannot abort its siblings.

use crate::error::JauntError;
use crate::python::validate_generated_source;
use crate::registry::SpecKind;
use crate::spec_ref::SpecRef;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub mod http;
pub mod prompt;

pub use http::{backend_from_config, HttpBackend, Provider};
pub use prompt::{fmt_kv_block, render_template, PromptTemplates, RenderedPrompt};

/// Attempts made by [`GeneratorBackend::generate_with_retry`] unless told otherwise.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Everything a backend needs to generate one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSpecContext {
    pub kind: SpecKind,
    pub spec_module: String,
    pub generated_module: String,
    /// Top-level names the generated module must define.
    pub expected_names: Vec<String>,
    /// Normalized source of each spec in the module.
    pub spec_sources: BTreeMap<SpecRef, String>,
    pub decorator_prompts: BTreeMap<SpecRef, String>,
    /// Signature + docstring text of dependency specs.
    pub dependency_apis: BTreeMap<SpecRef, String>,
    /// Already generated source of dependency modules.
    pub dependency_generated_modules: BTreeMap<String, String>,
}

/// Outcome of [`GeneratorBackend::generate_with_retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub attempts: u32,
    /// Valid source; `None` on failure.
    pub source: Option<String>,
    /// Empty on success, non-empty on failure.
    pub errors: Vec<String>,
}

impl GenerationResult {
    pub fn is_success(&self) -> bool {
        self.source.is_some()
    }
}

/// A text-generation service that produces module source.
#[async_trait]
pub trait GeneratorBackend: Send + Sync {
    /// One generation attempt. `extra_error_context` carries feedback from
    /// earlier attempts. The returned text is free of markdown fences.
    async fn generate_module(
        &self,
        ctx: &ModuleSpecContext,
        extra_error_context: &[String],
    ) -> Result<String, JauntError>;

    /// Generate, validate and retry with the validation errors appended.
    ///
    /// Backend errors and validation errors both consume an attempt.
    async fn generate_with_retry(
        &self,
        ctx: &ModuleSpecContext,
        max_attempts: u32,
    ) -> GenerationResult {
        let max_attempts = max_attempts.max(1);
        let mut attempts = 0;
        let mut extra_context: Vec<String> = Vec::new();
        let mut last_errors: Vec<String> = Vec::new();

        while attempts < max_attempts {
            attempts += 1;
            match self.generate_module(ctx, &extra_context).await {
                Ok(source) => {
                    let errors = validate_generated_source(&source, &ctx.expected_names);
                    if errors.is_empty() {
                        return GenerationResult {
                            attempts,
                            source: Some(source),
                            errors: Vec::new(),
                        };
                    }
                    debug!(
                        module = %ctx.spec_module,
                        attempt = attempts,
                        errors = errors.len(),
                        "Generated source failed validation"
                    );
                    extra_context.extend(
                        errors
                            .iter()
                            .map(|e| format!("previous output errors: {}", e)),
                    );
                    last_errors = errors;
                }
                Err(err) => {
                    warn!(module = %ctx.spec_module, attempt = attempts, error = %err, "Backend call failed");
                    last_errors = vec![err.to_string()];
                }
            }
        }

        if last_errors.is_empty() {
            last_errors.push("No source returned.".to_string());
        }
        GenerationResult {
            attempts,
            source: None,
            errors: last_errors,
        }
    }
}

//! Error types for the Jaunt build and test pipeline.

use crate::spec_ref::SpecRef;
use std::path::PathBuf;
use thiserror::Error;

/// Process exit codes exposed by the `build` and `test` commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Ok = 0,
    ConfigOrDiscovery = 2,
    Generation = 3,
    TestFailure = 4,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Errors raised by the pipeline.
///
/// Graph-integrity errors (configuration, discovery, cycles) abort an invocation.
/// Per-module generation failures are recorded in build reports instead and only
/// surface as `Generation` when a caller needs a single error value.
#[derive(Debug, Error)]
pub enum JauntError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to collect specs from module '{module}': {message}")]
    Discovery { module: String, message: String },

    #[error("{0}")]
    DependencyCycle(String),

    #[error("Spec {spec_ref} has not been built yet. Run `{command}` and try again.")]
    NotBuilt { spec_ref: SpecRef, command: String },

    #[error("Generation failed for module '{module}': {}", errors.join("; "))]
    Generation { module: String, errors: Vec<String> },

    #[error("Invalid spec ref {input:?}: {reason}")]
    InvalidSpecRef { input: String, reason: String },

    #[error("Unknown spec: {0}")]
    UnknownSpec(SpecRef),

    #[error("Cannot extract source for {spec_ref}: {message}")]
    SourceExtraction { spec_ref: SpecRef, message: String },

    #[error("Refusing to write outside generated output tree: {0}")]
    OutputScope(PathBuf),

    #[error("Refusing to overwrite user-authored file (no jaunt header): {0}")]
    UserFile(PathBuf),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl JauntError {
    /// Exit code an invocation should report when this error ends it.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            JauntError::Config(_)
            | JauntError::Discovery { .. }
            | JauntError::DependencyCycle(_)
            | JauntError::InvalidSpecRef { .. }
            | JauntError::UnknownSpec(_) => ExitCode::ConfigOrDiscovery,
            JauntError::NotBuilt { .. }
            | JauntError::Generation { .. }
            | JauntError::SourceExtraction { .. }
            | JauntError::OutputScope(_)
            | JauntError::UserFile(_)
            | JauntError::Backend(_)
            | JauntError::Io(_) => ExitCode::Generation,
        }
    }

    pub(crate) fn discovery(module: &str, message: impl Into<String>) -> Self {
        JauntError::Discovery {
            module: module.to_string(),
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for JauntError {
    fn from(err: config::ConfigError) -> Self {
        JauntError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for JauntError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            JauntError::Backend(format!("request timed out: {}", err))
        } else {
            JauntError::Backend(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_follow_error_kind() {
        assert_eq!(
            JauntError::Config("x".into()).exit_code(),
            ExitCode::ConfigOrDiscovery
        );
        assert_eq!(
            JauntError::DependencyCycle("a -> a".into()).exit_code().as_i32(),
            2
        );
        let gen = JauntError::Generation {
            module: "pkg.a".into(),
            errors: vec!["boom".into()],
        };
        assert_eq!(gen.exit_code().as_i32(), 3);
        assert_eq!(ExitCode::TestFailure.as_i32(), 4);
    }

    #[test]
    fn test_not_built_names_command() {
        let err = JauntError::NotBuilt {
            spec_ref: SpecRef::new_unchecked("pkg.mod:thing"),
            command: "jaunt build".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("pkg.mod:thing"));
        assert!(msg.contains("jaunt build"));
    }
}

//! Project configuration (`jaunt.toml`).
//!
//! The file is read through the `config` crate into serde structs with
//! per-field defaults, then validated against the project root.

mod project_file;

use crate::error::JauntError;
use crate::logging::LoggingConfig;
use crate::paths::{is_valid_package_name, DEFAULT_GENERATED_DIR};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use project_file::{find_project_root, load_config, CONFIG_FILE_NAME};

/// The only supported config schema version.
pub const CONFIG_VERSION: i64 = 1;

/// Top-level `jaunt.toml` contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JauntConfig {
    /// Required; must equal [`CONFIG_VERSION`].
    #[serde(default)]
    pub version: Option<i64>,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub test: TestConfig,

    #[serde(default)]
    pub prompts: PromptsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for JauntConfig {
    fn default() -> Self {
        Self {
            version: Some(CONFIG_VERSION),
            paths: PathsConfig::default(),
            llm: LlmConfig::default(),
            build: BuildConfig::default(),
            test: TestConfig::default(),
            prompts: PromptsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_source_roots")]
    pub source_roots: Vec<String>,

    #[serde(default = "default_test_roots")]
    pub test_roots: Vec<String>,

    #[serde(default = "default_generated_dir")]
    pub generated_dir: String,
}

fn default_source_roots() -> Vec<String> {
    vec!["src".to_string(), ".".to_string()]
}

fn default_test_roots() -> Vec<String> {
    vec!["tests".to_string()]
}

fn default_generated_dir() -> String {
    DEFAULT_GENERATED_DIR.to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source_roots: default_source_roots(),
            test_roots: default_test_roots(),
            generated_dir: default_generated_dir(),
        }
    }
}

/// Text-generation backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// `openai` or `anthropic`.
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub max_tokens: Option<u32>,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-5.2".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            base_url: None,
            timeout_secs: default_timeout_secs(),
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_build_jobs")]
    pub jobs: i64,

    #[serde(default = "default_true")]
    pub infer_deps: bool,
}

fn default_build_jobs() -> i64 {
    8
}

fn default_true() -> bool {
    true
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            jobs: default_build_jobs(),
            infer_deps: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    #[serde(default = "default_test_jobs")]
    pub jobs: i64,

    #[serde(default = "default_true")]
    pub infer_deps: bool,

    #[serde(default = "default_pytest_args")]
    pub pytest_args: Vec<String>,

    #[serde(default = "default_python")]
    pub python: String,
}

fn default_test_jobs() -> i64 {
    4
}

fn default_pytest_args() -> Vec<String> {
    vec!["-q".to_string()]
}

fn default_python() -> String {
    "python3".to_string()
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jobs: default_test_jobs(),
            infer_deps: true,
            pytest_args: default_pytest_args(),
            python: default_python(),
        }
    }
}

/// Optional prompt template override files, relative to the project root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptsConfig {
    #[serde(default)]
    pub build_system: Option<String>,
    #[serde(default)]
    pub build_module: Option<String>,
    #[serde(default)]
    pub test_system: Option<String>,
    #[serde(default)]
    pub test_module: Option<String>,
}

impl JauntConfig {
    /// Validate against the project root. Returns every problem found.
    pub fn validate(&self, root: &Path) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        match self.version {
            None => errors.push(format!("Missing required `version = {}`.", CONFIG_VERSION)),
            Some(v) if v != CONFIG_VERSION => errors.push(format!(
                "Unsupported config version {} (expected {}).",
                v, CONFIG_VERSION
            )),
            Some(_) => {}
        }

        if self.paths.source_roots.is_empty() {
            errors.push("paths.source_roots must not be empty.".to_string());
        } else if self.source_roots(root).is_empty() {
            errors.push(format!(
                "None of paths.source_roots exist under {}: {}",
                root.display(),
                self.paths.source_roots.join(", ")
            ));
        }

        if !is_valid_package_name(&self.paths.generated_dir) {
            errors.push(format!(
                "paths.generated_dir must be a valid Python identifier, got {:?}.",
                self.paths.generated_dir
            ));
        }

        if self.build.jobs < 1 {
            errors.push(format!("build.jobs must be >= 1, got {}.", self.build.jobs));
        }
        if self.test.jobs < 1 {
            errors.push(format!("test.jobs must be >= 1, got {}.", self.test.jobs));
        }

        if !matches!(self.llm.provider.as_str(), "openai" | "anthropic") {
            errors.push(format!(
                "llm.provider must be 'openai' or 'anthropic', got {:?}.",
                self.llm.provider
            ));
        }
        if self.llm.timeout_secs == 0 {
            errors.push("llm.timeout_secs must be > 0.".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Configured source roots that exist as directories.
    pub fn source_roots(&self, root: &Path) -> Vec<PathBuf> {
        existing_dirs(root, &self.paths.source_roots)
    }

    /// Configured test roots that exist as directories.
    pub fn test_roots(&self, root: &Path) -> Vec<PathBuf> {
        existing_dirs(root, &self.paths.test_roots)
    }

    pub fn build_jobs(&self) -> usize {
        self.build.jobs.max(1) as usize
    }

    pub fn test_jobs(&self) -> usize {
        self.test.jobs.max(1) as usize
    }
}

fn existing_dirs(root: &Path, rels: &[String]) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = Vec::new();
    for rel in rels {
        let dir = root.join(rel);
        if !dir.is_dir() {
            continue;
        }
        let dir = dunce::canonicalize(&dir).unwrap_or(dir);
        if !out.contains(&dir) {
            out.push(dir);
        }
    }
    out
}

impl From<Vec<String>> for JauntError {
    fn from(errors: Vec<String>) -> Self {
        JauntError::Config(errors.join("\n"))
    }
}

impl JauntConfig {
    /// Config written by `jaunt init`: a single `src` source root.
    pub fn for_init() -> Self {
        Self {
            paths: PathsConfig {
                source_roots: vec!["src".to_string()],
                ..PathsConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn to_toml(&self) -> Result<String, JauntError> {
        toml::to_string_pretty(self)
            .map_err(|e| JauntError::Config(format!("Failed to serialize config: {}", e)))
    }
}

//! Test generation and the pytest runner.

use crate::deps::{ModuleDag, SpecGraph};
use crate::error::JauntError;
use crate::generate::GeneratorBackend;
use crate::orchestrator::{run_generation, GenerationPlan, GenerationReport};
use crate::output::OutputScope;
use crate::progress::ProgressSink;
use crate::registry::{ModuleSpecs, SpecKind, SpecMap};
use crate::spec_ref::SpecRef;
use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

pub type TestGenerationReport = GenerationReport;

/// Inputs for one test generation run.
pub struct TestRun<'a> {
    pub scope: &'a OutputScope,
    pub module_specs: &'a ModuleSpecs,
    pub specs: &'a SpecMap,
    pub graph: &'a SpecGraph,
    pub module_dag: &'a ModuleDag,
    pub stale: &'a BTreeSet<String>,
    /// Implementation spec sources, given to every test module as API reference.
    pub dependency_apis: BTreeMap<SpecRef, String>,
    pub jobs: usize,
}

/// Generate test modules for `run.stale`; writes only beneath the tests
/// generated tree.
pub async fn run_test_generation(
    run: TestRun<'_>,
    backend: &dyn GeneratorBackend,
    progress: &dyn ProgressSink,
) -> Result<TestGenerationReport, JauntError> {
    let plan = GenerationPlan::new(
        SpecKind::Test,
        run.scope,
        run.module_specs,
        run.specs,
        run.graph,
        run.module_dag,
        run.stale,
        run.jobs,
    )
    .with_dependency_apis(run.dependency_apis);
    run_generation(&plan, backend, progress).await
}

/// Dotted package prefix for a test root below `project_root`
/// (`<root>/tests/unit` -> `tests.unit`). `None` for the root itself or a
/// directory outside it.
pub fn test_root_prefix(project_root: &Path, test_root: &Path) -> Option<String> {
    let rel = test_root.strip_prefix(project_root).ok()?;
    let parts: Vec<&str> = rel
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("."))
}

/// Generated test files on disk for `modules`, sorted.
pub fn generated_test_files(scope: &OutputScope, modules: &BTreeSet<String>) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = modules
        .iter()
        .filter_map(|m| scope.path_for(m).ok())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    files
}

/// `pythonpath` entries that exist (absolute), followed by the entries of
/// `current`, without duplicates.
pub fn merge_pythonpath(pythonpath: &[PathBuf], current: Option<&OsString>) -> Option<OsString> {
    let mut merged: Vec<PathBuf> = Vec::new();
    let new_parts = pythonpath
        .iter()
        .filter(|p| p.exists())
        .map(|p| dunce::canonicalize(p).unwrap_or_else(|_| p.clone()));
    let current_parts = current
        .map(|c| env::split_paths(c).filter(|p| !p.as_os_str().is_empty()).collect::<Vec<_>>())
        .unwrap_or_default();
    for part in new_parts.chain(current_parts) {
        if !merged.contains(&part) {
            merged.push(part);
        }
    }
    if merged.is_empty() {
        return None;
    }
    env::join_paths(merged).ok()
}

/// Run `python -m pytest <args> <files>` and return its exit status.
///
/// Returns 0 without spawning anything when `files` is empty.
pub fn run_pytest(
    python: &str,
    files: &[PathBuf],
    pytest_args: &[String],
    pythonpath: &[PathBuf],
    cwd: Option<&Path>,
) -> Result<i32, JauntError> {
    if files.is_empty() {
        debug!("No generated test files; skipping pytest");
        return Ok(0);
    }

    let mut command = Command::new(python);
    command.arg("-m").arg("pytest").args(pytest_args).args(files);
    if let Some(path) = merge_pythonpath(pythonpath, env::var_os("PYTHONPATH").as_ref()) {
        command.env("PYTHONPATH", path);
    }
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }

    info!(python, files = files.len(), "Running pytest");
    let status = command.status()?;
    // Killed by a signal: report as a generic failure.
    Ok(status.code().unwrap_or(1))
}

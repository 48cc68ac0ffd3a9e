//! CLI route: single route table and run context. Dispatches to domain services and presentation.

use crate::builder::{
    detect_stale_modules, expand_stale_modules, module_staleness, run_build, select_modules,
    BuildReport,
};
use crate::config::{JauntConfig, CONFIG_FILE_NAME};
use crate::deps::deps_closure;
use crate::digest::DigestCache;
use crate::error::{ExitCode, JauntError};
use crate::generate::{backend_from_config, GeneratorBackend};
use crate::orchestrator::GenerationReport;
use crate::output::write_atomic;
use crate::progress::{NoProgress, ProgressBar, ProgressSink};
use crate::project::{Project, SpecSet};
use crate::registry::SpecKind;
use crate::runtime::resolve_handles;
use crate::spec_ref::SpecRef;
use crate::tester::{generated_test_files, run_pytest, run_test_generation, TestRun};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::cli::parse::{BuildArgs, Commands};
use crate::cli::presentation::{
    format_clean_json, format_clean_text, format_report_failures, format_report_json,
    format_report_summary, format_status_json, format_status_table, StatusRow,
};

/// What a command prints and how the process exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: ExitCode,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl CommandOutput {
    fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: ExitCode::Ok,
            stdout: Some(stdout.into()),
            stderr: None,
        }
    }
}

/// Runtime context for CLI execution: project location, output mode, and the
/// generation backend.
pub struct RunContext {
    root: Option<PathBuf>,
    config_path: Option<PathBuf>,
    json: bool,
    backend: Option<Arc<dyn GeneratorBackend>>,
}

impl RunContext {
    pub fn new(root: Option<PathBuf>, config_path: Option<PathBuf>, json: bool) -> Self {
        Self {
            root,
            config_path,
            json,
            backend: None,
        }
    }

    /// Use `backend` instead of the one configured in `[llm]`.
    pub fn with_backend(mut self, backend: Arc<dyn GeneratorBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn is_json(&self) -> bool {
        self.json
    }

    /// Execute a CLI command via the single route table.
    pub fn execute(&self, command: &Commands) -> Result<CommandOutput, JauntError> {
        debug!(command = command.name(), "Executing command");
        match command {
            Commands::Build(args) => self.handle_build(args),
            Commands::Test {
                build,
                no_build,
                no_run,
                pytest_args,
            } => self.handle_test(build, *no_build, *no_run, pytest_args),
            Commands::Status(args) => self.handle_status(args),
            Commands::Clean { dry_run } => self.handle_clean(*dry_run),
            Commands::Init { force } => self.handle_init(*force),
        }
    }

    fn load_project(&self) -> Result<Project, JauntError> {
        Project::load(self.root.as_deref(), self.config_path.as_deref())
    }

    fn backend(&self, project: &Project) -> Result<Arc<dyn GeneratorBackend>, JauntError> {
        match &self.backend {
            Some(backend) => Ok(Arc::clone(backend)),
            None => backend_from_config(&project.config, &project.root),
        }
    }

    fn progress(&self, args: &BuildArgs) -> Box<dyn ProgressSink> {
        if self.json || args.no_progress || !std::io::stderr().is_terminal() {
            Box::new(NoProgress)
        } else {
            Box::new(ProgressBar::stderr())
        }
    }

    fn build_report(&self, project: &Project, args: &BuildArgs) -> Result<BuildReport, JauntError> {
        let set = project.implementation_specs(infer_override(args))?;
        if set.is_empty() {
            return Ok(BuildReport::default());
        }
        let scope = project.implementation_scope()?;
        let stale = detect_stale_modules(
            &scope,
            &set.module_specs,
            &set.specs,
            &set.graph,
            &set.module_dag,
            args.force,
        )?;
        let targets = target_modules(&args.targets);
        let selected = select_modules(&set.module_dag, &stale, targets.as_ref(), &set.module_specs);
        if selected.is_empty() {
            return Ok(nothing_to_do(&set));
        }

        let backend = self.backend(project)?;
        let progress = self.progress(args);
        let jobs = args.jobs.unwrap_or_else(|| project.config.build_jobs());
        info!(modules = selected.len(), jobs, "Building stale modules");
        runtime()?.block_on(run_build(
            &scope,
            &set.module_specs,
            &set.specs,
            &set.graph,
            &set.module_dag,
            &selected,
            backend.as_ref(),
            jobs,
            progress.as_ref(),
        ))
    }

    fn handle_build(&self, args: &BuildArgs) -> Result<CommandOutput, JauntError> {
        let project = self.load_project()?;
        let report = self.build_report(&project, args)?;
        Ok(self.report_output("build", SpecKind::Implementation, &report))
    }

    fn report_output(&self, command: &str, kind: SpecKind, report: &GenerationReport) -> CommandOutput {
        let failures = format_report_failures(kind, report);
        let stdout = if self.json {
            format_report_json(command, report).to_string()
        } else {
            format_report_summary(kind, report)
        };
        CommandOutput {
            exit_code: report.exit_code(),
            stdout: Some(stdout),
            stderr: (!self.json && !failures.is_empty()).then_some(failures),
        }
    }

    fn handle_test(
        &self,
        args: &BuildArgs,
        no_build: bool,
        no_run: bool,
        extra_pytest_args: &[String],
    ) -> Result<CommandOutput, JauntError> {
        let project = self.load_project()?;

        if !no_build {
            let report = self.build_report(&project, args)?;
            if !report.is_success() {
                return Ok(self.report_output("build", SpecKind::Implementation, &report));
            }
        }

        let impl_set = project.implementation_specs(infer_override(args))?;
        let dependency_apis = implementation_apis(&impl_set);

        let set = project.test_specs(infer_override(args))?;
        if set.is_empty() {
            return Ok(self.test_output(&GenerationReport::default(), ExitCode::Ok, None));
        }
        let scope = project.tests_scope();
        let stale = detect_stale_modules(
            &scope,
            &set.module_specs,
            &set.specs,
            &set.graph,
            &set.module_dag,
            args.force,
        )?;
        let targets = target_modules(&args.targets);
        let selected = select_modules(&set.module_dag, &stale, targets.as_ref(), &set.module_specs);

        let report = if selected.is_empty() {
            nothing_to_do(&set)
        } else {
            let backend = self.backend(&project)?;
            let progress = self.progress(args);
            let run = TestRun {
                scope: &scope,
                module_specs: &set.module_specs,
                specs: &set.specs,
                graph: &set.graph,
                module_dag: &set.module_dag,
                stale: &selected,
                dependency_apis,
                jobs: args.jobs.unwrap_or_else(|| project.config.test_jobs()),
            };
            runtime()?.block_on(run_test_generation(run, backend.as_ref(), progress.as_ref()))?
        };
        if !report.is_success() || no_run {
            return Ok(self.test_output(&report, report.exit_code(), None));
        }

        let in_scope: BTreeSet<String> = match &targets {
            Some(t) => deps_closure(&set.module_dag, t)
                .into_iter()
                .filter(|m| set.module_specs.contains_key(m))
                .collect(),
            None => set.modules(),
        };
        let files = generated_test_files(&scope, &in_scope);
        let mut pytest_args = project.config.test.pytest_args.clone();
        pytest_args.extend(extra_pytest_args.iter().cloned());
        let mut pythonpath = project.source_roots();
        pythonpath.push(project.root.clone());

        let code = run_pytest(
            &project.config.test.python,
            &files,
            &pytest_args,
            &pythonpath,
            Some(&project.root),
        )?;
        let exit_code = if code == 0 { ExitCode::Ok } else { ExitCode::TestFailure };
        Ok(self.test_output(&report, exit_code, Some(code)))
    }

    fn test_output(
        &self,
        report: &GenerationReport,
        exit_code: ExitCode,
        pytest_code: Option<i32>,
    ) -> CommandOutput {
        let failures = format_report_failures(SpecKind::Test, report);
        let stdout = if self.json {
            let mut value = format_report_json("test", report);
            value["ok"] = json!(exit_code == ExitCode::Ok);
            value["exit_code"] = json!(exit_code.as_i32());
            value["pytest_exit_code"] = json!(pytest_code);
            value.to_string()
        } else {
            let mut text = format_report_summary(SpecKind::Test, report);
            if let Some(code) = pytest_code {
                text.push_str(&format!("\npytest exited with status {}", code));
            }
            text
        };
        CommandOutput {
            exit_code,
            stdout: Some(stdout),
            stderr: (!self.json && !failures.is_empty()).then_some(failures),
        }
    }

    fn handle_status(&self, args: &BuildArgs) -> Result<CommandOutput, JauntError> {
        let project = self.load_project()?;
        let set = project.implementation_specs(infer_override(args))?;
        let rows = if set.is_empty() {
            Vec::new()
        } else {
            status_rows(&project, &set, args)?
        };
        if self.json {
            Ok(CommandOutput::ok(format_status_json(&rows).to_string()))
        } else {
            Ok(CommandOutput::ok(format_status_table(&rows)))
        }
    }

    fn handle_clean(&self, dry_run: bool) -> Result<CommandOutput, JauntError> {
        let project = self.load_project()?;
        let dirs = find_generated_dirs(&project.root, project.generated_dir());
        if !dry_run {
            for dir in &dirs {
                fs::remove_dir_all(dir)?;
                info!(path = %dir.display(), "Removed generated directory");
            }
        }
        if self.json {
            Ok(CommandOutput::ok(format_clean_json(&dirs, dry_run).to_string()))
        } else {
            Ok(CommandOutput::ok(format_clean_text(&dirs, dry_run)))
        }
    }

    fn handle_init(&self, force: bool) -> Result<CommandOutput, JauntError> {
        let root = match &self.root {
            Some(root) => root.clone(),
            None => std::env::current_dir()?,
        };
        let toml_path = root.join(CONFIG_FILE_NAME);
        if toml_path.exists() && !force {
            return Err(JauntError::Config(format!(
                "{} already exists at {}. Use --force to overwrite.",
                CONFIG_FILE_NAME,
                toml_path.display()
            )));
        }

        fs::create_dir_all(root.join("src"))?;
        fs::create_dir_all(root.join("tests"))?;
        let content = JauntConfig::for_init().to_toml()?;
        write_atomic(&toml_path, content.as_bytes())?;
        info!(path = %toml_path.display(), "Wrote project config");

        let stdout = if self.json {
            json!({"command": "init", "ok": true, "path": toml_path.display().to_string()}).to_string()
        } else {
            format!("Created {}", toml_path.display())
        };
        Ok(CommandOutput::ok(stdout))
    }
}

fn infer_override(args: &BuildArgs) -> Option<bool> {
    args.no_infer_deps.then_some(false)
}

/// Module part of each `MODULE[:QUALNAME]` target; `None` without targets.
pub fn target_modules(targets: &[String]) -> Option<BTreeSet<String>> {
    let modules: BTreeSet<String> = targets
        .iter()
        .filter_map(|t| t.split(':').next())
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect();
    (!modules.is_empty()).then_some(modules)
}

fn nothing_to_do(set: &SpecSet) -> GenerationReport {
    GenerationReport {
        skipped: set.modules(),
        ..GenerationReport::default()
    }
}

/// Source of every implementation spec, keyed by ref, for test prompts.
fn implementation_apis(set: &SpecSet) -> BTreeMap<SpecRef, String> {
    let mut cache = DigestCache::new();
    set.specs
        .values()
        .filter_map(|entry| {
            cache
                .source_segment(entry)
                .ok()
                .map(|api| (entry.spec_ref.clone(), api))
        })
        .collect()
}

fn status_rows(project: &Project, set: &SpecSet, args: &BuildArgs) -> Result<Vec<StatusRow>, JauntError> {
    let scope = project.implementation_scope()?;
    let mut cache = DigestCache::new();
    let mut states = BTreeMap::new();
    for module in set.module_specs.keys() {
        let state = module_staleness(
            &scope,
            module,
            &set.module_specs,
            &set.specs,
            &set.graph,
            args.force,
            &mut cache,
        )?;
        states.insert(module.clone(), state);
    }

    let directly_stale: BTreeSet<String> = states
        .iter()
        .filter(|(_, s)| s.is_stale())
        .map(|(m, _)| m.clone())
        .collect();
    let stale = expand_stale_modules(&set.module_dag, &directly_stale);
    let allowed = target_modules(&args.targets).map(|t| deps_closure(&set.module_dag, &t));

    let mut rows = Vec::new();
    for (module, entries) in &set.module_specs {
        if allowed.as_ref().is_some_and(|a| !a.contains(module)) {
            continue;
        }
        let handles = resolve_handles(entries, &scope);
        let reason = match states.get(module) {
            Some(state) if state.is_stale() => state.to_string(),
            _ if stale.contains(module) => "dependency stale".to_string(),
            _ => "fresh".to_string(),
        };
        rows.push(StatusRow {
            module: module.clone(),
            stale: stale.contains(module),
            reason,
            specs: entries.len(),
            built: handles.values().filter(|h| h.is_built()).count(),
        });
    }
    Ok(rows)
}

/// Every `<generated_dir>` directory under `root`, not descending into them.
pub fn find_generated_dirs(root: &Path, generated_dir: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut walker = WalkDir::new(root).follow_links(false).sort_by_file_name().into_iter();
    while let Some(entry) = walker.next() {
        let Ok(entry) = entry else {
            continue;
        };
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') || name == "__pycache__" {
            walker.skip_current_dir();
        } else if name == generated_dir {
            found.push(entry.path().to_path_buf());
            walker.skip_current_dir();
        }
    }
    found
}

fn runtime() -> Result<tokio::runtime::Runtime, JauntError> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

/// JSON error payload for `--json` mode.
pub fn error_json(command: &Commands, err: &JauntError) -> Value {
    crate::cli::presentation::format_error_json(command.name(), &err.to_string())
}

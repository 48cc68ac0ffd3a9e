//! Generation Orchestrator
//!
//! Drives the [`Scheduler`] over the stale modules of one artifact kind: builds
//! each module's generation context once its dependencies are done, runs the
//! backend with retry, re-validates the output and writes it atomically into
//! the [`OutputScope`]. Per-module failures are recorded in the report and
//! block their dependents; only graph-integrity errors abort the run.

use crate::deps::{find_cycles, ModuleDag, SpecGraph};
use crate::digest::{module_digest, DigestCache};
use crate::error::{ExitCode, JauntError};
use crate::generate::{GeneratorBackend, ModuleSpecContext, DEFAULT_MAX_ATTEMPTS};
use crate::header::{format_header, tool_version};
use crate::output::OutputScope;
use crate::paths::spec_module_to_generated_module;
use crate::progress::ProgressSink;
use crate::python::validate_generated_source;
use crate::registry::{ModuleSpecs, SpecKind, SpecMap};
use crate::scheduler::Scheduler;
use crate::spec_ref::SpecRef;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Generated source of modules finished earlier in the same run.
///
/// The first completed write for a module wins; later inserts return the
/// stored value so every reader sees one complete source.
#[derive(Debug, Default)]
pub struct GeneratedSources {
    inner: RwLock<BTreeMap<String, Arc<str>>>,
}

impl GeneratedSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, module: &str, source: &str) -> Arc<str> {
        let mut map = self.inner.write();
        map.entry(module.to_string())
            .or_insert_with(|| Arc::from(source))
            .clone()
    }

    pub fn get(&self, module: &str) -> Option<Arc<str>> {
        self.inner.read().get(module).cloned()
    }
}

/// Inputs of one generation run.
pub struct GenerationPlan<'a> {
    pub kind: SpecKind,
    pub scope: &'a OutputScope,
    pub module_specs: &'a ModuleSpecs,
    pub specs: &'a SpecMap,
    pub graph: &'a SpecGraph,
    pub module_dag: &'a ModuleDag,
    /// Modules to regenerate. Anything else in `module_specs` is skipped.
    pub stale: &'a BTreeSet<String>,
    pub jobs: usize,
    pub max_attempts: u32,
    /// API text added to every module's context (implementation specs for tests).
    pub extra_dependency_apis: BTreeMap<SpecRef, String>,
}

impl<'a> GenerationPlan<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: SpecKind,
        scope: &'a OutputScope,
        module_specs: &'a ModuleSpecs,
        specs: &'a SpecMap,
        graph: &'a SpecGraph,
        module_dag: &'a ModuleDag,
        stale: &'a BTreeSet<String>,
        jobs: usize,
    ) -> Self {
        Self {
            kind,
            scope,
            module_specs,
            specs,
            graph,
            module_dag,
            stale,
            jobs: jobs.max(1),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            extra_dependency_apis: BTreeMap::new(),
        }
    }

    pub fn with_dependency_apis(mut self, apis: BTreeMap<SpecRef, String>) -> Self {
        self.extra_dependency_apis = apis;
        self
    }
}

/// Outcome of a generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GenerationReport {
    pub generated: BTreeSet<String>,
    /// Not stale; left untouched.
    pub skipped: BTreeSet<String>,
    /// Module -> human-readable errors.
    pub failed: BTreeMap<String, Vec<String>>,
    /// Module -> failed upstream modules. Never attempted.
    pub blocked: BTreeMap<String, BTreeSet<String>>,
    /// Backend attempts per attempted module.
    pub attempts: BTreeMap<String, u32>,
    /// Output path per generated module.
    pub written: BTreeMap<String, PathBuf>,
}

impl GenerationReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.blocked.is_empty()
    }

    pub fn exit_code(&self) -> ExitCode {
        if self.is_success() {
            ExitCode::Ok
        } else {
            ExitCode::Generation
        }
    }
}

/// Per-module inputs computed before scheduling starts.
struct PreparedModule {
    header: String,
    expected_names: Vec<String>,
    spec_sources: BTreeMap<SpecRef, String>,
    decorator_prompts: BTreeMap<SpecRef, String>,
    dependency_apis: BTreeMap<SpecRef, String>,
}

fn prepare_module(
    plan: &GenerationPlan<'_>,
    module: &str,
    cache: &mut DigestCache,
) -> Result<PreparedModule, JauntError> {
    let entries = plan
        .module_specs
        .get(module)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let digest = module_digest(entries, plan.specs, plan.graph, cache)?;
    let spec_refs: Vec<String> = entries.iter().map(|e| e.spec_ref.to_string()).collect();
    let header = format_header(
        tool_version(),
        plan.kind.artifact_kind(),
        module,
        &digest,
        &spec_refs,
    );

    let mut spec_sources = BTreeMap::new();
    let mut decorator_prompts = BTreeMap::new();
    for entry in entries {
        spec_sources.insert(entry.spec_ref.clone(), cache.source_segment(entry)?);
        if let Some(prompt) = entry.options.prompt.as_ref().filter(|p| !p.is_empty()) {
            decorator_prompts.insert(entry.spec_ref.clone(), prompt.clone());
        }
    }

    let mut dependency_apis = plan.extra_dependency_apis.clone();
    for dep_module in plan.module_dag.get(module).into_iter().flatten() {
        for dep in plan.module_specs.get(dep_module).into_iter().flatten() {
            match cache.source_segment(dep) {
                Ok(api) => {
                    dependency_apis.insert(dep.spec_ref.clone(), api);
                }
                Err(e) => debug!(dependency = %dep.spec_ref, error = %e, "Skipping dependency API"),
            }
        }
    }

    Ok(PreparedModule {
        header,
        expected_names: entries.iter().map(|e| e.expected_name().to_string()).collect(),
        spec_sources,
        decorator_prompts,
        dependency_apis,
    })
}

fn module_context(
    plan: &GenerationPlan<'_>,
    module: &str,
    prepared: &PreparedModule,
    sources: &GeneratedSources,
) -> ModuleSpecContext {
    let mut dependency_generated_modules = BTreeMap::new();
    for dep_module in plan.module_dag.get(module).into_iter().flatten() {
        let source = sources
            .get(dep_module)
            .map(|s| s.to_string())
            .or_else(|| plan.scope.read_generated(dep_module));
        if let Some(source) = source {
            dependency_generated_modules.insert(dep_module.clone(), source);
        }
    }

    ModuleSpecContext {
        kind: plan.kind,
        spec_module: module.to_string(),
        generated_module: spec_module_to_generated_module(module, plan.scope.generated_dir()),
        expected_names: prepared.expected_names.clone(),
        spec_sources: prepared.spec_sources.clone(),
        decorator_prompts: prepared.decorator_prompts.clone(),
        dependency_apis: prepared.dependency_apis.clone(),
        dependency_generated_modules,
    }
}

struct ModuleOutcome {
    module: String,
    attempts: u32,
    result: Result<PathBuf, Vec<String>>,
}

async fn generate_one(
    plan: &GenerationPlan<'_>,
    backend: &dyn GeneratorBackend,
    sources: &GeneratedSources,
    ctx: ModuleSpecContext,
    header: String,
) -> ModuleOutcome {
    let module = ctx.spec_module.clone();
    debug!(module = %module, "Generating module");
    let generation = backend.generate_with_retry(&ctx, plan.max_attempts).await;
    let attempts = generation.attempts;

    let result = match generation.source {
        None if generation.errors.is_empty() => Err(vec!["No source returned.".to_string()]),
        None => Err(generation.errors),
        Some(source) => {
            let errors = validate_generated_source(&source, &ctx.expected_names);
            if !errors.is_empty() {
                Err(errors)
            } else {
                match plan.scope.write_generated_module(&module, &header, &source) {
                    Ok(path) => {
                        sources.insert(&module, &source);
                        Ok(path)
                    }
                    Err(e) => Err(vec![e.to_string()]),
                }
            }
        }
    };

    ModuleOutcome {
        module,
        attempts,
        result,
    }
}

/// Generate every stale module of `plan` in dependency order.
///
/// Returns `Err` only for a dependency cycle; every other failure is scoped to
/// its module and shows up in the report.
pub async fn run_generation(
    plan: &GenerationPlan<'_>,
    backend: &dyn GeneratorBackend,
    progress: &dyn ProgressSink,
) -> Result<GenerationReport, JauntError> {
    let all: BTreeSet<String> = plan.module_specs.keys().cloned().collect();
    let stale: BTreeSet<String> = plan.stale.intersection(&all).cloned().collect();
    let mut report = GenerationReport {
        skipped: all.difference(&stale).cloned().collect(),
        ..GenerationReport::default()
    };
    if stale.is_empty() {
        debug!(skipped = report.skipped.len(), "Nothing to generate");
        return Ok(report);
    }

    let mut scheduler = Scheduler::new(all.iter().cloned(), &stale, plan.module_dag, plan.jobs)?;

    let mut cache = DigestCache::new();
    let mut prepared: BTreeMap<String, PreparedModule> = BTreeMap::new();
    let mut unprepared: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for module in &stale {
        match prepare_module(plan, module, &mut cache) {
            Ok(p) => {
                prepared.insert(module.clone(), p);
            }
            Err(e @ JauntError::DependencyCycle(_)) => return Err(e),
            Err(e) => {
                unprepared.insert(module.clone(), vec![e.to_string()]);
            }
        }
    }

    progress.start(plan.kind.artifact_kind(), stale.len());
    for (module, errors) in unprepared {
        warn!(module = %module, "Cannot prepare module for generation");
        progress.advance(&module, false);
        for blocked in scheduler.mark_failed(&module) {
            progress.advance(&blocked, false);
        }
        report.failed.insert(module, errors);
    }

    let sources = GeneratedSources::new();
    let mut in_flight = FuturesUnordered::new();
    loop {
        while let Some(module) = scheduler.next_ready() {
            let Some(p) = prepared.get(&module) else {
                for blocked in scheduler.mark_failed(&module) {
                    progress.advance(&blocked, false);
                }
                report
                    .failed
                    .insert(module, vec!["Module was not prepared.".to_string()]);
                continue;
            };
            let ctx = module_context(plan, &module, p, &sources);
            in_flight.push(generate_one(plan, backend, &sources, ctx, p.header.clone()));
        }

        let Some(outcome) = in_flight.next().await else {
            break;
        };
        report.attempts.insert(outcome.module.clone(), outcome.attempts);
        match outcome.result {
            Ok(path) => {
                debug!(module = %outcome.module, path = %path.display(), "Module generated");
                scheduler.mark_done(&outcome.module);
                progress.advance(&outcome.module, true);
                report.generated.insert(outcome.module.clone());
                report.written.insert(outcome.module, path);
            }
            Err(errors) => {
                warn!(module = %outcome.module, errors = errors.len(), "Module generation failed");
                progress.advance(&outcome.module, false);
                for blocked in scheduler.mark_failed(&outcome.module) {
                    progress.advance(&blocked, false);
                }
                report.failed.insert(outcome.module, errors);
            }
        }
    }
    progress.finish();

    let stuck = scheduler.stuck();
    if !stuck.is_empty() {
        let remaining: BTreeSet<String> = stuck.into_iter().collect();
        let sub: ModuleDag = remaining
            .iter()
            .map(|m| {
                let deps = plan
                    .module_dag
                    .get(m)
                    .into_iter()
                    .flatten()
                    .filter(|d| remaining.contains(*d))
                    .cloned()
                    .collect();
                (m.clone(), deps)
            })
            .collect();
        return Err(stuck_error(&sub, &remaining));
    }

    report.blocked = scheduler.blocked().clone();
    info!(
        kind = plan.kind.artifact_kind(),
        generated = report.generated.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        blocked = report.blocked.len(),
        "Generation finished"
    );
    Ok(report)
}

/// Cycle error naming every module cycle among `remaining`.
fn stuck_error(sub: &ModuleDag, remaining: &BTreeSet<String>) -> JauntError {
    let cycles = find_cycles(sub);
    if cycles.is_empty() {
        return JauntError::DependencyCycle(format!(
            "Dependency cycle detected among modules: {}",
            remaining.iter().cloned().collect::<Vec<_>>().join(", ")
        ));
    }
    let paths: Vec<String> = cycles
        .iter()
        .map(|c| {
            let mut path = c.clone();
            path.extend(c.first().cloned());
            path.join(" -> ")
        })
        .collect();
    JauntError::DependencyCycle(format!("Dependency cycle detected: {}", paths.join("; ")))
}

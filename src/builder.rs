//! Staleness detection and the implementation build.

use crate::deps::{deps_closure, reverse_edges, ModuleDag, SpecGraph};
use crate::digest::{module_digest, DigestCache};
use crate::error::JauntError;
use crate::generate::GeneratorBackend;
use crate::header::{extract_module_digest, normalize_digest};
use crate::orchestrator::{run_generation, GenerationPlan, GenerationReport};
use crate::output::OutputScope;
use crate::progress::ProgressSink;
use crate::registry::{ModuleSpecs, SpecKind, SpecMap};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

pub type BuildReport = GenerationReport;

/// Why a module needs regeneration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    Fresh,
    Forced,
    MissingArtifact,
    /// Artifact exists but has no readable digest.
    UnreadableArtifact,
    DigestChanged,
    /// The current digest cannot be computed (e.g. source extraction failed).
    DigestUnavailable,
}

impl Staleness {
    pub fn is_stale(self) -> bool {
        self != Staleness::Fresh
    }
}

impl fmt::Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Staleness::Fresh => "fresh",
            Staleness::Forced => "forced",
            Staleness::MissingArtifact => "missing artifact",
            Staleness::UnreadableArtifact => "unreadable artifact",
            Staleness::DigestChanged => "digest changed",
            Staleness::DigestUnavailable => "digest unavailable",
        };
        f.write_str(text)
    }
}

/// Classify one module against its on-disk artifact.
pub fn module_staleness(
    scope: &OutputScope,
    module: &str,
    module_specs: &ModuleSpecs,
    specs: &SpecMap,
    graph: &SpecGraph,
    force: bool,
    cache: &mut DigestCache,
) -> Result<Staleness, JauntError> {
    if force {
        return Ok(Staleness::Forced);
    }
    let path = scope.path_for(module)?;
    if !path.exists() {
        return Ok(Staleness::MissingArtifact);
    }
    let Some(on_disk) = std::fs::read_to_string(&path)
        .ok()
        .and_then(|text| extract_module_digest(&text))
    else {
        return Ok(Staleness::UnreadableArtifact);
    };

    let entries = module_specs.get(module).map(Vec::as_slice).unwrap_or_default();
    let computed = match module_digest(entries, specs, graph, cache) {
        Ok(d) => d,
        Err(e @ JauntError::DependencyCycle(_)) => return Err(e),
        Err(e) => {
            debug!(module, error = %e, "Cannot compute module digest");
            return Ok(Staleness::DigestUnavailable);
        }
    };

    if normalize_digest(&on_disk) == normalize_digest(&computed) {
        Ok(Staleness::Fresh)
    } else {
        Ok(Staleness::DigestChanged)
    }
}

/// Modules whose artifact is missing, outdated, or force-invalidated, plus
/// every module that transitively depends on one of them.
pub fn detect_stale_modules(
    scope: &OutputScope,
    module_specs: &ModuleSpecs,
    specs: &SpecMap,
    graph: &SpecGraph,
    module_dag: &ModuleDag,
    force: bool,
) -> Result<BTreeSet<String>, JauntError> {
    let mut cache = DigestCache::new();
    let mut stale = BTreeSet::new();
    for module in module_specs.keys() {
        let state = module_staleness(scope, module, module_specs, specs, graph, force, &mut cache)?;
        if state.is_stale() {
            debug!(module = %module, reason = ?state, "Module is stale");
            stale.insert(module.clone());
        }
    }
    Ok(expand_stale_modules(module_dag, &stale)
        .into_iter()
        .filter(|m| module_specs.contains_key(m))
        .collect())
}

/// `stale` plus every module that transitively depends on one of them.
pub fn expand_stale_modules(module_dag: &ModuleDag, stale: &BTreeSet<String>) -> BTreeSet<String> {
    deps_closure(&reverse_edges(module_dag), stale)
}

/// The modules a run should regenerate.
///
/// Staleness is propagated to dependents first; with `targets` the result is
/// then restricted to the targets and their transitive dependencies. Only
/// modules that own specs are returned.
pub fn select_modules(
    module_dag: &ModuleDag,
    stale: &BTreeSet<String>,
    targets: Option<&BTreeSet<String>>,
    module_specs: &ModuleSpecs,
) -> BTreeSet<String> {
    let expanded = expand_stale_modules(module_dag, stale);
    let allowed = targets.map(|t| deps_closure(module_dag, t));
    expanded
        .into_iter()
        .filter(|m| module_specs.contains_key(m))
        .filter(|m| allowed.as_ref().map_or(true, |a| a.contains(m)))
        .collect()
}

/// Generate implementation modules for `stale`.
#[allow(clippy::too_many_arguments)]
pub async fn run_build(
    scope: &OutputScope,
    module_specs: &ModuleSpecs,
    specs: &SpecMap,
    graph: &SpecGraph,
    module_dag: &ModuleDag,
    stale: &BTreeSet<String>,
    backend: &dyn GeneratorBackend,
    jobs: usize,
    progress: &dyn ProgressSink,
) -> Result<BuildReport, JauntError> {
    let plan = GenerationPlan::new(
        SpecKind::Implementation,
        scope,
        module_specs,
        specs,
        graph,
        module_dag,
        stale,
        jobs,
    );
    run_generation(&plan, backend, progress).await
}

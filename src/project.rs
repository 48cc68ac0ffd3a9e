//! A loaded project: root, config, and the spec sets collected from it.

use crate::config::{find_project_root, load_config, JauntConfig, CONFIG_FILE_NAME};
use crate::deps::{collapse_to_module_dag, GraphBuilder, ModuleDag, SpecGraph};
use crate::discovery::{collect_specs, discover_modules, DiscoveryOptions, ModuleSource};
use crate::error::JauntError;
use crate::output::OutputScope;
use crate::registry::{ModuleSpecs, SpecKind, SpecMap};
use crate::tester::test_root_prefix;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Specs of one kind with their dependency graph.
#[derive(Debug, Clone)]
pub struct SpecSet {
    pub kind: SpecKind,
    pub specs: SpecMap,
    pub module_specs: ModuleSpecs,
    pub graph: SpecGraph,
    pub module_dag: ModuleDag,
}

impl SpecSet {
    /// Build the spec graph and module DAG for `specs`.
    ///
    /// Dangling explicit dependencies are logged and dropped.
    pub fn new(kind: SpecKind, specs: SpecMap, infer_deps: bool, source_roots: Vec<PathBuf>) -> Self {
        let build = GraphBuilder::new(&specs, infer_deps)
            .with_source_roots(source_roots)
            .build();
        for warning in &build.warnings {
            warn!(kind = %kind, "{}", warning);
        }
        let mut module_dag = collapse_to_module_dag(&build.graph);
        let module_specs = crate::registry::group_by_module(specs.values());
        for module in module_specs.keys() {
            module_dag.entry(module.clone()).or_default();
        }
        Self {
            kind,
            graph: build.graph,
            module_dag,
            module_specs,
            specs,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn modules(&self) -> BTreeSet<String> {
        self.module_specs.keys().cloned().collect()
    }
}

/// Project root plus validated configuration.
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub config: JauntConfig,
}

impl Project {
    /// Load from `root` (or the nearest ancestor of the working directory with
    /// a `jaunt.toml`) and an optional explicit config path.
    pub fn load(root: Option<&Path>, config_path: Option<&Path>) -> Result<Self, JauntError> {
        let root = match root {
            Some(root) => dunce::canonicalize(root).map_err(|e| {
                JauntError::Config(format!("Cannot open project root {}: {}", root.display(), e))
            })?,
            None => {
                let cwd = std::env::current_dir()?;
                find_project_root(&cwd).ok_or_else(|| {
                    JauntError::Config(format!(
                        "Config file not found: no {} in {} or any parent directory",
                        CONFIG_FILE_NAME,
                        cwd.display()
                    ))
                })?
            }
        };
        let config = load_config(&root, config_path)?;
        debug!(root = %root.display(), "Project loaded");
        Ok(Self { root, config })
    }

    pub fn generated_dir(&self) -> &str {
        &self.config.paths.generated_dir
    }

    pub fn source_roots(&self) -> Vec<PathBuf> {
        self.config.source_roots(&self.root)
    }

    pub fn test_roots(&self) -> Vec<PathBuf> {
        self.config.test_roots(&self.root)
    }

    /// Implementation artifacts go under the first existing source root.
    pub fn implementation_scope(&self) -> Result<OutputScope, JauntError> {
        let package_dir = self
            .source_roots()
            .into_iter()
            .next()
            .ok_or_else(|| JauntError::Config("No existing source_roots to build into.".into()))?;
        Ok(OutputScope::implementation(package_dir, self.generated_dir()))
    }

    /// Test artifacts go under `<root>/<tests_package>/<generated_dir>/`.
    pub fn tests_scope(&self) -> OutputScope {
        let packages: BTreeSet<String> = self
            .test_roots()
            .iter()
            .filter_map(|r| test_root_prefix(&self.root, r))
            .filter_map(|p| p.split('.').next().map(str::to_string))
            .collect();
        OutputScope::tests(&self.root, packages, self.generated_dir())
    }

    fn all_roots(&self) -> Vec<PathBuf> {
        let mut roots = self.source_roots();
        roots.extend(self.test_roots());
        roots
    }

    fn discovery_options(&self, module_prefix: Option<String>) -> DiscoveryOptions {
        DiscoveryOptions {
            exclude: Vec::new(),
            generated_dir: self.generated_dir().to_string(),
            module_prefix,
            target_modules: None,
            skip_dirs: self.all_roots(),
        }
    }

    /// Modules under the source roots.
    pub fn implementation_modules(&self) -> Vec<ModuleSource> {
        discover_modules(&self.source_roots(), &self.discovery_options(None))
    }

    /// Modules under the test roots, named with each root's package prefix.
    pub fn test_modules(&self) -> Vec<ModuleSource> {
        let mut modules: Vec<ModuleSource> = Vec::new();
        for root in self.test_roots() {
            let prefix = test_root_prefix(&self.root, &root);
            for module in discover_modules(std::slice::from_ref(&root), &self.discovery_options(prefix)) {
                if !modules.iter().any(|m| m.name == module.name) {
                    modules.push(module);
                }
            }
        }
        modules.sort();
        modules
    }

    /// Collect implementation specs and build their graph.
    pub fn implementation_specs(&self, infer_override: Option<bool>) -> Result<SpecSet, JauntError> {
        let registry = collect_specs(&self.implementation_modules(), SpecKind::Implementation)?;
        let infer = infer_override.unwrap_or(self.config.build.infer_deps);
        Ok(SpecSet::new(
            SpecKind::Implementation,
            registry.specs(SpecKind::Implementation).clone(),
            infer,
            self.source_roots(),
        ))
    }

    /// Collect test specs and build their graph.
    pub fn test_specs(&self, infer_override: Option<bool>) -> Result<SpecSet, JauntError> {
        let registry = collect_specs(&self.test_modules(), SpecKind::Test)?;
        let infer = infer_override.unwrap_or(self.config.test.infer_deps);
        let mut roots = vec![self.root.clone()];
        roots.extend(self.test_roots());
        Ok(SpecSet::new(
            SpecKind::Test,
            registry.specs(SpecKind::Test).clone(),
            infer,
            roots,
        ))
    }
}

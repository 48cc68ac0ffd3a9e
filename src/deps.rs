//! Dependency graph construction
//!
//! Builds a spec-level dependency graph from explicit `deps` declarations plus
//! best-effort inference over name usage, collapses it to module granularity,
//! and orders it topologically.
//!
//! Graphs map a node to the set of nodes it depends on; topological orders put
//! dependencies before dependents.

use crate::error::JauntError;
use crate::paths::package_of;
use crate::python::{collect_name_uses, ParsedModule};
use crate::registry::{SpecEntry, SpecMap};
use crate::spec_ref::{normalize_spec_ref, SpecRef};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub type SpecGraph = BTreeMap<SpecRef, BTreeSet<SpecRef>>;
pub type ModuleDag = BTreeMap<String, BTreeSet<String>>;

/// Result of graph construction.
#[derive(Debug, Clone, Default)]
pub struct GraphBuild {
    pub graph: SpecGraph,
    /// Non-fatal problems: dangling explicit deps and unresolved inferred names.
    pub warnings: Vec<String>,
}

/// Names inferred for one spec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inference {
    pub deps: BTreeSet<SpecRef>,
    /// `(local name, from-import target)` pairs that did not match a known spec.
    pub unresolved: Vec<(String, SpecRef)>,
}

/// Infer dependencies of `entry` from the names its definition uses.
///
/// Total: any lookup failure simply contributes no edge.
pub fn infer_dependencies(parsed: &ParsedModule, entry: &SpecEntry, known: &SpecMap) -> Inference {
    let mut out = Inference::default();
    let Some(def) = parsed.find_nested(&entry.qualname) else {
        return out;
    };
    let uses = collect_name_uses(def.node, parsed.source().as_bytes());
    let imports = parsed.imports();
    let is_candidate = |r: &SpecRef| known.contains_key(r) && *r != entry.spec_ref;

    // `from x import Foo as Bar` then `Bar(...)`
    for name in &uses.names {
        let Some(target) = imports.from_imports.get(name) else {
            continue;
        };
        let Ok(dep) = normalize_spec_ref(target) else {
            continue;
        };
        if is_candidate(&dep) {
            out.deps.insert(dep);
        } else if !known.contains_key(&dep) {
            out.unresolved.push((name.clone(), dep));
        }
    }

    // Sibling definitions in the same module.
    for name in &uses.names {
        if let Ok(candidate) = SpecRef::from_parts(&entry.module, name) {
            if is_candidate(&candidate) {
                out.deps.insert(candidate);
            }
        }
    }

    // `alias.Foo` and `alias.sub.Foo` where alias comes from `import pkg.mod as alias`.
    for (root, attrs) in &uses.attr_chains {
        let Some(module) = imports.module_aliases.get(root) else {
            continue;
        };
        for split in (0..attrs.len()).rev() {
            let mut module_part = module.clone();
            for attr in &attrs[..split] {
                module_part.push('.');
                module_part.push_str(attr);
            }
            let qual_part = attrs[split..].join(".");
            let Ok(candidate) = SpecRef::from_parts(&module_part, &qual_part) else {
                continue;
            };
            if is_candidate(&candidate) {
                out.deps.insert(candidate);
                break;
            }
        }
    }

    out
}

/// Builds the spec dependency graph, memoizing one parse per source file.
pub struct GraphBuilder<'a> {
    specs: &'a SpecMap,
    infer_default: bool,
    source_roots: Vec<PathBuf>,
    parses: HashMap<PathBuf, Option<ParsedModule>>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(specs: &'a SpecMap, infer_default: bool) -> Self {
        Self {
            specs,
            infer_default,
            source_roots: Vec::new(),
            parses: HashMap::new(),
        }
    }

    /// Roots searched when following a one-level package re-export.
    pub fn with_source_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.source_roots = roots;
        self
    }

    pub fn build(mut self) -> GraphBuild {
        let specs = self.specs;
        let mut result = GraphBuild::default();

        for (spec_ref, entry) in specs {
            let mut deps = BTreeSet::new();

            for declared in entry.options.deps.iter().flatten() {
                match declared.normalize() {
                    Ok(dep) if dep == *spec_ref => {}
                    Ok(dep) if specs.contains_key(&dep) => {
                        deps.insert(dep);
                    }
                    Ok(dep) => {
                        let msg = format!("{} declares dependency on unknown spec {}", spec_ref, dep);
                        warn!(spec = %spec_ref, dependency = %dep, "Ignoring dangling dependency");
                        result.warnings.push(msg);
                    }
                    Err(err) => {
                        warn!(spec = %spec_ref, error = %err, "Ignoring malformed dependency");
                        result.warnings.push(format!("{}: {}", spec_ref, err));
                    }
                }
            }

            if entry.options.infer_deps.unwrap_or(self.infer_default) {
                let inference = self.infer_for(entry);
                deps.extend(inference.deps);
                for (name, target) in inference.unresolved {
                    let msg = format!(
                        "unresolved inferred dep: {} uses '{}' (from import {}) but it is not a known spec",
                        spec_ref, name, target
                    );
                    debug!(spec = %spec_ref, name = %name, target = %target, "Unresolved inferred dependency");
                    result.warnings.push(msg);
                }
            }

            result.graph.insert(spec_ref.clone(), deps);
        }

        result
    }

    fn parse_file(&mut self, path: &Path, package: Option<&str>) -> Option<&ParsedModule> {
        if !self.parses.contains_key(path) {
            let parsed = std::fs::read_to_string(path)
                .ok()
                .and_then(|src| ParsedModule::parse(src, package));
            self.parses.insert(path.to_path_buf(), parsed);
        }
        self.parses.get(path).and_then(Option::as_ref)
    }

    fn infer_for(&mut self, entry: &SpecEntry) -> Inference {
        let specs = self.specs;
        let package = package_of(&entry.module, &entry.source_file);
        let package = (!package.is_empty()).then_some(package.as_str());
        let mut inference = match self.parse_file(&entry.source_file, package) {
            Some(parsed) => infer_dependencies(parsed, entry, specs),
            None => return Inference::default(),
        };

        let mut still_unresolved = Vec::new();
        for (name, target) in std::mem::take(&mut inference.unresolved) {
            match self.resolve_reexport(target.module(), target.qualname()) {
                Some(dep) if specs.contains_key(&dep) && dep != entry.spec_ref => {
                    inference.deps.insert(dep);
                }
                _ => still_unresolved.push((name, target)),
            }
        }
        inference.unresolved = still_unresolved;
        inference
    }

    /// Follow `from pkg import Name` through `pkg/__init__.py` one level.
    fn resolve_reexport(&mut self, module: &str, name: &str) -> Option<SpecRef> {
        let roots = self.source_roots.clone();
        for root in roots {
            let mut init = root.clone();
            init.extend(module.split('.'));
            init.push("__init__.py");
            if !init.is_file() {
                continue;
            }
            let Some(parsed) = self.parse_file(&init, Some(module)) else {
                continue;
            };
            if let Some(target) = parsed.imports().from_imports.get(name) {
                return normalize_spec_ref(target).ok();
            }
        }
        None
    }
}

/// Build the spec graph without re-export resolution.
pub fn build_spec_graph(specs: &SpecMap, infer_default: bool) -> GraphBuild {
    GraphBuilder::new(specs, infer_default).build()
}

/// Project the spec graph onto modules, dropping intra-module edges.
pub fn collapse_to_module_dag(graph: &SpecGraph) -> ModuleDag {
    let mut dag: ModuleDag = BTreeMap::new();
    for (spec, deps) in graph {
        let module = spec.module();
        dag.entry(module.to_string()).or_default();
        for dep in deps {
            let dep_module = dep.module();
            dag.entry(dep_module.to_string()).or_default();
            if dep_module != module {
                dag.entry(module.to_string())
                    .or_default()
                    .insert(dep_module.to_string());
            }
        }
    }
    dag
}

fn all_nodes<K: Ord + Clone>(graph: &BTreeMap<K, BTreeSet<K>>) -> BTreeSet<K> {
    let mut nodes: BTreeSet<K> = graph.keys().cloned().collect();
    for deps in graph.values() {
        nodes.extend(deps.iter().cloned());
    }
    nodes
}

fn format_cycle<K: fmt::Display>(cycle: &[K]) -> String {
    let path: Vec<String> = cycle.iter().map(ToString::to_string).collect();
    format!("Dependency cycle detected: {}", path.join(" -> "))
}

/// Depth-first traversal state shared by `toposort` and `find_cycles`.
struct Dfs<'g, K> {
    graph: &'g BTreeMap<K, BTreeSet<K>>,
    done: BTreeSet<K>,
    stack: Vec<K>,
}

impl<'g, K: Ord + Clone> Dfs<'g, K> {
    fn new(graph: &'g BTreeMap<K, BTreeSet<K>>) -> Self {
        Self {
            graph,
            done: BTreeSet::new(),
            stack: Vec::new(),
        }
    }

    /// Visit `node`. `on_cycle` receives each back-edge path (closed, first node repeated);
    /// returning `false` from it aborts the traversal.
    fn visit(
        &mut self,
        node: &K,
        order: &mut Vec<K>,
        on_cycle: &mut dyn FnMut(Vec<K>) -> bool,
    ) -> bool {
        if self.done.contains(node) {
            return true;
        }
        if let Some(i) = self.stack.iter().position(|n| n == node) {
            let mut cycle: Vec<K> = self.stack[i..].to_vec();
            cycle.push(node.clone());
            return on_cycle(cycle);
        }

        self.stack.push(node.clone());
        if let Some(deps) = self.graph.get(node) {
            for dep in deps {
                if !self.visit(dep, order, on_cycle) {
                    return false;
                }
            }
        }
        self.stack.pop();
        self.done.insert(node.clone());
        order.push(node.clone());
        true
    }
}

/// Topologically sort a dependency graph (dependencies first).
///
/// Nodes that only appear as dependencies are included. Ties are broken by
/// node order, so the result is deterministic.
pub fn toposort<K: Ord + Clone + fmt::Display>(
    graph: &BTreeMap<K, BTreeSet<K>>,
) -> Result<Vec<K>, JauntError> {
    let mut dfs = Dfs::new(graph);
    let mut order = Vec::new();
    let mut found: Option<Vec<K>> = None;

    for node in all_nodes(graph) {
        let ok = dfs.visit(&node, &mut order, &mut |cycle: Vec<K>| {
            found = Some(cycle);
            false
        });
        if !ok {
            break;
        }
    }

    match found {
        Some(cycle) => Err(JauntError::DependencyCycle(format_cycle(&cycle))),
        None => Ok(order),
    }
}

/// Every distinct elementary cycle reachable by DFS, each rotated so its
/// smallest node comes first. Empty when the graph is acyclic.
pub fn find_cycles<K: Ord + Clone>(graph: &BTreeMap<K, BTreeSet<K>>) -> Vec<Vec<K>> {
    let mut dfs = Dfs::new(graph);
    let mut order = Vec::new();
    let mut seen: BTreeSet<Vec<K>> = BTreeSet::new();
    let mut cycles = Vec::new();

    for node in all_nodes(graph) {
        dfs.visit(&node, &mut order, &mut |mut cycle: Vec<K>| {
            cycle.pop();
            if let Some(min_idx) = cycle
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.cmp(b.1))
                .map(|(i, _)| i)
            {
                cycle.rotate_left(min_idx);
            }
            if seen.insert(cycle.clone()) {
                cycles.push(cycle);
            }
            true
        });
    }
    cycles
}

/// `roots` plus everything they transitively depend on.
pub fn deps_closure<K: Ord + Clone>(graph: &BTreeMap<K, BTreeSet<K>>, roots: &BTreeSet<K>) -> BTreeSet<K> {
    let mut seen = roots.clone();
    let mut queue: Vec<K> = roots.iter().cloned().collect();
    while let Some(node) = queue.pop() {
        for dep in graph.get(&node).into_iter().flatten() {
            if seen.insert(dep.clone()) {
                queue.push(dep.clone());
            }
        }
    }
    seen
}

/// Invert a dependency graph into `node -> dependents`.
pub fn reverse_edges<K: Ord + Clone>(graph: &BTreeMap<K, BTreeSet<K>>) -> BTreeMap<K, BTreeSet<K>> {
    let mut reversed: BTreeMap<K, BTreeSet<K>> = BTreeMap::new();
    for (node, deps) in graph {
        reversed.entry(node.clone()).or_default();
        for dep in deps {
            reversed.entry(dep.clone()).or_default().insert(node.clone());
        }
    }
    reversed
}

//! Digest Engine
//!
//! Content digests used for staleness decisions. Every digest is a lower-case
//! sha256 hex string and depends only on normalized source text, declared
//! options, and the digests of transitive dependencies.

use crate::deps::SpecGraph;
use crate::error::JauntError;
use crate::paths::package_of;
use crate::python::ParsedModule;
use crate::registry::{SpecEntry, SpecMap};
use crate::spec_ref::SpecRef;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Hash a UTF-8 payload.
pub fn sha256_hex(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

/// `sha256(segment + "\n" + canonical_options)`.
pub fn hash_local(segment: &str, canonical_options: &str) -> String {
    sha256_hex(&format!("{}\n{}", segment, canonical_options))
}

/// `sha256(local + "\n" + sorted dependency digests joined by "\n")`.
pub fn hash_graph(local: &str, dependency_digests: &[String]) -> String {
    let mut sorted: Vec<&str> = dependency_digests.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sha256_hex(&format!("{}\n{}", local, sorted.join("\n")))
}

/// `sha256(sorted spec graph digests joined by "\n")`.
pub fn hash_module(graph_digests: &[String]) -> String {
    let mut sorted: Vec<&str> = graph_digests.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sha256_hex(&sorted.join("\n"))
}

/// Memo shared across digest requests within one build.
///
/// Holds parsed source files, extracted segments, and local/graph digests.
#[derive(Default)]
pub struct DigestCache {
    files: HashMap<PathBuf, Result<ParsedModule, String>>,
    segments: HashMap<SpecRef, String>,
    local: HashMap<SpecRef, String>,
    graph: HashMap<SpecRef, String>,
    visiting: Vec<SpecRef>,
}

impl DigestCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn load(&mut self, path: &Path, package: Option<&str>) -> Result<&ParsedModule, String> {
        if !self.files.contains_key(path) {
            let parsed = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read {}: {}", path.display(), e))
                .and_then(|src| {
                    ParsedModule::parse(src, package)
                        .ok_or_else(|| format!("cannot parse {}", path.display()))
                });
            self.files.insert(path.to_path_buf(), parsed);
        }
        match self.files.get(path) {
            Some(Ok(parsed)) => Ok(parsed),
            Some(Err(e)) => Err(e.clone()),
            None => Err(format!("cannot load {}", path.display())),
        }
    }

    /// Normalized source of the spec's definition, decorators excluded.
    pub fn source_segment(&mut self, entry: &SpecEntry) -> Result<String, JauntError> {
        if let Some(seg) = self.segments.get(&entry.spec_ref) {
            return Ok(seg.clone());
        }
        let extraction_error = |message: String| JauntError::SourceExtraction {
            spec_ref: entry.spec_ref.clone(),
            message,
        };

        let package = package_of(&entry.module, &entry.source_file);
        let package = (!package.is_empty()).then_some(package.as_str());
        let parsed = self
            .load(&entry.source_file, package)
            .map_err(extraction_error)?;
        let def = parsed.find_nested(&entry.qualname).ok_or_else(|| {
            extraction_error(format!("top-level definition not found for {}", entry.spec_ref))
        })?;
        let segment = parsed.source_segment(&def);

        self.segments.insert(entry.spec_ref.clone(), segment.clone());
        Ok(segment)
    }
}

/// Read and normalize the spec's definition source from its file.
pub fn extract_source_segment(entry: &SpecEntry) -> Result<String, JauntError> {
    DigestCache::new().source_segment(entry)
}

/// Local digest of a spec: its normalized source plus canonical options.
pub fn local_digest(entry: &SpecEntry, cache: &mut DigestCache) -> Result<String, JauntError> {
    if let Some(d) = cache.local.get(&entry.spec_ref) {
        return Ok(d.clone());
    }
    let segment = cache.source_segment(entry)?;
    let digest = hash_local(&segment, &entry.options.canonical_json());
    cache.local.insert(entry.spec_ref.clone(), digest.clone());
    Ok(digest)
}

/// Graph digest of a spec, memoized in `cache`.
///
/// A dependency that is already being hashed further up the recursion is a
/// cycle and reported as `DependencyCycle` with the offending path.
pub fn graph_digest(
    spec_ref: &SpecRef,
    specs: &SpecMap,
    graph: &SpecGraph,
    cache: &mut DigestCache,
) -> Result<String, JauntError> {
    if let Some(d) = cache.graph.get(spec_ref) {
        return Ok(d.clone());
    }
    if let Some(i) = cache.visiting.iter().position(|r| r == spec_ref) {
        let mut path: Vec<String> = cache.visiting[i..].iter().map(ToString::to_string).collect();
        path.push(spec_ref.to_string());
        return Err(JauntError::DependencyCycle(format!(
            "Dependency cycle detected while hashing: {}",
            path.join(" -> ")
        )));
    }

    let entry = specs
        .get(spec_ref)
        .ok_or_else(|| JauntError::UnknownSpec(spec_ref.clone()))?;

    cache.visiting.push(spec_ref.clone());
    let result = combine_with_dependencies(entry, specs, graph, cache);
    cache.visiting.retain(|r| r != spec_ref);

    let digest = result?;
    cache.graph.insert(spec_ref.clone(), digest.clone());
    Ok(digest)
}

fn combine_with_dependencies(
    entry: &SpecEntry,
    specs: &SpecMap,
    graph: &SpecGraph,
    cache: &mut DigestCache,
) -> Result<String, JauntError> {
    let local = local_digest(entry, cache)?;
    let mut dep_digests = Vec::new();
    for dep in graph.get(&entry.spec_ref).into_iter().flatten() {
        dep_digests.push(graph_digest(dep, specs, graph, cache)?);
    }
    Ok(hash_graph(&local, &dep_digests))
}

/// Module digest over the graph digests of every spec the module owns.
pub fn module_digest(
    module_specs: &[SpecEntry],
    specs: &SpecMap,
    graph: &SpecGraph,
    cache: &mut DigestCache,
) -> Result<String, JauntError> {
    let digests = module_specs
        .iter()
        .map(|entry| graph_digest(&entry.spec_ref, specs, graph, cache))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(hash_module(&digests))
}

//! Spec Registry
//!
//! In-memory mapping from `SpecRef` to spec metadata. A `Registry` is produced by
//! spec collection and passed explicitly to everything that needs it; it is
//! read-only for the remainder of a build.

use crate::error::JauntError;
use crate::spec_ref::{normalize_spec_ref, SpecRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Which decorator produced a spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecKind {
    Implementation,
    Test,
}

impl SpecKind {
    /// Value written into the generated artifact header.
    pub fn artifact_kind(self) -> &'static str {
        match self {
            SpecKind::Implementation => "build",
            SpecKind::Test => "test",
        }
    }

    /// CLI command that produces artifacts of this kind.
    pub fn build_command(self) -> &'static str {
        match self {
            SpecKind::Implementation => "jaunt build",
            SpecKind::Test => "jaunt test",
        }
    }
}

impl fmt::Display for SpecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecKind::Implementation => f.write_str("implementation"),
            SpecKind::Test => f.write_str("test"),
        }
    }
}

/// Handle to a Python symbol by its defining module and qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub module: String,
    pub qualname: String,
}

impl ObjectRef {
    pub fn new(module: impl Into<String>, qualname: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            qualname: qualname.into(),
        }
    }

    pub fn spec_ref(&self) -> Result<SpecRef, JauntError> {
        SpecRef::from_parts(&self.module, &self.qualname)
    }
}

/// A declared dependency: either a textual identifier or a reference to a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependencyRef {
    Identifier(String),
    Object(ObjectRef),
}

impl DependencyRef {
    /// Resolve to a canonical identifier. This is the single normalization point
    /// for declared dependencies.
    pub fn normalize(&self) -> Result<SpecRef, JauntError> {
        match self {
            DependencyRef::Identifier(raw) => normalize_spec_ref(raw),
            DependencyRef::Object(obj) => obj.spec_ref(),
        }
    }

    /// Identifier string used in digests; falls back to the raw text when the
    /// reference cannot be normalized.
    pub fn digest_key(&self) -> String {
        match self.normalize() {
            Ok(r) => r.to_string(),
            Err(_) => match self {
                DependencyRef::Identifier(raw) => raw.clone(),
                DependencyRef::Object(obj) => format!("{}:{}", obj.module, obj.qualname),
            },
        }
    }
}

/// Options declared on a spec decorator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecOptions {
    /// Explicit dependencies; `None` when the decorator did not declare any.
    pub deps: Option<Vec<DependencyRef>>,
    /// Free-text prompt augmentation.
    pub prompt: Option<String>,
    /// Per-spec override of dependency inference.
    pub infer_deps: Option<bool>,
    /// Any other literal keyword arguments.
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl SpecOptions {
    /// Canonical JSON (sorted keys, compact) with dependencies as identifier strings.
    pub fn canonical_json(&self) -> String {
        let mut map: BTreeMap<String, serde_json::Value> = self.extra.clone();
        if let Some(deps) = &self.deps {
            let mut keys: Vec<String> = deps.iter().map(DependencyRef::digest_key).collect();
            keys.sort();
            map.insert(
                "deps".to_string(),
                serde_json::Value::Array(keys.into_iter().map(serde_json::Value::String).collect()),
            );
        }
        if let Some(prompt) = &self.prompt {
            map.insert("prompt".to_string(), serde_json::Value::String(prompt.clone()));
        }
        if let Some(infer) = self.infer_deps {
            map.insert("infer_deps".to_string(), serde_json::Value::Bool(infer));
        }
        serde_json::to_string(&map).unwrap_or_default()
    }
}

/// One annotated top-level function or class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecEntry {
    pub kind: SpecKind,
    pub spec_ref: SpecRef,
    pub module: String,
    pub qualname: String,
    pub source_file: PathBuf,
    pub object: ObjectRef,
    pub options: SpecOptions,
}

impl SpecEntry {
    pub fn new(
        kind: SpecKind,
        module: &str,
        qualname: &str,
        source_file: impl Into<PathBuf>,
        options: SpecOptions,
    ) -> Result<Self, JauntError> {
        let spec_ref = SpecRef::from_parts(module, qualname)?;
        Ok(Self {
            kind,
            spec_ref,
            module: module.to_string(),
            qualname: qualname.to_string(),
            source_file: source_file.into(),
            object: ObjectRef::new(module, qualname),
            options,
        })
    }

    /// Name the generated module must define for this spec.
    pub fn expected_name(&self) -> &str {
        self.qualname.rsplit('.').next().unwrap_or(&self.qualname)
    }
}

pub type SpecMap = BTreeMap<SpecRef, SpecEntry>;
pub type ModuleSpecs = BTreeMap<String, Vec<SpecEntry>>;

/// Explicit spec registry, one table per kind.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    implementation: SpecMap,
    test: SpecMap,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry. Last registration for a `SpecRef` wins.
    pub fn register(&mut self, entry: SpecEntry) -> Result<(), JauntError> {
        if entry.qualname.contains('.') || entry.qualname.contains("<locals>") {
            return Err(JauntError::discovery(
                &entry.module,
                format!(
                    "specs must be top-level (no nested/inner objects): {}",
                    entry.spec_ref
                ),
            ));
        }
        self.table_mut(entry.kind).insert(entry.spec_ref.clone(), entry);
        Ok(())
    }

    /// Drop every registered spec.
    pub fn clear(&mut self) {
        self.implementation.clear();
        self.test.clear();
    }

    pub fn specs(&self, kind: SpecKind) -> &SpecMap {
        match kind {
            SpecKind::Implementation => &self.implementation,
            SpecKind::Test => &self.test,
        }
    }

    pub fn get(&self, kind: SpecKind, spec_ref: &SpecRef) -> Option<&SpecEntry> {
        self.specs(kind).get(spec_ref)
    }

    pub fn is_empty(&self) -> bool {
        self.implementation.is_empty() && self.test.is_empty()
    }

    /// Group specs by owning module, entries ordered by `(qualname, spec_ref)`.
    pub fn specs_by_module(&self, kind: SpecKind) -> ModuleSpecs {
        group_by_module(self.specs(kind).values())
    }

    /// Merge another registry into this one (later entries win).
    pub fn extend(&mut self, other: Registry) {
        self.implementation.extend(other.implementation);
        self.test.extend(other.test);
    }

    fn table_mut(&mut self, kind: SpecKind) -> &mut SpecMap {
        match kind {
            SpecKind::Implementation => &mut self.implementation,
            SpecKind::Test => &mut self.test,
        }
    }
}

/// Group entries by owning module with stable ordering.
pub fn group_by_module<'a>(entries: impl IntoIterator<Item = &'a SpecEntry>) -> ModuleSpecs {
    let mut grouped: ModuleSpecs = BTreeMap::new();
    for entry in entries {
        grouped
            .entry(entry.module.clone())
            .or_default()
            .push(entry.clone());
    }
    for entries in grouped.values_mut() {
        entries.sort_by(|a, b| {
            a.qualname
                .cmp(&b.qualname)
                .then_with(|| a.spec_ref.cmp(&b.spec_ref))
        });
    }
    grouped
}

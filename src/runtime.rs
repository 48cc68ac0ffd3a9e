//! Runtime spec handles.
//!
//! A [`SpecHandle`] is decided once, from the generated artifact on disk:
//! `Realized` when the artifact's header lists the spec, `Unbuilt` otherwise.
//! Every use of an unbuilt handle is a `NotBuilt` error naming the command
//! that produces it.

use crate::error::JauntError;
use crate::header::parse_header;
use crate::output::OutputScope;
use crate::paths::spec_module_to_generated_module;
use crate::registry::{SpecEntry, SpecKind};
use crate::spec_ref::SpecRef;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// The generated symbol a spec forwards to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    pub generated_module: String,
    pub name: String,
    pub path: PathBuf,
}

impl fmt::Display for ForwardTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.generated_module, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealizedSpec {
    pub spec_ref: SpecRef,
    pub target: ForwardTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnbuiltSpec {
    pub spec_ref: SpecRef,
    pub kind: SpecKind,
}

impl UnbuiltSpec {
    pub fn not_built(&self) -> JauntError {
        JauntError::NotBuilt {
            spec_ref: self.spec_ref.clone(),
            command: self.kind.build_command().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecHandle {
    Realized(RealizedSpec),
    Unbuilt(UnbuiltSpec),
}

impl SpecHandle {
    /// Decide the handle for `entry` from the artifact in `scope`.
    pub fn resolve(entry: &SpecEntry, scope: &OutputScope) -> Self {
        let unbuilt = || {
            SpecHandle::Unbuilt(UnbuiltSpec {
                spec_ref: entry.spec_ref.clone(),
                kind: entry.kind,
            })
        };
        let Ok(path) = scope.path_for(&entry.module) else {
            return unbuilt();
        };
        let Some(header) = std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| parse_header(&text))
        else {
            return unbuilt();
        };
        if !header.spec_refs.iter().any(|r| r == entry.spec_ref.as_str()) {
            return unbuilt();
        }

        SpecHandle::Realized(RealizedSpec {
            spec_ref: entry.spec_ref.clone(),
            target: ForwardTarget {
                generated_module: spec_module_to_generated_module(&entry.module, scope.generated_dir()),
                name: entry.expected_name().to_string(),
                path,
            },
        })
    }

    pub fn spec_ref(&self) -> &SpecRef {
        match self {
            SpecHandle::Realized(r) => &r.spec_ref,
            SpecHandle::Unbuilt(u) => &u.spec_ref,
        }
    }

    pub fn is_built(&self) -> bool {
        matches!(self, SpecHandle::Realized(_))
    }

    pub fn require(&self) -> Result<&RealizedSpec, JauntError> {
        match self {
            SpecHandle::Realized(r) => Ok(r),
            SpecHandle::Unbuilt(u) => Err(u.not_built()),
        }
    }

    /// Target of a call through a function spec.
    pub fn call(&self) -> Result<&ForwardTarget, JauntError> {
        self.require().map(|r| &r.target)
    }

    /// Target of an instantiation through a class spec.
    pub fn instantiate(&self) -> Result<&ForwardTarget, JauntError> {
        self.require().map(|r| &r.target)
    }
}

/// Handles for every spec in `entries`.
pub fn resolve_handles<'a>(
    entries: impl IntoIterator<Item = &'a SpecEntry>,
    scope: &OutputScope,
) -> BTreeMap<SpecRef, SpecHandle> {
    entries
        .into_iter()
        .map(|e| (e.spec_ref.clone(), SpecHandle::resolve(e, scope)))
        .collect()
}

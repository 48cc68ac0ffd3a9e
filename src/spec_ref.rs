//! Stable spec identifiers.
//!
//! A `SpecRef` is the canonical `"<module>:<qualname>"` key of a spec. Both the
//! colon form and the dot shorthand (`pkg.mod.Name`) normalize to the same value.

use crate::error::JauntError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical spec identifier (`pkg.mod:Qualname`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpecRef(String);

impl SpecRef {
    /// Parse and normalize a textual reference.
    pub fn parse(input: &str) -> Result<Self, JauntError> {
        normalize_spec_ref(input)
    }

    /// Build from already-validated parts.
    pub fn from_parts(module: &str, qualname: &str) -> Result<Self, JauntError> {
        normalize_spec_ref(&format!("{}:{}", module, qualname))
    }

    /// Wrap a string without validation. Callers guarantee canonical form.
    pub fn new_unchecked(raw: impl Into<String>) -> Self {
        SpecRef(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Owning module segment.
    pub fn module(&self) -> &str {
        self.0.split_once(':').map(|(m, _)| m).unwrap_or(&self.0)
    }

    /// Qualified-name segment.
    pub fn qualname(&self) -> &str {
        self.0.split_once(':').map(|(_, q)| q).unwrap_or("")
    }
}

impl fmt::Display for SpecRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SpecRef {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// True for a Python identifier (letters, digits, underscore; no leading digit).
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_alphanumeric())
}

fn is_valid_module(module: &str) -> bool {
    !module.is_empty() && module.trim() == module && module.split('.').all(is_identifier)
}

fn is_valid_qualname(qualname: &str) -> bool {
    !qualname.is_empty()
        && qualname.trim() == qualname
        && qualname
            .split('.')
            .all(|part| part == "<locals>" || is_identifier(part))
}

fn invalid(input: &str, reason: &str) -> JauntError {
    JauntError::InvalidSpecRef {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}

/// Normalize a spec reference to canonical `module:qualname` form.
///
/// Colon form passes through after validation (dotted qualnames such as
/// `pkg.mod:Outer.Inner` are allowed). Dot shorthand splits on the last dot.
pub fn normalize_spec_ref(input: &str) -> Result<SpecRef, JauntError> {
    let raw = input.trim();
    if raw.is_empty() {
        return Err(invalid(input, "spec ref must be non-empty"));
    }

    if raw.contains(':') {
        let (module, qualname) = raw
            .split_once(':')
            .ok_or_else(|| invalid(input, "missing ':'"))?;
        if qualname.contains(':') {
            return Err(invalid(input, "spec ref must contain at most one ':'"));
        }
        if !is_valid_module(module) || !is_valid_qualname(qualname) {
            return Err(invalid(input, "invalid module or qualname"));
        }
        return Ok(SpecRef(format!("{}:{}", module, qualname)));
    }

    let (module, qualname) = raw
        .rsplit_once('.')
        .ok_or_else(|| invalid(input, "dot shorthand must contain at least one '.'"))?;
    if !is_valid_module(module) || !is_valid_qualname(qualname) {
        return Err(invalid(input, "invalid module or qualname"));
    }
    Ok(SpecRef(format!("{}:{}", module, qualname)))
}

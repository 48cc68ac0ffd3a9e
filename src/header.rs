//! Generated artifact header.
//!
//! Every generated file starts with a fixed comment block recording the tool
//! version, artifact kind, source module, module digest and realized spec refs.

use std::collections::BTreeMap;

pub const HEADER_MARKER: &str = "# This file was generated by jaunt. DO NOT EDIT.";
const FIELD_PREFIX: &str = "# jaunt:";

/// Parsed header fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArtifactHeader {
    pub tool_version: String,
    pub kind: String,
    pub source_module: String,
    /// Always in `sha256:<hex>` form.
    pub module_digest: String,
    pub spec_refs: Vec<String>,
}

fn prefixed_digest(digest: &str) -> String {
    if digest.starts_with("sha256:") {
        digest.to_string()
    } else {
        format!("sha256:{}", digest)
    }
}

/// Strip an optional `sha256:` prefix.
pub fn normalize_digest(digest: &str) -> &str {
    digest.strip_prefix("sha256:").unwrap_or(digest)
}

fn spec_refs_json(refs: &[String]) -> String {
    let items: Vec<String> = refs
        .iter()
        .map(|r| serde_json::to_string(r).unwrap_or_else(|_| format!("\"{}\"", r)))
        .collect();
    format!("[{}]", items.join(", "))
}

/// Render the header block (no trailing newline).
pub fn format_header(
    tool_version: &str,
    kind: &str,
    source_module: &str,
    module_digest: &str,
    spec_refs: &[String],
) -> String {
    [
        HEADER_MARKER.to_string(),
        format!("{}tool_version={}", FIELD_PREFIX, tool_version),
        format!("{}kind={}", FIELD_PREFIX, kind),
        format!("{}source_module={}", FIELD_PREFIX, source_module),
        format!("{}module_digest={}", FIELD_PREFIX, prefixed_digest(module_digest)),
        format!("{}spec_refs={}", FIELD_PREFIX, spec_refs_json(spec_refs)),
    ]
    .join("\n")
}

/// Parse the header block at the top of `text`; `None` when the marker is absent.
pub fn parse_header(text: &str) -> Option<ArtifactHeader> {
    let mut lines = text.lines();
    if lines.next()?.trim_end() != HEADER_MARKER {
        return None;
    }

    let mut fields: BTreeMap<&str, &str> = BTreeMap::new();
    for line in lines {
        let Some(rest) = line.trim_end().strip_prefix(FIELD_PREFIX) else {
            break;
        };
        if let Some((key, value)) = rest.split_once('=') {
            fields.insert(key, value);
        }
    }

    let get = |key: &str| fields.get(key).map(|v| v.to_string()).unwrap_or_default();
    let spec_refs = fields
        .get("spec_refs")
        .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
        .unwrap_or_default();

    Some(ArtifactHeader {
        tool_version: get("tool_version"),
        kind: get("kind"),
        source_module: get("source_module"),
        module_digest: get("module_digest"),
        spec_refs,
    })
}

/// The `module_digest` field of a generated file, if it has a header.
pub fn extract_module_digest(text: &str) -> Option<String> {
    parse_header(text)
        .map(|h| h.module_digest)
        .filter(|d| !d.is_empty())
}

/// Version string written into headers.
pub fn tool_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

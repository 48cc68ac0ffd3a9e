//! Failure summaries and actionable hints for CLI output.

use crate::error::JauntError;
use owo_colors::OwoColorize;
use std::collections::{BTreeMap, BTreeSet};

fn format_failures(title: &str, failed: &BTreeMap<String, Vec<String>>) -> String {
    if failed.is_empty() {
        return String::new();
    }
    let mut lines = vec![format!("{} {} module(s):\n", title, failed.len())];
    for (module, errors) in failed {
        lines.push(format!("  {}:", module));
        lines.extend(errors.iter().map(|e| format!("    - {}", e)));
        lines.push(String::new());
    }
    format!("{}\n", lines.join("\n").trim_end())
}

pub fn format_build_failures(failed: &BTreeMap<String, Vec<String>>) -> String {
    format_failures("Build failed for", failed)
}

pub fn format_test_generation_failures(failed: &BTreeMap<String, Vec<String>>) -> String {
    format_failures("Test generation failed for", failed)
}

/// One line per blocked module naming the failed upstream modules.
pub fn format_blocked(blocked: &BTreeMap<String, BTreeSet<String>>) -> String {
    if blocked.is_empty() {
        return String::new();
    }
    let mut out = format!("Blocked by failed dependencies ({} module(s)):\n", blocked.len());
    for (module, upstream) in blocked {
        let upstream: Vec<&str> = upstream.iter().map(String::as_str).collect();
        out.push_str(&format!("  {} (waiting on {})\n", module, upstream.join(", ")));
    }
    out
}

/// Actionable hint for a known error kind.
pub fn format_hint(err: &JauntError) -> Option<&'static str> {
    match err {
        JauntError::Config(msg) if msg.contains("Config file not found") => {
            Some("run `jaunt init` to create a new project")
        }
        JauntError::Config(msg) if msg.contains("Missing API key") => {
            Some("export the key in your shell environment before running jaunt")
        }
        JauntError::Config(_) => None,
        JauntError::Discovery { .. } => {
            Some("check that paths.source_roots in jaunt.toml includes the correct directories")
        }
        JauntError::DependencyCycle(_) => Some(
            "break the cycle by removing a `deps=` reference or setting `infer_deps=False` on one spec",
        ),
        JauntError::UserFile(_) => {
            Some("move the hand-written file out of the generated directory or delete it")
        }
        _ => None,
    }
}

/// `error: <message>` plus an optional `hint: <hint>` line.
pub fn format_error_with_hint(err: &JauntError, color: bool) -> String {
    let message = err.to_string();
    let message = message.trim();
    let (error_label, hint_label) = if color {
        (
            format!("{}", "error:".red().bold()),
            format!("{}", "hint:".yellow().bold()),
        )
    } else {
        ("error:".to_string(), "hint:".to_string())
    };

    let mut out = format!("{} {}", error_label, message);
    if let Some(hint) = format_hint(err) {
        out.push_str(&format!("\n{} {}", hint_label, hint));
    }
    out
}

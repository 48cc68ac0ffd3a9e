//! CLI presentation: text and json formatters per command.

use crate::diagnostics::{format_blocked, format_build_failures, format_test_generation_failures};
use crate::orchestrator::GenerationReport;
use crate::registry::SpecKind;
use comfy_table::Table;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;

/// One row of `jaunt status`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusRow {
    pub module: String,
    pub stale: bool,
    pub reason: String,
    pub specs: usize,
    /// Specs whose generated counterpart exists.
    pub built: usize,
}

pub fn format_status_table(rows: &[StatusRow]) -> String {
    if rows.is_empty() {
        return "No specs found.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Module", "State", "Reason", "Built"]);
    for row in rows {
        let state = if row.stale { "stale" } else { "fresh" };
        table.add_row(vec![
            row.module.clone(),
            state.to_string(),
            row.reason.clone(),
            format!("{}/{}", row.built, row.specs),
        ]);
    }
    let stale = rows.iter().filter(|r| r.stale).count();
    format!(
        "{}\n{} stale, {} fresh",
        table,
        stale,
        rows.len() - stale
    )
}

pub fn format_status_json(rows: &[StatusRow]) -> Value {
    let stale: Vec<&str> = rows.iter().filter(|r| r.stale).map(|r| r.module.as_str()).collect();
    let fresh: Vec<&str> = rows.iter().filter(|r| !r.stale).map(|r| r.module.as_str()).collect();
    json!({
        "command": "status",
        "ok": true,
        "stale": stale,
        "fresh": fresh,
        "modules": rows,
    })
}

/// One-line summary of a generation run.
pub fn format_report_summary(kind: SpecKind, report: &GenerationReport) -> String {
    format!(
        "{}: {} generated, {} skipped, {} failed, {} blocked",
        kind.artifact_kind(),
        report.generated.len(),
        report.skipped.len(),
        report.failed.len(),
        report.blocked.len()
    )
}

/// Failure and blocked sections for stderr; empty on success.
pub fn format_report_failures(kind: SpecKind, report: &GenerationReport) -> String {
    let failures = match kind {
        SpecKind::Implementation => format_build_failures(&report.failed),
        SpecKind::Test => format_test_generation_failures(&report.failed),
    };
    [failures, format_blocked(&report.blocked)]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_report_json(command: &str, report: &GenerationReport) -> Value {
    json!({
        "command": command,
        "ok": report.is_success(),
        "generated": report.generated,
        "skipped": report.skipped,
        "failed": report.failed,
        "blocked": report.blocked,
    })
}

pub fn format_clean_text(dirs: &[PathBuf], dry_run: bool) -> String {
    if dirs.is_empty() {
        return "Nothing to clean.".to_string();
    }
    let verb = if dry_run { "Would remove" } else { "Removed" };
    let mut lines = vec![format!("{} {} generated director(ies):", verb, dirs.len())];
    lines.extend(dirs.iter().map(|d| format!("  {}", d.display())));
    lines.join("\n")
}

pub fn format_clean_json(dirs: &[PathBuf], dry_run: bool) -> Value {
    let paths: Vec<String> = dirs.iter().map(|d| d.display().to_string()).collect();
    if dry_run {
        json!({"command": "clean", "ok": true, "dry_run": true, "would_remove": paths})
    } else {
        json!({"command": "clean", "ok": true, "removed": paths})
    }
}

pub fn format_error_json(command: &str, error: &str) -> Value {
    json!({"command": command, "ok": false, "error": error})
}

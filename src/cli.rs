//! CLI domain: parse, route, and presentation only.
//! No domain orchestration; single route table dispatches to domain services.

mod parse;
mod presentation;
mod route;

pub use parse::{BuildArgs, Cli, Commands};
pub use presentation::{
    format_clean_json, format_clean_text, format_error_json, format_report_failures,
    format_report_json, format_report_summary, format_status_json, format_status_table,
    StatusRow,
};
pub use route::{error_json, find_generated_dirs, target_modules, CommandOutput, RunContext};

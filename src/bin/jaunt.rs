//! Jaunt CLI Binary
//!
//! Command-line interface for spec-driven Python code generation.

use clap::Parser;
use jaunt::cli::{error_json, Cli, RunContext};
use jaunt::diagnostics::format_error_with_hint;
use jaunt::logging::{init_logging, LoggingConfig};
use jaunt::project::Project;
use std::io::IsTerminal;
use std::process;
use tracing::{error, info};

fn main() {
    let cli = Cli::parse();

    let logging_config = build_logging_config(&cli);
    if let Err(e) = init_logging(Some(&logging_config)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(2);
    }

    info!(command = cli.command.name(), "Jaunt CLI starting");

    let context = RunContext::new(cli.root.clone(), cli.config.clone(), cli.json);
    match context.execute(&cli.command) {
        Ok(output) => {
            if let Some(stdout) = output.stdout.filter(|s| !s.is_empty()) {
                println!("{}", stdout);
            }
            if let Some(stderr) = output.stderr.filter(|s| !s.is_empty()) {
                eprintln!("{}", stderr);
            }
            info!(exit_code = output.exit_code.as_i32(), "Command completed");
            process::exit(output.exit_code.as_i32());
        }
        Err(e) => {
            error!("Command failed: {}", e);
            let color = !cli.no_color && std::io::stderr().is_terminal();
            eprintln!("{}", format_error_with_hint(&e, color));
            if cli.json {
                println!("{}", error_json(&cli.command, &e));
            }
            process::exit(e.exit_code().as_i32());
        }
    }
}

/// Build logging configuration from CLI args and the project's `[logging]` table.
/// Precedence: CLI flags override config file override defaults.
fn build_logging_config(cli: &Cli) -> LoggingConfig {
    let project = Project::load(cli.root.as_deref(), cli.config.as_deref()).ok();
    let mut config = project
        .as_ref()
        .map(|p| p.config.logging.clone())
        .unwrap_or_default();

    if cli.verbose {
        config.level = "debug".to_string();
    }
    if let Some(ref level) = cli.log_level {
        config.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        config.format = format.clone();
    }
    if cli.no_color {
        config.color = false;
    }
    if let Some(ref file) = cli.log_file {
        config.output = "file".to_string();
        config.file = Some(file.clone());
    } else if let (Some(project), Some(file)) = (project.as_ref(), config.file.as_ref()) {
        if file.is_relative() {
            config.file = Some(project.root.join(file));
        }
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_build_logging_config_default() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().to_string_lossy();
        let cli = Cli::try_parse_from(["jaunt", "--root", root.as_ref(), "status"]).unwrap();
        let config = build_logging_config(&cli);
        assert_eq!(config.level, "warn");
        assert_eq!(config.output, "stderr");
    }

    #[test]
    fn test_build_logging_config_verbose_and_overrides() {
        let cli = Cli::try_parse_from(["jaunt", "--verbose", "build"]).unwrap();
        assert_eq!(build_logging_config(&cli).level, "debug");

        let cli = Cli::try_parse_from([
            "jaunt",
            "--verbose",
            "--log-level",
            "trace",
            "--log-format",
            "json",
            "--log-file",
            "/tmp/jaunt.log",
            "build",
        ])
        .unwrap();
        let config = build_logging_config(&cli);
        assert_eq!(config.level, "trace");
        assert_eq!(config.format, "json");
        assert_eq!(config.output, "file");
        assert_eq!(config.file, Some(PathBuf::from("/tmp/jaunt.log")));
    }

    #[test]
    fn test_build_logging_config_reads_project_table() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("src")).unwrap();
        std::fs::write(
            temp.path().join("jaunt.toml"),
            "version = 1\n[logging]\nlevel = \"info\"\nfile = \"logs/jaunt.log\"\n",
        )
        .unwrap();
        let root = temp.path().to_string_lossy();
        let cli = Cli::try_parse_from(["jaunt", "--root", root.as_ref(), "status"]).unwrap();
        let config = build_logging_config(&cli);
        assert_eq!(config.level, "info");
        let file = config.file.unwrap();
        assert!(file.is_absolute());
        assert!(file.ends_with("logs/jaunt.log"));
    }
}

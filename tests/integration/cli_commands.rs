//! Command routing, exit codes and output through `RunContext`.

use jaunt::cli::{BuildArgs, Commands, RunContext};
use jaunt::error::{ExitCode, JauntError};
use serde_json::Value;
use std::sync::Arc;

use crate::integration::test_utils::{chain_project, empty_project, magic_module, write, FakeBackend, Reply};

fn context(dir: &tempfile::TempDir, json: bool, backend: FakeBackend) -> (RunContext, Arc<FakeBackend>) {
    let backend = Arc::new(backend);
    let ctx = RunContext::new(Some(dir.path().to_path_buf()), None, json).with_backend(backend.clone());
    (ctx, backend)
}

fn build_args() -> BuildArgs {
    BuildArgs {
        no_progress: true,
        ..BuildArgs::default()
    }
}

fn json(out: &jaunt::cli::CommandOutput) -> Value {
    serde_json::from_str(out.stdout.as_deref().unwrap()).unwrap()
}

#[test]
fn test_build_then_rebuild_skips_everything() {
    let dir = chain_project();
    let (ctx, backend) = context(&dir, false, FakeBackend::new());

    let out = ctx.execute(&Commands::Build(build_args())).unwrap();
    assert_eq!(out.exit_code, ExitCode::Ok);
    assert_eq!(
        out.stdout.as_deref(),
        Some("build: 2 generated, 0 skipped, 0 failed, 0 blocked")
    );
    assert_eq!(backend.call_count(), 2);

    let out = ctx.execute(&Commands::Build(build_args())).unwrap();
    assert_eq!(
        out.stdout.as_deref(),
        Some("build: 0 generated, 2 skipped, 0 failed, 0 blocked")
    );
    assert_eq!(backend.call_count(), 2);
}

#[test]
fn test_build_failure_exits_three() {
    let dir = chain_project();
    let (ctx, _) = context(&dir, false, FakeBackend::new().script("pkg.a", [Reply::Invalid, Reply::Invalid]));

    let out = ctx.execute(&Commands::Build(build_args())).unwrap();
    assert_eq!(out.exit_code, ExitCode::Generation);
    let stderr = out.stderr.unwrap();
    assert!(stderr.starts_with("Build failed for 1 module(s):"));
    assert!(stderr.contains("pkg.b (waiting on pkg.a)"));
}

#[test]
fn test_build_json_report() {
    let dir = chain_project();
    let (ctx, _) = context(&dir, true, FakeBackend::new());
    let out = ctx.execute(&Commands::Build(build_args())).unwrap();
    let value = json(&out);
    assert_eq!(value["command"], "build");
    assert_eq!(value["ok"], true);
    assert_eq!(value["generated"], serde_json::json!(["pkg.a", "pkg.b"]));
    assert!(out.stderr.is_none());
}

#[test]
fn test_force_with_target_rebuilds_closure_only() {
    let dir = chain_project();
    magic_module(dir.path(), "c", "other", &[]);
    let (ctx, backend) = context(&dir, false, FakeBackend::new());
    ctx.execute(&Commands::Build(build_args())).unwrap();
    assert_eq!(backend.call_count(), 3);

    let args = BuildArgs {
        force: true,
        targets: vec!["pkg.b:top".to_string()],
        ..build_args()
    };
    ctx.execute(&Commands::Build(args)).unwrap();
    let calls = backend.calls();
    assert_eq!(&calls[3..], &["pkg.a".to_string(), "pkg.b".to_string()]);
}

#[test]
fn test_cycle_exits_two() {
    let dir = empty_project();
    magic_module(dir.path(), "a", "fa", &["pkg.b:fb"]);
    magic_module(dir.path(), "b", "fb", &["pkg.a:fa"]);
    let (ctx, backend) = context(&dir, false, FakeBackend::new());

    let err = ctx.execute(&Commands::Build(build_args())).unwrap_err();
    assert!(matches!(err, JauntError::DependencyCycle(_)));
    assert_eq!(err.exit_code(), ExitCode::ConfigOrDiscovery);
    assert_eq!(backend.call_count(), 0);
}

#[test]
fn test_missing_config_exits_two() {
    let dir = tempfile::TempDir::new().unwrap();
    let (ctx, _) = context(&dir, false, FakeBackend::new());
    let err = ctx.execute(&Commands::Build(build_args())).unwrap_err();
    assert_eq!(err.exit_code(), ExitCode::ConfigOrDiscovery);
}

#[test]
fn test_status_reports_stale_then_fresh() {
    let dir = chain_project();
    let (ctx, _) = context(&dir, true, FakeBackend::new());

    let value = json(&ctx.execute(&Commands::Status(build_args())).unwrap());
    assert_eq!(value["stale"], serde_json::json!(["pkg.a", "pkg.b"]));
    assert_eq!(value["modules"][0]["reason"], "missing artifact");
    assert_eq!(value["modules"][0]["built"], 0);

    ctx.execute(&Commands::Build(build_args())).unwrap();
    let value = json(&ctx.execute(&Commands::Status(build_args())).unwrap());
    assert_eq!(value["stale"], serde_json::json!([]));
    assert_eq!(value["modules"][1]["built"], 1);
}

#[test]
fn test_test_command_without_run() {
    let dir = chain_project();
    write(
        dir.path(),
        "tests/test_top.py",
        "import jaunt\n\n\n@jaunt.test()\ndef test_top():\n    \"\"\"top(1) == 3.\"\"\"\n",
    );
    let (ctx, backend) = context(&dir, true, FakeBackend::new());
    let command = Commands::Test {
        build: build_args(),
        no_build: false,
        no_run: true,
        pytest_args: Vec::new(),
    };

    let out = ctx.execute(&command).unwrap();
    assert_eq!(out.exit_code, ExitCode::Ok);
    let value = json(&out);
    assert_eq!(value["command"], "test");
    assert_eq!(value["generated"], serde_json::json!(["tests.test_top"]));
    assert_eq!(
        backend.calls(),
        vec!["pkg.a".to_string(), "pkg.b".to_string(), "tests.test_top".to_string()]
    );
    assert!(dir.path().join("tests/__generated__/test_top.py").is_file());
}

#[test]
fn test_test_command_stops_on_build_failure() {
    let dir = chain_project();
    let (ctx, backend) = context(&dir, false, FakeBackend::new().script("pkg.b", [Reply::Empty, Reply::Empty]));
    let command = Commands::Test {
        build: build_args(),
        no_build: false,
        no_run: false,
        pytest_args: Vec::new(),
    };
    let out = ctx.execute(&command).unwrap();
    assert_eq!(out.exit_code, ExitCode::Generation);
    assert_eq!(backend.call_count(), 3);
}

#[test]
fn test_clean_removes_generated_dirs() {
    let dir = chain_project();
    let (ctx, _) = context(&dir, true, FakeBackend::new());
    ctx.execute(&Commands::Build(build_args())).unwrap();
    let generated = dir.path().join("src/pkg/__generated__");
    assert!(generated.is_dir());

    let value = json(&ctx.execute(&Commands::Clean { dry_run: true }).unwrap());
    assert_eq!(value["would_remove"].as_array().unwrap().len(), 1);
    assert!(generated.is_dir());

    let value = json(&ctx.execute(&Commands::Clean { dry_run: false }).unwrap());
    assert_eq!(value["removed"].as_array().unwrap().len(), 1);
    assert!(!generated.exists());
    assert!(dir.path().join("src/pkg/a.py").is_file());
}

//! End-to-end builds against a scripted backend.

use jaunt::builder::{detect_stale_modules, run_build, select_modules, BuildReport};
use jaunt::error::ExitCode;
use jaunt::generate::GeneratorBackend;
use jaunt::progress::NoProgress;
use jaunt::project::{Project, SpecSet};

use crate::integration::test_utils::{
    chain_project, diamond_project, empty_project, load, magic_module, set, FakeBackend, Reply,
    SlowBackend,
};

async fn build(project: &Project, specs: &SpecSet, backend: &dyn GeneratorBackend, jobs: usize) -> BuildReport {
    let scope = project.implementation_scope().unwrap();
    let stale = detect_stale_modules(&scope, &specs.module_specs, &specs.specs, &specs.graph, &specs.module_dag, false).unwrap();
    let selected = select_modules(&specs.module_dag, &stale, None, &specs.module_specs);
    run_build(
        &scope,
        &specs.module_specs,
        &specs.specs,
        &specs.graph,
        &specs.module_dag,
        &selected,
        backend,
        jobs,
        &NoProgress,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_dependency_generated_before_dependent() {
    let dir = chain_project();
    let (project, specs) = load(&dir);
    let backend = FakeBackend::new();

    let report = build(&project, &specs, &backend, 1).await;

    assert_eq!(backend.calls(), vec!["pkg.a".to_string(), "pkg.b".to_string()]);
    assert_eq!(report.generated, set(&["pkg.a", "pkg.b"]));
    assert!(report.is_success());
    assert!(dir.path().join("src/pkg/__generated__/a.py").is_file());
    assert!(dir.path().join("src/pkg/__generated__/b.py").is_file());

    let ctx = backend.last_context_for("pkg.b").unwrap();
    assert!(ctx.dependency_generated_modules.contains_key("pkg.a"));
    assert!(ctx
        .dependency_apis
        .keys()
        .any(|r| r.as_str() == "pkg.a:base"));
}

#[tokio::test]
async fn test_second_build_calls_backend_zero_times() {
    let dir = chain_project();
    let (project, specs) = load(&dir);
    build(&project, &specs, &FakeBackend::new(), 2).await;

    let backend = FakeBackend::new();
    let report = build(&project, &specs, &backend, 2).await;

    assert_eq!(backend.call_count(), 0);
    assert!(report.generated.is_empty());
    assert_eq!(report.skipped, set(&["pkg.a", "pkg.b"]));
    assert_eq!(report.exit_code(), ExitCode::Ok);
}

#[tokio::test]
async fn test_retry_succeeds_on_second_attempt() {
    let dir = chain_project();
    let (project, specs) = load(&dir);
    let backend = FakeBackend::new().script("pkg.a", [Reply::Invalid, Reply::Valid]);

    let report = build(&project, &specs, &backend, 1).await;

    assert!(report.generated.contains("pkg.a"));
    assert_eq!(report.attempts["pkg.a"], 2);
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn test_failed_module_blocks_dependents() {
    let dir = chain_project();
    let (project, specs) = load(&dir);
    let backend = FakeBackend::new().script("pkg.a", [Reply::Empty, Reply::Empty]);

    let report = build(&project, &specs, &backend, 1).await;

    assert!(!report.failed["pkg.a"].is_empty());
    assert!(report.failed["pkg.a"][0].contains("base"));
    assert_eq!(report.blocked["pkg.b"], set(&["pkg.a"]));
    assert!(!report.failed.contains_key("pkg.b"));
    assert!(!report.generated.contains("pkg.b"));
    assert_eq!(backend.calls(), vec!["pkg.a".to_string(), "pkg.a".to_string()]);
    assert_eq!(report.exit_code(), ExitCode::Generation);
    assert!(!dir.path().join("src/pkg/__generated__/a.py").exists());
}

#[tokio::test]
async fn test_backend_errors_consume_attempts() {
    let dir = chain_project();
    let (project, specs) = load(&dir);
    let backend = FakeBackend::new().script(
        "pkg.b",
        [Reply::Error("rate limited".into()), Reply::Error("rate limited".into())],
    );

    let report = build(&project, &specs, &backend, 1).await;

    assert!(report.generated.contains("pkg.a"));
    assert_eq!(report.attempts["pkg.b"], 2);
    assert!(report.failed["pkg.b"][0].contains("rate limited"));
}

#[tokio::test]
async fn test_diamond_respects_order_at_any_concurrency() {
    for jobs in [1, 2, 4] {
        let dir = diamond_project();
        let (project, specs) = load(&dir);
        let backend = FakeBackend::new();

        let report = build(&project, &specs, &backend, jobs).await;

        let calls = backend.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls.first().map(String::as_str), Some("pkg.a"));
        assert_eq!(calls.last().map(String::as_str), Some("pkg.d"));
        assert_eq!(report.generated.len(), 4);
    }
}

#[tokio::test]
async fn test_diamond_failure_blocks_only_downstream() {
    let dir = diamond_project();
    let (project, specs) = load(&dir);
    let backend = FakeBackend::new().script("pkg.b", [Reply::Invalid, Reply::Invalid]);

    let report = build(&project, &specs, &backend, 2).await;

    assert_eq!(report.generated, set(&["pkg.a", "pkg.c"]));
    assert!(report.failed.contains_key("pkg.b"));
    assert_eq!(report.blocked["pkg.d"], set(&["pkg.b"]));
    assert!(!backend.calls().contains(&"pkg.d".to_string()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_jobs_bounds_suspended_backend_calls() {
    let dir = empty_project();
    for name in ["a", "b", "c", "d", "e"] {
        magic_module(dir.path(), name, &format!("f{}", name), &[]);
    }
    let (project, specs) = load(&dir);
    let backend = SlowBackend::new();

    let report = build(&project, &specs, &backend, 2).await;

    assert!(report.is_success());
    assert_eq!(report.generated, set(&["pkg.a", "pkg.b", "pkg.c", "pkg.d", "pkg.e"]));
    assert_eq!(backend.finished(), 5);
    assert_eq!(backend.peak(), 2);
}

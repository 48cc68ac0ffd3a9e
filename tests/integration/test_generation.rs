//! Test-spec generation writes only into the tests generated tree.

use jaunt::builder::detect_stale_modules;
use jaunt::header::parse_header;
use jaunt::progress::NoProgress;
use jaunt::project::Project;
use jaunt::tester::{generated_test_files, run_test_generation, TestRun};
use std::collections::BTreeMap;

use crate::integration::test_utils::{chain_project, set, write, FakeBackend};

const TEST_SPEC: &str = "import jaunt\n\n\n@jaunt.test()\ndef test_top():\n    \"\"\"top(1) equals base(1) + 1.\"\"\"\n";

#[tokio::test]
async fn test_generation_targets_tests_tree() {
    let dir = chain_project();
    write(dir.path(), "tests/test_top.py", TEST_SPEC);
    let project = Project::load(Some(dir.path()), None).unwrap();
    let specs = project.test_specs(None).unwrap();
    assert_eq!(specs.modules(), set(&["tests.test_top"]));

    let scope = project.tests_scope();
    let stale = detect_stale_modules(&scope, &specs.module_specs, &specs.specs, &specs.graph, &specs.module_dag, false).unwrap();
    let api_ref = jaunt::spec_ref::SpecRef::parse("pkg.b:top").unwrap();
    let apis: BTreeMap<_, _> = [(api_ref.clone(), "def top(x: int) -> int: ...".to_string())].into();
    let backend = FakeBackend::new();

    let run = TestRun {
        scope: &scope,
        module_specs: &specs.module_specs,
        specs: &specs.specs,
        graph: &specs.graph,
        module_dag: &specs.module_dag,
        stale: &stale,
        dependency_apis: apis,
        jobs: 1,
    };
    let report = run_test_generation(run, &backend, &NoProgress).await.unwrap();

    assert_eq!(report.generated, set(&["tests.test_top"]));
    let out = dir.path().join("tests/__generated__/test_top.py");
    let header = parse_header(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(header.kind, "test");
    assert_eq!(header.spec_refs, vec!["tests.test_top:test_top".to_string()]);
    assert!(!dir.path().join("src/pkg/__generated__").exists());

    let ctx = backend.last_context_for("tests.test_top").unwrap();
    assert_eq!(ctx.expected_names, vec!["test_top".to_string()]);
    assert!(ctx.dependency_apis.contains_key(&api_ref));

    let files = generated_test_files(&scope, &specs.modules());
    assert_eq!(files.len(), 1);
    assert!(files[0].ends_with("tests/__generated__/test_top.py"));
}

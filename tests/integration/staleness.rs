//! Digest-driven staleness across source edits and targets.

use jaunt::builder::{detect_stale_modules, module_staleness, run_build, select_modules, Staleness};
use jaunt::digest::DigestCache;
use jaunt::progress::NoProgress;
use jaunt::project::{Project, SpecSet};
use std::collections::BTreeSet;

use crate::integration::test_utils::{diamond_project, load, magic_module, set, write, FakeBackend};

fn stale(project: &Project, specs: &SpecSet) -> BTreeSet<String> {
    let scope = project.implementation_scope().unwrap();
    detect_stale_modules(&scope, &specs.module_specs, &specs.specs, &specs.graph, &specs.module_dag, false).unwrap()
}

fn build_all(project: &Project, specs: &SpecSet) {
    let scope = project.implementation_scope().unwrap();
    let modules = specs.modules();
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    let report = runtime
        .block_on(run_build(
            &scope,
            &specs.module_specs,
            &specs.specs,
            &specs.graph,
            &specs.module_dag,
            &modules,
            &FakeBackend::new(),
            2,
            &NoProgress,
        ))
        .unwrap();
    assert!(report.is_success());
}

#[test]
fn test_everything_stale_before_first_build() {
    let dir = diamond_project();
    let (project, specs) = load(&dir);
    assert_eq!(stale(&project, &specs), set(&["pkg.a", "pkg.b", "pkg.c", "pkg.d"]));
}

#[test]
fn test_docstring_edit_propagates_to_dependents() {
    let dir = diamond_project();
    let (project, specs) = load(&dir);
    build_all(&project, &specs);
    assert!(stale(&project, &specs).is_empty());

    write(
        dir.path(),
        "src/pkg/b.py",
        "import jaunt\n\n\n@jaunt.magic(deps=[\"pkg.a:fa\"])\ndef fb(x: int) -> int:\n    \"\"\"A different contract.\"\"\"\n    raise RuntimeError(\"spec stub\")\n",
    );
    let (project, specs) = load(&dir);
    let edited = stale(&project, &specs);
    // d's graph digest folds in b's, so d is stale on its own.
    assert_eq!(edited, set(&["pkg.b", "pkg.d"]));
    assert_eq!(
        select_modules(&specs.module_dag, &edited, None, &specs.module_specs),
        set(&["pkg.b", "pkg.d"])
    );
}

#[test]
fn test_body_only_edit_is_still_a_change() {
    let dir = diamond_project();
    let (project, specs) = load(&dir);
    build_all(&project, &specs);

    magic_module(dir.path(), "c", "fc", &["pkg.a:fa"]);
    let (project, specs) = load(&dir);
    assert!(stale(&project, &specs).is_empty(), "identical rewrite keeps digests");

    write(
        dir.path(),
        "src/pkg/c.py",
        "import jaunt\n\n\n@jaunt.magic(deps=[\"pkg.a:fa\"])\ndef fc(x: int) -> int:\n    \"\"\"Compute fc of x.\"\"\"\n    return x\n",
    );
    let (project, specs) = load(&dir);
    assert_eq!(stale(&project, &specs), set(&["pkg.c", "pkg.d"]));
}

#[test]
fn test_targets_restrict_to_dependency_closure() {
    let dir = diamond_project();
    let (project, specs) = load(&dir);
    let all = stale(&project, &specs);

    let targets = set(&["pkg.b"]);
    assert_eq!(
        select_modules(&specs.module_dag, &all, Some(&targets), &specs.module_specs),
        set(&["pkg.a", "pkg.b"])
    );
}

#[test]
fn test_hand_edited_digest_reports_change() {
    let dir = diamond_project();
    let (project, specs) = load(&dir);
    build_all(&project, &specs);

    let path = dir.path().join("src/pkg/__generated__/a.py");
    let text = std::fs::read_to_string(&path).unwrap();
    let tampered: String = text
        .lines()
        .map(|line| {
            if line.contains("module_digest=") {
                "# jaunt:module_digest=sha256:0000".to_string()
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    std::fs::write(&path, tampered).unwrap();

    let scope = project.implementation_scope().unwrap();
    let state = module_staleness(
        &scope,
        "pkg.a",
        &specs.module_specs,
        &specs.specs,
        &specs.graph,
        false,
        &mut DigestCache::new(),
    )
    .unwrap();
    assert_eq!(state, Staleness::DigestChanged);
}

#[test]
fn test_missing_artifact_restales_dependents() {
    let dir = diamond_project();
    let (project, specs) = load(&dir);
    build_all(&project, &specs);

    std::fs::remove_file(dir.path().join("src/pkg/__generated__/a.py")).unwrap();
    let (project, specs) = load(&dir);
    let scope = project.implementation_scope().unwrap();
    let state = module_staleness(
        &scope,
        "pkg.b",
        &specs.module_specs,
        &specs.specs,
        &specs.graph,
        false,
        &mut DigestCache::new(),
    )
    .unwrap();
    assert_eq!(state, Staleness::Fresh, "b's own artifact is untouched");

    assert_eq!(stale(&project, &specs), set(&["pkg.a", "pkg.b", "pkg.c", "pkg.d"]));
    build_all(&project, &specs);
    assert!(stale(&project, &specs).is_empty());
}

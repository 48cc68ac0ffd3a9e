//! Generated files never clobber user files and are replaced atomically.

use jaunt::builder::run_build;
use jaunt::header::parse_header;
use jaunt::output::{write_atomic, OutputScope};
use jaunt::progress::NoProgress;
use std::fs;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::integration::test_utils::{chain_project, load, set, FakeBackend};

fn build(dir: &tempfile::TempDir) -> jaunt::builder::BuildReport {
    let (project, specs) = load(dir);
    let scope = project.implementation_scope().unwrap();
    let modules = specs.modules();
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(run_build(
            &scope,
            &specs.module_specs,
            &specs.specs,
            &specs.graph,
            &specs.module_dag,
            &modules,
            &FakeBackend::new(),
            1,
            &NoProgress,
        ))
        .unwrap()
}

#[test]
fn test_user_file_at_output_path_fails_module() {
    let dir = chain_project();
    let user_file = dir.path().join("src/pkg/__generated__/a.py");
    fs::create_dir_all(user_file.parent().unwrap()).unwrap();
    fs::write(&user_file, "# my own code\n").unwrap();

    let report = build(&dir);

    assert!(report.failed.contains_key("pkg.a"));
    assert!(report.failed["pkg.a"][0].contains("a.py"));
    assert_eq!(report.blocked["pkg.b"], set(&["pkg.a"]));
    assert_eq!(fs::read_to_string(&user_file).unwrap(), "# my own code\n");
}

#[test]
fn test_rebuild_replaces_file_and_leaves_no_temp_files() {
    let dir = chain_project();
    assert!(build(&dir).is_success());
    let out = dir.path().join("src/pkg/__generated__/b.py");
    let first = fs::read_to_string(&out).unwrap();

    assert!(build(&dir).is_success());
    let second = fs::read_to_string(&out).unwrap();
    assert_eq!(first, second);

    let header = parse_header(&second).unwrap();
    assert_eq!(header.kind, "build");
    assert_eq!(header.source_module, "pkg.b");
    assert_eq!(header.spec_refs, vec!["pkg.b:top".to_string()]);

    let names: Vec<String> = fs::read_dir(out.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(sorted, vec!["__init__.py", "a.py", "b.py"]);
}

#[test]
fn test_tests_scope_refuses_modules_outside_tests_package() {
    let dir = tempfile::TempDir::new().unwrap();
    let scope = OutputScope::tests(dir.path(), ["tests"], "__generated__");
    assert!(scope.relpath("tests.test_x").is_ok());
    assert!(scope.relpath("pkg.test_x").is_err());
    assert!(scope.relpath("tests").is_err());
    assert!(scope
        .write_generated_module("other.test_x", "# header", "x = 1")
        .is_err());
    assert!(!dir.path().join("other").exists());
}

#[test]
fn test_concurrent_reader_sees_only_whole_files() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("pkg/__generated__/mod.py");
    let old = "# old\n".repeat(20_000);
    let new = "# new\n".repeat(30_000);
    write_atomic(&path, old.as_bytes()).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let reader = {
        let (path, old, new, stop) = (path.clone(), old.clone(), new.clone(), stop.clone());
        thread::spawn(move || {
            let mut reads = 0usize;
            loop {
                let done = stop.load(Ordering::SeqCst);
                match fs::read_to_string(&path) {
                    Ok(text) => {
                        assert!(text == old || text == new, "torn read of {} bytes", text.len());
                        reads += 1;
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => panic!("read failed: {}", e),
                }
                if done {
                    return reads;
                }
            }
        })
    };

    for i in 0..50 {
        let content = if i % 2 == 0 { &new } else { &old };
        write_atomic(&path, content.as_bytes()).unwrap();
    }
    stop.store(true, Ordering::SeqCst);

    assert!(reader.join().unwrap() > 0);
    let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
    assert_eq!(leftovers.len(), 1);
}

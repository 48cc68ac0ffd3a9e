//! Shared test utilities for integration tests
//!
//! Provides a scripted generation backend and helpers that lay out small
//! Python projects in temporary directories.

use async_trait::async_trait;
use jaunt::error::JauntError;
use jaunt::generate::{GeneratorBackend, ModuleSpecContext};
use jaunt::project::{Project, SpecSet};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// One scripted backend reply.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Define every expected name.
    Valid,
    /// Unparseable Python.
    Invalid,
    /// Parses, but defines nothing.
    Empty,
    Error(String),
}

/// Records the order of backend calls and answers from a per-module script.
///
/// Modules without a script (or with an exhausted one) get [`Reply::Valid`].
#[derive(Default)]
pub struct FakeBackend {
    calls: Mutex<Vec<String>>,
    contexts: Mutex<Vec<ModuleSpecContext>>,
    scripts: Mutex<BTreeMap<String, VecDeque<Reply>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, module: &str, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.scripts
            .lock()
            .insert(module.to_string(), replies.into_iter().collect());
        self
    }

    /// Spec modules in call order, one entry per attempt.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn last_context_for(&self, module: &str) -> Option<ModuleSpecContext> {
        self.contexts
            .lock()
            .iter()
            .rev()
            .find(|c| c.spec_module == module)
            .cloned()
    }
}

pub fn valid_source(expected_names: &[String]) -> String {
    expected_names
        .iter()
        .map(|name| format!("def {}(*args, **kwargs):\n    return None\n", name))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl GeneratorBackend for FakeBackend {
    async fn generate_module(
        &self,
        ctx: &ModuleSpecContext,
        _extra_error_context: &[String],
    ) -> Result<String, JauntError> {
        self.calls.lock().push(ctx.spec_module.clone());
        self.contexts.lock().push(ctx.clone());
        let reply = self
            .scripts
            .lock()
            .get_mut(&ctx.spec_module)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Reply::Valid);
        match reply {
            Reply::Valid => Ok(valid_source(&ctx.expected_names)),
            Reply::Invalid => Ok("def broken(:\n".to_string()),
            Reply::Empty => Ok("x = 1\n".to_string()),
            Reply::Error(msg) => Err(JauntError::Backend(msg)),
        }
    }
}

pub fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

pub const CONFIG: &str =
    "version = 1\n[paths]\nsource_roots = [\"src\"]\ntest_roots = [\"tests\"]\n";

/// A project with `jaunt.toml`, an empty `src/pkg` package and `tests/`.
pub fn empty_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "jaunt.toml", CONFIG);
    write(dir.path(), "src/pkg/__init__.py", "");
    write(dir.path(), "tests/__init__.py", "");
    dir
}

/// A magic spec `name` in `src/pkg/<module>.py` depending on `deps`.
pub fn magic_module(root: &Path, module: &str, name: &str, deps: &[&str]) {
    let deps = deps
        .iter()
        .map(|d| format!("\"{}\"", d))
        .collect::<Vec<_>>()
        .join(", ");
    let body = format!(
        "import jaunt\n\n\n@jaunt.magic(deps=[{deps}])\ndef {name}(x: int) -> int:\n    \"\"\"Compute {name} of x.\"\"\"\n    raise RuntimeError(\"spec stub\")\n"
    );
    write(root, &format!("src/pkg/{}.py", module), &body);
}

/// `b` depends on `a`.
pub fn chain_project() -> TempDir {
    let dir = empty_project();
    magic_module(dir.path(), "a", "base", &[]);
    magic_module(dir.path(), "b", "top", &["pkg.a:base"]);
    dir
}

/// `b` and `c` depend on `a`; `d` depends on both.
pub fn diamond_project() -> TempDir {
    let dir = empty_project();
    magic_module(dir.path(), "a", "fa", &[]);
    magic_module(dir.path(), "b", "fb", &["pkg.a:fa"]);
    magic_module(dir.path(), "c", "fc", &["pkg.a:fa"]);
    magic_module(dir.path(), "d", "fd", &["pkg.b:fb", "pkg.c:fc"]);
    dir
}

pub fn load(dir: &TempDir) -> (Project, SpecSet) {
    let project = Project::load(Some(dir.path()), None).unwrap();
    let set = project.implementation_specs(Some(false)).unwrap();
    (project, set)
}

pub fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Sleeps inside every call and tracks how many calls overlap.
#[derive(Default)]
pub struct SlowBackend {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    finished: AtomicUsize,
}

impl SlowBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most calls that were ever suspended at the same time.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GeneratorBackend for SlowBackend {
    async fn generate_module(
        &self,
        ctx: &ModuleSpecContext,
        _extra_error_context: &[String],
    ) -> Result<String, JauntError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(valid_source(&ctx.expected_names))
    }
}

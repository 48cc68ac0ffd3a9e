//! Module name and path mapping for generated output.
//!
//! A spec module `pkg.mod` is realized by the generated module
//! `pkg.<generated_dir>.mod`; a top-level module `pkg` by `pkg.<generated_dir>`.

use std::path::{Path, PathBuf};

pub const DEFAULT_GENERATED_DIR: &str = "__generated__";

/// Map a spec module to the dotted name of its generated counterpart.
///
/// Names that already point into the generated package are returned unchanged.
pub fn spec_module_to_generated_module(module: &str, generated_dir: &str) -> String {
    let parts: Vec<&str> = module.split('.').collect();
    match parts.as_slice() {
        [single] => format!("{}.{}", single, generated_dir),
        [_, second, ..] if *second == generated_dir => module.to_string(),
        [first, rest @ ..] => {
            let mut out = vec![*first, generated_dir];
            out.extend_from_slice(rest);
            out.join(".")
        }
        [] => module.to_string(),
    }
}

/// `pkg.mod` -> `pkg/mod.py`; `pkg` -> `pkg/__init__.py`.
pub fn module_to_relpath(module: &str) -> PathBuf {
    let parts: Vec<&str> = module.split('.').collect();
    let mut path = PathBuf::new();
    if parts.len() == 1 {
        path.push(parts[0]);
        path.push("__init__.py");
        return path;
    }
    for part in &parts[..parts.len() - 1] {
        path.push(part);
    }
    path.push(format!("{}.py", parts[parts.len() - 1]));
    path
}

/// Relative path of a generated module; the generated package itself maps to its `__init__.py`.
pub fn generated_module_to_relpath(module: &str, generated_dir: &str) -> PathBuf {
    let parts: Vec<&str> = module.split('.').collect();
    if parts.last() == Some(&generated_dir) {
        let mut path: PathBuf = parts.iter().collect();
        path.push("__init__.py");
        return path;
    }
    module_to_relpath(module)
}

/// Relative output path for the generated counterpart of `spec_module`.
pub fn generated_relpath(spec_module: &str, generated_dir: &str) -> PathBuf {
    let generated = spec_module_to_generated_module(spec_module, generated_dir);
    generated_module_to_relpath(&generated, generated_dir)
}

/// Package a module's relative imports resolve against.
pub fn package_of(module: &str, source_file: &Path) -> String {
    let is_package = source_file
        .file_name()
        .map(|name| name == "__init__.py")
        .unwrap_or(false);
    if is_package {
        return module.to_string();
    }
    match module.rsplit_once('.') {
        Some((package, _)) => package.to_string(),
        None => String::new(),
    }
}

/// Python keywords that cannot name a package directory.
const PYTHON_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

/// True when `name` can be used as a Python package name.
pub fn is_valid_package_name(name: &str) -> bool {
    crate::spec_ref::is_identifier(name) && !PYTHON_KEYWORDS.contains(&name)
}

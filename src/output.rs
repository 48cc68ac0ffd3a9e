//! Output trees for generated modules and the atomic writer.
//!
//! Implementation artifacts land under `<source_root>/<pkg>/<generated_dir>/`,
//! test artifacts under `<project>/<tests_package>/<generated_dir>/`. Nothing is
//! ever written outside those subtrees, and a file without a jaunt header is
//! never overwritten.

use crate::error::JauntError;
use crate::header::parse_header;
use crate::paths::generated_relpath;
use crate::spec_ref::is_identifier;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

const TEMP_PREFIX: &str = ".jaunt-tmp-";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Where generated modules of one artifact kind may be written.
#[derive(Debug, Clone)]
pub struct OutputScope {
    package_dir: PathBuf,
    generated_dir: String,
    /// Set for the test tree: spec modules must live under one of these packages.
    tests_packages: Option<Vec<String>>,
}

impl OutputScope {
    /// Implementation tree rooted at a source root.
    pub fn implementation(package_dir: impl Into<PathBuf>, generated_dir: &str) -> Self {
        Self {
            package_dir: package_dir.into(),
            generated_dir: generated_dir.to_string(),
            tests_packages: None,
        }
    }

    /// Test tree rooted at the project directory.
    pub fn tests<S: Into<String>>(
        project_dir: impl Into<PathBuf>,
        tests_packages: impl IntoIterator<Item = S>,
        generated_dir: &str,
    ) -> Self {
        Self {
            package_dir: project_dir.into(),
            generated_dir: generated_dir.to_string(),
            tests_packages: Some(tests_packages.into_iter().map(Into::into).collect()),
        }
    }

    pub fn package_dir(&self) -> &Path {
        &self.package_dir
    }

    pub fn generated_dir(&self) -> &str {
        &self.generated_dir
    }

    /// Relative output path for `spec_module`, checked against the scope.
    pub fn relpath(&self, spec_module: &str) -> Result<PathBuf, JauntError> {
        let rel = generated_relpath(spec_module, &self.generated_dir);
        let out_of_scope = || JauntError::OutputScope(self.package_dir.join(&rel));

        if !spec_module.split('.').all(is_identifier) {
            return Err(out_of_scope());
        }
        let top = spec_module.split('.').next().unwrap_or("");
        if let Some(packages) = &self.tests_packages {
            if !packages.iter().any(|p| p == top) {
                return Err(out_of_scope());
            }
        }

        let parts: Vec<&str> = rel
            .components()
            .map(|c| match c {
                Component::Normal(part) => part.to_str().unwrap_or(""),
                _ => "",
            })
            .collect();
        if parts.len() < 3 || parts[0] != top || parts[1] != self.generated_dir || parts.contains(&"") {
            return Err(out_of_scope());
        }
        Ok(rel)
    }

    /// Absolute output path for `spec_module`.
    pub fn path_for(&self, spec_module: &str) -> Result<PathBuf, JauntError> {
        Ok(self.package_dir.join(self.relpath(spec_module)?))
    }

    /// Current on-disk content of the generated counterpart, if readable.
    pub fn read_generated(&self, spec_module: &str) -> Option<String> {
        let path = self.path_for(spec_module).ok()?;
        fs::read_to_string(path).ok()
    }

    /// Write `header` + `source` for `spec_module` atomically.
    ///
    /// Missing `__init__.py` markers are created along the way; existing ones
    /// are left untouched.
    pub fn write_generated_module(
        &self,
        spec_module: &str,
        header: &str,
        source: &str,
    ) -> Result<PathBuf, JauntError> {
        let rel = self.relpath(spec_module)?;
        let out_path = self.package_dir.join(&rel);

        if out_path.exists() {
            let existing = fs::read_to_string(&out_path)?;
            if parse_header(&existing).is_none() {
                return Err(JauntError::UserFile(out_path));
            }
        }

        ensure_init_files(&self.package_dir, &rel)?;

        let content = format!("{}\n{}\n", header, source.trim_end());
        write_atomic(&out_path, content.as_bytes())?;
        debug!(module = spec_module, path = %out_path.display(), "Wrote generated module");
        Ok(out_path)
    }
}

/// Create every parent package directory of `relpath` with an `__init__.py`.
fn ensure_init_files(package_dir: &Path, relpath: &Path) -> io::Result<()> {
    let Some(parent) = relpath.parent() else {
        return Ok(());
    };
    let mut dir = package_dir.to_path_buf();
    for component in parent.components() {
        dir.push(component);
        fs::create_dir_all(&dir)?;
        let init = dir.join("__init__.py");
        if !init.exists() {
            File::create(&init)?;
        }
    }
    Ok(())
}

/// Write to a sibling temp file, fsync, then rename over `path`.
///
/// Readers observe either the old content or the new content, never a
/// partial file.
pub fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;
    let temp_path = temp_path_for(path);

    {
        let mut file = File::create(&temp_path)?;
        let written = file.write_all(content).and_then(|_| file.sync_all());
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("module.py");
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(
        "{}{}-{}-{}",
        TEMP_PREFIX,
        std::process::id(),
        n,
        file_name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::format_header;
    use tempfile::TempDir;

    fn header() -> String {
        format_header("0.1.0", "build", "pkg.mod", "abc", &["pkg.mod:f".to_string()])
    }

    #[test]
    fn test_write_creates_init_markers() {
        let dir = TempDir::new().unwrap();
        let scope = OutputScope::implementation(dir.path(), "__generated__");
        let out = scope
            .write_generated_module("pkg.sub.mod", &header(), "def f():\n    return 1\n\n\n")
            .unwrap();

        assert_eq!(out, dir.path().join("pkg/__generated__/sub/mod.py"));
        assert!(dir.path().join("pkg/__init__.py").exists());
        assert!(dir.path().join("pkg/__generated__/__init__.py").exists());
        assert!(dir.path().join("pkg/__generated__/sub/__init__.py").exists());

        let text = fs::read_to_string(&out).unwrap();
        assert!(text.starts_with(crate::header::HEADER_MARKER));
        assert!(text.ends_with("return 1\n"));
    }

    #[test]
    fn test_existing_init_untouched() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg/__init__.py"), "VALUE = 1\n").unwrap();
        let scope = OutputScope::implementation(dir.path(), "__generated__");
        scope
            .write_generated_module("pkg.mod", &header(), "x = 1")
            .unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("pkg/__init__.py")).unwrap(),
            "VALUE = 1\n"
        );
    }

    #[test]
    fn test_refuses_user_authored_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("pkg/__generated__/mod.py");
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, "# hand written\n").unwrap();

        let scope = OutputScope::implementation(dir.path(), "__generated__");
        let err = scope
            .write_generated_module("pkg.mod", &header(), "x = 1")
            .unwrap_err();
        assert!(matches!(err, JauntError::UserFile(_)));
        assert_eq!(fs::read_to_string(&target).unwrap(), "# hand written\n");
    }

    #[test]
    fn test_overwrites_previous_artifact_without_temp_leftovers() {
        let dir = TempDir::new().unwrap();
        let scope = OutputScope::implementation(dir.path(), "__generated__");
        scope.write_generated_module("pkg.mod", &header(), "x = 1").unwrap();
        let out = scope.write_generated_module("pkg.mod", &header(), "x = 2").unwrap();

        assert!(fs::read_to_string(&out).unwrap().ends_with("x = 2\n"));
        let leftovers: Vec<_> = fs::read_dir(out.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(TEMP_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_test_scope_rejects_foreign_modules() {
        let dir = TempDir::new().unwrap();
        let scope = OutputScope::tests(dir.path(), ["tests"], "__generated__");
        assert_eq!(
            scope.relpath("tests.test_mod").unwrap(),
            PathBuf::from("tests/__generated__/test_mod.py")
        );
        assert!(matches!(
            scope.relpath("pkg.mod"),
            Err(JauntError::OutputScope(_))
        ));
    }

    #[test]
    fn test_rejects_non_identifier_parts() {
        let dir = TempDir::new().unwrap();
        let scope = OutputScope::implementation(dir.path(), "__generated__");
        assert!(scope.relpath("pkg..mod").is_err());
        assert!(scope.relpath("pkg.mod-x").is_err());
    }
}

//! Module discovery and spec collection.
//!
//! Modules are found by walking `*.py` files under the configured roots. Specs
//! are collected statically: each module is parsed with tree-sitter and every
//! top-level definition decorated with `jaunt.magic` / `jaunt.test` (resolved
//! through the module's own imports) becomes a [`SpecEntry`].

use crate::error::JauntError;
use crate::paths::package_of;
use crate::python::{Definition, ParsedModule};
use crate::registry::{DependencyRef, ObjectRef, Registry, SpecEntry, SpecKind, SpecOptions};
use glob::Pattern;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;
use tree_sitter::Node;
use walkdir::WalkDir;

/// A discovered module and the file that defines it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ModuleSource {
    pub name: String,
    pub path: PathBuf,
}

/// Inputs to [`discover_modules`].
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    /// Glob patterns matched against root-relative posix paths.
    pub exclude: Vec<String>,
    pub generated_dir: String,
    /// Prefix for every module name (`tests` for the test tree).
    pub module_prefix: Option<String>,
    /// Only resolve these modules instead of walking the whole tree.
    pub target_modules: Option<BTreeSet<String>>,
    /// Directories never descended into (nested roots of another kind).
    pub skip_dirs: Vec<PathBuf>,
}

/// Discover Python modules under `roots`, sorted by name.
///
/// When a module name is found under more than one root, the first root wins.
pub fn discover_modules(roots: &[PathBuf], opts: &DiscoveryOptions) -> Vec<ModuleSource> {
    let prefix = opts.module_prefix.as_deref().filter(|p| !p.is_empty());

    if let Some(targets) = &opts.target_modules {
        return resolve_targets(roots, targets, prefix);
    }

    let patterns: Vec<Pattern> = opts
        .exclude
        .iter()
        .flat_map(|pat| expand_pattern(pat))
        .filter_map(|pat| Pattern::new(&pat).ok())
        .collect();

    let mut found: BTreeMap<String, PathBuf> = BTreeMap::new();
    for root in roots {
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                if e.depth() == 0 || !e.file_type().is_dir() {
                    return true;
                }
                let name = e.file_name().to_string_lossy();
                !(name.starts_with('.')
                    || name == "__pycache__"
                    || name == opts.generated_dir
                    || opts.skip_dirs.iter().any(|d| d == e.path()))
            });

        for entry in walker.filter_map(Result::ok) {
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().map(|e| e != "py").unwrap_or(true) {
                continue;
            }
            let Ok(rel) = path.strip_prefix(root) else {
                continue;
            };
            let rel_posix = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            if patterns.iter().any(|p| p.matches(&rel_posix)) {
                continue;
            }

            let Some(base) = module_name_for(rel) else {
                continue;
            };
            let name = match (prefix, base.is_empty()) {
                (None, true) => continue,
                (Some(p), true) => p.to_string(),
                (None, false) => base,
                (Some(p), false) => format!("{}.{}", p, base),
            };
            found.entry(name).or_insert_with(|| path.to_path_buf());
        }
    }

    debug!(count = found.len(), "Discovered modules");
    found
        .into_iter()
        .map(|(name, path)| ModuleSource { name, path })
        .collect()
}

/// A leading `**/` also matches zero directories.
fn expand_pattern(pattern: &str) -> Vec<String> {
    let mut out = vec![pattern.to_string()];
    let mut stripped = pattern;
    while let Some(rest) = stripped.strip_prefix("**/") {
        out.push(rest.to_string());
        stripped = rest;
    }
    out
}

/// `pkg/mod.py` -> `pkg.mod`; `pkg/__init__.py` -> `pkg`; root `__init__.py` -> ``.
fn module_name_for(rel: &Path) -> Option<String> {
    let mut parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let file = parts.pop()?;
    if file != "__init__.py" {
        parts.push(file.strip_suffix(".py")?.to_string());
    }
    Some(parts.join("."))
}

fn resolve_targets(
    roots: &[PathBuf],
    targets: &BTreeSet<String>,
    prefix: Option<&str>,
) -> Vec<ModuleSource> {
    let mut found = Vec::new();
    for module in targets {
        let relative = match prefix {
            Some(p) if module == p => "",
            Some(p) => module
                .strip_prefix(p)
                .and_then(|rest| rest.strip_prefix('.'))
                .unwrap_or(module),
            None => module.as_str(),
        };
        for root in roots {
            let candidates: Vec<PathBuf> = if relative.is_empty() {
                vec![root.join("__init__.py")]
            } else {
                let mut base = root.clone();
                base.extend(relative.split('.'));
                vec![base.with_extension("py"), base.join("__init__.py")]
            };
            if let Some(path) = candidates.into_iter().find(|c| c.is_file()) {
                found.push(ModuleSource {
                    name: module.clone(),
                    path,
                });
                break;
            }
        }
    }
    found.sort();
    found
}

/// Parse every module and collect the specs of `kind`.
///
/// Unreadable files, syntax errors, malformed decorator arguments and
/// decorated nested definitions abort with a discovery error naming the module.
pub fn collect_specs(modules: &[ModuleSource], kind: SpecKind) -> Result<Registry, JauntError> {
    let mut registry = Registry::new();
    for module in modules {
        for entry in collect_module_specs(module, kind)? {
            registry.register(entry)?;
        }
    }
    Ok(registry)
}

/// Specs of `kind` declared in one module, in source order.
pub fn collect_module_specs(
    module: &ModuleSource,
    kind: SpecKind,
) -> Result<Vec<SpecEntry>, JauntError> {
    let source = std::fs::read_to_string(&module.path).map_err(|e| {
        JauntError::discovery(
            &module.name,
            format!("cannot read {}: {}", module.path.display(), e),
        )
    })?;
    let package = package_of(&module.name, &module.path);
    let package = (!package.is_empty()).then_some(package.as_str());
    let parsed = ParsedModule::parse(source, package)
        .ok_or_else(|| JauntError::discovery(&module.name, "failed to parse module"))?;
    if let Some(err) = parsed.syntax_error() {
        return Err(JauntError::discovery(&module.name, err));
    }

    let collector = Collector {
        parsed: &parsed,
        module: &module.name,
    };
    collector.reject_nested_specs()?;

    let mut entries = Vec::new();
    for (name, def) in parsed.top_level_definitions() {
        for decorator in def.decorators() {
            let Some(expr) = decorator.named_child(0) else {
                continue;
            };
            let Some((decorator_kind, args)) = collector.spec_decorator(expr) else {
                continue;
            };
            if decorator_kind != kind {
                continue;
            }
            let options = match args {
                Some(args) => collector.options(args, &name)?,
                None => SpecOptions::default(),
            };
            let entry = SpecEntry::new(kind, &module.name, &name, &module.path, options)
                .map_err(|e| JauntError::discovery(&module.name, e.to_string()))?;
            entries.push(entry);
        }
    }
    Ok(entries)
}

struct Collector<'a> {
    parsed: &'a ParsedModule,
    module: &'a str,
}

impl<'a> Collector<'a> {
    fn text(&self, node: Node<'_>) -> &'a str {
        self.parsed.text(node)
    }

    fn error(&self, message: impl Into<String>) -> JauntError {
        JauntError::discovery(self.module, message)
    }

    /// Fully qualified dotted name of a decorator callee, via the import table.
    fn resolve_callee(&self, node: Node<'_>) -> Option<String> {
        let raw = match node.kind() {
            "identifier" | "attribute" => self.text(node),
            _ => return None,
        };
        let (head, rest) = match raw.split_once('.') {
            Some((h, r)) => (h, Some(r)),
            None => (raw, None),
        };
        let imports = self.parsed.imports();
        let base = if let Some(module) = imports.module_aliases.get(head) {
            module.clone()
        } else if let Some(target) = imports.from_imports.get(head) {
            target.replacen(':', ".", 1)
        } else {
            return None;
        };
        Some(match rest {
            Some(rest) => format!("{}.{}", base, rest),
            None => base,
        })
    }

    /// Kind and argument list when `expr` is a jaunt spec decorator.
    fn spec_decorator<'t>(&self, expr: Node<'t>) -> Option<(SpecKind, Option<Node<'t>>)> {
        let (callee, args) = if expr.kind() == "call" {
            (
                expr.child_by_field_name("function")?,
                expr.child_by_field_name("arguments"),
            )
        } else {
            (expr, None)
        };
        let kind = match self.resolve_callee(callee)?.as_str() {
            "jaunt.magic" | "jaunt.runtime.magic" => SpecKind::Implementation,
            "jaunt.test" | "jaunt.runtime.test" => SpecKind::Test,
            _ => return None,
        };
        Some((kind, args))
    }

    /// Decorated definitions below the top level are rejected.
    fn reject_nested_specs(&self) -> Result<(), JauntError> {
        let mut stack: Vec<(Node<'_>, Vec<String>)> = Vec::new();
        for (name, def) in self.parsed.top_level_definitions() {
            if let Some(body) = def.node.child_by_field_name("body") {
                stack.push((body, vec![name]));
            }
        }
        while let Some((block, path)) = stack.pop() {
            let mut cursor = block.walk();
            for child in block.named_children(&mut cursor) {
                let def_node = match child.kind() {
                    "decorated_definition" => child.child_by_field_name("definition"),
                    "function_definition" | "class_definition" => Some(child),
                    _ => None,
                };
                let Some(def_node) = def_node else {
                    continue;
                };
                let name = def_node
                    .child_by_field_name("name")
                    .map(|n| self.text(n).to_string())
                    .unwrap_or_default();
                let mut qualname = path.clone();
                qualname.push(name);

                let def = Definition {
                    node: def_node,
                    statement: child,
                };
                let is_spec = def.decorators().into_iter().any(|d| {
                    d.named_child(0)
                        .and_then(|expr| self.spec_decorator(expr))
                        .is_some()
                });
                if is_spec {
                    return Err(self.error(format!(
                        "specs must be top-level (no nested/inner objects): {}:{}",
                        self.module,
                        qualname.join(".")
                    )));
                }
                if let Some(body) = def_node.child_by_field_name("body") {
                    stack.push((body, qualname));
                }
            }
        }
        Ok(())
    }

    fn options(&self, args: Node<'_>, spec_name: &str) -> Result<SpecOptions, JauntError> {
        let mut options = SpecOptions::default();
        let mut cursor = args.walk();
        for arg in args.named_children(&mut cursor) {
            if arg.kind() == "comment" {
                continue;
            }
            if arg.kind() != "keyword_argument" {
                return Err(self.error(format!(
                    "{}: spec decorators take keyword arguments only, got `{}`",
                    spec_name,
                    self.text(arg)
                )));
            }
            let (Some(key), Some(value)) = (
                arg.child_by_field_name("name"),
                arg.child_by_field_name("value"),
            ) else {
                continue;
            };
            let key = self.text(key);
            match key {
                "deps" => options.deps = self.deps_value(value, spec_name)?,
                "prompt" => {
                    options.prompt = match value.kind() {
                        "none" => None,
                        _ => Some(self.string_literal(value).ok_or_else(|| {
                            self.error(format!("{}: `prompt` must be a string literal", spec_name))
                        })?),
                    }
                }
                "infer_deps" => {
                    options.infer_deps = match value.kind() {
                        "true" => Some(true),
                        "false" => Some(false),
                        "none" => None,
                        _ => {
                            return Err(self.error(format!(
                                "{}: `infer_deps` must be True, False or None",
                                spec_name
                            )))
                        }
                    }
                }
                other => {
                    let literal = self.literal(value).ok_or_else(|| {
                        self.error(format!(
                            "{}: argument `{}` must be a literal value",
                            spec_name, other
                        ))
                    })?;
                    options.extra.insert(other.to_string(), literal);
                }
            }
        }
        Ok(options)
    }

    fn deps_value(
        &self,
        value: Node<'_>,
        spec_name: &str,
    ) -> Result<Option<Vec<DependencyRef>>, JauntError> {
        let items: Vec<Node<'_>> = match value.kind() {
            "none" => return Ok(None),
            "list" | "tuple" | "set" => {
                let mut cursor = value.walk();
                value
                    .named_children(&mut cursor)
                    .filter(|n| n.kind() != "comment")
                    .collect()
            }
            _ => vec![value],
        };
        items
            .into_iter()
            .map(|item| {
                self.dependency(item).ok_or_else(|| {
                    self.error(format!(
                        "{}: unsupported dependency `{}` (expected a string or a name)",
                        spec_name,
                        self.text(item)
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    fn dependency(&self, node: Node<'_>) -> Option<DependencyRef> {
        match node.kind() {
            "string" | "concatenated_string" => {
                self.string_literal(node).map(DependencyRef::Identifier)
            }
            "identifier" => {
                let name = self.text(node);
                let imports = self.parsed.imports();
                if let Some(target) = imports.from_imports.get(name) {
                    let (module, qualname) = target.split_once(':')?;
                    return Some(DependencyRef::Object(ObjectRef::new(module, qualname)));
                }
                if self.parsed.find_top_level(name).is_some() {
                    return Some(DependencyRef::Object(ObjectRef::new(self.module, name)));
                }
                Some(DependencyRef::Identifier(name.to_string()))
            }
            "attribute" => {
                let raw = self.text(node);
                let (head, rest) = raw.split_once('.')?;
                let (middle, last) = match rest.rsplit_once('.') {
                    Some((m, l)) => (Some(m), l),
                    None => (None, rest),
                };
                let imports = self.parsed.imports();
                let base = if let Some(module) = imports.module_aliases.get(head) {
                    module.clone()
                } else if let Some(target) = imports.from_imports.get(head) {
                    target.replacen(':', ".", 1)
                } else if self.parsed.find_top_level(head).is_some() {
                    // Attribute of a local class: `Outer.method`.
                    return Some(DependencyRef::Object(ObjectRef::new(self.module, raw)));
                } else {
                    return Some(DependencyRef::Identifier(raw.to_string()));
                };
                let module = match middle {
                    Some(m) => format!("{}.{}", base, m),
                    None => base,
                };
                Some(DependencyRef::Object(ObjectRef::new(module, last)))
            }
            _ => None,
        }
    }

    /// Value of a plain (non f-) string literal, implicit concatenation included.
    fn string_literal(&self, node: Node<'_>) -> Option<String> {
        match node.kind() {
            "string" => {
                let mut cursor = node.walk();
                let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
                if children.iter().any(|c| c.kind() == "interpolation") {
                    return None;
                }
                let raw_prefix = children
                    .iter()
                    .find(|c| c.kind() == "string_start")
                    .map(|s| self.text(*s).to_ascii_lowercase().contains('r'))
                    .unwrap_or(false);
                let content: String = children
                    .iter()
                    .filter(|c| c.kind() == "string_content")
                    .map(|c| self.text(*c))
                    .collect();
                Some(if raw_prefix {
                    content
                } else {
                    unescape(&content)
                })
            }
            "concatenated_string" => {
                let mut cursor = node.walk();
                let parts: Option<Vec<String>> = node
                    .named_children(&mut cursor)
                    .map(|part| self.string_literal(part))
                    .collect();
                parts.map(|p| p.concat())
            }
            _ => None,
        }
    }

    fn literal(&self, node: Node<'_>) -> Option<Value> {
        match node.kind() {
            "string" | "concatenated_string" => self.string_literal(node).map(Value::String),
            "integer" => self
                .text(node)
                .replace('_', "")
                .parse::<i64>()
                .ok()
                .map(Value::from),
            "float" => self
                .text(node)
                .replace('_', "")
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            "none" => Some(Value::Null),
            "unary_operator" => {
                let operand = node.child_by_field_name("argument")?;
                let value = self.literal(operand)?;
                if !self.text(node).trim_start().starts_with('-') {
                    return Some(value);
                }
                match value {
                    Value::Number(n) => {
                        if let Some(i) = n.as_i64() {
                            Some(Value::from(-i))
                        } else {
                            n.as_f64()
                                .and_then(|f| serde_json::Number::from_f64(-f))
                                .map(Value::Number)
                        }
                    }
                    _ => None,
                }
            }
            "list" | "tuple" | "set" => {
                let mut cursor = node.walk();
                let items: Option<Vec<Value>> = node
                    .named_children(&mut cursor)
                    .filter(|n| n.kind() != "comment")
                    .map(|n| self.literal(n))
                    .collect();
                items.map(Value::Array)
            }
            "dictionary" => {
                let mut cursor = node.walk();
                let mut map = serde_json::Map::new();
                for pair in node.named_children(&mut cursor) {
                    if pair.kind() == "comment" {
                        continue;
                    }
                    if pair.kind() != "pair" {
                        return None;
                    }
                    let key = self.string_literal(pair.child_by_field_name("key")?)?;
                    let value = self.literal(pair.child_by_field_name("value")?)?;
                    map.insert(key, value);
                }
                Some(Value::Object(map))
            }
            "parenthesized_expression" => self.literal(node.named_child(0)?),
            _ => None,
        }
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('\n') => {}
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

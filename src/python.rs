//! Python syntax layer
//!
//! Thin wrapper over tree-sitter-python used for source-segment extraction,
//! dependency inference, spec collection, and validation of generated output.

use std::collections::HashMap;
use tree_sitter::{Node, Parser, Tree};

mod names;
mod validate;

pub use names::{collect_name_uses, NameUses};
pub use validate::{first_syntax_error, strip_markdown_fences, validate_generated_source};

/// Parse Python source into a tree-sitter tree.
pub(crate) fn parse_tree(source: &str) -> Option<Tree> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .ok()?;
    parser.parse(source, None)
}

/// Names bound by a module's top-level import statements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportTable {
    /// `import a.b as c` binds `c -> a.b`; `import a.b` binds `a -> a`.
    pub module_aliases: HashMap<String, String>,
    /// `from m import X as Y` binds `Y -> m:X`.
    pub from_imports: HashMap<String, String>,
}

/// A top-level (or nested) function or class definition.
#[derive(Debug, Clone, Copy)]
pub struct Definition<'t> {
    /// The `function_definition` / `class_definition` node (decorators excluded).
    pub node: Node<'t>,
    /// The statement as it appears in its block (a `decorated_definition` when decorated).
    pub statement: Node<'t>,
}

impl<'t> Definition<'t> {
    pub fn is_class(&self) -> bool {
        self.node.kind() == "class_definition"
    }

    /// Decorator nodes attached to this definition.
    pub fn decorators(&self) -> Vec<Node<'t>> {
        if self.statement.kind() != "decorated_definition" {
            return Vec::new();
        }
        let mut cursor = self.statement.walk();
        self.statement
            .children(&mut cursor)
            .filter(|c| c.kind() == "decorator")
            .collect()
    }
}

/// A parsed Python module plus its import table.
pub struct ParsedModule {
    source: String,
    tree: Tree,
    imports: ImportTable,
}

impl ParsedModule {
    /// Parse `source`. `package` is the package relative imports resolve against.
    pub fn parse(source: String, package: Option<&str>) -> Option<Self> {
        let tree = parse_tree(&source)?;
        let imports = collect_imports(tree.root_node(), source.as_bytes(), package);
        Some(Self {
            source,
            tree,
            imports,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn imports(&self) -> &ImportTable {
        &self.imports
    }

    pub fn text(&self, node: Node<'_>) -> &str {
        node.utf8_text(self.source.as_bytes()).unwrap_or("")
    }

    /// First syntax error in the module, formatted for humans.
    pub fn syntax_error(&self) -> Option<String> {
        first_syntax_error(self.root())
    }

    /// Top-level function and class definitions in source order.
    pub fn top_level_definitions(&self) -> Vec<(String, Definition<'_>)> {
        block_definitions(self.root(), self.source.as_bytes())
    }

    pub fn find_top_level(&self, name: &str) -> Option<Definition<'_>> {
        self.top_level_definitions()
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d)
    }

    /// Follow a dotted qualname (`Outer.method`) through nested class bodies.
    pub fn find_nested(&self, qualname: &str) -> Option<Definition<'_>> {
        let mut parts = qualname.split('.');
        let mut current = self.find_top_level(parts.next()?)?;
        for part in parts {
            let body = current.node.child_by_field_name("body")?;
            current = block_definitions(body, self.source.as_bytes())
                .into_iter()
                .find(|(n, _)| n == part)
                .map(|(_, d)| d)?;
        }
        Some(current)
    }

    /// Normalized source text of the definition (decorators excluded).
    pub fn source_segment(&self, def: &Definition<'_>) -> String {
        let start = def.node.start_byte();
        let end = def.node.end_byte();
        let line_start = self.source[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let prefix = &self.source[line_start..start];
        // Keep leading indentation so dedent sees consistent margins.
        let from = if prefix.chars().all(|c| c == ' ' || c == '\t') {
            line_start
        } else {
            start
        };
        normalize_segment(&self.source[from..end])
    }
}

/// Unwrap a block statement to its definition, if it is one.
fn as_definition<'t>(statement: Node<'t>, source: &[u8]) -> Option<(String, Definition<'t>)> {
    let node = match statement.kind() {
        "function_definition" | "class_definition" => statement,
        "decorated_definition" => statement.child_by_field_name("definition")?,
        _ => return None,
    };
    let name = node
        .child_by_field_name("name")?
        .utf8_text(source)
        .ok()?
        .to_string();
    Some((name, Definition { node, statement }))
}

fn block_definitions<'t>(block: Node<'t>, source: &[u8]) -> Vec<(String, Definition<'t>)> {
    let mut cursor = block.walk();
    block
        .children(&mut cursor)
        .filter_map(|child| as_definition(child, source))
        .collect()
}

/// Resolve a relative import (`from ..x import y`) against `package`.
fn resolve_relative(package: Option<&str>, dots: usize, rest: Option<&str>) -> Option<String> {
    let package = package?;
    let mut parts: Vec<&str> = package.split('.').collect();
    for _ in 1..dots {
        parts.pop()?;
    }
    if let Some(rest) = rest {
        parts.extend(rest.split('.'));
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("."))
}

fn collect_imports(root: Node<'_>, source: &[u8], package: Option<&str>) -> ImportTable {
    let mut table = ImportTable::default();
    let text = |n: Node<'_>| n.utf8_text(source).unwrap_or("").to_string();

    let mut cursor = root.walk();
    let statements: Vec<Node<'_>> = root.children(&mut cursor).collect();
    for stmt in statements {
        match stmt.kind() {
            "import_statement" => {
                let mut c = stmt.walk();
                for name in stmt.children_by_field_name("name", &mut c) {
                    match name.kind() {
                        "aliased_import" => {
                            if let (Some(module), Some(alias)) = (
                                name.child_by_field_name("name"),
                                name.child_by_field_name("alias"),
                            ) {
                                table.module_aliases.insert(text(alias), text(module));
                            }
                        }
                        "dotted_name" => {
                            let full = text(name);
                            let bound = full.split('.').next().unwrap_or("").to_string();
                            if !bound.is_empty() {
                                table.module_aliases.insert(bound.clone(), bound);
                            }
                        }
                        _ => {}
                    }
                }
            }
            "import_from_statement" => {
                let Some(module_node) = stmt.child_by_field_name("module_name") else {
                    continue;
                };
                let module = if module_node.kind() == "relative_import" {
                    let raw = text(module_node);
                    let dots = raw.chars().take_while(|c| *c == '.').count();
                    let rest = raw[dots..].trim();
                    resolve_relative(package, dots, (!rest.is_empty()).then_some(rest))
                } else {
                    Some(text(module_node))
                };
                let Some(module) = module else {
                    continue;
                };

                let mut c = stmt.walk();
                for name in stmt.children_by_field_name("name", &mut c) {
                    let (imported, bound) = match name.kind() {
                        "aliased_import" => match (
                            name.child_by_field_name("name"),
                            name.child_by_field_name("alias"),
                        ) {
                            (Some(n), Some(a)) => (text(n), text(a)),
                            _ => continue,
                        },
                        "dotted_name" => {
                            let n = text(name);
                            (n.clone(), n)
                        }
                        _ => continue,
                    };
                    table
                        .from_imports
                        .insert(bound, format!("{}:{}", module, imported));
                }
            }
            _ => {}
        }
    }
    table
}

/// Dedent, normalize newlines, strip trailing whitespace per line and trailing blank lines.
pub fn normalize_segment(segment: &str) -> String {
    let unified = segment.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = unified.split('\n').collect();

    let margin = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| &l[..l.len() - l.trim_start_matches([' ', '\t']).len()])
        .fold(None::<&str>, |acc, indent| match acc {
            None => Some(indent),
            Some(prev) => {
                let common = prev
                    .chars()
                    .zip(indent.chars())
                    .take_while(|(a, b)| a == b)
                    .count();
                Some(&prev[..common])
            }
        })
        .unwrap_or("");

    let mut out: Vec<&str> = lines
        .iter()
        .map(|l| {
            if l.trim().is_empty() {
                ""
            } else {
                l.strip_prefix(margin).unwrap_or(l).trim_end()
            }
        })
        .collect();
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}

//! Checks applied to backend output before it is written.

use super::{as_definition, parse_tree};
use std::collections::BTreeSet;
use tree_sitter::Node;

/// Locate the first ERROR or MISSING node under `root`, in source order.
pub fn first_syntax_error(root: Node<'_>) -> Option<String> {
    if !root.has_error() {
        return None;
    }
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        let pos = node.start_position();
        if node.is_missing() {
            return Some(format!(
                "SyntaxError: expected '{}' (line {}:{})",
                node.kind(),
                pos.row + 1,
                pos.column + 1
            ));
        }
        if node.is_error() {
            return Some(format!(
                "SyntaxError: invalid syntax (line {}:{})",
                pos.row + 1,
                pos.column + 1
            ));
        }
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node
            .children(&mut cursor)
            .filter(|c| c.has_error())
            .collect();
        stack.extend(children.into_iter().rev());
    }
    Some("SyntaxError: invalid syntax".to_string())
}

fn collect_targets(target: Node<'_>, source: &[u8], out: &mut BTreeSet<String>) {
    if target.kind() == "identifier" {
        if let Ok(name) = target.utf8_text(source) {
            out.insert(name.to_string());
        }
    }
}

/// Names bound at module top level by `def`, `class`, or plain assignment.
fn top_level_names(root: Node<'_>, source: &[u8]) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let mut cursor = root.walk();
    for stmt in root.children(&mut cursor) {
        if let Some((name, _)) = as_definition(stmt, source) {
            names.insert(name);
            continue;
        }
        if stmt.kind() != "expression_statement" {
            continue;
        }
        let mut inner = stmt.walk();
        for expr in stmt.children(&mut inner) {
            let mut assignment = Some(expr);
            while let Some(a) = assignment.filter(|a| a.kind() == "assignment") {
                if let Some(left) = a.child_by_field_name("left") {
                    collect_targets(left, source, &mut names);
                }
                assignment = a.child_by_field_name("right");
            }
        }
    }
    names
}

/// Validate generated Python: it must parse and define every expected name.
///
/// Returns a list of human-readable problems; empty means valid.
pub fn validate_generated_source(source: &str, expected_names: &[String]) -> Vec<String> {
    let Some(tree) = parse_tree(source) else {
        return vec!["SyntaxError: unable to parse generated source".to_string()];
    };
    let root = tree.root_node();
    if let Some(err) = first_syntax_error(root) {
        return vec![err];
    }

    let defined = top_level_names(root, source.as_bytes());
    expected_names
        .iter()
        .filter(|name| !defined.contains(name.as_str()))
        .map(|name| format!("Missing top-level definition: {}", name))
        .collect()
}

/// Remove a single surrounding markdown code fence, if present.
pub fn strip_markdown_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return text.to_string();
    }
    let Some((opening, rest)) = trimmed.split_once('\n') else {
        return text.to_string();
    };
    let lang = opening.trim_start_matches('`').trim();
    if !lang
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '+')
    {
        return text.to_string();
    }
    match rest.trim_end().strip_suffix("```") {
        Some(body) => body.trim_end().to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_valid_source_with_all_names() {
        let src = "import os\n\nX = Y = 1\nLIMIT: int = 3\n\ndef f():\n    return X\n\nclass C:\n    pass\n";
        let errors = validate_generated_source(src, &names(&["f", "C", "X", "Y", "LIMIT"]));
        assert!(errors.is_empty(), "{:?}", errors);
    }

    #[test]
    fn test_missing_names_reported() {
        let errors = validate_generated_source("def f():\n    pass\n", &names(&["f", "g"]));
        assert_eq!(errors, vec!["Missing top-level definition: g".to_string()]);
    }

    #[test]
    fn test_syntax_error_reported_alone() {
        let errors = validate_generated_source("def broken(:\n    pass\n", &names(&["broken", "other"]));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("SyntaxError"));
    }

    #[test]
    fn test_nested_definitions_do_not_count() {
        let src = "def outer():\n    def inner():\n        pass\n    return inner\n";
        let errors = validate_generated_source(src, &names(&["inner"]));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_strip_markdown_fences() {
        assert_eq!(strip_markdown_fences("```python\nx = 1\n```\n"), "x = 1");
        assert_eq!(strip_markdown_fences("```\nx = 1\ny = 2\n```"), "x = 1\ny = 2");
        assert_eq!(strip_markdown_fences("x = 1\n"), "x = 1\n");
        assert_eq!(strip_markdown_fences("```python\nx = 1"), "```python\nx = 1");
    }
}

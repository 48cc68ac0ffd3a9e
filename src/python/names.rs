//! Name-use collection over a definition subtree.

use std::collections::BTreeSet;
use tree_sitter::Node;

/// Names and attribute chains referenced inside a definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameUses {
    /// Bare identifiers in load position.
    pub names: BTreeSet<String>,
    /// `(root, first_attribute)` for every `root.attr...` expression.
    pub attr_roots: BTreeSet<(String, String)>,
    /// `(root, [attr, attr, ...])` for every attribute expression rooted at a name.
    pub attr_chains: BTreeSet<(String, Vec<String>)>,
}

/// Identifiers that name something being bound or labelled rather than used.
fn is_binding_position(node: Node<'_>) -> bool {
    let Some(parent) = node.parent() else {
        return false;
    };
    let is_field = |field: &str| parent.child_by_field_name(field) == Some(node);
    match parent.kind() {
        "function_definition" | "class_definition" | "keyword_argument" => is_field("name"),
        "default_parameter" | "typed_default_parameter" => is_field("name"),
        "attribute" => is_field("attribute"),
        "parameters"
        | "lambda_parameters"
        | "typed_parameter"
        | "list_splat_pattern"
        | "dictionary_splat_pattern"
        | "dotted_name"
        | "aliased_import" => true,
        _ => false,
    }
}

/// Walk `node` and record every referenced name and attribute chain.
pub fn collect_name_uses(node: Node<'_>, source: &[u8]) -> NameUses {
    let mut uses = NameUses::default();
    let text = |n: Node<'_>| n.utf8_text(source).unwrap_or("").to_string();

    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        match current.kind() {
            "identifier" if !is_binding_position(current) => {
                uses.names.insert(text(current));
            }
            "attribute" => {
                let mut chain = Vec::new();
                let mut cursor_node = Some(current);
                while let Some(n) = cursor_node {
                    if n.kind() != "attribute" {
                        break;
                    }
                    if let Some(attr) = n.child_by_field_name("attribute") {
                        chain.push(text(attr));
                    }
                    cursor_node = n.child_by_field_name("object");
                }
                if let Some(root) = cursor_node.filter(|n| n.kind() == "identifier") {
                    chain.reverse();
                    let root = text(root);
                    if let Some(first) = chain.first() {
                        uses.attr_roots.insert((root.clone(), first.clone()));
                    }
                    uses.attr_chains.insert((root, chain));
                }
            }
            _ => {}
        }

        let mut cursor = current.walk();
        stack.extend(current.children(&mut cursor));
    }
    uses
}

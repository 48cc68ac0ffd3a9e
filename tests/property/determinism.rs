//! Property-based tests for determinism guarantees

use jaunt::deps::{deps_closure, reverse_edges, toposort};
use jaunt::digest::{hash_graph, hash_module, sha256_hex};
use jaunt::python::normalize_segment;
use jaunt::spec_ref::normalize_spec_ref;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

fn identifier() -> impl Strategy<Value = String> {
    "[a-z_][a-z0-9_]{0,7}"
}

fn dotted(max_parts: usize) -> impl Strategy<Value = String> {
    prop::collection::vec(identifier(), 1..=max_parts).prop_map(|parts| parts.join("."))
}

fn digests() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(any::<u64>().prop_map(|n| sha256_hex(&n.to_string())), 0..8)
}

/// Edges only point from a higher index to a lower one, so the graph is acyclic.
fn dag() -> impl Strategy<Value = BTreeMap<String, BTreeSet<String>>> {
    (1usize..10).prop_flat_map(|n| {
        prop::collection::vec(prop::collection::vec(any::<bool>(), n), n).prop_map(move |matrix| {
            (0..n)
                .map(|i| {
                    let deps = (0..i)
                        .filter(|&j| matrix[i][j])
                        .map(|j| format!("m{}", j))
                        .collect();
                    (format!("m{}", i), deps)
                })
                .collect()
        })
    })
}

proptest! {
    #[test]
    fn normalization_is_idempotent(module in dotted(3), qualname in dotted(2)) {
        let colon = format!("{}:{}", module, qualname);
        let once = normalize_spec_ref(&colon).unwrap();
        let twice = normalize_spec_ref(once.as_str()).unwrap();
        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(once.module(), module.as_str());
        prop_assert_eq!(once.qualname(), qualname.as_str());

        let padded = normalize_spec_ref(&format!("  {}  ", colon)).unwrap();
        prop_assert_eq!(padded, once);
    }

    #[test]
    fn dot_shorthand_splits_on_last_dot(module in dotted(3), name in identifier()) {
        let shorthand = normalize_spec_ref(&format!("{}.{}", module, name)).unwrap();
        let colon = normalize_spec_ref(&format!("{}:{}", module, name)).unwrap();
        prop_assert_eq!(shorthand, colon);
    }

    #[test]
    fn module_digest_ignores_spec_order(digests in digests(), seed in any::<u64>()) {
        let mut shuffled = digests.clone();
        let len = shuffled.len().max(1);
        shuffled.rotate_left((seed as usize) % len);
        shuffled.reverse();
        prop_assert_eq!(hash_module(&digests), hash_module(&shuffled));
    }

    #[test]
    fn graph_digest_ignores_dependency_order(local in "[0-9a-f]{64}", deps in digests()) {
        let mut reversed = deps.clone();
        reversed.reverse();
        prop_assert_eq!(hash_graph(&local, &deps), hash_graph(&local, &reversed));
    }

    #[test]
    fn graph_digest_changes_with_local(a in "[0-9a-f]{64}", b in "[0-9a-f]{64}", deps in digests()) {
        prop_assume!(a != b);
        prop_assert_ne!(hash_graph(&a, &deps), hash_graph(&b, &deps));
    }

    #[test]
    fn segment_normalization_is_idempotent(
        lines in prop::collection::vec("[ \t]{0,4}[a-z =()]{0,12}[ \t]{0,2}", 0..8),
        indent in 0usize..8,
    ) {
        let pad = " ".repeat(indent);
        let text = lines
            .iter()
            .map(|l| format!("{}{}", pad, l))
            .collect::<Vec<_>>()
            .join("\r\n");
        let once = normalize_segment(&text);
        prop_assert_eq!(normalize_segment(&once), once.clone());
        prop_assert!(!once.contains('\r'));
        prop_assert!(once.lines().all(|l| l == l.trim_end()));
    }

    #[test]
    fn toposort_places_dependencies_first(graph in dag()) {
        let order = toposort(&graph).unwrap();
        let position: BTreeMap<&String, usize> =
            order.iter().enumerate().map(|(i, m)| (m, i)).collect();
        prop_assert_eq!(position.len(), graph.len());
        for (module, deps) in &graph {
            for dep in deps {
                prop_assert!(position[dep] < position[module]);
            }
        }
    }

    #[test]
    fn stale_expansion_reaches_every_dependent(graph in dag(), pick in any::<prop::sample::Index>()) {
        let modules: Vec<&String> = graph.keys().collect();
        let root = modules[pick.index(modules.len())].clone();
        let expanded = deps_closure(&reverse_edges(&graph), &BTreeSet::from([root.clone()]));
        prop_assert!(expanded.contains(&root));
        for (module, deps) in &graph {
            if deps.iter().any(|d| expanded.contains(d)) {
                prop_assert!(expanded.contains(module));
            }
        }
    }
}

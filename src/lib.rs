//! Jaunt: spec-driven Python code generation with incremental builds.
//!
//! Annotated Python stubs are collected into a registry, linked into a spec
//! dependency graph, collapsed into a module DAG, and regenerated module by
//! module whenever their content digests change.

pub mod builder;
pub mod cli;
pub mod config;
pub mod deps;
pub mod diagnostics;
pub mod digest;
pub mod discovery;
pub mod error;
pub mod generate;
pub mod header;
pub mod logging;
pub mod orchestrator;
pub mod output;
pub mod paths;
pub mod progress;
pub mod project;
pub mod python;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod spec_ref;
pub mod tester;

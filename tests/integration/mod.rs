//! Integration tests for the Jaunt build pipeline

mod build_pipeline;
mod cli_commands;
mod output_safety;
mod staleness;
mod test_generation;
pub mod test_utils;

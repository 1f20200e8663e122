//! CLI module for paraflow - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for running and checking
//! task plans and inspecting configuration.

pub mod commands;

pub use commands::Cli;

//! CLI module for unillm - command-line interface and subcommands.
//!
//! Replays scripted provider fixtures through the full streaming core.

pub mod commands;
pub mod replay;

pub use commands::Cli;

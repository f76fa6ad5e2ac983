//! Command-line front end for the carelake toolkit.
//!
//! The binary in `main.rs` is a thin shell; parsing, command dispatch,
//! envelope assembly, and the exit policy all live here so they stay
//! testable.

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;

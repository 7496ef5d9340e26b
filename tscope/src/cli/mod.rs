//! Command-line interface for tscope
//!
//! This module contains CLI argument parsing

pub mod args;

pub use args::{Args, Command};

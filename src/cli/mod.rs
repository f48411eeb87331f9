//! # CLI Module
//!
//! Command-line access to module compilation and the compiled artifacts.
//!
//! ## Commands
//!
//! ### `compile`
//!
//! Compile one or all configured modules and write their artifacts:
//!
//! ```bash
//! annoroute compile --config annoroute.yaml --manifest types.yaml --module admin --force
//! ```
//!
//! ### `lookup`
//!
//! Resolve a request path against the compiled index:
//!
//! ```bash
//! annoroute lookup --config annoroute.yaml --manifest types.yaml --path admin/users/42
//! ```
//!
//! ### `locks`
//!
//! Print the lock annotation map of a module as JSON:
//!
//! ```bash
//! annoroute locks --config annoroute.yaml --manifest types.yaml --module shop
//! ```
//!
//! ### `rules`
//!
//! Print the compiled input validation rules of a module as JSON:
//!
//! ```bash
//! annoroute rules --config annoroute.yaml --manifest types.yaml --module shop
//! ```
//!
//! ## Usage from Code
//!
//! ```rust,ignore
//! use annoroute::cli::{run, Cli};
//! use clap::Parser;
//!
//! let cli = Cli::parse();
//! run(&cli)?;
//! ```

mod commands;


pub use commands::{run, run_cli, Cli, Commands};

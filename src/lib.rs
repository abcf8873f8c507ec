//! Lean CLI project synchronization.
//!
//! Keeps a directory of local algorithm projects in sync with their cloud
//! counterparts: pulling and pushing projects, maintaining the library reference
//! graph between projects, and encrypting project sources with user keys.

pub mod api;
pub mod cli;
pub mod commands;
pub mod config;
pub mod encryption;
pub mod language;
pub mod project;
pub mod sync;

pub use commands::run;

//! Kiln - content-addressed build graph solver
//!
//! A build is a graph of vertices. Source vertices bring files in, exec
//! vertices run a process over mounted snapshots. Results are cached by
//! each vertex's definition and, failing that, by the content of its
//! inputs.

pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod definition;
pub mod digest;
pub mod error;
pub mod progress;
pub mod solver;
pub mod ui;
pub mod worker;

pub use error::{KilnError, KilnResult};

//! CLI command implementations

pub mod completions;
pub mod config;
pub mod keys;
pub mod solve;

pub use completions::execute as completions;
pub use config::execute as config;
pub use keys::execute as keys;
pub use solve::execute as solve;

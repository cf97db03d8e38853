//! UI module for consistent CLI output
//!
//! Uses `cliclack` for the interactive log rail and `indicatif` for solve
//! spinners, with automatic fallback to plain output in CI/non-interactive
//! environments.
//!
//! # Example
//!
//! ```rust,ignore
//! use kiln::ui::{self, ProgressMode, SolveProgress, UiContext};
//!
//! let ctx = UiContext::detect();
//! ui::intro(&ctx, "kiln solve");
//!
//! let (writer, reader) = kiln::progress::channel();
//! let renderer = tokio::spawn(SolveProgress::new(&ctx, ProgressMode::Auto).run(reader));
//! // ... solve with a Context built from `writer`, then drop it ...
//! let summary = renderer.await?;
//!
//! ui::outro_success(&ctx, &summary.to_string());
//! ```

mod context;
mod output;
mod progress;
mod theme;

pub use context::UiContext;
pub use output::{
    intro, outro_error, outro_success, remark, step_error_detail, step_info, step_ok,
    step_ok_detail, step_warn_hint,
};
pub use progress::{ProgressMode, SolveProgress, SolveSummary};
pub use theme::{init_theme, KilnTheme};

//! Solve progress rendering with CI fallback
//!
//! Interactive terminals get one spinner per running vertex; CI gets one
//! tagged line per transition; `json` mode prints every event as a JSON
//! line on stdout for other tools to consume.

use super::context::UiContext;
use super::theme::VertexState;
use crate::digest::Digest;
use crate::progress::{ProgressReader, SolveStatus, VertexLog, VertexStatus};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// How solve progress is displayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ProgressMode {
    /// Spinners on a terminal, plain lines elsewhere
    Auto,
    Plain,
    Json,
}

impl ProgressMode {
    /// Parse the `progress.mode` config value
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "auto" => Some(Self::Auto),
            "plain" => Some(Self::Plain),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Counts of how vertices finished
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SolveSummary {
    pub executed: usize,
    pub cached: usize,
    pub failed: usize,
}

impl std::fmt::Display for SolveSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} executed, {} cached", self.executed, self.cached)?;
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        Ok(())
    }
}

enum Display {
    Fancy(MultiProgress),
    Plain,
    Json,
}

struct Tracked {
    name: String,
    bar: Option<ProgressBar>,
    done: bool,
}

/// Renders events read from a progress channel
pub struct SolveProgress {
    display: Display,
    vertices: HashMap<Digest, Tracked>,
    summary: SolveSummary,
}

impl SolveProgress {
    pub fn new(ctx: &UiContext, mode: ProgressMode) -> Self {
        let display = match mode {
            ProgressMode::Json => Display::Json,
            ProgressMode::Auto if ctx.use_fancy_output() => Display::Fancy(MultiProgress::new()),
            ProgressMode::Auto | ProgressMode::Plain => Display::Plain,
        };
        Self {
            display,
            vertices: HashMap::new(),
            summary: SolveSummary::default(),
        }
    }

    /// Consume events until every writer is gone
    pub async fn run(mut self, mut reader: ProgressReader) -> SolveSummary {
        while let Some(event) = reader.recv().await {
            self.handle(&event);
        }
        self.finish();
        self.summary
    }

    pub fn summary(&self) -> SolveSummary {
        self.summary
    }

    pub fn handle(&mut self, event: &SolveStatus) {
        if let Display::Json = self.display {
            match serde_json::to_string(event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to encode progress event: {}", e),
            }
        }
        match event {
            SolveStatus::Vertex(status) => self.on_vertex(status),
            SolveStatus::Log(log) => self.on_log(log),
        }
    }

    fn on_vertex(&mut self, status: &VertexStatus) {
        let tracked = self
            .vertices
            .entry(status.digest.clone())
            .or_insert_with(|| Tracked {
                name: status.name.clone(),
                bar: None,
                done: false,
            });

        if !status.is_completed() {
            tracked.done = false;
            if status.started.is_none() {
                return;
            }
            match &self.display {
                Display::Fancy(multi) => {
                    if tracked.bar.is_none() {
                        tracked.bar = Some(vertex_spinner(multi, &status.name));
                    }
                }
                Display::Plain => eprintln!("{}", status_line(status)),
                Display::Json => {}
            }
            return;
        }

        // mark_cached may report a vertex again once it is final
        if tracked.done {
            return;
        }
        tracked.done = true;

        match VertexState::of(status) {
            Some(VertexState::Failed) => self.summary.failed += 1,
            Some(VertexState::Cached) => self.summary.cached += 1,
            _ => self.summary.executed += 1,
        }

        match &self.display {
            Display::Fancy(multi) => {
                if let Some(bar) = tracked.bar.take() {
                    bar.finish_and_clear();
                }
                let _ = multi.println(status_line(status));
            }
            Display::Plain => eprintln!("{}", status_line(status)),
            Display::Json => {}
        }
    }

    fn on_log(&mut self, log: &VertexLog) {
        let tracked = log
            .vertex
            .as_ref()
            .and_then(|digest| self.vertices.get(digest));
        let name = tracked.map(|t| t.name.as_str()).unwrap_or("-");
        let text = String::from_utf8_lossy(&log.data);

        match &self.display {
            Display::Fancy(_) => {
                let Some(bar) = tracked.and_then(|t| t.bar.as_ref()) else {
                    return;
                };
                if let Some(last) = text.lines().rev().map(str::trim).find(|l| !l.is_empty()) {
                    bar.set_message(truncate(last, 60));
                }
            }
            Display::Plain => {
                for line in text.lines() {
                    eprintln!("  {} {}", style(format!("{} |", name)).dim(), line);
                }
            }
            Display::Json => {}
        }
    }

    fn finish(&mut self) {
        for tracked in self.vertices.values_mut() {
            if let Some(bar) = tracked.bar.take() {
                bar.finish_and_clear();
            }
        }
    }
}

fn vertex_spinner(multi: &MultiProgress, name: &str) -> ProgressBar {
    let bar = multi.add(ProgressBar::new_spinner());
    bar.set_style(
        ProgressStyle::default_spinner()
            .template("  {spinner:.yellow} {prefix}  {msg:.dim}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "),
    );
    bar.set_prefix(name.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// One tagged line describing a vertex transition
fn status_line(status: &VertexStatus) -> String {
    let state = VertexState::of(status).unwrap_or(VertexState::Running);
    match state {
        VertexState::Failed => format!("{} {}: {}", state.tag(), status.name, status.error),
        VertexState::Running | VertexState::Cached => format!("{} {}", state.tag(), status.name),
        VertexState::Done => {
            let elapsed = match (status.started, status.completed) {
                (Some(started), Some(completed)) => {
                    (completed - started).num_milliseconds().max(0) as f64 / 1000.0
                }
                _ => 0.0,
            };
            format!(
                "{} {} {}",
                state.tag(),
                status.name,
                style(format!("{:.1}s", elapsed)).dim()
            )
        }
    }
}

fn truncate(line: &str, max: usize) -> String {
    if line.chars().count() <= max {
        return line.to_string();
    }
    let kept: String = line.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

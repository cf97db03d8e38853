//! Kiln's colour palette
//!
//! Every vertex state has one colour. Solve status lines and the
//! cliclack rail both draw from it.

use crate::progress::VertexStatus;
use cliclack::ThemeState;
use console::Style;

/// Where a vertex is in its lifecycle, as displayed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexState {
    Running,
    Done,
    Cached,
    Failed,
}

impl VertexState {
    /// `None` for a vertex that has not started yet
    pub fn of(status: &VertexStatus) -> Option<Self> {
        if !status.error.is_empty() {
            Some(Self::Failed)
        } else if status.is_completed() {
            Some(if status.cached { Self::Cached } else { Self::Done })
        } else if status.started.is_some() {
            Some(Self::Running)
        } else {
            None
        }
    }

    pub fn style(self) -> Style {
        match self {
            Self::Running => Style::new().yellow(),
            Self::Done => Style::new().green(),
            Self::Cached => Style::new().dim(),
            Self::Failed => Style::new().red(),
        }
    }

    /// Tag printed in front of plain status lines
    pub fn tag(self) -> String {
        let tag = match self {
            Self::Running => "[RUN]",
            Self::Done => "[DONE]",
            Self::Cached => "[CACHED]",
            Self::Failed => "[FAIL]",
        };
        self.style().apply_to(tag).to_string()
    }
}

/// cliclack theme following the vertex palette
#[derive(Debug, Clone, Default)]
pub struct KilnTheme;

impl KilnTheme {
    fn state(state: &ThemeState) -> VertexState {
        match state {
            ThemeState::Active => VertexState::Running,
            ThemeState::Error(_) => VertexState::Failed,
            ThemeState::Cancel => VertexState::Cached,
            ThemeState::Submit => VertexState::Done,
        }
    }
}

impl cliclack::Theme for KilnTheme {
    fn bar_color(&self, state: &ThemeState) -> Style {
        match state {
            // submitted rails keep the running colour, dimmed
            ThemeState::Submit => VertexState::Running.style().dim(),
            state => Self::state(state).style(),
        }
    }

    fn state_symbol_color(&self, state: &ThemeState) -> Style {
        Self::state(state).style()
    }
}

/// Initialize the global theme
pub fn init_theme() {
    cliclack::set_theme(KilnTheme);
}

//! Interactive front-ends.
//!
//! The variant is picked once at startup and never switched.

mod fullscreen;
mod line;

use std::io::IsTerminal;

use crate::local::LocalShell;

/// What the attached terminal can do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub stdin_tty: bool,
    pub stdout_tty: bool,
    pub term: Option<String>,
    /// Columns and rows, if readable.
    pub size: Option<(u16, u16)>,
}

impl Capabilities {
    #[must_use]
    pub fn detect() -> Self {
        Self {
            stdin_tty: std::io::stdin().is_terminal(),
            stdout_tty: std::io::stdout().is_terminal(),
            term: std::env::var("TERM").ok(),
            size: crossterm::terminal::size().ok(),
        }
    }

    fn supports_full_screen(&self) -> bool {
        self.stdin_tty
            && self.stdout_tty
            && self.term.as_deref().is_none_or(|t| t != "dumb")
            && self.size.is_some_and(|(cols, rows)| cols > 0 && rows > 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontEnd {
    FullScreen,
    Line,
}

impl FrontEnd {
    #[must_use]
    pub fn select(capabilities: &Capabilities, force_line: bool) -> Self {
        if !force_line && capabilities.supports_full_screen() {
            Self::FullScreen
        } else {
            Self::Line
        }
    }

    /// Drive `shell` until the user exits.
    ///
    /// # Errors
    /// Returns error on terminal I/O failure.
    pub async fn run(self, shell: LocalShell) -> anyhow::Result<()> {
        tracing::debug!(front_end = ?self, "Starting interactive session");
        match self {
            Self::FullScreen => fullscreen::run(shell).await,
            Self::Line => line::run(shell).await,
        }
    }
}

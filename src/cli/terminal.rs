//! Coloured terminal output

use std::fmt::Display;

use owo_colors::Style;
use reqtrace::domain::LifecycleStatus;

/// Whether stdout accepts ANSI colours.
fn colour_enabled() -> bool {
    supports_color::on_cached(supports_color::Stream::Stdout).is_some()
}

fn paint(text: &(impl Display + ?Sized), style: Style) -> String {
    if colour_enabled() {
        style.style(text).to_string()
    } else {
        text.to_string()
    }
}

/// Semantic colours for CLI output.
pub trait Colorize: Display {
    /// Green, for completed actions.
    fn success(&self) -> String {
        paint(self, Style::new().green())
    }

    /// Yellow, for files touched or attention needed.
    fn warning(&self) -> String {
        paint(self, Style::new().yellow())
    }

    /// Bold red, for failures.
    fn error(&self) -> String {
        paint(self, Style::new().red().bold())
    }

    /// Dimmed, for secondary detail.
    fn dim(&self) -> String {
        paint(self, Style::new().dimmed())
    }
}

impl<T: Display + ?Sized> Colorize for T {}

/// Renders `text` in the colour associated with a lifecycle status.
pub fn lifecycle(status: LifecycleStatus, text: &str) -> String {
    let style = match status {
        LifecycleStatus::New => Style::new().cyan(),
        LifecycleStatus::Stable => Style::new().green(),
        LifecycleStatus::Modified | LifecycleStatus::Moved => Style::new().yellow(),
        LifecycleStatus::MarkedForDeletion | LifecycleStatus::Deleted => Style::new().dimmed(),
    };
    paint(text, style)
}

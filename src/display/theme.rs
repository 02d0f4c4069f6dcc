//! Terminal styling for map, cluster and search output.
//!
//! Styling is dropped entirely when `NO_COLOR` is set or stdout is not a
//! terminal, so piped text output stays plain.

use console::Style;
use owo_colors::OwoColorize;
use std::fmt::Display;
use std::sync::LazyLock;

pub static THEME: LazyLock<Theme> = LazyLock::new(Theme::default);

#[derive(Debug, Clone)]
pub struct Theme {
    pub success: Style,
    pub warning: Style,
    /// Section titles in help and summaries
    pub header: Style,
    /// Secondary facts: bounds, unassigned parents
    pub muted: Style,
    pub path: Style,
    /// Ids, counts and scores
    pub number: Style,
    /// Cluster and topic labels
    pub label: Style,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            success: Style::new().green().bright(),
            warning: Style::new().yellow().bright(),
            header: Style::new().cyan().bold(),
            muted: Style::new().dim(),
            path: Style::new().magenta(),
            number: Style::new().cyan(),
            label: Style::new().yellow().bold(),
        }
    }
}

impl Theme {
    pub fn success_with_icon(&self, text: &str) -> String {
        if Self::should_disable_colors() {
            format!("✓ {text}")
        } else {
            format!("{} {}", "✓".green(), self.success.apply_to(text))
        }
    }

    pub fn warning_with_icon(&self, text: &str) -> String {
        if Self::should_disable_colors() {
            format!("⚠ {text}")
        } else {
            format!("{} {}", "⚠".yellow(), self.warning.apply_to(text))
        }
    }

    /// `"<kind> <id>: <label>"` with the id and label styled.
    pub fn cluster_heading(&self, kind: &str, id: impl Display, label: &str) -> String {
        format!(
            "{kind} {}: {}",
            self.apply(&self.number, id),
            self.apply(&self.label, label)
        )
    }

    pub fn should_disable_colors() -> bool {
        use is_terminal::IsTerminal;
        std::env::var("NO_COLOR").is_ok() || !std::io::stdout().is_terminal()
    }

    /// `text` in `style`, or plain when colors are off.
    pub fn apply<T: Display>(&self, style: &Style, text: T) -> String {
        if Self::should_disable_colors() {
            text.to_string()
        } else {
            style.apply_to(text).to_string()
        }
    }
}

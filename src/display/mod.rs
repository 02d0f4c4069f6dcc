//! Rich terminal display utilities for CLI output.
//!
//! Provides styled tables, spinners, and help formatting.

pub mod help;
pub mod progress;
pub mod tables;
pub mod theme;

pub use help::{create_help_text, format_help_section};
pub use progress::{create_spinner, with_spinner};
pub use tables::{TableBuilder, create_info_table, truncate_cell};
pub use theme::{THEME, Theme};

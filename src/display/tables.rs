//! Table formatting utilities for structured output.

use comfy_table::{
    Attribute, Cell, CellAlignment, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
};

/// Builder for creating formatted tables.
pub struct TableBuilder {
    table: Table,
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TableBuilder {
    /// Create a new table builder.
    pub fn new() -> Self {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.apply_modifier(UTF8_ROUND_CORNERS);
        Self { table }
    }

    /// Set the table headers.
    pub fn set_headers(mut self, headers: Vec<&str>) -> Self {
        let header_cells: Vec<Cell> = headers
            .into_iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
            .collect();
        self.table.set_header(header_cells);
        self
    }

    /// Add a row to the table.
    pub fn add_row(mut self, row: Vec<String>) -> Self {
        self.table.add_row(row);
        self
    }

    /// Add a row whose first column holds a similarity score.
    ///
    /// Scores are right-aligned and colored by strength.
    pub fn add_scored_row(mut self, score: f32, rest: Vec<String>) -> Self {
        let mut cells = vec![
            Cell::new(format!("{score:.3}"))
                .fg(score_color(score))
                .set_alignment(CellAlignment::Right),
        ];
        cells.extend(rest.into_iter().map(Cell::new));
        self.table.add_row(cells);
        self
    }

    /// Build and return the formatted table.
    pub fn build(self) -> String {
        self.table.to_string()
    }
}

fn score_color(score: f32) -> Color {
    if score >= 0.6 {
        Color::Green
    } else if score >= 0.3 {
        Color::Yellow
    } else {
        Color::DarkGrey
    }
}

/// Two-column key/value table for snapshot summaries.
pub fn create_info_table(rows: &[(&str, String)]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.apply_modifier(UTF8_ROUND_CORNERS);
    table.set_header(vec![
        Cell::new("Property").add_attribute(Attribute::Bold),
        Cell::new("Value").add_attribute(Attribute::Bold),
    ]);
    for (key, value) in rows {
        table.add_row(vec![Cell::new(key), Cell::new(value)]);
    }
    table.to_string()
}

/// Shorten `text` to at most `max_chars` characters, marking the cut.
pub fn truncate_cell(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{kept}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_builder() {
        let table = TableBuilder::new()
            .set_headers(vec!["Id", "Label"])
            .add_row(vec!["0".to_string(), "budget / senate".to_string()])
            .build();

        assert!(table.contains("Label"));
        assert!(table.contains("budget / senate"));
    }

    #[test]
    fn test_scored_rows_format_three_decimals() {
        let table = TableBuilder::new()
            .set_headers(vec!["Score", "Title"])
            .add_scored_row(0.91234, vec!["Jazz festival".to_string()])
            .build();
        assert!(table.contains("0.912"));
    }

    #[test]
    fn test_info_table() {
        let table = create_info_table(&[("Documents", "5".to_string())]);
        assert!(table.contains("Documents"));
        assert!(table.contains('5'));
    }

    #[test]
    fn test_truncate_cell() {
        assert_eq!(truncate_cell("short", 10), "short");
        assert_eq!(truncate_cell("abcdefghij", 5), "abcd…");
    }
}

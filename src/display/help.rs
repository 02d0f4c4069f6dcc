//! Custom help formatting for consistent CLI display.

use crate::display::theme::THEME;

/// Format a help section with a styled title.
pub fn format_help_section(title: &str, content: &str, indent: bool) -> String {
    let mut output = String::new();

    output.push_str(&THEME.apply(&THEME.header, title));
    output.push('\n');

    for line in content.lines() {
        if line.trim().is_empty() {
            output.push('\n');
        } else if indent && !line.starts_with("    ") {
            output.push_str(&format!("    {line}\n"));
        } else {
            output.push_str(&format!("{line}\n"));
        }
    }

    output
}

/// Text shown after the generated `--help` output.
pub fn create_help_text() -> String {
    let mut help = String::new();

    let quick_start = r#"$ knowmap init                     # Write .knowmap/settings.toml
$ knowmap build articles.json      # Embed, cluster, project and label
$ knowmap map                      # Show the coarse/fine hierarchy"#;
    help.push_str(&format_help_section("QUICK START", quick_start, true));
    help.push('\n');

    let examples = r#"# Build without downloading a model
$ knowmap build articles.jsonl --offline --coarse 6 --fine 30

# Nearest documents to a query
$ knowmap search "interest rates" -k 5

# Assign new text to a fine cluster by neighbor vote
$ knowmap classify "Central bank raises rates again"

# Members of fine cluster 12, as JSON
$ knowmap cluster 12 --json"#;
    help.push_str(&format_help_section("EXAMPLES", examples, true));
    help.push('\n');

    help.push_str(&format_help_section(
        "LEARN MORE",
        "Commands: knowmap help <COMMAND>",
        true,
    ));

    help
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_help_sections_indent_content() {
        let section = format_help_section("EXAMPLES", "$ knowmap map\n\n    kept", true);
        assert!(section.contains("    $ knowmap map\n"));
        assert!(section.contains("\n    kept\n"));
    }
}

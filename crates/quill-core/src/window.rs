// ABOUTME: Extracts the text window around a cursor position from full document text
// ABOUTME: Splits a document into before/after regions plus current-line context

/// The document text split around a cursor position.
///
/// `after` starts at the line *below* the cursor; the remainder of the
/// cursor's own line lives in `line_suffix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextWindow {
    /// All lines up to and including the cursor line, truncated at the column.
    pub before: String,
    /// All lines strictly below the cursor line.
    pub after: String,
    /// The cursor line up to the column (the last line of `before`).
    pub current_line: String,
    /// The character immediately preceding the cursor, if any.
    pub last_char: Option<char>,
    /// The remainder of the cursor line after the column.
    pub line_suffix: String,
}

impl TextWindow {
    /// Extract the window at a zero-based line/column. Out-of-range lines
    /// clamp to the last line; columns past the end of the line clamp to
    /// the line length. Columns are interpreted as character offsets.
    pub fn extract(text: &str, line: usize, column: usize) -> Self {
        let lines: Vec<&str> = text.split('\n').collect();
        let line = line.min(lines.len() - 1);

        let cursor_line = lines[line];
        let split = char_boundary(cursor_line, column);
        let (line_prefix, line_suffix) = cursor_line.split_at(split);

        let mut before = lines[..line].join("\n");
        if line > 0 {
            before.push('\n');
        }
        before.push_str(line_prefix);

        let after = if line + 1 < lines.len() {
            lines[line + 1..].join("\n")
        } else {
            String::new()
        };

        TextWindow {
            last_char: before.chars().last(),
            current_line: line_prefix.to_string(),
            line_suffix: line_suffix.to_string(),
            before,
            after,
        }
    }

    /// The full text following the cursor: the rest of the cursor line,
    /// then everything below it.
    pub fn full_after(&self) -> String {
        match (self.line_suffix.is_empty(), self.after.is_empty()) {
            (true, _) => self.after.clone(),
            (false, true) => self.line_suffix.clone(),
            (false, false) => format!("{}\n{}", self.line_suffix, self.after),
        }
    }
}

/// Byte index of the `column`-th character, clamped to the line length.
fn char_boundary(line: &str, column: usize) -> usize {
    line.char_indices()
        .nth(column)
        .map(|(idx, _)| idx)
        .unwrap_or(line.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_around_cursor() {
        let text = "fn main() {\n    let x = 1;\n}";
        let window = TextWindow::extract(text, 1, 8);

        assert_eq!(window.before, "fn main() {\n    let ");
        assert_eq!(window.current_line, "    let ");
        assert_eq!(window.line_suffix, "x = 1;");
        assert_eq!(window.after, "}");
        assert_eq!(window.last_char, Some(' '));
    }

    #[test]
    fn test_cursor_on_first_line() {
        let window = TextWindow::extract("hello world", 0, 5);

        assert_eq!(window.before, "hello");
        assert_eq!(window.line_suffix, " world");
        assert_eq!(window.after, "");
        assert_eq!(window.last_char, Some('o'));
    }

    #[test]
    fn test_line_index_clamps_to_last_line() {
        let window = TextWindow::extract("one\ntwo", 9, 1);

        assert_eq!(window.before, "one\nt");
        assert_eq!(window.current_line, "t");
        assert_eq!(window.line_suffix, "wo");
    }

    #[test]
    fn test_column_past_line_end_clamps() {
        let window = TextWindow::extract("ab\ncd", 0, 99);

        assert_eq!(window.before, "ab");
        assert_eq!(window.line_suffix, "");
        assert_eq!(window.after, "cd");
    }

    #[test]
    fn test_cursor_at_document_start() {
        let window = TextWindow::extract("abc", 0, 0);

        assert_eq!(window.before, "");
        assert_eq!(window.last_char, None);
        assert_eq!(window.line_suffix, "abc");
    }

    #[test]
    fn test_multibyte_column_offsets() {
        let window = TextWindow::extract("héllo", 0, 2);

        assert_eq!(window.before, "hé");
        assert_eq!(window.line_suffix, "llo");
    }

    #[test]
    fn test_full_after_joins_line_suffix_and_below() {
        let window = TextWindow::extract("a(b\nc", 0, 2);

        assert_eq!(window.line_suffix, "b");
        assert_eq!(window.after, "c");
        assert_eq!(window.full_after(), "b\nc");
    }
}

// ABOUTME: Indentation helpers for code-transform actions
// ABOUTME: Dedents selections before prompting and restores the original level on the way back

/// The whitespace prefix of the least-indented non-blank line, preserving
/// the original characters (tabs vs spaces).
pub fn common_indent(text: &str) -> &str {
    let mut min: Option<&str> = None;
    for line in text.split('\n') {
        if line.trim().is_empty() {
            continue;
        }
        let indent = &line[..line.len() - line.trim_start_matches([' ', '\t']).len()];
        if min.is_none_or(|current| indent.len() < current.len()) {
            min = Some(indent);
        }
    }
    min.unwrap_or("")
}

/// Remove the common indent from every non-blank line.
pub fn dedent(text: &str) -> String {
    let indent = common_indent(text);
    if indent.is_empty() {
        return text.to_string();
    }
    text.split('\n')
        .map(|line| {
            if line.trim().is_empty() {
                line
            } else {
                line.strip_prefix(indent).unwrap_or(line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prepend `prefix` to every non-blank line.
pub fn indent(text: &str, prefix: &str) -> String {
    if prefix.is_empty() {
        return text.to_string();
    }
    text.split('\n')
        .map(|line| {
            if line.trim().is_empty() {
                line.to_string()
            } else {
                format!("{prefix}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Drop leading and trailing blank lines.
pub fn trim_blank_lines(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let start = lines
        .iter()
        .position(|line| !line.trim().is_empty())
        .unwrap_or(lines.len());
    let end = lines
        .iter()
        .rposition(|line| !line.trim().is_empty())
        .map(|idx| idx + 1)
        .unwrap_or(start);
    lines[start..end].join("\n")
}

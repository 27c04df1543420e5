// ABOUTME: Deterministic cleaning pipeline turning one raw backend candidate into insertable text
// ABOUTME: Strips markup and echoed context, truncates overlap with after-cursor text, trims degenerate output

use std::sync::LazyLock;

use regex::Regex;

/// Trigger context the cleaner needs: the text before the cursor (for the
/// current-line prefix and block detection) and the full text following it.
#[derive(Debug, Clone, Copy)]
pub struct CleanContext<'a> {
    pub content_before: &'a str,
    pub content_after: &'a str,
    /// Candidates shorter than this after trimming are rejected.
    pub min_len: usize,
}

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[a-z]*\n?(.*?)```").unwrap());

/// Model-control markers; output is truncated at the first occurrence.
const CONTROL_TOKENS: &[&str] = &["<|", "<FILL>", "<CURSOR>", "</s>", "<s>"];

/// Chat-style lead-ins models prepend despite being told not to.
const BOILERPLATE_PREFIXES: &[&str] = &[
    "here's the completion:",
    "here is the completion:",
    "here is the completed code:",
    "completion:",
    "the completion is:",
    "output:",
    "answer:",
    "code:",
];

/// Keywords that open a block when they lead the trigger line.
const BLOCK_KEYWORDS: &[&str] = &[
    "if", "else", "for", "while", "loop", "match", "switch", "fn", "func", "function", "def",
    "impl", "trait", "class", "struct", "enum", "select",
];

/// Run the full cleaning pipeline on one raw candidate. Returns an empty
/// string when nothing usable remains. Steps are order-sensitive: overlap
/// truncation assumes markup and boilerplate are already gone.
pub fn clean_candidate(raw: &str, ctx: &CleanContext) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let mut text = strip_code_fence(raw);
    text = text.trim_matches('`').to_string();
    text = truncate_at_control_token(&text);
    text = strip_boilerplate_prefixes(&text);
    text = strip_echoed_line_prefix(&text, ctx.content_before);

    if !ctx.content_after.is_empty() {
        text = truncate_at_after_overlap(&text, ctx.content_after);
        text = remove_after_duplicates(&text, ctx.content_after);
    }

    text = truncate_non_block_completion(&text, ctx.content_before);

    let text = text
        .trim_start_matches('\n')
        .trim_start_matches([' ', '\t'])
        .trim_end_matches([' ', '\t', '\n']);

    if text.trim().chars().count() < ctx.min_len {
        return String::new();
    }
    text.to_string()
}

/// Unwrap a fenced code block when the response is wrapped in one.
fn strip_code_fence(text: &str) -> String {
    match CODE_FENCE.captures(text) {
        Some(caps) => caps[1].trim().to_string(),
        None => text.to_string(),
    }
}

fn truncate_at_control_token(text: &str) -> String {
    let cut = CONTROL_TOKENS
        .iter()
        .filter_map(|token| text.find(token))
        .min();
    match cut {
        Some(idx) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Strip each known lead-in phrase at most once, case-insensitively. The
/// prefixes are ASCII, so a byte-length head comparison is only taken when
/// it lands on a char boundary.
fn strip_boilerplate_prefixes(text: &str) -> String {
    let mut text = text.to_string();
    for prefix in BOILERPLATE_PREFIXES {
        let trimmed = text.trim();
        if trimmed
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        {
            text = trimmed[prefix.len()..].trim().to_string();
        }
    }
    text
}

/// Drop the trigger line's own text when the model echoes it back, e.g.
/// cursor after "for " and candidate "for i in 0..n" becomes "i in 0..n".
fn strip_echoed_line_prefix(text: &str, content_before: &str) -> String {
    let current_line = content_before.lines().last().unwrap_or("").trim();
    if current_line.is_empty() {
        return text.to_string();
    }
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix(current_line) {
        return rest.trim_start_matches(' ').to_string();
    }
    text.to_string()
}

/// Word-boundary characters that may precede a repeated after-cursor token.
fn is_boundary_char(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '[' | '(' | '{' | '=' | ':')
}

/// Truncate the candidate where it starts repeating the first meaningful
/// token of the after-cursor text. Only cuts at a word boundary so an
/// identifier containing the token survives.
fn truncate_at_after_overlap(text: &str, after: &str) -> String {
    let first_line = match after.trim().lines().next() {
        Some(line) if line.trim().len() > 1 => line.trim(),
        _ => return text.to_string(),
    };

    let mut words = first_line.split_whitespace();
    let mut first_word = match words.next() {
        Some(word) => word,
        None => return text.to_string(),
    };

    // Braces and comment openers appear everywhere; anchor on the next word.
    const STRUCTURAL: &[&str] = &["{", "}", "(", ")", "[", "]", "//", "/*"];
    if STRUCTURAL.contains(&first_word) {
        first_word = match words.next() {
            Some(word) => word,
            None => return text.to_string(),
        };
    }
    if first_word.len() < 2 {
        return text.to_string();
    }

    if let Some(idx) = text.find(first_word)
        && idx > 0
        && text[..idx].chars().last().is_some_and(is_boundary_char)
    {
        return text[..idx].trim_end_matches([' ', '\t']).to_string();
    }
    text.to_string()
}

/// Drop trailing candidate lines that duplicate the leading lines of the
/// after-cursor text, but only when the duplicated region carries more than
/// bare braces, and never the entire candidate.
fn remove_after_duplicates(text: &str, after: &str) -> String {
    let resp_lines: Vec<&str> = text.split('\n').collect();
    let after_lines: Vec<&str> = after.split('\n').collect();

    for count in (1..=resp_lines.len().min(3)).rev() {
        if after_lines.len() < count || resp_lines.len() - count < 1 {
            continue;
        }

        let tail = &resp_lines[resp_lines.len() - count..];
        let head = &after_lines[..count];

        let mut substantial = false;
        let matches = tail.iter().zip(head.iter()).all(|(resp, after)| {
            let resp = resp.trim();
            let after = after.trim();
            if !resp.is_empty() && resp != "{" && resp != "}" {
                substantial = true;
            }
            resp == after
        });

        if matches && substantial {
            return resp_lines[..resp_lines.len() - count].join("\n");
        }
    }
    text.to_string()
}

/// Whether the trigger line opens a block (unclosed brace or block keyword).
fn is_block_context(content_before: &str) -> bool {
    let last_line = content_before.lines().last().unwrap_or("").trim();
    if last_line.ends_with('{') {
        return true;
    }
    last_line
        .split_whitespace()
        .next()
        .is_some_and(|word| BLOCK_KEYWORDS.contains(&word))
}

/// Trigger lines that read like an assignment or declaration in progress.
fn is_assignment_context(line: &str) -> bool {
    let line = line.trim();
    line.contains('=')
        || line.ends_with("var")
        || ["let ", "var ", "const ", "val "]
            .iter()
            .any(|kw| line.starts_with(kw))
}

/// Ceiling for multi-line candidates outside a block context.
const NON_BLOCK_LINE_LIMIT: usize = 10;

/// Rein in runaway multi-line candidates when the trigger line does not open
/// a block: assignments keep only their first line, anything else is cut at
/// a generous line ceiling.
fn truncate_non_block_completion(text: &str, content_before: &str) -> String {
    if !text.contains('\n') || is_block_context(content_before) {
        return text.to_string();
    }

    let lines: Vec<&str> = text.split('\n').collect();
    let first_line = lines[0].trim();
    if first_line.len() < 2 {
        return text.to_string();
    }

    let last_line = content_before.lines().last().unwrap_or("");
    if is_assignment_context(last_line) {
        return lines[0].to_string();
    }
    if lines.len() > NON_BLOCK_LINE_LIMIT && !first_line.ends_with('{') {
        return lines[0].to_string();
    }
    text.to_string()
}

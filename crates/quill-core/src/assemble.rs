// ABOUTME: Converts cleaned candidate strings into positioned LSP completion items
// ABOUTME: Computes insertion end positions and overlap deletions against after-cursor text

use lsp_types::{
    CompletionItem, CompletionItemKind, InsertTextFormat, Position, Range, TextEdit,
};

const LABEL_WIDTH: usize = 40;

/// Build completion items for cleaned candidates, preserving backend order.
/// Every item inserts at the cursor (zero-width edit) and is preselected with
/// an empty sort key so it ranks ahead of non-AI suggestions. `line_suffix`
/// is the remainder of the cursor's own line, used for overlap deletion.
pub fn build_completion_items(
    candidates: &[String],
    position: Position,
    line_suffix: &str,
) -> Vec<CompletionItem> {
    candidates
        .iter()
        .map(|candidate| build_item(candidate, position, line_suffix))
        .collect()
}

fn build_item(text: &str, position: Position, line_suffix: &str) -> CompletionItem {
    let lines: Vec<&str> = text.split('\n').collect();

    let end_line = position.line + (lines.len() as u32 - 1);
    let last_len = lines[lines.len() - 1].chars().count() as u32;
    let end_character = if lines.len() == 1 {
        position.character + last_len
    } else {
        last_len
    };
    let end = Position::new(end_line, end_character);

    // Text already present after the cursor that the candidate would
    // duplicate gets deleted right behind the insertion.
    let overlap = overlap_suffix(text, line_suffix);
    let additional_text_edits = (overlap > 0).then(|| {
        vec![TextEdit {
            range: Range::new(end, Position::new(end.line, end.character + overlap as u32)),
            new_text: String::new(),
        }]
    });

    CompletionItem {
        label: build_label(lines[0]),
        kind: Some(CompletionItemKind::TEXT),
        detail: Some(text.to_string()),
        insert_text_format: Some(InsertTextFormat::PLAIN_TEXT),
        text_edit: Some(
            TextEdit {
                range: Range::new(position, position),
                new_text: text.to_string(),
            }
            .into(),
        ),
        // Empty string sorts before every client-side suggestion.
        sort_text: Some(String::new()),
        preselect: Some(true),
        additional_text_edits,
        ..Default::default()
    }
}

fn build_label(first_line: &str) -> String {
    let label = format!("AI: {first_line}");
    if label.chars().count() > LABEL_WIDTH {
        let truncated: String = label.chars().take(LABEL_WIDTH).collect();
        format!("{truncated}...")
    } else {
        label
    }
}

/// Length in characters of the longest suffix of `text` (ignoring trailing
/// horizontal whitespace) that is a literal prefix of `suffix`.
fn overlap_suffix(text: &str, suffix: &str) -> usize {
    if suffix.is_empty() {
        return 0;
    }
    let text = text.trim_end_matches([' ', '\t']);
    let text_chars: Vec<char> = text.chars().collect();
    let suffix_chars: Vec<char> = suffix.chars().collect();

    let max = text_chars.len().min(suffix_chars.len());
    for len in (1..=max).rev() {
        if text_chars[text_chars.len() - len..] == suffix_chars[..len] {
            return len;
        }
    }
    0
}

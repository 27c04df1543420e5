// ABOUTME: In-memory store of open documents synced from the client
// ABOUTME: Tracks text, version and language per URI and applies incremental range edits

use lsp_types::{
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    DidSaveTextDocumentParams, Position, Uri,
};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct DocumentState {
    pub language_id: String,
    pub version: i32,
    pub content: String,
}

/// Open documents keyed by URI. Mutated only from the document-sync
/// notifications; completion execution reads it to re-check versions.
#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: HashMap<Uri, DocumentState>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, uri: &Uri) -> Option<&DocumentState> {
        self.documents.get(uri)
    }

    pub fn handle_did_open(&mut self, params: DidOpenTextDocumentParams) {
        let doc = params.text_document;
        info!(uri = ?doc.uri, language = %doc.language_id, "Opening document");
        self.documents.insert(
            doc.uri,
            DocumentState {
                language_id: doc.language_id,
                version: doc.version,
                content: doc.text,
            },
        );
    }

    pub fn handle_did_change(&mut self, params: DidChangeTextDocumentParams) {
        let Some(state) = self.documents.get_mut(&params.text_document.uri) else {
            debug!(uri = ?params.text_document.uri, "Change for unknown document");
            return;
        };
        state.version = params.text_document.version;

        for change in params.content_changes {
            match change.range {
                Some(range) => apply_range_edit(&mut state.content, range, &change.text),
                None => state.content = change.text,
            }
        }
    }

    pub fn handle_did_save(&mut self, params: DidSaveTextDocumentParams) {
        if let Some(text) = params.text
            && let Some(state) = self.documents.get_mut(&params.text_document.uri)
        {
            state.content = text;
        }
    }

    pub fn handle_did_close(&mut self, params: DidCloseTextDocumentParams) {
        info!(uri = ?params.text_document.uri, "Document closed");
        self.documents.remove(&params.text_document.uri);
    }
}

/// Splice `new_text` over the byte range addressed by the LSP positions.
fn apply_range_edit(content: &mut String, range: lsp_types::Range, new_text: &str) {
    let start = offset_of(content, range.start);
    let end = offset_of(content, range.end).max(start);
    content.replace_range(start..end, new_text);
}

/// Byte offset of a line/character position, clamping out-of-range lines to
/// the end of the document and columns to the end of their line.
fn offset_of(content: &str, position: Position) -> usize {
    let mut offset = 0;
    let mut remaining = position.line;
    let mut rest = content;

    while remaining > 0 {
        match rest.find('\n') {
            Some(idx) => {
                offset += idx + 1;
                rest = &rest[idx + 1..];
                remaining -= 1;
            }
            None => return content.len(),
        }
    }

    let line_end = rest.find('\n').unwrap_or(rest.len());
    let column = rest[..line_end]
        .char_indices()
        .nth(position.character as usize)
        .map(|(idx, _)| idx)
        .unwrap_or(line_end);
    offset + column
}

// ABOUTME: Chat-backed code actions: fix & complete, explain with comments, code from comment
// ABOUTME: Expands the selection to whole lines, transforms it, applies the result via workspace/applyEdit

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use crossbeam_channel::Sender;
use futures::FutureExt;
use lsp_server::{ErrorCode, Message, Notification, Request, RequestId, Response};
use lsp_types::{
    ApplyWorkspaceEditParams, CodeActionOrCommand, CodeActionParams, Command,
    ExecuteCommandParams, MessageType, Position, Range, ShowMessageParams, TextEdit, Uri,
    WorkspaceEdit, notification::Notification as _, request::Request as _,
};
use parking_lot::RwLock;
use quill_core::indent::{common_indent, dedent, indent, trim_blank_lines};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::backend::Registry;
use crate::config::Config;
use crate::documents::DocumentStore;
use crate::prompts;

pub const COMMAND_FIX_COMPLETE: &str = "quill.fixComplete";
pub const COMMAND_EXPLAIN_COMMENTS: &str = "quill.explainComments";
pub const COMMAND_CODE_FROM_COMMENT: &str = "quill.codeFromComment";

pub const ALL_COMMANDS: &[&str] = &[
    COMMAND_FIX_COMPLETE,
    COMMAND_EXPLAIN_COMMENTS,
    COMMAND_CODE_FROM_COMMENT,
];

/// Argument payload carried by every action command.
#[derive(Debug, Serialize, Deserialize)]
struct CommandArgs {
    uri: Uri,
    range: Range,
}

pub struct ActionHandler {
    config: Arc<Config>,
    registry: Arc<Registry>,
    documents: Arc<RwLock<DocumentStore>>,
    sender: Sender<Message>,
    runtime: tokio::runtime::Handle,
    /// Ids for server-initiated requests (workspace/applyEdit). Negative so
    /// they can never collide with client-issued ids.
    next_outgoing_id: AtomicI32,
}

impl ActionHandler {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<Registry>,
        documents: Arc<RwLock<DocumentStore>>,
        sender: Sender<Message>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            config,
            registry,
            documents,
            sender,
            runtime,
            next_outgoing_id: AtomicI32::new(-1),
        }
    }

    /// textDocument/codeAction: offer the transform commands for the current
    /// selection. The heavy work happens later in executeCommand.
    pub fn handle_code_action(&self, id: RequestId, params: CodeActionParams) {
        let args = CommandArgs {
            uri: params.text_document.uri,
            range: params.range,
        };
        let arguments = match serde_json::to_value(&args) {
            Ok(value) => vec![value],
            Err(err) => {
                error!(error = %err, "Failed to encode code action arguments");
                Vec::new()
            }
        };

        let actions: Vec<CodeActionOrCommand> = [
            ("AI: Fix & complete", COMMAND_FIX_COMPLETE),
            ("AI: Explain with comments", COMMAND_EXPLAIN_COMMENTS),
            ("AI: Generate code from comment", COMMAND_CODE_FROM_COMMENT),
        ]
        .into_iter()
        .map(|(title, command)| {
            CodeActionOrCommand::Command(Command {
                title: title.to_string(),
                command: command.to_string(),
                arguments: Some(arguments.clone()),
            })
        })
        .collect();

        send_response(&self.sender, id, &actions);
    }

    /// workspace/executeCommand: run one transform. Exactly one response goes
    /// back for `id` whatever happens; failures surface as a warning message
    /// rather than a request error so the editor stays quiet.
    pub fn handle_execute_command(&self, id: RequestId, params: ExecuteCommandParams) {
        let Some(args) = params
            .arguments
            .first()
            .and_then(|value| serde_json::from_value::<CommandArgs>(value.clone()).ok())
        else {
            let response = Response::new_err(
                id,
                ErrorCode::InvalidParams as i32,
                format!("malformed arguments for {}", params.command),
            );
            let _ = self.sender.send(Message::Response(response));
            return;
        };

        let captured = {
            let documents = self.documents.read();
            documents.get(&args.uri).map(|doc| {
                let (edit_range, text) = line_block(&doc.content, args.range);
                (edit_range, text, doc.language_id.clone())
            })
        };
        let Some((edit_range, selected, language_id)) = captured else {
            warn!(uri = ?args.uri, "Action on unknown document");
            send_response(&self.sender, id, &serde_json::Value::Null);
            return;
        };

        let command = params.command;
        let sender = self.sender.clone();
        let config = self.config.clone();
        let registry = self.registry.clone();
        let apply_id = RequestId::from(self.next_outgoing_id.fetch_sub(1, Ordering::SeqCst));

        self.runtime.spawn(async move {
            let execution = run_transform(
                &command,
                &selected,
                &language_id,
                config,
                registry,
            );
            match AssertUnwindSafe(execution).catch_unwind().await {
                Ok(Ok(replacement)) => {
                    apply_edit(&sender, apply_id, args.uri, edit_range, replacement);
                }
                Ok(Err(err)) => {
                    warn!(command = %command, error = %err, "Action failed");
                    show_warning(&sender, format!("AI action failed: {err}"));
                }
                Err(_) => {
                    error!(command = %command, "Action execution panicked");
                    show_warning(&sender, "AI action failed".to_string());
                }
            }
            send_response(&sender, id, &serde_json::Value::Null);
        });
    }
}

/// Dedent, prompt, and re-indent one whole-line block.
async fn run_transform(
    command: &str,
    selected: &str,
    language_id: &str,
    config: Arc<Config>,
    registry: Arc<Registry>,
) -> anyhow::Result<String> {
    let Some(backend) = registry.current() else {
        anyhow::bail!("no generation backend selected");
    };

    let original_indent = common_indent(selected).to_string();
    let dedented = dedent(selected);

    let (system, user) = match command {
        COMMAND_FIX_COMPLETE => (
            prompts::fix_complete_system(language_id),
            prompts::fix_complete_user(&dedented),
        ),
        COMMAND_EXPLAIN_COMMENTS => (
            prompts::explain_comments_system(language_id),
            prompts::explain_comments_user(&dedented),
        ),
        COMMAND_CODE_FROM_COMMENT => (
            prompts::code_from_comment_system(language_id),
            prompts::code_from_comment_user(&dedented),
        ),
        other => anyhow::bail!("unknown command: {other}"),
    };

    info!(command, backend = backend.name(), "Running code action");

    let timeout = Duration::from_millis(config.server.chat_timeout_ms);
    let raw = tokio::time::timeout(timeout, backend.chat(&system, &user))
        .await
        .map_err(|_| anyhow::anyhow!("chat deadline exceeded"))??;

    let cleaned = trim_blank_lines(&strip_code_fence(&raw));
    if cleaned.is_empty() {
        anyhow::bail!("backend returned an empty transform");
    }
    Ok(indent(&cleaned, &original_indent))
}

/// Expand an LSP range to whole lines. An empty selection covers the line
/// under the cursor. Returns the replacement range and the covered text.
fn line_block(content: &str, range: Range) -> (Range, String) {
    let lines: Vec<&str> = content.split('\n').collect();
    let last = lines.len().saturating_sub(1);

    let start_line = (range.start.line as usize).min(last);
    let mut end_line = (range.end.line as usize).min(last);
    if range.end.character > 0 || end_line == start_line {
        end_line += 1;
    }
    let end_line = end_line.clamp(start_line + 1, lines.len());

    let text = lines[start_line..end_line].join("\n");
    let edit_range = Range::new(
        Position::new(start_line as u32, 0),
        Position::new(end_line as u32, 0),
    );
    (edit_range, text)
}

/// Unwrap one surrounding markdown fence if the model added it anyway.
fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let body = rest.split_once('\n').map_or("", |(_, body)| body);
        let body = body.trim_end();
        let body = body.strip_suffix("```").unwrap_or(body);
        return body.trim_end().to_string();
    }
    trimmed.to_string()
}

fn apply_edit(
    sender: &Sender<Message>,
    apply_id: RequestId,
    uri: Uri,
    range: Range,
    new_text: String,
) {
    debug!(uri = ?uri, ?range, "Applying transform edit");
    let edit = TextEdit {
        range,
        // The replaced block always ends at a line start.
        new_text: format!("{new_text}\n"),
    };
    let params = ApplyWorkspaceEditParams {
        label: Some("AI code action".to_string()),
        edit: WorkspaceEdit {
            changes: Some([(uri, vec![edit])].into_iter().collect()),
            ..WorkspaceEdit::default()
        },
    };
    let request = Request {
        id: apply_id,
        method: lsp_types::request::ApplyWorkspaceEdit::METHOD.to_string(),
        params: serde_json::to_value(params).unwrap_or_default(),
    };
    if sender.send(Message::Request(request)).is_err() {
        warn!("Client connection closed before edit could be applied");
    }
}

fn show_warning(sender: &Sender<Message>, message: String) {
    let params = ShowMessageParams {
        typ: MessageType::WARNING,
        message,
    };
    let _ = sender.send(Message::Notification(Notification {
        method: lsp_types::notification::ShowMessage::METHOD.to_string(),
        params: serde_json::to_value(params).unwrap_or_default(),
    }));
}

fn send_response<T: Serialize>(sender: &Sender<Message>, id: RequestId, result: &T) {
    let response = match serde_json::to_value(result) {
        Ok(value) => Response {
            id,
            result: Some(value),
            error: None,
        },
        Err(err) => {
            error!(error = %err, "Failed to serialize response");
            Response {
                id,
                result: Some(serde_json::Value::Null),
                error: None,
            }
        }
    };
    if sender.send(Message::Response(response)).is_err() {
        warn!("Client connection closed before response could be sent");
    }
}

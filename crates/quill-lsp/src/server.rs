// ABOUTME: LSP message loop: routes requests and notifications to their handlers
// ABOUTME: Document sync is handled inline; completions and actions dispatch to their managers

use anyhow::Result;
use lsp_server::{Connection, Message, Notification, Request, Response};
use lsp_types::{
    CodeActionParams, CompletionParams, DidChangeTextDocumentParams, DidCloseTextDocumentParams,
    DidOpenTextDocumentParams, DidSaveTextDocumentParams, ExecuteCommandParams,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::actions::ActionHandler;
use crate::completion::CompletionHandler;
use crate::documents::DocumentStore;

pub struct Server {
    documents: Arc<RwLock<DocumentStore>>,
    completions: CompletionHandler,
    actions: ActionHandler,
}

impl Server {
    pub fn new(
        documents: Arc<RwLock<DocumentStore>>,
        completions: CompletionHandler,
        actions: ActionHandler,
    ) -> Self {
        Self {
            documents,
            completions,
            actions,
        }
    }

    /// Main message loop. Returns when the client completes the
    /// shutdown/exit handshake or closes the connection.
    pub fn run(&self, connection: &Connection) -> Result<()> {
        for msg in &connection.receiver {
            match msg {
                Message::Request(req) => {
                    if connection.handle_shutdown(&req)? {
                        debug!("Shutdown handshake complete");
                        return Ok(());
                    }
                    if let Err(err) = self.handle_request(connection, req) {
                        error!(error = %err, "Error handling request");
                    }
                }
                Message::Response(resp) => {
                    // Acks for server-initiated workspace/applyEdit requests.
                    debug!(id = ?resp.id, "Received client response");
                }
                Message::Notification(not) => {
                    if let Err(err) = self.handle_notification(not) {
                        warn!(error = %err, "Error handling notification");
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_request(&self, connection: &Connection, req: Request) -> Result<()> {
        let id = req.id.clone();
        match req.method.as_str() {
            "textDocument/completion" => {
                let params: CompletionParams = serde_json::from_value(req.params)?;
                self.completions.handle_completion(id, params);
            }
            "textDocument/codeAction" => {
                let params: CodeActionParams = serde_json::from_value(req.params)?;
                self.actions.handle_code_action(id, params);
            }
            "workspace/executeCommand" => {
                let params: ExecuteCommandParams = serde_json::from_value(req.params)?;
                self.actions.handle_execute_command(id, params);
            }
            method => {
                debug!(method, "Unhandled request method");
                let response = Response {
                    id,
                    result: None,
                    error: Some(lsp_server::ResponseError {
                        code: lsp_server::ErrorCode::MethodNotFound as i32,
                        message: format!("Method not found: {method}"),
                        data: None,
                    }),
                };
                connection.sender.send(Message::Response(response))?;
            }
        }
        Ok(())
    }

    fn handle_notification(&self, not: Notification) -> Result<()> {
        match not.method.as_str() {
            "textDocument/didOpen" => {
                let params: DidOpenTextDocumentParams = serde_json::from_value(not.params)?;
                self.documents.write().handle_did_open(params);
            }
            "textDocument/didChange" => {
                let params: DidChangeTextDocumentParams = serde_json::from_value(not.params)?;
                self.documents.write().handle_did_change(params);
            }
            "textDocument/didSave" => {
                let params: DidSaveTextDocumentParams = serde_json::from_value(not.params)?;
                self.documents.write().handle_did_save(params);
            }
            "textDocument/didClose" => {
                let params: DidCloseTextDocumentParams = serde_json::from_value(not.params)?;
                self.documents.write().handle_did_close(params);
            }
            method => {
                debug!(method, "Ignoring notification");
            }
        }
        Ok(())
    }
}

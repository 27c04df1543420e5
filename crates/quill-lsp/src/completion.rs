// ABOUTME: Completion request lifecycle manager: debounce, supersession, staleness, orchestration
// ABOUTME: Guarantees exactly one response per trigger; only the newest request may answer non-empty

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use futures::FutureExt;
use lsp_server::{Message, RequestId, Response};
use lsp_types::{CompletionItem, CompletionList, CompletionParams, Position, Uri};
use parking_lot::{Mutex, RwLock};
use quill_core::{CleanContext, TextWindow, build_completion_items, clean_candidate};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendError, GenerateRequest, Registry, dedup_candidates};
use crate::config::Config;
use crate::documents::DocumentStore;
use crate::progress::ProgressReporter;

/// Cleaned candidates shorter than this are discarded.
const MIN_CANDIDATE_LEN: usize = 2;

/// Mutable lifecycle state, one instance per handler, mutated only under its
/// lock and never across an await point. At most one identity is current at
/// any instant; a request whose identity is no longer current is stale.
struct LifecycleState {
    current_identity: u64,
    cancel_current: Option<CancellationToken>,
    last_key: String,
    last_trigger: Option<Instant>,
}

pub struct CompletionHandler {
    config: Arc<Config>,
    registry: Arc<Registry>,
    documents: Arc<RwLock<DocumentStore>>,
    sender: Sender<Message>,
    runtime: tokio::runtime::Handle,
    state: Arc<Mutex<LifecycleState>>,
}

/// Everything one scheduled trigger needs, captured at trigger time.
struct ScheduledRequest {
    identity: u64,
    cancel: CancellationToken,
    uri: Uri,
    version: i32,
    position: Position,
    language_id: String,
    window: TextWindow,
}

impl CompletionHandler {
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
            state: Arc::new(Mutex::new(LifecycleState {
                current_identity: 0,
                cancel_current: None,
                last_key: String::new(),
                last_trigger: None,
            })),
        }
    }

    /// Entry point for textDocument/completion. Always leads to exactly one
    /// response for `id`, sent either here (skip paths) or by the spawned
    /// execution task.
    pub fn handle_completion(&self, id: RequestId, params: CompletionParams) {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;

        let captured = {
            let documents = self.documents.read();
            documents.get(&uri).map(|doc| {
                (
                    TextWindow::extract(
                        &doc.content,
                        position.line as usize,
                        position.character as usize,
                    ),
                    doc.version,
                    doc.language_id.clone(),
                )
            })
        };
        let Some((window, version, language_id)) = captured else {
            debug!(uri = ?uri, "Completion for unknown document");
            send_completion_response(&self.sender, id, Vec::new());
            return;
        };

        if should_skip(&window, &language_id, self.config.server.min_trigger_len) {
            debug!("Skipping completion, context filtered");
            send_completion_response(&self.sender, id, Vec::new());
            return;
        }

        let scheduled = {
            let mut state = self.state.lock();

            // Supersession: anything older than this trigger loses. The
            // cancelled task closes out its own message with an empty result.
            if let Some(previous) = state.cancel_current.take() {
                previous.cancel();
            }

            // Editors re-issue identical requests on no-op events; answer
            // those empty without burning a remote call.
            let key = window.before.clone();
            let now = Instant::now();
            let window_ms = Duration::from_millis(self.config.server.duplicate_window_ms);
            if state.last_key == key
                && state
                    .last_trigger
                    .is_some_and(|last| now.duration_since(last) < window_ms)
            {
                debug!("Skipping duplicate completion request");
                None
            } else {
                state.last_key = key;
                state.last_trigger = Some(now);
                state.current_identity += 1;

                let cancel = CancellationToken::new();
                state.cancel_current = Some(cancel.clone());
                Some(ScheduledRequest {
                    identity: state.current_identity,
                    cancel,
                    uri,
                    version,
                    position,
                    language_id,
                    window,
                })
            }
        };
        let Some(request) = scheduled else {
            send_completion_response(&self.sender, id, Vec::new());
            return;
        };

        let sender = self.sender.clone();
        let config = self.config.clone();
        let registry = self.registry.clone();
        let documents = self.documents.clone();
        let state = self.state.clone();

        self.runtime.spawn(async move {
            // Outermost fault boundary: a defect anywhere in execution must
            // still answer the editor.
            let execution =
                execute_completion(request, config, registry, documents, state, sender.clone());
            let items = match AssertUnwindSafe(execution).catch_unwind().await {
                Ok(items) => items,
                Err(_) => {
                    error!("Completion execution panicked");
                    Vec::new()
                }
            };
            send_completion_response(&sender, id, items);
        });
    }
}

/// Debounce, re-validate, generate, clean, assemble. Infallible by design:
/// every failure category degrades to an empty item list and a log line.
async fn execute_completion(
    request: ScheduledRequest,
    config: Arc<Config>,
    registry: Arc<Registry>,
    documents: Arc<RwLock<DocumentStore>>,
    state: Arc<Mutex<LifecycleState>>,
    sender: Sender<Message>,
) -> Vec<CompletionItem> {
    let debounce = Duration::from_millis(config.server.debounce_ms);
    tokio::select! {
        _ = request.cancel.cancelled() => {
            debug!(identity = request.identity, "Superseded during debounce");
            return Vec::new();
        }
        _ = tokio::time::sleep(debounce) => {}
    }

    // Re-validate: superseded, stale buffer, or cancelled between the
    // debounce firing and now.
    if state.lock().current_identity != request.identity {
        debug!(identity = request.identity, "Stale request identity");
        return Vec::new();
    }
    {
        let documents = documents.read();
        match documents.get(&request.uri) {
            Some(doc) if doc.version <= request.version => {}
            _ => {
                debug!(uri = ?request.uri, "Buffer changed since trigger");
                return Vec::new();
            }
        }
    }
    if request.cancel.is_cancelled() {
        debug!(identity = request.identity, "Cancelled before execution");
        return Vec::new();
    }

    let Some(backend) = registry.current() else {
        error!("No generation backend selected");
        return Vec::new();
    };

    info!(language = %request.language_id, backend = backend.name(), "Executing completion");

    let progress = config.progress.enabled.then(|| {
        ProgressReporter::start(
            sender.clone(),
            Duration::from_millis(config.progress.interval_ms),
        )
    });

    let content_after = request.window.full_after();
    let generate_request = GenerateRequest {
        content_before: request.window.before.clone(),
        content_after: content_after.clone(),
        language_id: request.language_id.clone(),
        path: request.uri.path().as_str().to_string(),
        count: config.server.num_candidates,
    };

    // Two independent interrupt sources feed one abort decision: the
    // supersession token and the hard deadline.
    let timeout = Duration::from_millis(config.server.completion_timeout_ms);
    let result = tokio::select! {
        _ = request.cancel.cancelled() => Err(BackendError::Cancelled),
        outcome = tokio::time::timeout(timeout, backend.generate(&generate_request)) => {
            match outcome {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout),
            }
        }
    };

    if let Some(progress) = progress {
        progress.finish().await;
    }

    let raw_candidates = match result {
        Ok(raw) => raw,
        Err(BackendError::Cancelled) => {
            debug!(identity = request.identity, "Generation cancelled");
            return Vec::new();
        }
        Err(err) => {
            warn!(error = %err, "Generation failed");
            return Vec::new();
        }
    };

    let clean_context = CleanContext {
        content_before: &request.window.before,
        content_after: &content_after,
        min_len: MIN_CANDIDATE_LEN,
    };
    let cleaned = dedup_candidates(
        raw_candidates
            .iter()
            .map(|raw| clean_candidate(raw, &clean_context))
            .filter(|cleaned| !cleaned.is_empty())
            .collect(),
    );

    info!(count = cleaned.len(), "Completion results");
    if cleaned.is_empty() {
        return Vec::new();
    }
    build_completion_items(&cleaned, request.position, &request.window.line_suffix)
}

/// Cheap synchronous filter for contexts unlikely to benefit from a remote
/// call: member access after `.`, comment lines, and too-short lines.
fn should_skip(window: &TextWindow, language_id: &str, min_trigger_len: usize) -> bool {
    if window.last_char == Some('.') {
        return true;
    }

    let trimmed = window.current_line.trim();
    if comment_markers(language_id)
        .iter()
        .any(|marker| trimmed.starts_with(marker))
    {
        return true;
    }

    trimmed.chars().count() < min_trigger_len
}

fn comment_markers(language_id: &str) -> &'static [&'static str] {
    match language_id {
        "python" | "ruby" | "shellscript" | "bash" | "sh" | "yaml" | "toml" | "perl" | "r" => {
            &["#"]
        }
        "lua" | "sql" | "haskell" | "elm" => &["--"],
        "rust" | "go" | "c" | "cpp" | "java" | "javascript" | "typescript" | "javascriptreact"
        | "typescriptreact" | "csharp" | "swift" | "kotlin" | "zig" => &["//"],
        _ => &["//", "#"],
    }
}

pub fn send_completion_response(sender: &Sender<Message>, id: RequestId, items: Vec<CompletionItem>) {
    let list = CompletionList {
        is_incomplete: false,
        items,
    };
    let response = match serde_json::to_value(list) {
        Ok(result) => Response {
            id,
            result: Some(result),
            error: None,
        },
        Err(err) => {
            error!(error = %err, "Failed to serialize completion list");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use async_trait::async_trait;
    use crossbeam_channel::Receiver;
    use lsp_types::{
        DidChangeTextDocumentParams, DidOpenTextDocumentParams, PartialResultParams,
        TextDocumentContentChangeEvent, TextDocumentIdentifier, TextDocumentItem,
        TextDocumentPositionParams, VersionedTextDocumentIdentifier,
        WorkDoneProgressParams,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockBackend {
        calls: AtomicUsize,
        candidates: Vec<String>,
        delay: Duration,
    }

    impl MockBackend {
        fn new(candidates: &[&str]) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                candidates: candidates.iter().map(|c| c.to_string()).collect(),
                delay: Duration::ZERO,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl Backend for MockBackend {
        async fn generate(&self, _request: &GenerateRequest) -> Result<Vec<String>, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay > Duration::ZERO {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.candidates.clone())
        }

        async fn chat(&self, _system: &str, _user: &str) -> Result<String, BackendError> {
            Ok(String::new())
        }

        fn name(&self) -> &'static str {
            "mock"
        }
    }

    struct Fixture {
        handler: CompletionHandler,
        backend: Arc<MockBackend>,
        documents: Arc<RwLock<DocumentStore>>,
        receiver: Receiver<Message>,
    }

    fn fixture(backend: MockBackend, tweak: impl FnOnce(&mut Config)) -> Fixture {
        let mut config = Config::default();
        config.server.debounce_ms = 20;
        config.server.duplicate_window_ms = 500;
        config.progress.enabled = false;
        tweak(&mut config);

        let backend = Arc::new(backend);
        let mut registry = Registry::new();
        registry.register("mock", backend.clone());
        registry.set_current("mock").unwrap();

        let documents = Arc::new(RwLock::new(DocumentStore::new()));
        let (sender, receiver) = crossbeam_channel::unbounded();
        let handler = CompletionHandler::new(
            Arc::new(config),
            Arc::new(registry),
            documents.clone(),
            sender,
            tokio::runtime::Handle::current(),
        );
        Fixture {
            handler,
            backend,
            documents,
            receiver,
        }
    }

    fn uri() -> Uri {
        "file:///test.rs".parse().unwrap()
    }

    fn open_document(documents: &RwLock<DocumentStore>, text: &str) {
        documents.write().handle_did_open(DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri: uri(),
                language_id: "rust".to_string(),
                version: 1,
                text: text.to_string(),
            },
        });
    }

    fn bump_version(documents: &RwLock<DocumentStore>, version: i32, text: &str) {
        documents
            .write()
            .handle_did_change(DidChangeTextDocumentParams {
                text_document: VersionedTextDocumentIdentifier {
                    uri: uri(),
                    version,
                },
                content_changes: vec![TextDocumentContentChangeEvent {
                    range: None,
                    range_length: None,
                    text: text.to_string(),
                }],
            });
    }

    fn params(line: u32, character: u32) -> CompletionParams {
        CompletionParams {
            text_document_position: TextDocumentPositionParams {
                text_document: TextDocumentIdentifier { uri: uri() },
                position: Position::new(line, character),
            },
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
            context: None,
        }
    }

    /// Collect `count` completion responses, keyed by request id.
    async fn collect_responses(
        receiver: &Receiver<Message>,
        count: usize,
    ) -> Vec<(RequestId, CompletionList)> {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut responses = Vec::new();
        while responses.len() < count {
            assert!(Instant::now() < deadline, "timed out waiting for responses");
            match receiver.try_recv() {
                Ok(Message::Response(response)) => {
                    let list: CompletionList =
                        serde_json::from_value(response.result.unwrap()).unwrap();
                    responses.push((response.id, list));
                }
                Ok(_) => {}
                Err(_) => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
        responses
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_skip_filter_answers_empty_without_backend_call() {
        let fx = fixture(MockBackend::new(&["anything()"]), |_| {});
        open_document(&fx.documents, "x.\n");

        fx.handler.handle_completion(RequestId::from(1), params(0, 2));

        let responses = collect_responses(&fx.receiver, 1).await;
        assert!(responses[0].1.items.is_empty());
        assert_eq!(fx.backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_comment_line_is_skipped() {
        let fx = fixture(MockBackend::new(&["anything()"]), |_| {});
        open_document(&fx.documents, "// a comment here\n");

        fx.handler.handle_completion(RequestId::from(1), params(0, 10));

        let responses = collect_responses(&fx.receiver, 1).await;
        assert!(responses[0].1.items.is_empty());
        assert_eq!(fx.backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_supersession_answers_both_only_newer_non_empty() {
        let fx = fixture(MockBackend::new(&["se_input(data)?;"]), |_| {});
        open_document(&fx.documents, "fn main() {\n    par\n}");

        // B arrives while A is still inside its debounce window.
        fx.handler.handle_completion(RequestId::from(1), params(1, 6));
        fx.handler.handle_completion(RequestId::from(2), params(1, 7));

        let responses = collect_responses(&fx.receiver, 2).await;
        let by_id = |wanted: i32| {
            responses
                .iter()
                .find(|(id, _)| *id == RequestId::from(wanted))
                .map(|(_, list)| list)
                .unwrap()
        };
        assert!(by_id(1).items.is_empty(), "superseded request must be empty");
        assert_eq!(by_id(2).items.len(), 1);
        assert_eq!(fx.backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_supersession_during_inflight_generation() {
        let fx = fixture(
            MockBackend::new(&["se_input(data)?;"]).with_delay(Duration::from_millis(200)),
            |_| {},
        );
        open_document(&fx.documents, "fn main() {\n    par\n}");

        fx.handler.handle_completion(RequestId::from(1), params(1, 6));
        // Let A clear its debounce and enter the backend call.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fx.backend.calls.load(Ordering::SeqCst), 1);

        fx.handler.handle_completion(RequestId::from(2), params(1, 7));

        let responses = collect_responses(&fx.receiver, 2).await;
        let by_id = |wanted: i32| {
            responses
                .iter()
                .find(|(id, _)| *id == RequestId::from(wanted))
                .map(|(_, list)| list)
                .unwrap()
        };
        assert!(by_id(1).items.is_empty(), "superseded request must be empty");
        assert_eq!(by_id(2).items.len(), 1);
        assert_eq!(fx.backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_generation_timeout_resolves_empty() {
        let fx = fixture(
            MockBackend::new(&["value()"]).with_delay(Duration::from_millis(500)),
            |config| {
                config.server.completion_timeout_ms = 50;
            },
        );
        open_document(&fx.documents, "fn main() {\n    par\n}");

        fx.handler.handle_completion(RequestId::from(1), params(1, 7));

        let responses = collect_responses(&fx.receiver, 1).await;
        assert!(responses[0].1.items.is_empty());
        assert_eq!(fx.backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_duplicate_trigger_within_window_resolves_empty() {
        let fx = fixture(MockBackend::new(&["value()"]), |_| {});
        open_document(&fx.documents, "fn main() {\n    par\n}");

        fx.handler.handle_completion(RequestId::from(1), params(1, 7));
        // Identical before-cursor key, immediately afterwards.
        fx.handler.handle_completion(RequestId::from(2), params(1, 7));

        let responses = collect_responses(&fx.receiver, 2).await;
        assert!(responses.iter().all(|(_, list)| list.items.is_empty()));
        assert_eq!(fx.backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stale_version_resolves_empty_without_backend_call() {
        let fx = fixture(MockBackend::new(&["value()"]), |_| {});
        open_document(&fx.documents, "fn main() {\n    par\n}");

        fx.handler.handle_completion(RequestId::from(1), params(1, 7));
        // Buffer changes underneath before the debounce timer fires.
        bump_version(&fx.documents, 2, "fn main() {\n    parsed\n}");

        let responses = collect_responses(&fx.receiver, 1).await;
        assert!(responses[0].1.items.is_empty());
        assert_eq!(fx.backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_end_to_end_single_completion() {
        let fx = fixture(MockBackend::new(&["fmt.Println(\"hi\")"]), |config| {
            // Let the blank trigger line through the skip filter.
            config.server.min_trigger_len = 0;
        });
        open_document(&fx.documents, "func main() {\n  \n}");

        fx.handler.handle_completion(RequestId::from(1), params(1, 2));

        let responses = collect_responses(&fx.receiver, 1).await;
        let items = &responses[0].1.items;
        assert_eq!(items.len(), 1);
        match items[0].text_edit.as_ref().unwrap() {
            lsp_types::CompletionTextEdit::Edit(edit) => {
                assert_eq!(edit.new_text, "fmt.Println(\"hi\")");
                assert_eq!(edit.range.start, Position::new(1, 2));
                assert_eq!(edit.range.end, Position::new(1, 2));
            }
            other => panic!("expected plain edit, got {other:?}"),
        }
        // The closing brace lives on its own line: no overlap deletion.
        assert!(items[0].additional_text_edits.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_every_trigger_in_a_burst_gets_a_response() {
        let fx = fixture(MockBackend::new(&["value()"]), |_| {});
        open_document(&fx.documents, "fn main() {\n    parse\n}");

        for i in 0..5 {
            fx.handler
                .handle_completion(RequestId::from(i), params(1, 4 + i as u32));
        }

        let responses = collect_responses(&fx.receiver, 5).await;
        assert_eq!(responses.len(), 5);
        // At most the last trigger may carry items.
        for (id, list) in &responses {
            if *id != RequestId::from(4) {
                assert!(list.items.is_empty(), "stale request {id:?} answered non-empty");
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_backend_failure_degrades_to_empty() {
        struct FailingBackend;

        #[async_trait]
        impl Backend for FailingBackend {
            async fn generate(
                &self,
                _request: &GenerateRequest,
            ) -> Result<Vec<String>, BackendError> {
                Err(BackendError::InvalidResponse("boom".to_string()))
            }
            async fn chat(&self, _s: &str, _u: &str) -> Result<String, BackendError> {
                Ok(String::new())
            }
            fn name(&self) -> &'static str {
                "failing"
            }
        }

        let mut config = Config::default();
        config.server.debounce_ms = 10;
        config.progress.enabled = false;

        let mut registry = Registry::new();
        registry.register("failing", Arc::new(FailingBackend));
        registry.set_current("failing").unwrap();

        let documents = Arc::new(RwLock::new(DocumentStore::new()));
        let (sender, receiver) = crossbeam_channel::unbounded();
        let handler = CompletionHandler::new(
            Arc::new(config),
            Arc::new(registry),
            documents.clone(),
            sender,
            tokio::runtime::Handle::current(),
        );
        open_document(&documents, "fn main() {\n    par\n}");

        handler.handle_completion(RequestId::from(1), params(1, 7));

        let responses = collect_responses(&receiver, 1).await;
        assert!(responses[0].1.items.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_panicking_backend_answers_empty_without_stray_heartbeats() {
        struct PanickingBackend;

        #[async_trait]
        impl Backend for PanickingBackend {
            async fn generate(
                &self,
                _request: &GenerateRequest,
            ) -> Result<Vec<String>, BackendError> {
                panic!("backend defect");
            }
            async fn chat(&self, _s: &str, _u: &str) -> Result<String, BackendError> {
                Ok(String::new())
            }
            fn name(&self) -> &'static str {
                "panicking"
            }
        }

        let mut config = Config::default();
        config.server.debounce_ms = 10;
        config.progress.enabled = true;
        config.progress.interval_ms = 20;

        let mut registry = Registry::new();
        registry.register("panicking", Arc::new(PanickingBackend));
        registry.set_current("panicking").unwrap();

        let documents = Arc::new(RwLock::new(DocumentStore::new()));
        let (sender, receiver) = crossbeam_channel::unbounded();
        let handler = CompletionHandler::new(
            Arc::new(config),
            Arc::new(registry),
            documents.clone(),
            sender,
            tokio::runtime::Handle::current(),
        );
        open_document(&documents, "fn main() {\n    par\n}");

        handler.handle_completion(RequestId::from(1), params(1, 7));

        let responses = collect_responses(&receiver, 1).await;
        assert!(responses[0].1.items.is_empty());

        // The heartbeat loop dies with the request; nothing may keep
        // ticking after the editor has its answer.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stray: Vec<Message> = receiver.try_iter().collect();
        assert!(stray.is_empty(), "messages after the response: {stray:?}");
    }
}

// ABOUTME: Quill language server entry point: AI inline completions and code actions over stdio
// ABOUTME: Wires config, logging, the backend registry and the tokio runtime into the LSP loop

use anyhow::{Context, Result, bail};
use lsp_server::Connection;
use lsp_types::{
    CodeActionProviderCapability, CompletionOptions, ExecuteCommandOptions, InitializeParams,
    ServerCapabilities, TextDocumentSyncCapability, TextDocumentSyncKind,
    WorkDoneProgressOptions,
};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

mod actions;
mod backend;
mod completion;
mod config;
mod documents;
mod progress;
mod prompts;
mod server;

use actions::ActionHandler;
use backend::{OllamaBackend, OpenAiBackend, Registry};
use completion::CompletionHandler;
use config::Config;
use documents::DocumentStore;
use server::Server;

fn main() -> Result<()> {
    let config_path = parse_args()?;
    let config = Config::load(config_path.as_deref())?;
    config.validate()?;

    // Keep the appender guard alive for the process lifetime.
    let _log_guard = init_logging(&config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        provider = %config.server.provider,
        "Starting Quill language server"
    );

    let registry = build_registry(&config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let (connection, io_threads) = Connection::stdio();
    let result = run_server(&connection, Arc::new(config), Arc::new(registry), &runtime);

    io_threads.join()?;
    match result {
        Ok(()) => {
            info!("Quill language server shut down");
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "Server error");
            Err(err)
        }
    }
}

fn run_server(
    connection: &Connection,
    config: Arc<Config>,
    registry: Arc<Registry>,
    runtime: &tokio::runtime::Runtime,
) -> Result<()> {
    let trigger_characters = (!config.server.trigger_characters.is_empty())
        .then(|| config.server.trigger_characters.clone());
    let server_capabilities = ServerCapabilities {
        text_document_sync: Some(TextDocumentSyncCapability::Kind(
            TextDocumentSyncKind::INCREMENTAL,
        )),
        completion_provider: Some(CompletionOptions {
            resolve_provider: Some(false),
            trigger_characters,
            all_commit_characters: None,
            work_done_progress_options: WorkDoneProgressOptions::default(),
            completion_item: None,
        }),
        code_action_provider: Some(CodeActionProviderCapability::Simple(true)),
        execute_command_provider: Some(ExecuteCommandOptions {
            commands: actions::ALL_COMMANDS
                .iter()
                .map(|command| command.to_string())
                .collect(),
            work_done_progress_options: WorkDoneProgressOptions::default(),
        }),
        ..Default::default()
    };

    let initialization_params =
        connection.initialize(serde_json::to_value(server_capabilities)?)?;
    let _params: InitializeParams = serde_json::from_value(initialization_params)?;
    info!("LSP initialization complete");

    let documents = Arc::new(RwLock::new(DocumentStore::new()));
    let completions = CompletionHandler::new(
        config.clone(),
        registry.clone(),
        documents.clone(),
        connection.sender.clone(),
        runtime.handle().clone(),
    );
    let actions = ActionHandler::new(
        config,
        registry,
        documents.clone(),
        connection.sender.clone(),
        runtime.handle().clone(),
    );

    Server::new(documents, completions, actions).run(connection)
}

fn build_registry(config: &Config) -> Result<Registry> {
    let mut registry = Registry::new();
    registry.register("ollama", Arc::new(OllamaBackend::new(&config.ollama)));
    if !config.openai.api_key.is_empty() {
        registry.register("openai", Arc::new(OpenAiBackend::new(&config.openai)));
    }
    registry.set_current(&config.server.provider)?;
    Ok(registry)
}

/// Logs go to stderr by default since stdout carries the LSP transport; a
/// configured log file switches to a non-blocking appender.
fn init_logging(config: &Config) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match &config.log.file {
        Some(path) => {
            let directory = path.parent().filter(|p| !p.as_os_str().is_empty());
            let file_name = path
                .file_name()
                .context("log file path has no file name")?;
            let appender = tracing_appender::rolling::never(
                directory.unwrap_or_else(|| std::path::Path::new(".")),
                file_name,
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

fn parse_args() -> Result<Option<PathBuf>> {
    let mut args = std::env::args().skip(1);
    let mut config_path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let Some(path) = args.next() else {
                    bail!("--config requires a path argument");
                };
                config_path = Some(PathBuf::from(path));
            }
            "--version" | "-V" => {
                println!("quill-lsp {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                println!(
                    "Usage: quill-lsp [--config <path>]\n\n\
                     AI inline-completion language server (stdio transport).\n\n\
                     Options:\n\
                       -c, --config <path>  Configuration file (TOML)\n\
                       -V, --version        Print version\n\
                       -h, --help           Print this help"
                );
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(config_path)
}

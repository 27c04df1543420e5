// ABOUTME: Generation backend contract, error taxonomy and the provider registry
// ABOUTME: Backends turn a prefix/suffix pair into raw candidates or serve single-shot chat calls

mod ollama;
mod openai;

pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

/// Errors a backend can surface. Callers branch only on `Cancelled` vs the
/// rest for behavior; the distinction is for diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("generation cancelled")]
    Cancelled,
    #[error("generation deadline exceeded")]
    Timeout,
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("API error (status {status}): {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// One completion attempt's input context.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub content_before: String,
    pub content_after: String,
    pub language_id: String,
    pub path: String,
    /// How many raw candidates the caller wants.
    pub count: usize,
}

/// An interchangeable text-generation capability. `generate` returns zero or
/// more raw candidates; an empty list is a valid "no completion" outcome and
/// must be preferred over an error when parallel attempts merely all failed.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<Vec<String>, BackendError>;

    /// Single-shot chat call used by code-transform actions.
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String, BackendError>;

    fn name(&self) -> &'static str;
}

/// Maps provider names to backends and tracks the active one.
#[derive(Default)]
pub struct Registry {
    backends: HashMap<String, Arc<dyn Backend>>,
    current: Option<Arc<dyn Backend>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, backend: Arc<dyn Backend>) {
        self.backends.insert(name.to_string(), backend);
    }

    pub fn set_current(&mut self, name: &str) -> Result<()> {
        match self.backends.get(name) {
            Some(backend) => {
                self.current = Some(backend.clone());
                Ok(())
            }
            None => bail!("provider not registered: {name}"),
        }
    }

    pub fn current(&self) -> Option<Arc<dyn Backend>> {
        self.current.clone()
    }
}

/// Drop repeated raw candidates, keeping first-seen order.
pub fn dedup_candidates(candidates: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|candidate| seen.insert(candidate.clone()))
        .collect()
}

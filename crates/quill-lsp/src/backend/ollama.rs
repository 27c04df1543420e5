// ABOUTME: Ollama generation backend: parallel fill-in-the-middle calls against a local endpoint
// ABOUTME: Fans out one sampling attempt per requested candidate with a rising temperature ladder

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::backend::{Backend, BackendError, GenerateRequest, dedup_candidates};
use crate::config::OllamaConfig;

/// Lines of prefix context handed to the model.
const PREFIX_LINES: usize = 30;
/// Lines of suffix context; enough that the model sees existing code it
/// should not regenerate.
const SUFFIX_LINES: usize = 15;

pub struct OllamaBackend {
    endpoint: String,
    model: String,
    chat_model: String,
    client: Client,
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    raw: bool,
    options: serde_json::Value,
}

#[derive(Deserialize)]
struct GenerateReply {
    response: String,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: serde_json::Value,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatReply {
    message: Option<ChatReplyMessage>,
}

#[derive(Deserialize)]
struct ChatReplyMessage {
    content: String,
}

impl OllamaBackend {
    pub fn new(config: &OllamaConfig) -> Self {
        let chat_model = if config.chat_model.is_empty() {
            config.model.clone()
        } else {
            config.chat_model.clone()
        };
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            chat_model,
            client: Client::new(),
        }
    }

    /// Qwen-style FIM prompt over a bounded context window.
    fn build_fim_prompt(request: &GenerateRequest) -> String {
        let before = tail_lines(&request.content_before, PREFIX_LINES);
        let after = head_lines(&request.content_after, SUFFIX_LINES);
        format!("<|fim_prefix|>{before}<|fim_suffix|>{after}<|fim_middle|>")
    }

    async fn run_attempt(&self, prompt: &str, index: usize) -> Result<String, BackendError> {
        // Rising temperature keeps identical prompts from collapsing to
        // identical output: 0.2, 0.4, 0.6, ... capped at 0.9.
        let temperature = (0.2 + index as f64 * 0.2).min(0.9);
        let body = GenerateBody {
            model: &self.model,
            prompt: prompt.to_string(),
            stream: false,
            raw: true,
            options: json!({
                "temperature": temperature,
                "top_p": 0.9,
                "num_predict": 128,
                "seed": index,
                "stop": ["\n\n\n", "<|fim", "<|end", "<|file", "```"],
            }),
        };

        let reply: GenerateReply = self.post("/api/generate", &body).await?;
        if reply.response.is_empty() {
            return Err(BackendError::InvalidResponse("empty response".to_string()));
        }
        Ok(reply.response)
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, BackendError> {
        let url = format!("{}{path}", self.endpoint);
        let response = self.client.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let bytes = response.text().await?;
        serde_json::from_str(&bytes)
            .map_err(|err| BackendError::InvalidResponse(err.to_string()))
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    async fn generate(&self, request: &GenerateRequest) -> Result<Vec<String>, BackendError> {
        let prompt = Self::build_fim_prompt(request);
        let count = request.count.max(1);

        let attempts = (0..count).map(|index| self.run_attempt(&prompt, index));
        let mut candidates = Vec::with_capacity(count);
        for (index, outcome) in join_all(attempts).await.into_iter().enumerate() {
            match outcome {
                Ok(raw) => {
                    debug!(attempt = index + 1, total = count, "Ollama attempt succeeded");
                    candidates.push(raw);
                }
                // One failed attempt never sinks its siblings.
                Err(err) => warn!(attempt = index + 1, total = count, error = %err, "Ollama attempt failed"),
            }
        }

        Ok(dedup_candidates(candidates))
    }

    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String, BackendError> {
        let body = ChatBody {
            model: &self.chat_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            stream: false,
            options: json!({ "temperature": 0.1, "num_predict": 2048 }),
        };

        let reply: ChatReply = self.post("/api/chat", &body).await?;
        match reply.message {
            Some(message) if !message.content.is_empty() => Ok(message.content),
            _ => Err(BackendError::InvalidResponse(
                "no message in chat response".to_string(),
            )),
        }
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}

fn tail_lines(text: &str, max: usize) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let start = lines.len().saturating_sub(max);
    lines[start..].join("\n")
}

fn head_lines(text: &str, max: usize) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    lines[..lines.len().min(max)].join("\n")
}

// ABOUTME: OpenAI-compatible chat-completions backend
// ABOUTME: Issues a single remote call per request instead of a parallel fan-out

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{Backend, BackendError, GenerateRequest};
use crate::config::OpenAiConfig;
use crate::prompts;

pub struct OpenAiBackend {
    endpoint: String,
    model: String,
    chat_model: String,
    api_key: String,
    client: Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiBackend {
    pub fn new(config: &OpenAiConfig) -> Self {
        let chat_model = if config.chat_model.is_empty() {
            config.model.clone()
        } else {
            config.chat_model.clone()
        };
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            chat_model,
            api_key: config.api_key.clone(),
            client: Client::new(),
        }
    }

    async fn chat_call(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f64,
    ) -> Result<String, BackendError> {
        let body = ChatRequest {
            model,
            messages: vec![
                Message {
                    role: "system",
                    content: system_prompt,
                },
                Message {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature,
            max_tokens: 2048,
        };

        let url = format!("{}/chat/completions", self.endpoint);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let reply: ChatResponse = serde_json::from_str(&response.text().await?)
            .map_err(|err| BackendError::InvalidResponse(err.to_string()))?;
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| BackendError::InvalidResponse("no choices in response".to_string()))
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    async fn generate(&self, request: &GenerateRequest) -> Result<Vec<String>, BackendError> {
        let system = prompts::completion_system(&request.language_id);
        let user = prompts::completion_user(
            &request.path,
            &request.content_before,
            &request.content_after,
        );

        debug!(model = %self.model, "OpenAI completion call");
        let raw = self.chat_call(&self.model, &system, &user, 0.2).await?;
        Ok(vec![raw])
    }

    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String, BackendError> {
        self.chat_call(&self.chat_model, system_prompt, user_prompt, 0.1)
            .await
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

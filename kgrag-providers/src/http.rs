//! Reference HTTP adapter implementing both capabilities against the
//! conventional chat-completion wire contract (§6): JSON messages with
//! `role`/`content`, bearer-token auth; embeddings return `vectors[]`.

use crate::capability::{estimate_token_count, ChatMessage, ChatRole, EmbeddingCapability, LLMCapability, LLMOptions, LLMOutput};
use crate::config::ProviderConfig;
use async_trait::async_trait;
use kgrag_core::error::{ErrorKind, KgError, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

pub struct HttpLlmProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl HttpLlmProvider {
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.unwrap_or(60)))
            .build()
            .expect("reqwest client build is infallible for default TLS config");
        Self { client, config }
    }

    fn endpoint(&self) -> String {
        self.config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://api.{}.example/v1/chat/completions", self.config.name))
    }

    async fn call(&self, messages: Vec<ChatMessage>, options: &LLMOptions) -> Result<LLMOutput> {
        #[derive(Serialize)]
        struct WireMessage<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Request<'a> {
            model: &'a str,
            messages: Vec<WireMessage<'a>>,
            #[serde(skip_serializing_if = "Option::is_none")]
            temperature: Option<f32>,
            #[serde(skip_serializing_if = "Option::is_none")]
            max_tokens: Option<u32>,
        }
        #[derive(Deserialize)]
        struct Usage {
            #[serde(default)]
            prompt_tokens: Option<u32>,
            #[serde(default)]
            completion_tokens: Option<u32>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMessage,
        }
        #[derive(Deserialize)]
        struct ChoiceMessage {
            content: String,
        }
        #[derive(Deserialize)]
        struct Response {
            choices: Vec<Choice>,
            #[serde(default)]
            usage: Option<Usage>,
        }

        let wire_messages: Vec<WireMessage<'_>> = messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                },
                content: &m.content,
            })
            .collect();

        let request = self
            .client
            .post(self.endpoint())
            .json(&Request {
                model: &self.config.model,
                messages: wire_messages,
                temperature: options.temperature,
                max_tokens: options.max_tokens,
            });

        let request = if let Some(key) = &self.config.api_key {
            request.bearer_auth(key)
        } else {
            request
        };

        let response = request.send().await.map_err(|e| {
            let kind = if e.is_timeout() || e.is_connect() {
                ErrorKind::TransientProvider
            } else {
                ErrorKind::PermanentProvider
            };
            KgError::provider(kind, &self.config.name, e.to_string())
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(KgError::provider(
                ErrorKind::TransientProvider,
                &self.config.name,
                format!("server error: {status}"),
            ));
        }
        if !status.is_success() {
            return Err(KgError::provider(
                ErrorKind::PermanentProvider,
                &self.config.name,
                format!("request rejected: {status}"),
            ));
        }

        let body: Response = response.json().await.map_err(|e| {
            KgError::provider(ErrorKind::PermanentProvider, &self.config.name, e.to_string())
        })?;

        let text = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        let (prompt_tokens, completion_tokens) = body
            .usage
            .map(|u| {
                (
                    u.prompt_tokens.unwrap_or_else(|| estimate_token_count(&text)),
                    u.completion_tokens.unwrap_or_else(|| estimate_token_count(&text)),
                )
            })
            .unwrap_or_else(|| (estimate_token_count(&text), estimate_token_count(&text)));

        Ok(LLMOutput {
            text,
            prompt_tokens,
            completion_tokens,
            model: self.config.model.clone(),
        })
    }
}

#[async_trait]
impl LLMCapability for HttpLlmProvider {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &LLMOptions,
    ) -> Result<LLMOutput> {
        let messages = vec![
            ChatMessage {
                role: ChatRole::System,
                content: system_prompt.to_string(),
            },
            ChatMessage {
                role: ChatRole::User,
                content: user_prompt.to_string(),
            },
        ];
        self.call(messages, options).await
    }

    async fn chat(&self, messages: &[ChatMessage], options: &LLMOptions) -> Result<LLMOutput> {
        self.call(messages.to_vec(), options).await
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    config: ProviderConfig,
    dimension: usize,
}

impl HttpEmbeddingProvider {
    #[must_use]
    pub fn new(config: ProviderConfig, dimension: usize) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.unwrap_or(30)))
            .build()
            .expect("reqwest client build is infallible for default TLS config");
        Self {
            client,
            config,
            dimension,
        }
    }

    fn endpoint(&self) -> String {
        self.config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://api.{}.example/v1/embeddings", self.config.name))
    }
}

#[async_trait]
impl EmbeddingCapability for HttpEmbeddingProvider {
    async fn embed(&self, inputs: &[String]) -> Result<(Vec<Vec<f32>>, u32)> {
        #[derive(Deserialize)]
        struct Response {
            vectors: Vec<Vec<f32>>,
            #[serde(default)]
            tokens_used: Option<u32>,
        }

        let request = self
            .client
            .post(self.endpoint())
            .json(&json!({ "model": self.config.model, "input": inputs }));
        let request = if let Some(key) = &self.config.api_key {
            request.bearer_auth(key)
        } else {
            request
        };

        let response = request.send().await.map_err(|e| {
            let kind = if e.is_timeout() || e.is_connect() {
                ErrorKind::TransientProvider
            } else {
                ErrorKind::PermanentProvider
            };
            KgError::provider(kind, &self.config.name, e.to_string())
        })?;

        if !response.status().is_success() {
            let kind = if response.status().is_server_error() {
                ErrorKind::TransientProvider
            } else {
                ErrorKind::PermanentProvider
            };
            return Err(KgError::provider(
                kind,
                &self.config.name,
                format!("embedding request failed: {}", response.status()),
            ));
        }

        let body: Response = response.json().await.map_err(|e| {
            KgError::provider(ErrorKind::PermanentProvider, &self.config.name, e.to_string())
        })?;

        let tokens = body
            .tokens_used
            .unwrap_or_else(|| inputs.iter().map(|s| estimate_token_count(s)).sum());

        Ok((body.vectors, tokens))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

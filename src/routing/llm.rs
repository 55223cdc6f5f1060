//! Thin client for an OpenAI-compatible chat completions endpoint.
//!
//! The classifier and the decomposer talk to inference only through the
//! [`CompletionProvider`] trait, so tests can script responses.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::{json, Value};

use crate::config::ClassifierConfig;
use crate::{AppError, Result};

/// A single prompt/response exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    /// System instruction constraining the output.
    pub system: String,
    /// User message carrying the task.
    pub user: String,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
}

/// Source of text completions.
pub trait CompletionProvider: Send + Sync {
    /// Run one completion and return the raw text.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Llm`] or [`AppError::Http`] on any failure.
    fn complete(
        &self,
        request: CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;
}

/// `reqwest`-backed chat completions client.
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl ChatCompletionsClient {
    /// Build a client from the classifier configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Credentials` if no API key was loaded, or
    /// `AppError::Http` if the HTTP client cannot be built.
    pub fn from_config(config: &ClassifierConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(AppError::Credentials(
                "inference API key is not configured".into(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    async fn call(&self, request: CompletionRequest) -> Result<String> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "max_tokens": request.max_tokens,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
        });

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Llm(format!("inference endpoint returned {status}")));
        }

        let payload: Value = response.json().await?;
        extract_content(&payload)
    }
}

impl CompletionProvider for ChatCompletionsClient {
    fn complete(
        &self,
        request: CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        Box::pin(self.call(request))
    }
}

/// Pull `choices[0].message.content` out of a chat completions response.
///
/// # Errors
///
/// Returns `AppError::Llm` if the field is missing or not a string.
pub fn extract_content(payload: &Value) -> Result<String> {
    payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| AppError::Llm("response has no message content".into()))
}

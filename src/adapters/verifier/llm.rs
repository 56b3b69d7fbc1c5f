//! OpenAI-compatible chat completions verifier.
//!
//! Works against any endpoint speaking the Chat Completions protocol
//! (OpenAI, Groq, local gateways). Temperature is pinned to 0 and requests
//! pass through a process-wide rate limiter.

use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::prompt;
use crate::adapters::retry::{self, RetryPolicy};
use crate::domain::error::BotError;
use crate::ports::verifier::{OutcomeVerifier, Verdict, VerificationRequest};

/// Settings for the chat completions client.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// Full URL of the chat completions endpoint.
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: usize,
    pub timeout: Duration,
    pub requests_per_minute: u32,
    pub retry: RetryPolicy,
}

/// Chat completions client implementing `OutcomeVerifier`.
pub struct LlmVerifier {
    http: Client,
    settings: LlmSettings,
    limiter: DefaultDirectRateLimiter,
}

#[derive(Serialize)]
struct Request<'a> {
    model: &'a str,
    max_tokens: usize,
    temperature: f64,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct Response {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl LlmVerifier {
    pub fn new(settings: LlmSettings) -> Result<Self> {
        if settings.api_key.trim().is_empty() {
            return Err(BotError::FatalConfig("verifier API key is empty".into()).into());
        }
        let per_minute = NonZeroU32::new(settings.requests_per_minute)
            .ok_or_else(|| BotError::FatalConfig("verifier.requests_per_minute must be > 0".into()))?;
        let http = Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("Failed to build verifier HTTP client")?;
        Ok(Self {
            http,
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
            settings,
        })
    }

    async fn complete(&self, user_prompt: String) -> Result<String> {
        let request = Request {
            model: &self.settings.model,
            max_tokens: self.settings.max_tokens,
            temperature: 0.0,
            messages: vec![
                Message {
                    role: "system",
                    content: prompt::SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user",
                    content: user_prompt,
                },
            ],
        };

        let request = &request;
        retry::retry_async(&self.settings.retry, "verifier", move || async move {
            self.limiter.until_ready().await;
            let response = self
                .http
                .post(&self.settings.api_url)
                .bearer_auth(&self.settings.api_key)
                .json(request)
                .send()
                .await
                .map_err(|e| retry::transport_error("verifier", &e))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(self.settings.retry.status_error("verifier", status, &body));
            }
            let parsed: Response = response
                .json()
                .await
                .context("malformed verifier response body")?;
            parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .context("verifier returned no completion")
        })
        .await
    }
}

#[async_trait]
impl OutcomeVerifier for LlmVerifier {
    #[instrument(skip(self, request), fields(outcome = %request.outcome))]
    async fn verify(&self, request: &VerificationRequest) -> Result<Verdict> {
        let content = self.complete(prompt::build_prompt(request)).await?;
        let verdict = prompt::parse_response(&content)?;
        debug!(confidence = verdict.confidence, "Verifier verdict");
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(key: &str, rpm: u32) -> LlmSettings {
        LlmSettings {
            api_url: "http://localhost:1/v1/chat/completions".into(),
            api_key: key.into(),
            model: "test-model".into(),
            max_tokens: 256,
            timeout: Duration::from_secs(1),
            requests_per_minute: rpm,
            retry: RetryPolicy::single_attempt(),
        }
    }

    #[test]
    fn test_empty_key_is_fatal() {
        let err = LlmVerifier::new(settings("", 30)).err().unwrap();
        assert!(BotError::is_fatal(&err));
    }

    #[test]
    fn test_zero_rate_is_fatal() {
        let err = LlmVerifier::new(settings("k", 0)).err().unwrap();
        assert!(BotError::is_fatal(&err));
    }

    #[test]
    fn test_request_pins_temperature() {
        let req = Request {
            model: "m",
            max_tokens: 10,
            temperature: 0.0,
            messages: vec![],
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["temperature"], 0.0);
    }
}

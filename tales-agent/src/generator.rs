//! Narrative generation against the completions service.

use std::time::Duration;

use async_trait::async_trait;
use completions::{Client, Request};

use crate::error::GenerationError;
use crate::prompts;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);
const MAX_COMPLETION_TOKENS: usize = 1024;

/// What the narrator is being asked to write.
#[derive(Debug, Clone)]
pub enum NarrativeRequest<'a> {
    /// The opening passage of a freshly created story game.
    Opening {
        title: &'a str,
        theme: Option<&'a str>,
    },
    /// The passage following a player's choice.
    Continuation {
        title: Option<&'a str>,
        prior_content: &'a [String],
        choice: u64,
    },
}

/// Seam between the orchestrator and the text-generation service.
///
/// Implementations must never return partial or fabricated content: the
/// result is either usable narrative text or an error. Repeated calls with
/// the same input are not idempotent; the model may legitimately vary.
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    async fn generate(&self, request: NarrativeRequest<'_>) -> Result<String, GenerationError>;
}

/// Generator backed by an OpenAI-compatible completions endpoint, with an
/// explicit per-attempt timeout and bounded retry with exponential backoff
/// for transient failures.
pub struct CompletionsGenerator {
    client: Client,
    timeout: Duration,
    max_attempts: u32,
    backoff: Duration,
}

impl CompletionsGenerator {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn attempt(&self, request: &Request) -> Result<String, GenerationError> {
        let response = tokio::time::timeout(self.timeout, self.client.complete(request.clone()))
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout))??;

        if let Some(signature) = &response.signature {
            tracing::debug!(signature = %signature, "response carried an attestation signature");
        }

        let text = response.content.trim();
        if text.is_empty() {
            return Err(GenerationError::Empty);
        }
        Ok(text.to_string())
    }
}

#[async_trait]
impl NarrativeGenerator for CompletionsGenerator {
    async fn generate(&self, request: NarrativeRequest<'_>) -> Result<String, GenerationError> {
        let messages = match request {
            NarrativeRequest::Opening { title, theme } => prompts::opening_messages(title, theme),
            NarrativeRequest::Continuation {
                title,
                prior_content,
                choice,
            } => prompts::continuation_messages(title, prior_content, choice),
        };
        let request = Request::new(messages).with_max_tokens(MAX_COMPLETION_TOKENS);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(&request).await {
                Ok(text) => return Ok(text),
                Err(error) => {
                    if attempt >= self.max_attempts || !error.is_transient() {
                        return Err(error);
                    }
                    let delay = self.backoff * 2u32.saturating_pow(attempt - 1);
                    tracing::warn!(
                        attempt,
                        error = %error,
                        retry_in = ?delay,
                        "generation attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

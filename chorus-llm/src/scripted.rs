//! In-process completion service that replays queued replies.
//!
//! Used by tests and by the offline REPL mode. Every call is recorded so
//! callers can assert on the context that was sent.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::client::CompletionService;
use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, CompletionOptions, LlmResponse};

enum Scripted {
    Reply(String),
    Fail(String),
    Timeout,
}

/// A recorded call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Context passed to `complete`.
    pub messages: Vec<ChatMessage>,
    /// Options passed to `complete`.
    pub options: CompletionOptions,
}

/// Replays queued replies in order, then falls back to a default reply.
pub struct ScriptedCompletion {
    queue: Mutex<VecDeque<Scripted>>,
    default_reply: Option<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl Default for ScriptedCompletion {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedCompletion {
    /// An empty script; unscripted calls fail with [`LlmError::Unavailable`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            default_reply: None,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Reply with `text` once the queue is drained.
    #[must_use]
    pub fn with_default(mut self, text: impl Into<String>) -> Self {
        self.default_reply = Some(text.into());
        self
    }

    /// Sleep for `delay` before answering each call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a reply.
    pub fn push_reply(&self, text: impl Into<String>) -> &Self {
        self.queue.lock().push_back(Scripted::Reply(text.into()));
        self
    }

    /// Queue a request failure.
    pub fn push_failure(&self, reason: impl Into<String>) -> &Self {
        self.queue.lock().push_back(Scripted::Fail(reason.into()));
        self
    }

    /// Queue a timeout.
    pub fn push_timeout(&self) -> &Self {
        self.queue.lock().push_back(Scripted::Timeout);
        self
    }

    /// All calls made so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Number of calls made so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<LlmResponse> {
        self.calls.lock().push(RecordedCall {
            messages: messages.to_vec(),
            options: options.clone(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.queue.lock().pop_front();
        let text = match next {
            Some(Scripted::Reply(text)) => text,
            Some(Scripted::Fail(reason)) => return Err(LlmError::RequestFailed(reason)),
            Some(Scripted::Timeout) => {
                return Err(LlmError::Timeout(options.timeout_ms.unwrap_or_default()));
            }
            None => self
                .default_reply
                .clone()
                .ok_or_else(|| LlmError::Unavailable("script exhausted".into()))?,
        };

        Ok(LlmResponse {
            text,
            tokens_generated: 0,
            latency_ms: 0,
            model: "scripted".to_string(),
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_in_order_then_default() {
        let svc = ScriptedCompletion::new().with_default("fallback");
        svc.push_reply("one").push_failure("boom");

        let opts = CompletionOptions::default();
        let msgs = [ChatMessage::user("hi")];
        assert_eq!(svc.complete(&msgs, &opts).await.expect("one").text, "one");
        assert!(matches!(
            svc.complete(&msgs, &opts).await,
            Err(LlmError::RequestFailed(_))
        ));
        assert_eq!(svc.complete(&msgs, &opts).await.expect("default").text, "fallback");
        assert_eq!(svc.call_count(), 3);
        assert_eq!(svc.calls()[0].messages, msgs.to_vec());
    }

    #[tokio::test]
    async fn exhausted_without_default_is_unavailable() {
        let svc = ScriptedCompletion::new();
        let err = svc
            .complete(&[], &CompletionOptions::default())
            .await
            .expect_err("empty script");
        assert!(matches!(err, LlmError::Unavailable(_)));
    }
}

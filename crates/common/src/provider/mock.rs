//! Scripted chat provider for tests

use super::{ChatProvider, ChatRequest};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Replays queued replies in order and records every request.
///
/// When the queue runs dry the fallback reply (if any) is returned,
/// otherwise the call fails with a provider error.
#[derive(Default)]
pub struct MockChatProvider {
    replies: Mutex<VecDeque<Result<String>>>,
    fallback: Option<String>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockChatProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider that always answers with `reply`
    pub fn always(reply: impl Into<String>) -> Self {
        Self {
            fallback: Some(reply.into()),
            ..Self::default()
        }
    }

    /// Queue a successful reply
    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()));
        self
    }

    /// Queue a failure
    pub fn fail(self, message: impl Into<String>) -> Self {
        self.push(Err(AppError::Provider {
            message: message.into(),
            status: Some(503),
        }));
        self
    }

    fn push(&self, reply: Result<String>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    /// Requests seen so far
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ChatProvider for MockChatProvider {
    async fn complete(&self, request: ChatRequest) -> Result<String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        let queued = self.replies.lock().ok().and_then(|mut r| r.pop_front());
        match (queued, &self.fallback) {
            (Some(reply), _) => reply,
            (None, Some(fallback)) => Ok(fallback.clone()),
            (None, None) => Err(AppError::Provider {
                message: "No scripted reply left".to_string(),
                status: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order_then_falls_back() {
        let provider = MockChatProvider::always("fallback").reply("first").fail("boom");

        let request = ChatRequest::new("m", "s", "u");
        assert_eq!(provider.complete(request.clone()).await.unwrap(), "first");
        assert!(provider.complete(request.clone()).await.is_err());
        assert_eq!(provider.complete(request).await.unwrap(), "fallback");
        assert_eq!(provider.call_count(), 3);
    }
}

//! Scripted [`TextModel`] mock for exercising refinement/combination
//! without a real language model.

use async_trait::async_trait;
use ibeam_core::{ChatOptions, ChatResponse, IbeamError, Result, TextModel, Usage};
use std::collections::VecDeque;
use std::sync::Mutex;

enum Scripted {
    Response(ChatResponse),
    ConnectionError(String),
}

/// A configurable mock [`TextModel`].
///
/// # Example
/// ```
/// use ibeam_testing::MockTextModel;
///
/// let model = MockTextModel::new().with_response("a fluffy cat, oil painting");
/// ```
pub struct MockTextModel {
    queue: Mutex<VecDeque<Scripted>>,
    default_response: ChatResponse,
    calls: Mutex<Vec<(String, String)>>,
}

impl Default for MockTextModel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTextModel {
    /// A mock that echoes a fixed default response for every call.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            default_response: ChatResponse {
                text: "a cat, painting".to_string(),
                usage: Usage::default(),
            },
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Set the fixed response returned once the scripted queue is empty.
    #[must_use]
    pub fn with_response(mut self, text: impl Into<String>) -> Self {
        self.default_response = ChatResponse {
            text: text.into(),
            usage: Usage::default(),
        };
        self
    }

    /// Queue a sequence of responses, returned in order before falling back
    /// to the default response.
    #[must_use]
    pub fn with_scripted_responses(self, responses: Vec<ChatResponse>) -> Self {
        {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.extend(responses.into_iter().map(Scripted::Response));
        }
        self
    }

    /// Force the next call to fail with a connection-class error, ahead of
    /// anything already queued.
    pub fn fail_next(&self, message: impl Into<String>) {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.push_front(Scripted::ConnectionError(message.into()));
    }

    /// Total number of `generate_chat` calls observed.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// The `(system, user)` pairs passed to every call, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl TextModel for MockTextModel {
    async fn generate_chat(&self, system: &str, user: &str, _options: &ChatOptions) -> Result<ChatResponse> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((system.to_string(), user.to_string()));

        let next = self.queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        match next {
            Some(Scripted::Response(response)) => Ok(response),
            Some(Scripted::ConnectionError(message)) => Err(IbeamError::TransportUnreachable {
                service: "text-model".to_string(),
                operation: "generate_chat".to_string(),
                source: message.into(),
            }),
            None => Ok(self.default_response.clone()),
        }
    }
}

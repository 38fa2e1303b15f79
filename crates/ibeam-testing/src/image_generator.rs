//! Scripted [`ImageGenerator`] mock for exercising candidate generation
//! without a real image model.

use async_trait::async_trait;
use ibeam_core::{GenerateOptions, GenerateResponse, IbeamError, ImageGenerator, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

enum Scripted {
    Response(GenerateResponse),
    ConnectionError(String),
}

/// A configurable mock [`ImageGenerator`].
///
/// With no scripted responses, every call returns a synthesized
/// `image_ref` derived from a monotonically increasing counter, so
/// successive candidates in a test get distinct paths without any setup.
pub struct MockImageGenerator {
    queue: Mutex<VecDeque<Scripted>>,
    counter: AtomicU32,
    prompts: Mutex<Vec<String>>,
}

impl Default for MockImageGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockImageGenerator {
    /// A mock that synthesizes a distinct `image_ref` per call.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            counter: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue a sequence of responses, returned in order before falling back
    /// to synthesized `image_ref`s.
    #[must_use]
    pub fn with_scripted_responses(self, responses: Vec<GenerateResponse>) -> Self {
        {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.extend(responses.into_iter().map(Scripted::Response));
        }
        self
    }

    /// Force the next call to fail with a connection-class error.
    pub fn fail_next(&self, message: impl Into<String>) {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.push_front(Scripted::ConnectionError(message.into()));
    }

    /// Total number of `generate` calls observed.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Every prompt passed to `generate`, in order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ImageGenerator for MockImageGenerator {
    async fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<GenerateResponse> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).push(prompt.to_string());

        let next = self.queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        match next {
            Some(Scripted::Response(response)) => Ok(response),
            Some(Scripted::ConnectionError(message)) => Err(IbeamError::TransportUnreachable {
                service: "image-generator".to_string(),
                operation: "generate".to_string(),
                source: message.into(),
            }),
            None => {
                let n = self.counter.fetch_add(1, Ordering::SeqCst);
                Ok(GenerateResponse {
                    image_ref: format!("mock-image-{n}.png"),
                    metadata: Default::default(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn synthesizes_distinct_refs_per_call() {
        let gen = MockImageGenerator::new();
        let a = gen.generate("p1", &GenerateOptions::default()).await.expect("a");
        let b = gen.generate("p2", &GenerateOptions::default()).await.expect("b");
        assert_ne!(a.image_ref, b.image_ref);
        assert_eq!(gen.prompts(), vec!["p1".to_string(), "p2".to_string()]);
    }

    #[tokio::test]
    async fn fail_next_raises_connection_error_once() {
        let gen = MockImageGenerator::new();
        gen.fail_next("refused");
        let err = gen.generate("p", &GenerateOptions::default()).await.unwrap_err();
        assert!(err.is_connection_error());
        assert!(gen.generate("p", &GenerateOptions::default()).await.is_ok());
    }
}

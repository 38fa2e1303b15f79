//! Scripted [`VisionComparator`] mock for exercising the ranking engine
//! without a real vision-language model.

use async_trait::async_trait;
use ibeam_core::{Choice, FactorRanks, IbeamError, Result, Verdict, VisionComparator};
use std::collections::VecDeque;
use std::sync::Mutex;

enum Scripted {
    Verdict(Verdict),
    MalformedResponse(String),
    ConnectionError(String),
}

fn default_verdict() -> Verdict {
    Verdict {
        choice: Choice::A,
        explanation: "A is sharper".to_string(),
        confidence: 0.8,
        ranks_a: FactorRanks { alignment: 1.0, aesthetics: 1.0 },
        ranks_b: FactorRanks { alignment: 2.0, aesthetics: 2.0 },
        winner_strengths: vec!["sharp focus".to_string()],
        loser_weaknesses: vec!["blurry edges".to_string()],
        improvement_suggestion: Some("increase detail".to_string()),
    }
}

/// A configurable mock [`VisionComparator`].
///
/// Queued verdicts are popped in the order `compare` is called; once the
/// queue is empty every call returns a fixed default verdict (A wins).
pub struct MockVisionComparator {
    queue: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl Default for MockVisionComparator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVisionComparator {
    /// A mock that returns the default "A wins" verdict for every call.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a sequence of verdicts, returned in order before falling back
    /// to the default.
    #[must_use]
    pub fn with_scripted_verdicts(self, verdicts: Vec<Verdict>) -> Self {
        {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.extend(verdicts.into_iter().map(Scripted::Verdict));
        }
        self
    }

    /// Queue a verdict that fails `is_structurally_valid()` (choice/ranks
    /// orientation disagreement), to exercise malformed-verdict handling.
    pub fn queue_malformed(&self, reason: impl Into<String>) {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.push_back(Scripted::MalformedResponse(reason.into()));
    }

    /// Force the next call to fail with a connection-class error.
    pub fn fail_next(&self, message: impl Into<String>) {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.push_front(Scripted::ConnectionError(message.into()));
    }

    /// Total number of `compare` calls observed.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// The `(image_a_ref, image_b_ref)` pairs passed to every call, in the
    /// order actually presented to the comparator (post debiasing swap).
    #[must_use]
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl VisionComparator for MockVisionComparator {
    async fn compare(&self, image_a_ref: &str, image_b_ref: &str, _prompt: &str) -> Result<Verdict> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((image_a_ref.to_string(), image_b_ref.to_string()));

        let next = self.queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        match next {
            Some(Scripted::Verdict(verdict)) => Ok(verdict),
            Some(Scripted::MalformedResponse(reason)) => {
                // A verdict whose ranks contradict its own choice: structurally invalid.
                Ok(Verdict {
                    choice: Choice::A,
                    explanation: reason,
                    confidence: 0.5,
                    ranks_a: FactorRanks { alignment: 2.0, aesthetics: 2.0 },
                    ranks_b: FactorRanks { alignment: 1.0, aesthetics: 1.0 },
                    winner_strengths: vec![],
                    loser_weaknesses: vec![],
                    improvement_suggestion: None,
                })
            }
            Some(Scripted::ConnectionError(message)) => Err(IbeamError::TransportUnreachable {
                service: "vision-comparator".to_string(),
                operation: "compare".to_string(),
                source: message.into(),
            }),
            None => Ok(default_verdict()),
        }
    }
}

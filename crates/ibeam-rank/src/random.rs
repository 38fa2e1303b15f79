//! Injectable randomness for debiasing (§4.3), following the teacher's
//! clock-injection idiom for deterministic tests applied to an RNG instead
//! of a clock.

/// A source of the single coin flip `compare_debiased` needs.
pub trait RandomSource: Send + Sync {
    /// Returns `true` with probability `p`.
    fn gen_bool(&self, p: f64) -> bool;
}

/// The real source, backed by the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandomSource;

impl RandomSource for ThreadRandomSource {
    fn gen_bool(&self, p: f64) -> bool {
        use rand::Rng;
        rand::thread_rng().gen_bool(p.clamp(0.0, 1.0))
    }
}

#[cfg(any(test, feature = "test-util"))]
/// A scripted source that replays a fixed sequence of outcomes, cycling
/// once exhausted. Useful for exercising both debiasing branches
/// deterministically.
pub struct ScriptedRandomSource {
    outcomes: Vec<bool>,
    cursor: std::sync::atomic::AtomicUsize,
}

#[cfg(any(test, feature = "test-util"))]
impl ScriptedRandomSource {
    /// Build a source that replays `outcomes` in order, then wraps around.
    #[must_use]
    pub fn new(outcomes: Vec<bool>) -> Self {
        Self {
            outcomes,
            cursor: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
impl RandomSource for ScriptedRandomSource {
    fn gen_bool(&self, _p: f64) -> bool {
        use std::sync::atomic::Ordering;
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.outcomes.len();
        self.outcomes[i]
    }
}

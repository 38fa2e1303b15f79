//! Token-usage accounting and the `tokens.json` side file (§6 "On-disk file
//! format — tokens.json").
//!
//! Rate accounting is explicitly a non-goal (§1); `estimated_cost` is a best
//! effort derived from a caller-supplied per-operation rate table, not a
//! billing-grade figure.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One token-consuming call, as reported by a collaborator provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Provider name (e.g. `"openai"`, `"local-vllm"`).
    pub provider: String,
    /// Logical operation (e.g. `"refine_what"`, `"combine_prompt"`, `"compare"`).
    pub operation: String,
    /// Tokens consumed by this call.
    pub tokens: u64,
    /// Opaque provider-supplied extras (model name, request id, …).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Aggregate token totals, overall and per operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenTotals {
    /// Sum of `tokens` across every record.
    pub total_tokens: u64,
    /// Sum of `tokens` per operation name.
    pub per_operation: HashMap<String, u64>,
}

/// Estimated spend, overall and per operation, derived from a rate table
/// expressed in currency units per 1000 tokens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EstimatedCost {
    /// Total estimated cost across every record.
    pub total: f64,
    /// Estimated cost per operation name.
    pub per_operation: HashMap<String, f64>,
}

/// The on-disk `tokens.json` document (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenDocument {
    /// The session this accounting belongs to.
    pub session_id: String,
    /// When this document was generated.
    pub generated_at: chrono::DateTime<chrono::Utc>,
    /// Aggregate totals.
    pub totals: TokenTotals,
    /// Estimated spend.
    pub estimated_cost: EstimatedCost,
    /// Every individual record, in the order it was reported.
    pub records: Vec<TokenRecord>,
}

/// In-memory accumulator a session threads through every collaborator call
/// that reports usage; [`MetadataTracker::persist_tokens`](crate::MetadataTracker::persist_tokens)
/// snapshots it into a [`TokenDocument`].
#[derive(Debug, Clone, Default)]
pub struct TokenTracker {
    records: Vec<TokenRecord>,
    /// Currency units per 1000 tokens, keyed by operation name. Operations
    /// with no entry cost nothing.
    rates: HashMap<String, f64>,
}

impl TokenTracker {
    /// A tracker with no rate table; every operation estimates to zero cost.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracker that prices tokens per operation, in currency units per
    /// 1000 tokens.
    #[must_use]
    pub fn with_rates(rates: HashMap<String, f64>) -> Self {
        Self {
            records: Vec::new(),
            rates,
        }
    }

    /// Record one token-consuming call.
    pub fn record(&mut self, provider: impl Into<String>, operation: impl Into<String>, tokens: u64) {
        self.record_with_metadata(provider, operation, tokens, serde_json::Value::Null);
    }

    /// Record one token-consuming call with provider-supplied extras.
    pub fn record_with_metadata(
        &mut self,
        provider: impl Into<String>,
        operation: impl Into<String>,
        tokens: u64,
        metadata: serde_json::Value,
    ) {
        self.records.push(TokenRecord {
            provider: provider.into(),
            operation: operation.into(),
            tokens,
            metadata,
        });
    }

    /// Snapshot the current totals, estimated cost, and every record into a
    /// [`TokenDocument`] ready to persist.
    #[must_use]
    pub fn snapshot(&self, session_id: &str) -> TokenDocument {
        let mut totals = TokenTotals::default();
        let mut cost = EstimatedCost::default();

        for record in &self.records {
            totals.total_tokens += record.tokens;
            *totals.per_operation.entry(record.operation.clone()).or_insert(0) += record.tokens;

            let rate = self.rates.get(&record.operation).copied().unwrap_or(0.0);
            let estimated = (record.tokens as f64 / 1000.0) * rate;
            cost.total += estimated;
            *cost.per_operation.entry(record.operation.clone()).or_insert(0.0) += estimated;
        }

        TokenDocument {
            session_id: session_id.to_string(),
            generated_at: chrono::Utc::now(),
            totals,
            estimated_cost: cost,
            records: self.records.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tracker_snapshots_to_zero_totals() {
        let tracker = TokenTracker::new();
        let doc = tracker.snapshot("ses-1");
        assert_eq!(doc.totals.total_tokens, 0);
        assert_eq!(doc.estimated_cost.total, 0.0);
        assert!(doc.records.is_empty());
    }

    #[test]
    fn accumulates_totals_per_operation() {
        let mut tracker = TokenTracker::new();
        tracker.record("openai", "refine_what", 100);
        tracker.record("openai", "refine_what", 50);
        tracker.record("openai", "compare", 20);

        let doc = tracker.snapshot("ses-1");
        assert_eq!(doc.totals.total_tokens, 170);
        assert_eq!(doc.totals.per_operation["refine_what"], 150);
        assert_eq!(doc.totals.per_operation["compare"], 20);
        assert_eq!(doc.records.len(), 3);
    }

    #[test]
    fn estimated_cost_uses_rate_per_thousand_tokens() {
        let mut rates = HashMap::new();
        rates.insert("refine_what".to_string(), 2.0);
        let mut tracker = TokenTracker::with_rates(rates);
        tracker.record("openai", "refine_what", 1000);
        tracker.record("openai", "compare", 1000);

        let doc = tracker.snapshot("ses-1");
        assert!((doc.estimated_cost.per_operation["refine_what"] - 2.0).abs() < f64::EPSILON);
        assert!((doc.estimated_cost.total - 2.0).abs() < f64::EPSILON);
        assert!(!doc.estimated_cost.per_operation.contains_key("compare"));
    }

    #[test]
    fn metadata_round_trips_through_json() {
        let mut tracker = TokenTracker::new();
        tracker.record_with_metadata("openai", "compare", 10, serde_json::json!({"model": "gpt"}));
        let doc = tracker.snapshot("ses-1");
        let json = serde_json::to_string(&doc).expect("serialize");
        let back: TokenDocument = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.records[0].metadata, serde_json::json!({"model": "gpt"}));
    }
}

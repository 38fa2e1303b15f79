use thiserror::Error;

/// Error taxonomy shared across every crate in the workspace.
///
/// Variants map directly onto the session's failure semantics: some are
/// local to a single candidate and absorbed by the orchestrator, others are
/// terminal and abort the session.
#[derive(Debug, Error)]
pub enum IbeamError {
    /// The service was unreachable at the transport layer (connection
    /// refused, DNS failure, timeout before any bytes were exchanged).
    /// Recoverable by the [`ServiceConnection`](crate::collaborators) supervisor.
    #[error("service '{service}' unreachable during '{operation}': {source}")]
    TransportUnreachable {
        /// Logical service name (e.g. `"text-model"`).
        service: String,
        /// Operation being attempted when the error occurred.
        operation: String,
        /// Underlying transport error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The service responded, but with a non-2xx application-level error.
    /// Never triggers a restart.
    #[error("service '{service}' rejected '{operation}': {status} {body}")]
    ServiceApplication {
        /// Logical service name.
        service: String,
        /// Operation being attempted.
        operation: String,
        /// HTTP-like status code, if applicable.
        status: u16,
        /// Response body or message.
        body: String,
    },

    /// A vision-language comparator returned a structurally invalid verdict.
    #[error("malformed verdict from comparator: {0}")]
    MalformedVerdict(String),

    /// A restart was requested but is blocked (stop-lock present, or no
    /// restarter installed for the service).
    #[error("restart blocked for service '{service}': {reason}")]
    RestartBlocked {
        /// Logical service name.
        service: String,
        /// Human-readable reason (e.g. "user-stopped", "no restarter installed").
        reason: String,
    },

    /// The restart itself failed after all attempts were exhausted.
    #[error("restart of service '{service}' failed after retries: {source}")]
    MaxRestartsExceeded {
        /// Logical service name.
        service: String,
        /// Underlying error from the final attempt.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Refinement, combination, or generation failed for a single candidate.
    /// Always local; the orchestrator marks the candidate `failed` and
    /// continues with its siblings.
    #[error("candidate ({iteration}, {candidate_index}) production failed: {reason}")]
    CandidateProductionFailure {
        /// Iteration index.
        iteration: u32,
        /// Candidate index within the iteration.
        candidate_index: u32,
        /// Human-readable reason.
        reason: String,
    },

    /// A ranking failure without graceful degradation, or an inability to
    /// persist metadata. Aborts the session.
    #[error("session fatal: {0}")]
    SessionFatal(String),

    /// JSON document I/O failure.
    #[error("metadata I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl IbeamError {
    /// True for errors that are local to one candidate and must never abort
    /// the session (§7 propagation policy).
    #[must_use]
    pub fn is_candidate_local(&self) -> bool {
        matches!(self, IbeamError::CandidateProductionFailure { .. })
    }

    /// True for errors the supervisor (C1) treats as connection errors: the
    /// classifier in §4.1 — "refused", "cannot reach", or equivalent
    /// transport-layer unreachability.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, IbeamError::TransportUnreachable { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, IbeamError>;

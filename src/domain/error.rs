//! Error taxonomy for the detect → verify → execute → monitor pipeline.
//!
//! Adapters and use cases propagate `anyhow::Error`; the variants below are
//! attached at the point of failure so stage boundaries can classify an
//! error by downcasting instead of string matching. Expected outcomes
//! (low confidence, risk rejections, ambiguous orders) are not errors; they
//! are recorded on the signal as a `SignalReason`.

use thiserror::Error;

/// Classified pipeline failures.
#[derive(Debug, Error)]
pub enum BotError {
    /// Network or timeout failure on an external call. Retried next cycle.
    #[error("transient failure in {stage}: {message}")]
    Transient {
        stage: &'static str,
        message: String,
    },

    /// Invalid credentials or strategy configuration. Needs an operator.
    #[error("fatal configuration error: {0}")]
    FatalConfig(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid {kind} transition {from} -> {to}")]
    InvalidTransition {
        kind: &'static str,
        from: String,
        to: String,
    },

    #[error("account {account_id} already holds an open position in market {market_id}")]
    DuplicatePosition {
        account_id: String,
        market_id: String,
    },
}

impl BotError {
    /// Shorthand for a transient adapter failure.
    pub fn transient(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Transient {
            stage,
            message: message.into(),
        }
    }

    /// Find the first classified error in an `anyhow` chain.
    pub fn find(err: &anyhow::Error) -> Option<&BotError> {
        err.downcast_ref::<BotError>()
            .or_else(|| err.chain().find_map(|e| e.downcast_ref::<BotError>()))
    }

    /// Whether the error must take the owning agent out of `Running`.
    pub fn is_fatal(err: &anyhow::Error) -> bool {
        matches!(Self::find(err), Some(BotError::FatalConfig(_)))
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn test_fatal_survives_context_layers() {
        let err: anyhow::Result<()> = Err(BotError::FatalConfig("bad key".into()).into());
        let err = err.context("submit order").context("cycle").unwrap_err();
        assert!(BotError::is_fatal(&err));
    }

    #[test]
    fn test_transient_is_not_fatal() {
        let err = anyhow::Error::from(BotError::transient("feed", "connection reset"));
        assert!(!BotError::is_fatal(&err));
        assert!(matches!(BotError::find(&err), Some(BotError::Transient { .. })));
    }

    #[test]
    fn test_plain_error_is_unclassified() {
        let err = anyhow::anyhow!("boom");
        assert!(BotError::find(&err).is_none());
    }
}

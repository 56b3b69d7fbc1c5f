//! Outcome Verifier Port - AI Outcome Confirmation Interface
//!
//! Defines the trait for asking an external AI service whether a
//! market's real-world event has concluded with a given outcome.
//! Calls must be deterministic (temperature 0) so that the same
//! question yields the same verdict.

use async_trait::async_trait;

use crate::domain::market::Outcome;

/// Question put to the verifier.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationRequest {
  /// Market question as listed on the venue.
  pub question: String,
  /// Outcome the detector believes won.
  pub outcome: Outcome,
  /// Market category, used as prompt context.
  pub category: Option<String>,
}

/// Verifier answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
  /// Confidence in [0, 1] that `outcome` is the final result.
  pub confidence: f64,
  /// Short free-text justification.
  pub rationale: String,
}

/// Trait for AI outcome verifiers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutcomeVerifier: Send + Sync + 'static {
  /// Ask whether `request.outcome` is the concluded result.
  ///
  /// # Errors
  /// Returns error on timeout, transport failure or a malformed response.
  async fn verify(&self, request: &VerificationRequest) -> anyhow::Result<Verdict>;
}

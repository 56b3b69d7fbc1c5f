//! Signal Verification - AI Confidence Gate
//!
//! Sends each detected signal to the outcome verifier with a bounded
//! number of calls in flight. A failed call rejects only its own signal.
//! Results below the agent's threshold are rejected with the confidence
//! attached; the rest move to `Verified`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use futures_util::StreamExt;
use futures_util::stream;
use tracing::{debug, info, warn};

use super::{EventSender, emit, with_timeout};
use crate::domain::{BotEvent, Signal, SignalReason, VerificationResult};
use crate::ports::repository::Repository;
use crate::ports::verifier::{OutcomeVerifier, Verdict, VerificationRequest};

/// Runs verifier calls for a batch of signals.
pub struct SignalVerifier {
  verifier: Arc<dyn OutcomeVerifier>,
  repo: Arc<dyn Repository>,
  events: EventSender,
  fan_out: usize,
  timeout: Duration,
}

impl SignalVerifier {
  pub fn new(
    verifier: Arc<dyn OutcomeVerifier>,
    repo: Arc<dyn Repository>,
    events: EventSender,
    fan_out: usize,
    timeout: Duration,
  ) -> Self {
    Self {
      verifier,
      repo,
      events,
      fan_out: fan_out.max(1),
      timeout,
    }
  }

  /// Verify every signal and return the ones that passed, in input order.
  ///
  /// Signals must already be persisted in `Detected`. Each one is written
  /// back as `Verified` or `Rejected`.
  pub async fn verify_batch(&self, signals: Vec<Signal>, threshold: f64) -> Result<Vec<Signal>> {
    let calls = signals.into_iter().enumerate().map(|(idx, signal)| async move {
      let request = VerificationRequest {
        question: signal.question.clone(),
        outcome: signal.outcome,
        category: signal.category.clone(),
      };
      let verdict = with_timeout("verifier", self.timeout, self.verifier.verify(&request)).await;
      (idx, signal, verdict)
    });
    let mut answered: Vec<(usize, Signal, Result<Verdict>)> = stream::iter(calls)
      .buffer_unordered(self.fan_out)
      .collect()
      .await;
    answered.sort_by_key(|(idx, _, _)| *idx);

    let mut passed = Vec::new();
    for (_, mut signal, verdict) in answered {
      if self.apply(&mut signal, verdict, threshold).await? {
        passed.push(signal);
      }
    }
    Ok(passed)
  }

  async fn apply(&self, signal: &mut Signal, verdict: Result<Verdict>, threshold: f64) -> Result<bool> {
    let now = Utc::now();
    let verdict = match verdict {
      Ok(v) => v,
      Err(e) => {
        warn!(signal_id = %signal.id, market_id = %signal.market_id, error = %e, "Verification failed");
        let reason = SignalReason::VerificationFailed {
          error: format!("{e:#}"),
        };
        self.reject(signal, reason).await?;
        return Ok(false);
      }
    };

    let confidence = verdict.confidence;
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
      warn!(signal_id = %signal.id, market_id = %signal.market_id, confidence, "Verifier returned confidence outside [0, 1]");
      let reason = SignalReason::VerificationFailed {
        error: format!("confidence {confidence} outside [0, 1]"),
      };
      self.reject(signal, reason).await?;
      return Ok(false);
    }

    let result = VerificationResult {
      signal_id: signal.id,
      confidence,
      rationale: verdict.rationale,
      verified_at: now,
    };

    if confidence < threshold {
      debug!(
        signal_id = %signal.id,
        confidence,
        threshold,
        "Confidence below threshold"
      );
      signal.verification = Some(result);
      self
        .reject(
          signal,
          SignalReason::ConfidenceBelowThreshold {
            confidence,
            threshold,
          },
        )
        .await?;
      return Ok(false);
    }

    signal.verify(result, now)?;
    self.repo.update_signal(signal).await?;
    info!(
      signal_id = %signal.id,
      market_id = %signal.market_id,
      outcome = %signal.outcome,
      confidence,
      "Signal verified"
    );
    emit(
      &self.events,
      BotEvent::SignalVerified {
        agent_id: signal.agent_id.clone(),
        signal_id: signal.id,
        confidence,
      },
    );
    Ok(true)
  }

  async fn reject(&self, signal: &mut Signal, reason: SignalReason) -> Result<()> {
    signal.reject(reason.clone(), Utc::now())?;
    self.repo.update_signal(signal).await?;
    emit(
      &self.events,
      BotEvent::SignalRejected {
        agent_id: signal.agent_id.clone(),
        signal_id: signal.id,
        reason,
      },
    );
    Ok(())
  }
}

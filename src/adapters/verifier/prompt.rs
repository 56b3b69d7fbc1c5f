//! Verification prompt and response protocol.
//!
//! The model is asked for four labelled lines:
//!
//! ```text
//! CONCLUDED: YES|NO
//! OUTCOME_CORRECT: YES|NO|UNKNOWN
//! CONFIDENCE: 0.0-1.0 (or a percentage)
//! REASONING: free text
//! ```
//!
//! An unconcluded event forces confidence to 0; a predicted outcome the
//! model does not confirm caps it at 0.3.

use anyhow::{Result, bail};

use crate::ports::verifier::{Verdict, VerificationRequest};

/// Ceiling applied when the model does not confirm the predicted outcome.
pub const UNCONFIRMED_CAP: f64 = 0.3;

pub const SYSTEM_PROMPT: &str = "You verify the outcomes of prediction market questions. \
Answer only from confirmed facts and official results. Follow the requested format exactly.";

/// User prompt for one verification.
pub fn build_prompt(request: &VerificationRequest) -> String {
    let category = request
        .category
        .as_deref()
        .map(|c| format!("\nCategory: {c}"))
        .unwrap_or_default();
    let outcome = request.outcome;
    format!(
        "Verify the outcome of this prediction market question.

Market question: {question}{category}
Predicted outcome: {outcome}

1. Decide whether the event has already concluded.
2. If it has, decide whether the predicted outcome ({outcome}) is correct.
3. Give your confidence from 0.0 to 1.0.

If the event has not concluded, confidence must be 0.0. Only give a
confidence above 0.9 if you are certain.

Respond in exactly this format:
CONCLUDED: [YES/NO]
OUTCOME_CORRECT: [YES/NO/UNKNOWN]
CONFIDENCE: [0.0-1.0]
REASONING: [one or two sentences]",
        question = request.question,
    )
}

fn field<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let (head, rest) = line.split_once(':')?;
    head.trim()
        .trim_matches('*')
        .eq_ignore_ascii_case(label)
        .then(|| rest.trim())
}

fn is_yes(value: &str) -> bool {
    value
        .trim_matches(|c: char| !c.is_ascii_alphabetic())
        .eq_ignore_ascii_case("yes")
}

/// Parse a confidence value: `0.95`, `95%` or `95` all mean 0.95.
pub fn parse_confidence(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().trim_matches('*').trim().trim_end_matches('%').trim();
    let value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let value = if value > 1.0 { value / 100.0 } else { value };
    (value <= 1.0).then_some(value)
}

/// Parse the model's reply into a verdict.
///
/// # Errors
/// Fails when the `CONFIDENCE` line is missing or unparsable.
pub fn parse_response(content: &str) -> Result<Verdict> {
    let mut concluded = false;
    let mut outcome_correct = false;
    let mut confidence = None;
    let mut reasoning = None;

    for line in content.lines().map(str::trim) {
        if let Some(v) = field(line, "CONCLUDED") {
            concluded = is_yes(v);
        } else if let Some(v) = field(line, "OUTCOME_CORRECT") {
            outcome_correct = is_yes(v);
        } else if let Some(v) = field(line, "CONFIDENCE") {
            confidence = parse_confidence(v);
            if confidence.is_none() {
                bail!("malformed verifier response: unparsable confidence {v:?}");
            }
        } else if let Some(v) = field(line, "REASONING") {
            reasoning = Some(v.to_string());
        }
    }

    let Some(mut confidence) = confidence else {
        bail!("malformed verifier response: no CONFIDENCE line");
    };
    let mut rationale = reasoning.unwrap_or_default();
    if !concluded {
        confidence = 0.0;
        rationale = format!("Event has not concluded. {rationale}");
    } else if !outcome_correct {
        confidence = confidence.min(UNCONFIRMED_CAP);
        rationale = format!("Predicted outcome not confirmed. {rationale}");
    }
    Ok(Verdict {
        confidence,
        rationale: rationale.trim().to_string(),
    })
}

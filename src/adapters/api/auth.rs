//! CLOB Authentication — HMAC-SHA256 Request Signing
//!
//! Signs every CLOB API request using HMAC-SHA256 per the Polymarket
//! CLOB L2 header scheme. Credentials come from environment variables
//! (POLY_API_KEY, POLY_API_SECRET, POLY_PASSPHRASE); a missing variable is
//! a fatal configuration error.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use base64::Engine;

use crate::domain::error::BotError;

/// CLOB API authentication handler.
///
/// Holds API key, secret, and passphrase. Only the computed signature
/// ever leaves this struct; the secret is never sent.
pub struct ClobAuth {
    api_key: String,
    api_secret: String,
    passphrase: String,
}

impl ClobAuth {
    /// Load credentials from environment variables.
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| BotError::FatalConfig(format!("{name} not set")))
        };
        Ok(Self::from_parts(
            var("POLY_API_KEY")?,
            var("POLY_API_SECRET")?,
            var("POLY_PASSPHRASE")?,
        ))
    }

    /// Build from explicit credentials.
    pub fn from_parts(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            passphrase: passphrase.into(),
        }
    }

    /// Current Unix timestamp in seconds (for signing).
    pub fn timestamp(&self) -> String {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .to_string()
    }

    /// Signature format: base64(HMAC-SHA256(secret, timestamp + method + path + body)).
    pub fn sign(&self, timestamp: &str, method: &str, path: &str, body: &str) -> String {
        let message = format!("{timestamp}{method}{path}{body}");
        let mac = hmac_sha256::HMAC::mac(message.as_bytes(), self.api_secret.as_bytes());
        base64::engine::general_purpose::STANDARD.encode(mac)
    }

    /// Header pairs for one request.
    pub fn headers(&self, method: &str, path: &str, body: &str) -> [(&'static str, String); 4] {
        let timestamp = self.timestamp();
        let signature = self.sign(&timestamp, method, path, body);
        [
            ("POLY_API_KEY", self.api_key.clone()),
            ("POLY_PASSPHRASE", self.passphrase.clone()),
            ("POLY_TIMESTAMP", timestamp),
            ("POLY_SIGNATURE", signature),
        ]
    }
}

//! Payment-partner webhook payloads.

use serde::Deserialize;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::Amount;
use crate::model::DonationStatus;

/// Header carrying the pre-shared secret.
pub const SECRET_HEADER: &str = "x-webhook-secret";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("malformed webhook payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("webhook payload missing {0}")]
    MissingField(&'static str),
}

/// Body of a partner status notification.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebhookPayload {
    pub external_id: String,
    pub status: String,
    #[serde(default)]
    pub amount: Option<Amount>,
    #[serde(default)]
    pub receipt_number: Option<String>,
    #[serde(default)]
    pub donation_date: Option<String>,
}

impl WebhookPayload {
    pub fn from_json(body: &[u8]) -> Result<Self, WebhookError> {
        let payload: WebhookPayload = serde_json::from_slice(body)?;
        payload.validate()?;
        Ok(payload)
    }

    pub fn validate(&self) -> Result<(), WebhookError> {
        if self.external_id.trim().is_empty() {
            return Err(WebhookError::MissingField("external_id"));
        }
        if self.status.is_empty() {
            return Err(WebhookError::MissingField("status"));
        }
        Ok(())
    }

    /// Status this notification maps to, `None` for values the partner
    /// protocol does not define.
    pub fn mapped_status(&self) -> Option<DonationStatus> {
        map_status(&self.status)
    }

    /// Receipt number, ignoring blank values.
    pub fn receipt(&self) -> Option<&str> {
        self.receipt_number
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }
}

/// Partner status vocabulary. Case-sensitive.
pub fn map_status(status: &str) -> Option<DonationStatus> {
    match status {
        "completed" => Some(DonationStatus::Completed),
        "failed" => Some(DonationStatus::Failed),
        "pending" => Some(DonationStatus::Processing),
        "cancelled" => Some(DonationStatus::Cancelled),
        _ => None,
    }
}

/// Constant-time comparison of the presented secret against the configured one.
///
/// An empty configured secret disables the webhook.
pub fn secret_matches(expected: &str, presented: Option<&str>) -> bool {
    match presented {
        Some(presented) if !expected.is_empty() => {
            expected.as_bytes().ct_eq(presented.as_bytes()).into()
        }
        _ => false,
    }
}

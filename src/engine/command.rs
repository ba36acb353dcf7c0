//! Inputs accepted by the engine.

use crate::Amount;
use crate::model::{NewDonation, Owner, UserId};
use crate::webhook::WebhookPayload;

/// "I completed the external payment."
#[derive(Debug, Clone, Default)]
pub struct ConfirmRequest {
    pub donation_id: String,
    /// Corrected amount, applied when it differs from the stored one.
    pub amount: Option<Amount>,
    pub token: Option<String>,
}

/// Confirmation backed by the partner's receipt number.
#[derive(Debug, Clone, Default)]
pub struct ReceiptRequest {
    pub donation_id: String,
    pub receipt_number: String,
    pub amount: Option<Amount>,
    /// Recorded verbatim in the donation notes.
    pub donation_date: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AdminOverrideRequest {
    pub donation_id: String,
    /// One of the six upper-case status names.
    pub status: String,
    pub reason: Option<String>,
    pub amount: Option<Amount>,
    pub token: Option<String>,
}

/// One unit of work for [`Engine::run`](super::Engine::run).
#[derive(Debug, Clone)]
pub enum Command {
    /// Record a new monetary donation.
    Donate(NewDonation),
    /// Record an item donation for `owner`.
    DonateItem { owner: Owner },
    Confirm(ConfirmRequest),
    VerifyReceipt(ReceiptRequest),
    AdminOverride(AdminOverrideRequest),
    Webhook {
        secret: Option<String>,
        payload: WebhookPayload,
    },
    /// Recompute a user's total from the ledger.
    Reconcile { user: UserId, token: Option<String> },
}

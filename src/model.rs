//! Core domain types for the donation ledger.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Amount;

/// Literal user id marking a donation that belongs to no account.
pub const ANONYMOUS: &str = "anonymous";

/// Donation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DonationId(String);

impl DonationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DonationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registered user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who a donation is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Owner {
    User(UserId),
    Anonymous,
}

impl Owner {
    /// Maps the `"anonymous"` sentinel to [`Owner::Anonymous`], anything else to a user.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        if raw == ANONYMOUS {
            Owner::Anonymous
        } else {
            Owner::User(UserId(raw))
        }
    }

    pub fn user(&self) -> Option<&UserId> {
        match self {
            Owner::User(user) => Some(user),
            Owner::Anonymous => None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Owner::Anonymous)
    }
}

impl From<String> for Owner {
    fn from(raw: String) -> Self {
        Owner::from_raw(raw)
    }
}

impl From<Owner> for String {
    fn from(owner: Owner) -> Self {
        owner.to_string()
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::User(user) => f.write_str(user.as_str()),
            Owner::Anonymous => f.write_str(ANONYMOUS),
        }
    }
}

/// Lifecycle state of a donation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DonationStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Invalidated,
}

impl DonationStatus {
    pub const ALL: [DonationStatus; 6] = [
        DonationStatus::Pending,
        DonationStatus::Processing,
        DonationStatus::Completed,
        DonationStatus::Failed,
        DonationStatus::Cancelled,
        DonationStatus::Invalidated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DonationStatus::Pending => "PENDING",
            DonationStatus::Processing => "PROCESSING",
            DonationStatus::Completed => "COMPLETED",
            DonationStatus::Failed => "FAILED",
            DonationStatus::Cancelled => "CANCELLED",
            DonationStatus::Invalidated => "INVALIDATED",
        }
    }

    pub fn is_completed(self) -> bool {
        self == DonationStatus::Completed
    }
}

impl fmt::Display for DonationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid donation status '{0}'")]
pub struct StatusError(pub String);

impl FromStr for DonationStatus {
    type Err = StatusError;

    /// Case-sensitive: only the six upper-case names are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DonationStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| StatusError(s.to_string()))
    }
}

/// A single donation record in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Donation {
    pub id: DonationId,
    pub owner: Owner,
    pub amount: Amount,
    pub status: DonationStatus,
    pub transaction_id: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Append-only audit trail, one entry per line.
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by the store on every successful update.
    pub version: u64,
}

impl Donation {
    /// What this donation contributes to its owner's total.
    pub fn completed_amount(&self) -> Amount {
        if self.status.is_completed() {
            self.amount
        } else {
            Amount::ZERO
        }
    }
}

/// Input for inserting a donation into the ledger.
#[derive(Debug, Clone)]
pub struct NewDonation {
    pub id: DonationId,
    pub owner: Owner,
    pub amount: Amount,
    pub status: DonationStatus,
}

impl NewDonation {
    pub fn pending(id: impl Into<String>, owner: Owner, amount: Amount) -> Self {
        Self {
            id: DonationId::new(id),
            owner,
            amount,
            status: DonationStatus::Pending,
        }
    }
}

/// Change to `confirmed_at` requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfirmedAtChange {
    #[default]
    Keep,
    Set(DateTime<Utc>),
    Clear,
}

/// Partial update applied to a donation record.
///
/// `None` fields are left as stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DonationUpdate {
    pub status: Option<DonationStatus>,
    pub amount: Option<Amount>,
    pub transaction_id: Option<String>,
    pub confirmed_at: ConfirmedAtChange,
    pub note: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl DonationUpdate {
    /// Apply onto a record. Notes are appended, never replaced.
    pub fn apply_to(&self, donation: &mut Donation) {
        if let Some(status) = self.status {
            donation.status = status;
        }
        if let Some(amount) = self.amount {
            donation.amount = amount;
        }
        if let Some(transaction_id) = &self.transaction_id {
            donation.transaction_id = Some(transaction_id.clone());
        }
        match self.confirmed_at {
            ConfirmedAtChange::Keep => {}
            ConfirmedAtChange::Set(at) => donation.confirmed_at = Some(at),
            ConfirmedAtChange::Clear => donation.confirmed_at = None,
        }
        if let Some(note) = &self.note {
            if !donation.notes.is_empty() {
                donation.notes.push('\n');
            }
            donation.notes.push_str(note);
        }
        if let Some(at) = self.updated_at {
            donation.updated_at = at;
        }
    }
}

/// Denormalized per-user donation totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAggregate {
    pub user: UserId,
    pub total_donated: Amount,
    pub items_donated: u64,
}

impl UserAggregate {
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            total_donated: Amount::ZERO,
            items_donated: 0,
        }
    }
}

/// Caller identity resolved from a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user: UserId,
    pub email: String,
}

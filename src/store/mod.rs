//! Persistence capabilities consumed by the engine.
//!
//! The ledger holds donation records, the aggregate store holds per-user
//! totals. The two are independent: no write spans both.

use async_trait::async_trait;
use thiserror::Error;

use crate::Amount;
use crate::model::{Donation, DonationId, DonationUpdate, UserAggregate, UserId};

mod memory;
pub use memory::{InMemoryAggregates, InMemoryLedger};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("donation {0} already exists")]
    DuplicateId(DonationId),

    #[error("donation {0} not found")]
    NotFound(DonationId),

    #[error("donation {id} changed concurrently: expected version {expected}, found {actual}")]
    VersionConflict {
        id: DonationId,
        expected: u64,
        actual: u64,
    },

    #[error("aggregate for {0} out of range")]
    Overflow(UserId),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Donation records keyed by id.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get(&self, id: &DonationId) -> Result<Option<Donation>, StoreError>;

    async fn insert(&self, donation: Donation) -> Result<(), StoreError>;

    /// Apply `update` if the stored record is still at `expected_version`.
    ///
    /// Returns the record as written, with its version bumped.
    async fn update(
        &self,
        id: &DonationId,
        expected_version: u64,
        update: DonationUpdate,
    ) -> Result<Donation, StoreError>;

    async fn list_by_user(&self, user: &UserId) -> Result<Vec<Donation>, StoreError>;
}

/// Per-user running totals. Each call is atomic on its own field only.
///
/// A change that would leave a field's range fails with
/// [`StoreError::Overflow`] and leaves the aggregate untouched.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    async fn get(&self, user: &UserId) -> Result<Option<UserAggregate>, StoreError>;

    async fn increment_total(&self, user: &UserId, amount: Amount) -> Result<(), StoreError>;

    async fn decrement_total(&self, user: &UserId, amount: Amount) -> Result<(), StoreError>;

    async fn increment_items(&self, user: &UserId, count: u64) -> Result<(), StoreError>;

    /// Overwrite the total with a value recomputed from the ledger.
    async fn set_total(&self, user: &UserId, total: Amount) -> Result<(), StoreError>;

    async fn all(&self) -> Result<Vec<UserAggregate>, StoreError>;
}

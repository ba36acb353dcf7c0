use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{AggregateStore, LedgerStore, StoreError};
use crate::Amount;
use crate::model::{Donation, DonationId, DonationUpdate, UserAggregate, UserId};

/// Ledger kept in a `HashMap` behind an async lock.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    donations: RwLock<HashMap<DonationId, Donation>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn get(&self, id: &DonationId) -> Result<Option<Donation>, StoreError> {
        Ok(self.donations.read().await.get(id).cloned())
    }

    async fn insert(&self, donation: Donation) -> Result<(), StoreError> {
        let mut donations = self.donations.write().await;
        if donations.contains_key(&donation.id) {
            return Err(StoreError::DuplicateId(donation.id));
        }
        donations.insert(donation.id.clone(), donation);
        Ok(())
    }

    async fn update(
        &self,
        id: &DonationId,
        expected_version: u64,
        update: DonationUpdate,
    ) -> Result<Donation, StoreError> {
        let mut donations = self.donations.write().await;
        let record = donations
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        if record.version != expected_version {
            return Err(StoreError::VersionConflict {
                id: id.clone(),
                expected: expected_version,
                actual: record.version,
            });
        }

        update.apply_to(record);
        record.version += 1;
        Ok(record.clone())
    }

    async fn list_by_user(&self, user: &UserId) -> Result<Vec<Donation>, StoreError> {
        Ok(self
            .donations
            .read()
            .await
            .values()
            .filter(|d| d.owner.user() == Some(user))
            .cloned()
            .collect())
    }
}

/// Aggregates kept in a `HashMap`; unknown users start at zero.
#[derive(Debug, Default)]
pub struct InMemoryAggregates {
    users: RwLock<HashMap<UserId, UserAggregate>>,
}

impl InMemoryAggregates {
    pub fn new() -> Self {
        Self::default()
    }

    async fn modify(
        &self,
        user: &UserId,
        f: impl FnOnce(&mut UserAggregate) -> Option<()>,
    ) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let aggregate = users
            .entry(user.clone())
            .or_insert_with(|| UserAggregate::new(user.clone()));
        f(aggregate).ok_or_else(|| StoreError::Overflow(user.clone()))
    }
}

#[async_trait]
impl AggregateStore for InMemoryAggregates {
    async fn get(&self, user: &UserId) -> Result<Option<UserAggregate>, StoreError> {
        Ok(self.users.read().await.get(user).cloned())
    }

    async fn increment_total(&self, user: &UserId, amount: Amount) -> Result<(), StoreError> {
        self.modify(user, |a| {
            a.total_donated = a.total_donated.checked_add(amount)?;
            Some(())
        })
        .await
    }

    async fn decrement_total(&self, user: &UserId, amount: Amount) -> Result<(), StoreError> {
        self.modify(user, |a| {
            a.total_donated = a.total_donated.checked_sub(amount)?;
            Some(())
        })
        .await
    }

    async fn increment_items(&self, user: &UserId, count: u64) -> Result<(), StoreError> {
        self.modify(user, |a| {
            a.items_donated = a.items_donated.checked_add(count)?;
            Some(())
        })
        .await
    }

    async fn set_total(&self, user: &UserId, total: Amount) -> Result<(), StoreError> {
        self.modify(user, |a| {
            a.total_donated = total;
            Some(())
        })
        .await
    }

    async fn all(&self) -> Result<Vec<UserAggregate>, StoreError> {
        Ok(self.users.read().await.values().cloned().collect())
    }
}

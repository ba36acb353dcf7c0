//! Status transition rules.
//!
//! Pure functions deciding what a status change does to the owner's
//! `total_donated` and to the donation's `confirmed_at`. Nothing here touches
//! a store; entry points in [`crate::engine`] apply the result.

use chrono::{DateTime, Utc};

use crate::Amount;
use crate::amount::AmountError;
use crate::model::{ConfirmedAtChange, Donation, DonationStatus};

/// Signed change to the owner's total for a status change at a fixed amount.
///
/// `+amount` when entering `COMPLETED`, `-amount` when leaving it, zero otherwise.
pub fn delta(from: DonationStatus, to: DonationStatus, amount: Amount) -> Amount {
    match (from.is_completed(), to.is_completed()) {
        (false, true) => amount,
        (true, false) => -amount,
        _ => Amount::ZERO,
    }
}

/// `confirmed_at` side effect of moving into `to`.
///
/// Set once on completion, cleared on failure, cancellation or invalidation.
pub fn confirmed_at_change(
    to: DonationStatus,
    current: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> ConfirmedAtChange {
    match to {
        DonationStatus::Completed if current.is_none() => ConfirmedAtChange::Set(now),
        DonationStatus::Failed | DonationStatus::Cancelled | DonationStatus::Invalidated
            if current.is_some() =>
        {
            ConfirmedAtChange::Clear
        }
        _ => ConfirmedAtChange::Keep,
    }
}

/// A planned change to one donation, with its effect on the owner's total.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: DonationStatus,
    pub to: DonationStatus,
    pub previous_amount: Amount,
    pub amount: Amount,
    /// Change to apply to the owner's `total_donated`.
    pub delta: Amount,
    pub confirmed_at: ConfirmedAtChange,
}

impl Transition {
    /// Plan moving `donation` into `to`, optionally correcting its amount.
    ///
    /// The delta is the difference between what the donation contributes
    /// after and before the change, which reduces to [`delta`] when the
    /// amount is unchanged. Fails only when that difference is not
    /// representable.
    pub fn plan(
        donation: &Donation,
        to: DonationStatus,
        corrected_amount: Option<Amount>,
        now: DateTime<Utc>,
    ) -> Result<Self, AmountError> {
        let amount = corrected_amount.unwrap_or(donation.amount);
        let before = donation.completed_amount();
        let after = if to.is_completed() {
            amount
        } else {
            Amount::ZERO
        };

        let delta = after
            .checked_sub(before)
            .ok_or_else(|| AmountError::Overflow(format!("{after} - {before}")))?;

        Ok(Self {
            from: donation.status,
            to,
            previous_amount: donation.amount,
            amount,
            delta,
            confirmed_at: confirmed_at_change(to, donation.confirmed_at, now),
        })
    }

    pub fn amount_changed(&self) -> bool {
        self.amount != self.previous_amount
    }

    pub fn status_changed(&self) -> bool {
        self.from != self.to
    }
}

//! Best-effort audit trail of applied transitions.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::Amount;
use crate::model::{DonationId, DonationStatus, Owner};

/// Which entry point caused a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Intake,
    SelfConfirm,
    ReceiptVerify,
    Admin,
    Webhook,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub at: DateTime<Utc>,
    pub source: Source,
    pub donation: DonationId,
    pub owner: Owner,
    pub from: DonationStatus,
    pub to: DonationStatus,
    /// Change applied to the owner's total; zero when nothing was credited.
    pub credited: Amount,
}

#[derive(Debug, Error)]
#[error("audit sink failed: {0}")]
pub struct AuditError(pub String);

/// Receives audit events. Failures never abort the operation being audited.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError>;
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemoryAudit {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for MemoryAudit {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .map_err(|e| AuditError(e.to_string()))?
            .push(event);
        Ok(())
    }
}

/// Discards events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAudit;

#[async_trait]
impl AuditSink for NoAudit {
    async fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(source: Source) -> AuditEvent {
        AuditEvent {
            at: DateTime::<Utc>::UNIX_EPOCH,
            source,
            donation: DonationId::new("d1"),
            owner: Owner::from_raw("u1"),
            from: DonationStatus::Pending,
            to: DonationStatus::Completed,
            credited: Amount::from_units(5),
        }
    }

    #[tokio::test]
    async fn memory_audit_keeps_order() {
        let audit = MemoryAudit::new();
        audit.record(event(Source::SelfConfirm)).await.unwrap();
        audit.record(event(Source::Webhook)).await.unwrap();

        let sources: Vec<_> = audit.events().iter().map(|e| e.source).collect();
        assert_eq!(sources, vec![Source::SelfConfirm, Source::Webhook]);
    }

    #[tokio::test]
    async fn no_audit_accepts_everything() {
        assert!(NoAudit.record(event(Source::Admin)).await.is_ok());
    }
}

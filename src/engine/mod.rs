//! Donation transition engine.
//!
//! Three independent entry points move donations between statuses: the donor
//! confirming their own payment, an administrator override, and the payment
//! partner's webhook. Each one reads the donation, plans a [`Transition`],
//! writes the record guarded by its version, and then settles the owner's
//! aggregate. The two writes are sequential and not atomic together.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::Amount;
use crate::audit::{AuditEvent, AuditSink, NoAudit, Source};
use crate::auth::{AdminAction, AdminPolicy, EmailAllowlist, StaticTokens, TokenVerifier};
use crate::config::{AggregateMode, Config, MismatchPolicy};
use crate::limit::{KeyedLimiter, RateLimiter, Unlimited};
use crate::model::{
    Donation, DonationId, DonationStatus, DonationUpdate, Identity, NewDonation, Owner,
    StatusError, UserAggregate, UserId,
};
use crate::store::{AggregateStore, InMemoryAggregates, InMemoryLedger, LedgerStore, StoreError};
use crate::transition::Transition;
use crate::webhook::{self, WebhookPayload};

mod command;
pub use command::{AdminOverrideRequest, Command, ConfirmRequest, ReceiptRequest};

mod error;
pub use error::EngineError;

/// Source of "now" for `confirmed_at` and `updated_at`.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A transition that was written to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    /// The record as written.
    pub donation: Donation,
    pub from: DonationStatus,
    /// Change applied to the owner's total. Zero when nobody was credited.
    pub credited: Amount,
}

/// Outcome of recomputing a user's total from the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub user: UserId,
    pub previous: Amount,
    pub recomputed: Amount,
}

impl Reconciliation {
    /// How far the stored total had drifted from the ledger, `None` if the
    /// difference itself is out of range.
    pub fn drift(&self) -> Option<Amount> {
        self.previous.checked_sub(self.recomputed)
    }
}

/// What an entry point wants done to the donation it just read.
struct Step {
    to: DonationStatus,
    amount: Option<Amount>,
    transaction_id: Option<String>,
    note: Option<String>,
    /// Whether the owner's aggregate follows the transition.
    credit: bool,
}

/// The donation transition engine.
///
/// Shares its stores behind `Arc`, so every entry point takes `&self` and
/// concurrent calls are independent.
pub struct Engine {
    ledger: Arc<dyn LedgerStore>,
    aggregates: Arc<dyn AggregateStore>,
    tokens: Arc<dyn TokenVerifier>,
    admins: Arc<dyn AdminPolicy>,
    limiter: Arc<dyn RateLimiter>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    config: Config,
}

/// Construction
impl Engine {
    /// Engine over in-memory stores, with the admin allowlist taken from `config`.
    pub fn new(config: Config) -> Self {
        let limiter: Arc<dyn RateLimiter> =
            match KeyedLimiter::new(config.rate_limit, config.rate_window) {
                Some(limiter) => Arc::new(limiter),
                None => {
                    warn!(
                        limit = config.rate_limit,
                        window = ?config.rate_window,
                        "rate limiting disabled"
                    );
                    Arc::new(Unlimited)
                }
            };

        Self {
            ledger: Arc::new(InMemoryLedger::new()),
            aggregates: Arc::new(InMemoryAggregates::new()),
            tokens: Arc::new(StaticTokens::new()),
            admins: Arc::new(EmailAllowlist::new(&config.admin_emails)),
            limiter,
            audit: Arc::new(NoAudit),
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn LedgerStore>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_aggregates(mut self, aggregates: Arc<dyn AggregateStore>) -> Self {
        self.aggregates = aggregates;
        self
    }

    pub fn with_tokens(mut self, tokens: Arc<dyn TokenVerifier>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_admin_policy(mut self, admins: Arc<dyn AdminPolicy>) -> Self {
        self.admins = admins;
        self
    }

    pub fn with_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Public API
impl Engine {
    /// Run the engine over a stream of commands.
    pub async fn run(&self, mut stream: impl Stream<Item = Command> + Unpin) {
        while let Some(command) = stream.next().await {
            // every outcome is already logged; one failure must not stop the rest
            let _ = self.execute(command).await;
        }
    }

    /// Execute a single command.
    pub async fn execute(&self, command: Command) -> Result<(), EngineError> {
        match command {
            Command::Donate(new) => self.create_donation(new).await.map(drop),
            Command::DonateItem { owner } => self.record_item_donation(&owner).await,
            Command::Confirm(request) => self.confirm(request).await.map(drop),
            Command::VerifyReceipt(request) => self.verify_receipt(request).await.map(drop),
            Command::AdminOverride(request) => self.admin_override(request).await.map(drop),
            Command::Webhook { secret, payload } => {
                self.webhook(secret.as_deref(), payload).await.map(drop)
            }
            Command::Reconcile { user, token } => {
                self.reconcile_user(token.as_deref(), &user).await.map(drop)
            }
        }
    }

    pub async fn donation(&self, id: &DonationId) -> Result<Option<Donation>, EngineError> {
        Ok(self.ledger.get(id).await?)
    }

    pub async fn aggregate(&self, user: &UserId) -> Result<Option<UserAggregate>, EngineError> {
        Ok(self.aggregates.get(user).await?)
    }

    /// All user aggregates, sorted by user id.
    pub async fn aggregates(&self) -> Result<Vec<UserAggregate>, EngineError> {
        let mut all = self.aggregates.all().await?;
        all.sort_by(|a, b| a.user.cmp(&b.user));
        Ok(all)
    }

    /// Record a new donation.
    ///
    /// A donation created directly as `COMPLETED` credits its owner at once.
    pub async fn create_donation(&self, new: NewDonation) -> Result<Donation, EngineError> {
        let id = new.id.clone();
        let result = self.apply_create(new).await;
        match &result {
            Ok(donation) => info!(
                donation = %id,
                owner = %donation.owner,
                amount = %donation.amount,
                status = %donation.status,
                "donation recorded"
            ),
            Err(e) if e.is_client_error() => warn!(donation = %id, reason = %e, "donation rejected"),
            Err(e) => error!(donation = %id, error = %e, "donation failed"),
        }
        result
    }

    /// Count an item donation. Anonymous item donations touch no aggregate.
    pub async fn record_item_donation(&self, owner: &Owner) -> Result<(), EngineError> {
        let Some(user) = owner.user() else {
            debug!("anonymous item donation, no aggregate to update");
            return Ok(());
        };

        if let Err(e) = self.aggregates.increment_items(user, 1).await {
            error!(user = %user, error = %e, "item donation count update failed");
            return Err(e.into());
        }
        info!(user = %user, "item donation recorded");
        Ok(())
    }

    /// Direct confirmation after returning from the partner's payment page.
    pub async fn confirm(&self, request: ConfirmRequest) -> Result<Applied, EngineError> {
        let result = self.apply_confirm(&request).await;
        Self::log_result("confirm", &request.donation_id, &result);
        result
    }

    /// Confirmation backed by the partner's receipt number.
    pub async fn verify_receipt(&self, request: ReceiptRequest) -> Result<Applied, EngineError> {
        let result = self.apply_verify_receipt(&request).await;
        Self::log_result("receipt verification", &request.donation_id, &result);
        result
    }

    /// Privileged status change.
    pub async fn admin_override(
        &self,
        request: AdminOverrideRequest,
    ) -> Result<Applied, EngineError> {
        let result = self.apply_admin_override(&request).await;
        Self::log_result("admin override", &request.donation_id, &result);
        result
    }

    /// Partner status notification, already parsed.
    ///
    /// `secret` is the value of the [`webhook::SECRET_HEADER`] header.
    pub async fn webhook(
        &self,
        secret: Option<&str>,
        payload: WebhookPayload,
    ) -> Result<Applied, EngineError> {
        let result = self.apply_webhook(secret, &payload).await;
        Self::log_result("webhook", &payload.external_id, &result);
        result
    }

    /// Partner status notification as a raw JSON body.
    pub async fn webhook_json(
        &self,
        secret: Option<&str>,
        body: &[u8],
    ) -> Result<Applied, EngineError> {
        // authenticate before looking at the body
        self.check_webhook_secret(secret)?;

        let payload = WebhookPayload::from_json(body).map_err(|e| {
            warn!(reason = %e, "webhook rejected");
            EngineError::Validation(e.to_string())
        })?;
        self.webhook(secret, payload).await
    }

    /// Recompute `user`'s total from their completed donations and store it.
    pub async fn reconcile_user(
        &self,
        token: Option<&str>,
        user: &UserId,
    ) -> Result<Reconciliation, EngineError> {
        self.authorize_admin(token, AdminAction::ReconcileUser)?;

        let previous = self
            .aggregates
            .get(user)
            .await?
            .map(|a| a.total_donated)
            .unwrap_or_default();
        let recomputed = self.recompute(user).await?;

        let report = Reconciliation {
            user: user.clone(),
            previous,
            recomputed,
        };
        if previous == recomputed {
            info!(user = %user, total = %recomputed, "aggregate consistent");
        } else {
            warn!(
                user = %user,
                previous = %previous,
                recomputed = %recomputed,
                "aggregate drift repaired"
            );
        }
        Ok(report)
    }
}

/// Private API
impl Engine {
    /// Small helper to log entry point results
    fn log_result(operation: &str, donation: &str, result: &Result<Applied, EngineError>) {
        match result {
            Ok(applied) => info!(
                donation,
                from = %applied.from,
                to = %applied.donation.status,
                credited = %applied.credited,
                "{operation} applied"
            ),
            Err(e) if e.is_client_error() => warn!(donation, reason = %e, "{operation} rejected"),
            Err(e) => error!(donation, error = %e, "{operation} failed"),
        }
    }

    async fn apply_create(&self, new: NewDonation) -> Result<Donation, EngineError> {
        if new.id.as_str().trim().is_empty() {
            return Err(EngineError::Validation("donation id is required".to_string()));
        }
        if matches!(&new.owner, Owner::User(user) if user.as_str().trim().is_empty()) {
            return Err(EngineError::Validation("donation owner is required".to_string()));
        }
        check_amount(Some(new.amount))?;

        let now = self.clock.now();
        let donation = Donation {
            id: new.id,
            owner: new.owner,
            amount: new.amount,
            status: new.status,
            transaction_id: None,
            confirmed_at: new.status.is_completed().then_some(now),
            notes: String::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        };

        match self.ledger.insert(donation.clone()).await {
            Ok(()) => {}
            Err(StoreError::DuplicateId(id)) => return Err(EngineError::Duplicate(id)),
            Err(e) => return Err(e.into()),
        }

        let credited = self
            .settle(&donation.owner, donation.completed_amount(), &donation.id)
            .await?;
        self.record_audit(Source::Intake, &donation, donation.status, credited).await;
        Ok(donation)
    }

    async fn apply_confirm(&self, request: &ConfirmRequest) -> Result<Applied, EngineError> {
        let id = parse_id(&request.donation_id)?;
        check_amount(request.amount)?;
        let caller = self.caller(request.token.as_deref());
        self.check_rate(caller.as_ref(), &id).await?;
        let policy = self.config.mismatch_policy;

        self.transition(Source::SelfConfirm, &id, |donation| {
            let is_owner = matches!(
                (&caller, donation.owner.user()),
                (Some(caller), Some(owner)) if caller.user == *owner
            );
            if !is_owner
                && caller.is_some()
                && !donation.owner.is_anonymous()
                && policy == MismatchPolicy::Reject
            {
                return Err(EngineError::Unauthorized);
            }

            Ok(Step {
                to: DonationStatus::Completed,
                amount: request.amount,
                transaction_id: None,
                note: None,
                credit: is_owner,
            })
        })
        .await
    }

    async fn apply_verify_receipt(&self, request: &ReceiptRequest) -> Result<Applied, EngineError> {
        let id = parse_id(&request.donation_id)?;
        let receipt = request.receipt_number.trim();
        if receipt.is_empty() {
            return Err(EngineError::Validation("receipt number is required".to_string()));
        }
        check_amount(request.amount)?;
        let caller = self.caller(request.token.as_deref());
        self.check_rate(caller.as_ref(), &id).await?;

        let date = request
            .donation_date
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or("not provided");
        let note = format!("Receipt {receipt} verified, donation date {date}");

        self.transition(Source::ReceiptVerify, &id, |donation| {
            if let (Some(caller), Some(owner)) = (&caller, donation.owner.user()) {
                if caller.user != *owner {
                    return Err(EngineError::Unauthorized);
                }
            }

            Ok(Step {
                to: DonationStatus::Completed,
                amount: request.amount,
                transaction_id: Some(receipt.to_string()),
                note: Some(note.clone()),
                credit: true,
            })
        })
        .await
    }

    async fn apply_admin_override(
        &self,
        request: &AdminOverrideRequest,
    ) -> Result<Applied, EngineError> {
        let status: DonationStatus = request
            .status
            .parse()
            .map_err(|e: StatusError| EngineError::Validation(e.to_string()))?;
        let id = parse_id(&request.donation_id)?;
        check_amount(request.amount)?;
        let admin = self.authorize_admin(
            request.token.as_deref(),
            AdminAction::OverrideDonationStatus,
        )?;
        debug!(donation = %id, admin = %admin.email, status = %status, "admin override authorized");

        let reason = request
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or("No reason provided");
        let note = format!("Status changed to {status} by admin. Reason: {reason}");

        self.transition(Source::Admin, &id, |_| {
            Ok(Step {
                to: status,
                amount: request.amount,
                transaction_id: None,
                note: Some(note.clone()),
                credit: true,
            })
        })
        .await
    }

    /// Every mapped status moves the owner's total, so a partner reporting
    /// `failed` or `cancelled` on a completed donation debits the owner.
    async fn apply_webhook(
        &self,
        secret: Option<&str>,
        payload: &WebhookPayload,
    ) -> Result<Applied, EngineError> {
        self.check_webhook_secret(secret)?;
        payload
            .validate()
            .map_err(|e| EngineError::Validation(e.to_string()))?;
        let id = parse_id(&payload.external_id)?;
        check_amount(payload.amount)?;

        let mapped = payload.mapped_status();
        if mapped.is_none() {
            warn!(
                donation = %id,
                status = %payload.status,
                "unrecognized partner status, keeping current status"
            );
        }

        let receipt = payload.receipt().map(str::to_string);
        let mut note = format!("Payment partner reported status '{}'", payload.status);
        if let Some(receipt) = &receipt {
            note.push_str(&format!(", receipt {receipt}"));
        }
        if let Some(date) = &payload.donation_date {
            note.push_str(&format!(", donation date {date}"));
        }

        self.transition(Source::Webhook, &id, |donation| {
            Ok(Step {
                to: mapped.unwrap_or(donation.status),
                amount: payload.amount,
                transaction_id: receipt.clone(),
                note: Some(note.clone()),
                credit: true,
            })
        })
        .await
    }

    /// Read, plan, write with a version check, settle the aggregate.
    ///
    /// `prepare` runs against every fresh read, so authorization decisions
    /// always see the record that is about to be replaced. On a version
    /// conflict the whole cycle restarts, up to `max_attempts` times.
    async fn transition(
        &self,
        source: Source,
        id: &DonationId,
        prepare: impl Fn(&Donation) -> Result<Step, EngineError>,
    ) -> Result<Applied, EngineError> {
        for attempt in 1..=self.config.max_attempts {
            let donation = self
                .ledger
                .get(id)
                .await?
                .ok_or_else(|| EngineError::NotFound(id.clone()))?;
            let step = prepare(&donation)?;

            let now = self.clock.now();
            let plan = Transition::plan(&donation, step.to, step.amount, now)
                .map_err(|e| EngineError::Validation(e.to_string()))?;
            let update = DonationUpdate {
                status: Some(plan.to),
                amount: plan.amount_changed().then_some(plan.amount),
                transaction_id: step.transaction_id,
                confirmed_at: plan.confirmed_at,
                note: compose_note(&plan, step.note),
                updated_at: Some(now),
            };

            let written = match self.ledger.update(id, donation.version, update).await {
                Ok(written) => written,
                Err(StoreError::VersionConflict {
                    expected, actual, ..
                }) => {
                    debug!(
                        donation = %id,
                        attempt,
                        expected,
                        actual,
                        "donation changed since read, retrying"
                    );
                    continue;
                }
                Err(StoreError::NotFound(id)) => return Err(EngineError::NotFound(id)),
                Err(e) => return Err(e.into()),
            };

            let credited = if step.credit {
                self.settle(&written.owner, plan.delta, id).await?
            } else {
                Amount::ZERO
            };
            self.record_audit(source, &written, plan.from, credited).await;

            return Ok(Applied {
                donation: written,
                from: plan.from,
                credited,
            });
        }

        Err(EngineError::Conflict(id.clone()))
    }

    /// Bring the owner's aggregate in line with a written transition.
    ///
    /// Anonymous owners never reach the aggregate store.
    async fn settle(
        &self,
        owner: &Owner,
        delta: Amount,
        donation: &DonationId,
    ) -> Result<Amount, EngineError> {
        let Some(user) = owner.user() else {
            return Ok(Amount::ZERO);
        };

        let result = match self.config.aggregate_mode {
            AggregateMode::Incremental => self.apply_delta(user, delta).await,
            AggregateMode::Recompute => self.recompute(user).await.map(drop),
        };

        if let Err(e) = result {
            // the ledger write already happened; reconcile_user repairs this
            error!(
                donation = %donation,
                user = %user,
                delta = %delta,
                error = %e,
                "donation written but aggregate update failed"
            );
            return Err(e.into());
        }
        Ok(delta)
    }

    async fn apply_delta(&self, user: &UserId, delta: Amount) -> Result<(), StoreError> {
        match delta.cmp(&Amount::ZERO) {
            Ordering::Greater => self.aggregates.increment_total(user, delta).await,
            Ordering::Less => {
                let debit = delta
                    .checked_abs()
                    .ok_or_else(|| StoreError::Overflow(user.clone()))?;
                self.aggregates.decrement_total(user, debit).await
            }
            Ordering::Equal => Ok(()),
        }
    }

    async fn recompute(&self, user: &UserId) -> Result<Amount, StoreError> {
        let donations = self.ledger.list_by_user(user).await?;
        let total = Amount::checked_sum(donations.iter().map(Donation::completed_amount))
            .ok_or_else(|| StoreError::Overflow(user.clone()))?;
        self.aggregates.set_total(user, total).await?;
        Ok(total)
    }

    fn caller(&self, token: Option<&str>) -> Option<Identity> {
        let token = token.map(str::trim).filter(|t| !t.is_empty())?;
        let token = token.strip_prefix("Bearer ").unwrap_or(token);
        self.tokens.verify(token)
    }

    fn authorize_admin(
        &self,
        token: Option<&str>,
        action: AdminAction,
    ) -> Result<Identity, EngineError> {
        let identity = self.caller(token).ok_or(EngineError::Unauthorized)?;
        if !self.admins.permits(&identity, action) {
            warn!(user = %identity.user, ?action, "admin action denied");
            return Err(EngineError::Unauthorized);
        }
        Ok(identity)
    }

    fn check_webhook_secret(&self, secret: Option<&str>) -> Result<(), EngineError> {
        if webhook::secret_matches(&self.config.webhook_secret, secret) {
            Ok(())
        } else {
            Err(EngineError::Unauthorized)
        }
    }

    /// Limiter failures let the request through.
    async fn check_rate(
        &self,
        caller: Option<&Identity>,
        donation: &DonationId,
    ) -> Result<(), EngineError> {
        let key = match caller {
            Some(identity) => format!("user:{}", identity.user),
            None => format!("donation:{donation}"),
        };

        match self.limiter.allow(&key).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(EngineError::RateLimited),
            Err(e) => {
                warn!(key = %key, error = %e, "rate limiter failed, allowing request");
                Ok(())
            }
        }
    }

    async fn record_audit(
        &self,
        source: Source,
        donation: &Donation,
        from: DonationStatus,
        credited: Amount,
    ) {
        let event = AuditEvent {
            at: self.clock.now(),
            source,
            donation: donation.id.clone(),
            owner: donation.owner.clone(),
            from,
            to: donation.status,
            credited,
        };
        if let Err(e) = self.audit.record(event).await {
            warn!(donation = %donation.id, error = %e, "audit event dropped");
        }
    }
}

fn parse_id(raw: &str) -> Result<DonationId, EngineError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(EngineError::Validation("donation id is required".to_string()));
    }
    Ok(DonationId::new(raw))
}

fn check_amount(amount: Option<Amount>) -> Result<(), EngineError> {
    match amount {
        Some(amount) if !amount.is_positive() => Err(EngineError::Validation(format!(
            "amount must be positive, got {amount}"
        ))),
        Some(amount) if amount > Amount::MAX_DONATION => Err(EngineError::Validation(format!(
            "amount must be at most {}, got {amount}",
            Amount::MAX_DONATION
        ))),
        _ => Ok(()),
    }
}

/// Entry point note plus a line for any amount correction.
fn compose_note(plan: &Transition, note: Option<String>) -> Option<String> {
    let correction = plan.amount_changed().then(|| {
        format!(
            "Amount corrected from {} to {}",
            plan.previous_amount, plan.amount
        )
    });
    match (note, correction) {
        (Some(note), Some(correction)) => Some(format!("{note}\n{correction}")),
        (note, None) => note,
        (None, correction) => correction,
    }
}

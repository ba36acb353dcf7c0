use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use donation_ledger::auth::StaticTokens;
use donation_ledger::engine::{AdminOverrideRequest, ConfirmRequest};
use donation_ledger::limit::Unlimited;
use donation_ledger::webhook::WebhookPayload;
use donation_ledger::{Amount, Command, Config, Engine, NewDonation, Owner};
use tokio::runtime::Runtime;

const SECRET: &str = "bench-secret";

/// Generates command sequences for benchmarking.
///
/// Pattern per donation (repeating over users):
/// 1. Donate 100
/// 2. Confirm by the owner
/// 3. Webhook reports completed (no-op delta)
/// 4. Every `cancel_every`th donation is cancelled by an admin
pub struct CommandGenerator {
    num_users: u32,
    donations_per_user: u32,
    cancel_every: u32,
    next_donation: u32,
    pending: Vec<Command>,
}

impl CommandGenerator {
    pub fn new(num_users: u32, donations_per_user: u32, cancel_every: u32) -> Self {
        Self {
            num_users,
            donations_per_user,
            cancel_every,
            next_donation: 0,
            pending: Vec::new(),
        }
    }

    /// Total number of donations this generator will produce
    pub fn total_donations(&self) -> u32 {
        self.num_users * self.donations_per_user
    }

    fn commands_for(&self, n: u32) -> Vec<Command> {
        let id = format!("d{n}");
        let user = format!("u{}", n % self.num_users);

        let mut commands = vec![
            Command::Donate(NewDonation::pending(
                id.clone(),
                Owner::from_raw(user.clone()),
                Amount::from_units(100),
            )),
            Command::Confirm(ConfirmRequest {
                donation_id: id.clone(),
                amount: None,
                token: Some(format!("tok-{user}")),
            }),
            Command::Webhook {
                secret: Some(SECRET.to_string()),
                payload: WebhookPayload {
                    external_id: id.clone(),
                    status: "completed".to_string(),
                    amount: None,
                    receipt_number: Some(format!("R-{n}")),
                    donation_date: None,
                },
            },
        ];
        if self.cancel_every > 0 && n % self.cancel_every == 0 {
            commands.push(Command::AdminOverride(AdminOverrideRequest {
                donation_id: id,
                status: "CANCELLED".to_string(),
                reason: Some("bench".to_string()),
                amount: None,
                token: Some("tok-admin".to_string()),
            }));
        }
        // popped from the back
        commands.reverse();
        commands
    }
}

impl Iterator for CommandGenerator {
    type Item = Command;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(command) = self.pending.pop() {
            return Some(command);
        }
        if self.next_donation >= self.total_donations() {
            return None;
        }

        self.pending = self.commands_for(self.next_donation);
        self.next_donation += 1;
        self.pending.pop()
    }
}

fn engine(num_users: u32) -> Engine {
    let mut tokens = StaticTokens::new().with("tok-admin", "root", "admin@example.org");
    for u in 0..num_users {
        tokens = tokens.with(format!("tok-u{u}"), format!("u{u}"), format!("u{u}@example.org"));
    }

    let config = Config {
        webhook_secret: SECRET.to_string(),
        admin_emails: vec!["admin@example.org".to_string()],
        ..Config::default()
    };
    Engine::new(config)
        .with_tokens(Arc::new(tokens))
        .with_limiter(Arc::new(Unlimited))
}

fn bench_sequential(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let mut group = c.benchmark_group("sequential");

    for count in [1_000u32, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.to_async(&runtime).iter(|| async move {
                let engine = engine(10);
                for command in CommandGenerator::new(10, count / 10, 0) {
                    let _ = black_box(engine.execute(command).await);
                }
                engine
            });
        });
    }

    group.finish();
}

fn bench_with_reversals(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let mut group = c.benchmark_group("with_reversals");

    // every tenth donation cancelled after completion
    group.bench_function("10k_cancel_10pct", |b| {
        b.to_async(&runtime).iter(|| async {
            let engine = engine(100);
            engine
                .run(tokio_stream::iter(CommandGenerator::new(100, 100, 10)))
                .await;
            engine
        });
    });

    group.finish();
}

fn bench_concurrent(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let mut group = c.benchmark_group("concurrent");
    group.sample_size(10);

    // one task per user, all sharing the engine
    for users in [4u32, 32] {
        group.bench_with_input(BenchmarkId::from_parameter(users), &users, |b, &users| {
            b.to_async(&runtime).iter(|| async move {
                let engine = Arc::new(engine(users));
                let mut tasks = Vec::new();
                for u in 0..users {
                    let engine = engine.clone();
                    tasks.push(tokio::spawn(async move {
                        for n in 0..500 {
                            let id = format!("u{u}-d{n}");
                            let new = NewDonation::pending(
                                id.clone(),
                                Owner::from_raw(format!("u{u}")),
                                Amount::from_units(10),
                            );
                            let _ = engine.create_donation(new).await;
                            let _ = engine
                                .confirm(ConfirmRequest {
                                    donation_id: id,
                                    amount: None,
                                    token: Some(format!("tok-u{u}")),
                                })
                                .await;
                        }
                    }));
                }
                for task in tasks {
                    let _ = task.await;
                }
                engine
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_sequential,
    bench_with_reversals,
    bench_concurrent,
);

criterion_main!(benches);

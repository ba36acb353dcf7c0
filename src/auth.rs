//! Caller identification and admin authorization.

use std::collections::{HashMap, HashSet};
use std::io;

use serde::Deserialize;

use crate::model::{Identity, UserId};

/// Resolves a bearer token into the caller's identity.
///
/// Token construction is not this crate's concern; `None` means the token is
/// unknown, expired or otherwise unusable and the caller is treated as
/// unauthenticated.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Option<Identity>;
}

/// Privileged actions guarded by an [`AdminPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdminAction {
    OverrideDonationStatus,
    ReconcileUser,
}

/// Decides whether an identity may perform an admin action.
pub trait AdminPolicy: Send + Sync {
    fn permits(&self, identity: &Identity, action: AdminAction) -> bool;
}

/// Grants every admin action to a configured set of emails.
#[derive(Debug, Clone, Default)]
pub struct EmailAllowlist {
    emails: HashSet<String>,
}

impl EmailAllowlist {
    pub fn new<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            emails: emails
                .into_iter()
                .map(|e| e.as_ref().trim().to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }
}

impl AdminPolicy for EmailAllowlist {
    fn permits(&self, identity: &Identity, _action: AdminAction) -> bool {
        self.emails.contains(&identity.email.to_ascii_lowercase())
    }
}

/// Fixed token table, typically loaded from a csv file.
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: HashMap<String, Identity>,
}

#[derive(Debug, Deserialize)]
struct TokenRow {
    token: String,
    user: String,
    email: String,
}

impl StaticTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        token: impl Into<String>,
        user: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        self.tokens.insert(
            token.into(),
            Identity {
                user: UserId::new(user),
                email: email.into(),
            },
        );
        self
    }

    /// Read `token,user,email` rows.
    pub fn from_reader(reader: impl io::Read) -> Result<Self, csv::Error> {
        let mut tokens = HashMap::new();
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        for row in reader.deserialize::<TokenRow>() {
            let row = row?;
            tokens.insert(
                row.token,
                Identity {
                    user: UserId::new(row.user),
                    email: row.email,
                },
            );
        }
        Ok(Self { tokens })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl TokenVerifier for StaticTokens {
    fn verify(&self, token: &str) -> Option<Identity> {
        self.tokens.get(token).cloned()
    }
}

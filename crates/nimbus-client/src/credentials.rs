//! Session credentials

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::logging::REDACTED;

/// Token plus owning account, immutable for the life of a session
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credentials {
    token: String,
    account: Option<String>,
}

/// Opaque identity of a credentials pair, safe to use as a cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CredentialsId(u64);

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            account: None,
        }
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    pub fn identity(&self) -> CredentialsId {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        CredentialsId(hasher.finish())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &REDACTED)
            .field("account", &self.account)
            .finish()
    }
}

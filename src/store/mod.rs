//! Tiered subscriber state.
//!
//! [`SubscriberStore`] keeps the subscriber set and every subscriber's watch
//! terms across three [`Tier`]s, in priority order:
//!
//! | Tier | Backend | Role |
//! |------|---------|------|
//! | Primary | [`RedisTier`](redis::RedisTier) | fast, authoritative when reachable |
//! | Secondary | [`EdgeConfigTier`](edge_config::EdgeConfigTier) | remote config, used when Primary fails |
//! | Local | [`MemoryTier`](memory::MemoryTier) | in-process, volatile |
//!
//! # Reads
//!
//! Primary, then Secondary, then Local; the first non-empty answer wins. An
//! answer from a remote tier is copied into Local. When every tier is empty
//! the empty answer is returned.
//!
//! # Writes
//!
//! Primary is attempted first and Secondary only if Primary failed. Local is
//! always mirrored afterwards, whatever the remote outcome, so a later read
//! in the same process never falls below what was written.
//!
//! No operation returns a storage error. Tier failures are logged and
//! degrade to the next tier. Concurrent writers to the same subscriber are
//! last-writer-wins.

pub mod edge_config;
pub mod memory;
pub mod redis;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::error::{InvalidEmail, TierError};

use self::edge_config::EdgeConfigTier;
use self::memory::MemoryTier;
use self::redis::RedisTier;

/// One backend in the store's fallback chain.
///
/// `Ok(None)` and `Ok(Some(empty))` both mean "nothing here" to the store;
/// errors mean the tier could not answer.
#[async_trait]
pub trait Tier: Send + Sync {
    fn name(&self) -> &str;

    async fn load_subscribers(&self) -> Result<Option<BTreeSet<String>>, TierError>;

    async fn store_subscribers(&self, subscribers: &BTreeSet<String>) -> Result<(), TierError>;

    /// Load the term list stored under a [`terms_key`].
    async fn load_terms(&self, key: &str) -> Result<Option<Vec<String>>, TierError>;

    async fn store_terms(&self, key: &str, terms: &[String]) -> Result<(), TierError>;
}

#[async_trait]
impl<T: Tier + ?Sized> Tier for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn load_subscribers(&self) -> Result<Option<BTreeSet<String>>, TierError> {
        (**self).load_subscribers().await
    }

    async fn store_subscribers(&self, subscribers: &BTreeSet<String>) -> Result<(), TierError> {
        (**self).store_subscribers(subscribers).await
    }

    async fn load_terms(&self, key: &str) -> Result<Option<Vec<String>>, TierError> {
        (**self).load_terms(key).await
    }

    async fn store_terms(&self, key: &str, terms: &[String]) -> Result<(), TierError> {
        (**self).store_terms(key, terms).await
    }
}

/// Stand-in for an unconfigured remote tier. Every call is `Unavailable`.
pub struct DisabledTier {
    name: &'static str,
}

impl DisabledTier {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }

    fn unavailable(&self) -> TierError {
        TierError::Unavailable(format!("{} tier not configured", self.name))
    }
}

#[async_trait]
impl Tier for DisabledTier {
    fn name(&self) -> &str {
        self.name
    }

    async fn load_subscribers(&self) -> Result<Option<BTreeSet<String>>, TierError> {
        Err(self.unavailable())
    }

    async fn store_subscribers(&self, _subscribers: &BTreeSet<String>) -> Result<(), TierError> {
        Err(self.unavailable())
    }

    async fn load_terms(&self, _key: &str) -> Result<Option<Vec<String>>, TierError> {
        Err(self.unavailable())
    }

    async fn store_terms(&self, _key: &str, _terms: &[String]) -> Result<(), TierError> {
        Err(self.unavailable())
    }
}

/// Trim and lowercase an email address.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Syntactic email check: one `@`, a non-empty local part, a dotted domain,
/// no whitespace.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
        && !domain.ends_with('.')
}

/// Storage key for a subscriber's term list: `terms_<hex sha-256>` of the
/// normalized address. Only `[a-z0-9_]`, so it is valid for every tier.
pub fn terms_key(email: &str) -> String {
    let digest = Sha256::digest(normalize_email(email).as_bytes());
    format!("terms_{}", hex::encode(digest))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Registered,
    AlreadyRegistered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unregistration {
    Removed,
    NotFound,
}

pub struct SubscriberStore {
    primary: Box<dyn Tier>,
    secondary: Box<dyn Tier>,
    local: Arc<MemoryTier>,
}

impl SubscriberStore {
    pub fn new(primary: Box<dyn Tier>, secondary: Box<dyn Tier>, local: Arc<MemoryTier>) -> Self {
        Self {
            primary,
            secondary,
            local,
        }
    }

    /// Build the tier chain from configuration. Unconfigured or invalid
    /// remote tiers become [`DisabledTier`]s.
    pub fn from_config(config: &StorageConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);

        let primary: Box<dyn Tier> = match config.resolved_redis_url() {
            Some(url) => match RedisTier::open(&url, timeout) {
                Ok(tier) => Box::new(tier),
                Err(e) => {
                    warn!(error = %e, "invalid redis URL, primary tier disabled");
                    Box::new(DisabledTier::new("redis"))
                }
            },
            None => Box::new(DisabledTier::new("redis")),
        };

        let secondary: Box<dyn Tier> = match EdgeConfigTier::from_config(config) {
            Ok(Some(tier)) => Box::new(tier),
            Ok(None) => Box::new(DisabledTier::new("edge-config")),
            Err(e) => {
                warn!(error = %e, "edge config client unavailable, secondary tier disabled");
                Box::new(DisabledTier::new("edge-config"))
            }
        };

        info!(
            primary = primary.name(),
            secondary = secondary.name(),
            "subscriber store ready"
        );
        Self::new(primary, secondary, Arc::new(MemoryTier::new()))
    }

    /// The Local tier, for inspection.
    pub fn local(&self) -> &MemoryTier {
        &self.local
    }

    fn remotes(&self) -> [&dyn Tier; 2] {
        [self.primary.as_ref(), self.secondary.as_ref()]
    }

    pub async fn get_subscribers(&self) -> BTreeSet<String> {
        for tier in self.remotes() {
            match tier.load_subscribers().await {
                Ok(Some(set)) if !set.is_empty() => {
                    debug!(tier = tier.name(), count = set.len(), "subscribers loaded");
                    if let Err(e) = self.local.store_subscribers(&set).await {
                        warn!(error = %e, "failed to refresh local subscribers");
                    }
                    return set;
                }
                Ok(_) => debug!(tier = tier.name(), "no subscribers in tier"),
                Err(e) => warn!(tier = tier.name(), error = %e, "subscriber read failed"),
            }
        }
        self.local.subscribers()
    }

    /// Always returns `true`: Local is mirrored even when both remote tiers
    /// failed. Not a durability signal.
    pub async fn save_subscribers(&self, subscribers: &BTreeSet<String>) -> bool {
        for tier in self.remotes() {
            match tier.store_subscribers(subscribers).await {
                Ok(()) => {
                    debug!(tier = tier.name(), count = subscribers.len(), "subscribers saved");
                    break;
                }
                Err(e) => warn!(tier = tier.name(), error = %e, "subscriber write failed"),
            }
        }
        if let Err(e) = self.local.store_subscribers(subscribers).await {
            warn!(error = %e, "local subscriber mirror failed");
        }
        true
    }

    pub async fn get_terms(&self, email: &str) -> Vec<String> {
        let key = terms_key(email);
        for tier in self.remotes() {
            match tier.load_terms(&key).await {
                Ok(Some(terms)) if !terms.is_empty() => {
                    debug!(tier = tier.name(), count = terms.len(), "terms loaded");
                    if let Err(e) = self.local.store_terms(&key, &terms).await {
                        warn!(error = %e, "failed to refresh local terms");
                    }
                    return terms;
                }
                Ok(_) => debug!(tier = tier.name(), "no terms in tier"),
                Err(e) => warn!(tier = tier.name(), error = %e, "terms read failed"),
            }
        }
        self.local.terms(&key).unwrap_or_default()
    }

    /// Always returns `true`, like [`save_subscribers`](Self::save_subscribers).
    pub async fn save_terms(&self, email: &str, terms: &[String]) -> bool {
        let key = terms_key(email);
        for tier in self.remotes() {
            match tier.store_terms(&key, terms).await {
                Ok(()) => {
                    debug!(tier = tier.name(), count = terms.len(), "terms saved");
                    break;
                }
                Err(e) => warn!(tier = tier.name(), error = %e, "terms write failed"),
            }
        }
        if let Err(e) = self.local.store_terms(&key, terms).await {
            warn!(error = %e, "local terms mirror failed");
        }
        true
    }

    /// Append `term` unless an identical term is already present. Returns
    /// whether the list changed.
    pub async fn add_term(&self, email: &str, term: &str) -> bool {
        let term = term.trim();
        if term.is_empty() {
            return false;
        }
        let mut terms = self.get_terms(email).await;
        if terms.iter().any(|t| t == term) {
            return false;
        }
        terms.push(term.to_string());
        self.save_terms(email, &terms).await
    }

    /// Remove `term` if present. Returns whether the list changed.
    pub async fn remove_term(&self, email: &str, term: &str) -> bool {
        let term = term.trim();
        let mut terms = self.get_terms(email).await;
        let before = terms.len();
        terms.retain(|t| t != term);
        if terms.len() == before {
            return false;
        }
        self.save_terms(email, &terms).await
    }

    pub async fn register(&self, email: &str) -> Result<Registration, InvalidEmail> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(InvalidEmail(email));
        }
        let mut subscribers = self.get_subscribers().await;
        if !subscribers.insert(email.clone()) {
            return Ok(Registration::AlreadyRegistered);
        }
        self.save_subscribers(&subscribers).await;
        info!(email = %email, "subscriber registered");
        Ok(Registration::Registered)
    }

    /// Remove the subscriber and clear its term list.
    pub async fn unregister(&self, email: &str) -> Unregistration {
        let email = normalize_email(email);
        let mut subscribers = self.get_subscribers().await;
        if !subscribers.remove(&email) {
            return Unregistration::NotFound;
        }
        self.save_subscribers(&subscribers).await;
        self.save_terms(&email, &[]).await;
        info!(email = %email, "subscriber removed");
        Unregistration::Removed
    }

    /// Every subscriber mapped to its term list.
    pub async fn all_terms(&self) -> BTreeMap<String, Vec<String>> {
        let mut all = BTreeMap::new();
        for email in self.get_subscribers().await {
            let terms = self.get_terms(&email).await;
            all.insert(email, terms);
        }
        all
    }
}

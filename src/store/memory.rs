//! In-process [`Tier`] used as the Local fallback.
//!
//! Volatile: empty on every process start. Uses `BTreeSet` and `HashMap`
//! behind `std::sync::RwLock`. Also serves as a test double for the remote
//! tiers.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::TierError;

use super::Tier;

pub struct MemoryTier {
    name: &'static str,
    subscribers: RwLock<BTreeSet<String>>,
    terms: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::named("local")
    }

    /// A memory tier reporting a different name in logs.
    pub fn named(name: &'static str) -> Self {
        Self {
            name,
            subscribers: RwLock::new(BTreeSet::new()),
            terms: RwLock::new(HashMap::new()),
        }
    }

    /// Current subscriber set.
    pub fn subscribers(&self) -> BTreeSet<String> {
        self.subscribers
            .read()
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    /// Current term list stored under `key`, if any.
    pub fn terms(&self, key: &str) -> Option<Vec<String>> {
        self.terms
            .read()
            .ok()
            .and_then(|map| map.get(key).cloned())
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> TierError {
    TierError::Backend("memory tier lock poisoned".to_string())
}

#[async_trait]
impl Tier for MemoryTier {
    fn name(&self) -> &str {
        self.name
    }

    async fn load_subscribers(&self) -> Result<Option<BTreeSet<String>>, TierError> {
        let set = self.subscribers.read().map_err(poisoned)?;
        Ok(Some(set.clone()))
    }

    async fn store_subscribers(&self, subscribers: &BTreeSet<String>) -> Result<(), TierError> {
        let mut set = self.subscribers.write().map_err(poisoned)?;
        *set = subscribers.clone();
        Ok(())
    }

    async fn load_terms(&self, key: &str) -> Result<Option<Vec<String>>, TierError> {
        let map = self.terms.read().map_err(poisoned)?;
        Ok(map.get(key).cloned())
    }

    async fn store_terms(&self, key: &str, terms: &[String]) -> Result<(), TierError> {
        let mut map = self.terms.write().map_err(poisoned)?;
        if terms.is_empty() {
            map.remove(key);
        } else {
            map.insert(key.to_string(), terms.to_vec());
        }
        Ok(())
    }
}

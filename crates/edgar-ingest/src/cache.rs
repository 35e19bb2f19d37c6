//! In-memory known-state caches for facts, fact labels and units.
//!
//! Many worker tasks processing different companies observe the same fact
//! or unit name "for the first time" simultaneously. The caches gate row
//! creation behind a single-flight group per key, so exactly one task runs
//! the store insert and everyone else reuses its result.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use edgar_core::{EdgarError, Result};
use tokio::sync::{Mutex, RwLock};

use crate::singleflight::Group;

/// One fact known to the current pass: its id and the label pairs already
/// persisted for it.
#[derive(Debug)]
pub struct KnownFact {
    /// Surrogate id of the fact.
    pub id: u32,
    /// Label hash observed when the fact entered the cache.
    pub label_hash: u64,
    /// Description hash observed when the fact entered the cache.
    pub descr_hash: u64,

    more_labels: Mutex<HashSet<(u64, u64)>>,
}

impl KnownFact {
    fn new(id: u32, label_hash: u64, descr_hash: u64) -> Self {
        Self {
            id,
            label_hash,
            descr_hash,
            more_labels: Mutex::new(HashSet::new()),
        }
    }

    /// Records a label pair, running `record` (a store insert) only for
    /// pairs not seen before on this fact. The callback runs while the
    /// entry's lock is held, so label insertion is serialized per fact.
    /// When `record` fails the pair is not remembered.
    pub async fn add_label<F, Fut>(&self, label_hash: u64, descr_hash: u64, record: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if self.label_hash == label_hash && self.descr_hash == descr_hash {
            return Ok(());
        }

        let mut more = self.more_labels.lock().await;
        if more.contains(&(label_hash, descr_hash)) {
            return Ok(());
        }
        record().await?;
        more.insert((label_hash, descr_hash));
        Ok(())
    }

    /// Remembers a label pair without persisting it. Used when hydrating
    /// the cache from rows that already exist.
    pub async fn add_more_label(&self, label_hash: u64, descr_hash: u64) {
        self.more_labels
            .lock()
            .await
            .insert((label_hash, descr_hash));
    }

    #[cfg(test)]
    async fn more_labels(&self) -> HashSet<(u64, u64)> {
        self.more_labels.lock().await.clone()
    }
}

/// Cache of facts keyed by `"tax:name"`.
pub struct FactsCache {
    known: Arc<RwLock<HashMap<String, Arc<KnownFact>>>>,
    group: Group<Arc<KnownFact>>,
}

impl Default for FactsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FactsCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            known: Arc::new(RwLock::new(HashMap::new())),
            group: Group::new(),
        }
    }

    /// Looks up a fact by key.
    pub async fn get(&self, key: &str) -> Option<Arc<KnownFact>> {
        self.known.read().await.get(key).cloned()
    }

    /// Number of cached facts.
    pub async fn len(&self) -> usize {
        self.known.read().await.len()
    }

    /// True when nothing is cached.
    pub async fn is_empty(&self) -> bool {
        self.known.read().await.is_empty()
    }

    /// Creates the fact for `key`, gated by a single-flight call per key:
    /// the first caller runs `generate` (the store insert returning the new
    /// id) and installs the entry; concurrent callers for the same key
    /// observe the first caller's entry or error.
    pub async fn create<F, Fut>(
        &self,
        key: &str,
        label_hash: u64,
        descr_hash: u64,
        generate: F,
    ) -> Result<Arc<KnownFact>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<u32>> + Send + 'static,
    {
        let known = Arc::clone(&self.known);
        let owned_key = key.to_string();
        let flight = async move {
            if let Some(fact) = known.read().await.get(&owned_key).cloned() {
                return Ok(fact);
            }
            let id = generate().await?;
            let fact = Arc::new(KnownFact::new(id, label_hash, descr_hash));
            known.write().await.insert(owned_key, Arc::clone(&fact));
            Ok(fact)
        };

        self.group.run(key, flight).await.map_err(EdgarError::Shared)
    }

    /// Hydrates the cache with a persisted fact/label pair. Returns true
    /// when the key was new; otherwise the pair joins the entry's known
    /// label set.
    pub async fn preload(&self, id: u32, key: &str, label_hash: u64, descr_hash: u64) -> bool {
        let existing = {
            let mut known = self.known.write().await;
            match known.get(key) {
                Some(fact) => Some(Arc::clone(fact)),
                None => {
                    known.insert(
                        key.to_string(),
                        Arc::new(KnownFact::new(id, label_hash, descr_hash)),
                    );
                    None
                }
            }
        };

        match existing {
            None => true,
            Some(fact) => {
                fact.add_more_label(label_hash, descr_hash).await;
                false
            }
        }
    }
}

/// Cache of unit ids keyed by unit name.
pub struct UnitsCache {
    units: Arc<RwLock<HashMap<String, u32>>>,
    group: Group<u32>,
}

impl Default for UnitsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitsCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            units: Arc::new(RwLock::new(HashMap::new())),
            group: Group::new(),
        }
    }

    /// Number of cached units.
    pub async fn len(&self) -> usize {
        self.units.read().await.len()
    }

    /// True when nothing is cached.
    pub async fn is_empty(&self) -> bool {
        self.units.read().await.is_empty()
    }

    /// Returns the cached id for `name` or, via single-flight, runs
    /// `generate` and installs its result.
    pub async fn id<F, Fut>(&self, name: &str, generate: F) -> Result<u32>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<u32>> + Send + 'static,
    {
        if let Some(id) = self.units.read().await.get(name).copied() {
            return Ok(id);
        }

        let units = Arc::clone(&self.units);
        let owned_name = name.to_string();
        let flight = async move {
            if let Some(id) = units.read().await.get(&owned_name).copied() {
                return Ok(id);
            }
            let id = generate().await?;
            units.write().await.insert(owned_name, id);
            Ok(id)
        };

        self.group.run(name, flight).await.map_err(EdgarError::Shared)
    }

    /// Hydrates the cache with a persisted unit.
    pub async fn preload(&self, id: u32, name: &str) {
        self.units.write().await.insert(name.to_string(), id);
    }
}

//! In-memory read-through flag cache.
//!
//! Owned by the engine instance, never module-level, so multiple
//! engines (tests, multi-tenant) do not share hidden state. Entries are
//! replaced wholesale behind `Arc`s; a concurrent reader either sees
//! the old entry or the new one, never a half-written mix.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::models::{FlagDefinition, FlagOverride};

/// A cached definition with its overrides and a freshness stamp.
#[derive(Debug, Clone)]
pub struct CachedFlag {
    pub definition: FlagDefinition,
    pub overrides: Vec<FlagOverride>,
    pub cached_at: DateTime<Utc>,
}

/// Flags grouped by category, for listing endpoints.
pub type CategoryListing = HashMap<String, Vec<FlagDefinition>>;

const UNCATEGORIZED: &str = "uncategorized";

/// Cache keyed by flag key, plus a one-slot category listing cache.
#[derive(Default)]
pub struct FlagCache {
    entries: RwLock<HashMap<String, Arc<CachedFlag>>>,
    listing: RwLock<Option<Arc<CategoryListing>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl FlagCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Arc<CachedFlag>> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match entries.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Populates the entry for `key`, replacing any existing one.
    pub fn put(&self, definition: FlagDefinition, overrides: Vec<FlagOverride>) -> Arc<CachedFlag> {
        let entry = Arc::new(CachedFlag {
            definition,
            overrides,
            cached_at: Utc::now(),
        });
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(entry.definition.key.clone(), entry.clone());
        entry
    }

    /// Removes the entry for `key`. Part of every mutation's commit:
    /// the write call must not return success before this ran.
    pub fn invalidate(&self, key: &str) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.remove(key);
    }

    pub fn listing(&self) -> Option<Arc<CategoryListing>> {
        match self.listing.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn put_listing(&self, flags: Vec<FlagDefinition>) -> Arc<CategoryListing> {
        let mut grouped: CategoryListing = HashMap::new();
        for flag in flags {
            let category = flag
                .category
                .clone()
                .unwrap_or_else(|| UNCATEGORIZED.to_string());
            grouped.entry(category).or_default().push(flag);
        }
        let listing = Arc::new(grouped);
        let mut slot = match self.listing.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(listing.clone());
        listing
    }

    /// Dropped on any create/archive, which change category membership.
    pub fn invalidate_listing(&self) {
        let mut slot = match self.listing.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = None;
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Fraction of lookups served from cache; 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hit_count() as f64;
        let total = hits + self.miss_count() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }
}

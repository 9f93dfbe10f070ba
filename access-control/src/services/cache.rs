//! Per-process ability cache.
//!
//! Entries are keyed by everything the builder reads from a principal, so two
//! principals only share an ability when they would build the same one.

use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::models::{Ability, Principal};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AbilityKey {
    pub user_id: String,
    pub tenant_id: Option<String>,
    pub roles: Vec<String>,
}

impl AbilityKey {
    pub fn for_principal(principal: &Principal) -> Self {
        Self {
            user_id: principal.id.clone(),
            tenant_id: principal.tenant_id.clone(),
            roles: principal.roles.clone(),
        }
    }
}

/// Entry count above which inserts first sweep out expired entries.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

struct CachedAbility {
    ability: Arc<Ability>,
    expires_at: Instant,
}

#[derive(Clone)]
pub struct AbilityCache {
    entries: Arc<DashMap<AbilityKey, CachedAbility>>,
    ttl: Duration,
    max_entries: usize,
}

impl AbilityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached ability for `principal`, building it with `build`
    /// when missing or expired.
    pub fn get_or_build<F>(&self, principal: &Principal, build: F) -> Arc<Ability>
    where
        F: FnOnce(&Principal) -> Ability,
    {
        if !self.is_enabled() {
            return Arc::new(build(principal));
        }

        let key = AbilityKey::for_principal(principal);
        let now = Instant::now();
        if let Some(entry) = self.entries.get(&key) {
            if entry.expires_at > now {
                return entry.ability.clone();
            }
        }

        let ability = Arc::new(build(principal));
        if self.entries.len() >= self.max_entries {
            self.purge_expired();
        }
        self.entries.insert(
            key,
            CachedAbility {
                ability: ability.clone(),
                expires_at: now + self.ttl,
            },
        );
        metrics::gauge!("authz_ability_cache_entries").set(self.entries.len() as f64);
        ability
    }

    /// Drop every entry of one user, e.g. after a role change.
    pub fn invalidate_user(&self, user_id: &str) {
        self.entries.retain(|key, _| key.user_id != user_id);
    }

    pub fn purge_expired(&self) {
        purge(&self.entries);
    }

    /// Sweep expired entries every `every`. The task ends once the last
    /// handle to this cache is dropped.
    pub fn spawn_purge_task(&self, every: Duration) -> JoinHandle<()> {
        let entries: Weak<DashMap<AbilityKey, CachedAbility>> = Arc::downgrade(&self.entries);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let Some(entries) = entries.upgrade() else {
                    break;
                };
                purge(&entries);
                metrics::gauge!("authz_ability_cache_entries").set(entries.len() as f64);
            }
        })
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn purge(entries: &DashMap<AbilityKey, CachedAbility>) {
    let now = Instant::now();
    entries.retain(|_, entry| entry.expires_at > now);
}

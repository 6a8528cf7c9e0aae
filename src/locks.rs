//! Named locks used to serialize mutations of shared parent resources.
//!
//! Several Terraform resource blocks can end up mutating the same object in
//! Azure: two `azurestack_subnet_network_security_group_association` blocks
//! both write to the same virtual network, for instance. Terraform runs those
//! handlers concurrently, so each handler takes a named lock on the shared
//! object before touching it.
//!
//! Locks are keyed by arbitrary strings. Operations on different keys never
//! contend; operations on the same key are mutually exclusive. Keys are created
//! on first use and live as long as the [`LockManager`].
//!
//! ```
//! # async fn example() {
//! use terraform_provider_azurestack::locks::LockManager;
//!
//! let locks = LockManager::new();
//! let _nsg = locks.lock_by_name("web-nsg", "azurestack_network_security_group").await;
//! // ... mutate the network security group ...
//! // the lock is released when `_nsg` goes out of scope
//! # }
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;
use tracing::trace;

/// Registry of named locks.
///
/// Cloning a `LockManager` shares the underlying registry, so a single manager
/// can be handed to every handler. Independent managers never observe each
/// other's locks.
#[derive(Debug, Clone, Default)]
pub struct LockManager {
    registry: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl LockManager {
    /// Create an empty, independent registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting until no other holder has it.
    pub async fn lock(&self, key: impl Into<String>) -> NamedLockGuard {
        let key = key.into();
        let mutex = self.entry(&key);
        trace!(key = %key, "acquiring lock");
        let guard = mutex.lock_owned().await;
        trace!(key = %key, "acquired lock");
        NamedLockGuard { key, _guard: guard }
    }

    /// Acquire the lock for a resource name, namespaced by resource type so
    /// that a subnet and a virtual network both called `default` don't collide.
    pub async fn lock_by_name(&self, name: &str, resource_type: &str) -> NamedLockGuard {
        self.lock(lock_key(name, resource_type)).await
    }

    /// Acquire the locks for several names of one resource type.
    ///
    /// Duplicate names are locked once.
    pub async fn lock_multiple_by_name<I, S>(&self, names: I, resource_type: &str) -> LockSet
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.lock_all(
            names
                .into_iter()
                .map(|name| lock_key(name.as_ref(), resource_type)),
        )
        .await
    }

    /// Acquire every key in a single canonical order.
    ///
    /// Keys are de-duplicated and sorted before being locked, so two callers
    /// that need overlapping sets of keys can't deadlock on each other
    /// regardless of the order they list them in.
    pub async fn lock_all<I, S>(&self, keys: I) -> LockSet
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ordered: BTreeSet<String> = keys.into_iter().map(Into::into).collect();
        let mut guards = Vec::with_capacity(ordered.len());
        for key in ordered {
            guards.push(self.lock(key).await);
        }
        LockSet { guards }
    }

    /// Number of keys that have ever been locked through this registry.
    pub fn len(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no key has been locked yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        // the outer lock is only held for the map lookup, never across an await
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// Build the registry key for a named resource of a given type.
pub fn lock_key(name: &str, resource_type: &str) -> String {
    format!("{resource_type}.{name}")
}

/// A held named lock. Dropping the guard releases the lock.
#[derive(Debug)]
pub struct NamedLockGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl NamedLockGuard {
    /// The key this guard holds.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock now rather than at the end of the scope.
    pub fn unlock(self) {
        trace!(key = %self.key, "releasing lock");
    }
}

/// A group of held locks, acquired in canonical order and released in reverse.
#[derive(Debug, Default)]
pub struct LockSet {
    guards: Vec<NamedLockGuard>,
}

impl LockSet {
    /// The held keys, in acquisition order.
    pub fn keys(&self) -> Vec<&str> {
        self.guards.iter().map(NamedLockGuard::key).collect()
    }

    /// Release every lock in reverse acquisition order.
    pub fn unlock(mut self) {
        while let Some(guard) = self.guards.pop() {
            guard.unlock();
        }
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lease protocol against the coordination store.
//!
//! A service is advertised under one or more TTL bound keys. Every heartbeat rewrites all of them
//! in order, sharing one [`ExistenceGuard`] across keys and cycles: the first write after a
//! failure may create the key, every later write requires it to still be there. A write that
//! fails the guard means the key expired or somebody else displaced it.

use crate::error::UpkeepError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Compare-and-swap precondition of a lease write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExistenceGuard {
    /// The key may or may not exist
    Ignore,
    /// The write must fail unless the key is still present
    Require,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    pub ttl: Duration,
    pub guard: ExistenceGuard,
}

/// Client side of the coordination store.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Writes `value` under `key` with the given TTL and guard. Implementations should give up
    /// once `deadline` passes; callers abandon the call at that point anyway.
    async fn write(
        &self,
        key: &str,
        value: &str,
        opts: WriteOptions,
        deadline: Instant,
    ) -> Result<(), UpkeepError>;
}

/// Value stored under every lease key of a service.
#[derive(Debug, Clone, Serialize)]
pub struct LeaseValue<'a> {
    pub advertise: &'a str,
    pub service: &'a str,
    pub container: &'a str,
}

impl LeaseValue<'_> {
    pub fn to_json(&self) -> Result<String, UpkeepError> {
        serde_json::to_string(self).map_err(|e| UpkeepError::LeaseValue(e.to_string()))
    }
}

/// Result of writing every key of a lease once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepOutcome {
    /// Guard to use for the next write
    pub guard: ExistenceGuard,
    /// Number of keys written before the cycle stopped
    pub written: usize,
    pub result: Result<(), UpkeepError>,
}

/// Key set of one supervised service together with its guard state.
#[derive(Debug, Clone)]
pub struct Lease {
    keys: Arc<[String]>,
    value: Arc<str>,
    ttl: Duration,
    guard: ExistenceGuard,
}

impl Lease {
    pub fn new(keys: Vec<String>, value: String, ttl: Duration) -> Self {
        Self {
            keys: keys.into(),
            value: value.into(),
            ttl,
            guard: ExistenceGuard::Ignore,
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn guard(&self) -> ExistenceGuard {
        self.guard
    }

    /// Drops the existence requirement, so the next write may recreate the keys.
    pub fn relax(&mut self) {
        self.guard = ExistenceGuard::Ignore;
    }

    /// Applies the outcome of a completed write cycle.
    pub fn apply(&mut self, outcome: &KeepOutcome) {
        self.guard = outcome.guard;
    }

    /// Builds the write cycle as a standalone future so it can run detached from the
    /// supervisor; the supervisor only applies its outcome if it arrives in time.
    pub fn keep(
        &self,
        store: Arc<dyn LeaseStore>,
        deadline: Instant,
    ) -> impl std::future::Future<Output = KeepOutcome> + Send + 'static {
        let keys = Arc::clone(&self.keys);
        let value = Arc::clone(&self.value);
        let ttl = self.ttl;
        let start = self.guard;
        async move { keep_keys(store.as_ref(), &keys, &value, ttl, start, deadline).await }
    }
}

/// Writes `keys` in order, promoting the guard after the first success and stopping at the
/// first failure.
pub async fn keep_keys(
    store: &dyn LeaseStore,
    keys: &[String],
    value: &str,
    ttl: Duration,
    start: ExistenceGuard,
    deadline: Instant,
) -> KeepOutcome {
    let mut guard = start;
    let mut written = 0;
    for key in keys {
        let opts = WriteOptions { ttl, guard };
        if let Err(err) = store.write(key, value, opts, deadline).await {
            debug!(%key, %err, "keep");
            return KeepOutcome {
                guard: ExistenceGuard::Ignore,
                written,
                result: Err(err),
            };
        }
        guard = ExistenceGuard::Require;
        written += 1;
    }
    debug!(keys = ?keys, "keep");
    KeepOutcome {
        guard,
        written,
        result: Ok(()),
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// Coordination store kept in process memory.
///
/// Honors TTL expiry and the existence guard, which is all the lease protocol relies on. Useful
/// for single node runs and for exercising supervisors without a real store.
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value stored under `key`, if it has not expired.
    pub fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value.clone())
    }

    /// Removes `key`, as a competing writer or an operator would.
    pub fn remove(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key).map(|e| e.value)
    }

    /// Keys that are currently alive.
    pub fn live_keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, e| e.expires_at > now);
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of entries held, including expired ones not yet pruned.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn write(
        &self,
        key: &str,
        value: &str,
        opts: WriteOptions,
        _deadline: Instant,
    ) -> Result<(), UpkeepError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, e| e.expires_at > now);
        if opts.guard == ExistenceGuard::Require && !entries.contains_key(key) {
            return Err(UpkeepError::LeaseMissing(key.to_string()));
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + opts.ttl,
            },
        );
        Ok(())
    }
}

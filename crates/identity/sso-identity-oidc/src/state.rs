//! Pending login state for CSRF protection.

use crate::client::AuthorizationMaterial;
use crate::error::{OidcError, OidcResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

/// Entries are swept on insert once the map grows past this size.
const DEFAULT_SWEEP_THRESHOLD: usize = 1024;

/// A login that was started but whose callback has not arrived yet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingLogin {
    pub state: String,
    pub material: AuthorizationMaterial,
    pub created_at: DateTime<Utc>,
}

impl PendingLogin {
    pub fn new(state: String, material: AuthorizationMaterial) -> Self {
        Self {
            state,
            material,
            created_at: Utc::now(),
        }
    }

    /// An expiry past the representable range never elapses.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at
            .checked_add_signed(ttl)
            .is_some_and(|deadline| Utc::now() > deadline)
    }
}

/// Storage for pending logins
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Store a pending login. Fails with `DuplicateState` if the state is already live.
    async fn put(&self, pending: PendingLogin) -> OidcResult<()>;

    /// Remove and return a pending login. Expired entries are reported as `StateNotFound`.
    async fn take_and_remove(&self, state: &str) -> OidcResult<PendingLogin>;

    /// Whether a live entry exists for the state
    async fn contains(&self, state: &str) -> bool;

    /// Drop expired entries, returning how many were removed
    async fn cleanup_expired(&self) -> OidcResult<usize>;

    async fn len(&self) -> usize;
}

/// In-memory implementation of StateStore
pub struct InMemoryStateStore {
    states: Arc<RwLock<HashMap<String, PendingLogin>>>,
    ttl: Duration,
    sweep_threshold: usize,
}

impl InMemoryStateStore {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
            ttl: i64::try_from(ttl_seconds)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX),
            sweep_threshold: DEFAULT_SWEEP_THRESHOLD,
        }
    }

    pub fn with_sweep_threshold(mut self, threshold: usize) -> Self {
        self.sweep_threshold = threshold;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Run `cleanup_expired` every `interval` until the returned task is aborted.
    pub fn spawn_cleanup(self: Arc<Self>, interval: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Ok(removed) = self.cleanup_expired().await {
                    if removed > 0 {
                        debug!("Evicted {} expired pending logins", removed);
                    }
                }
            }
        })
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new(600)
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn put(&self, pending: PendingLogin) -> OidcResult<()> {
        let mut states = self.states.write().await;

        if states.len() >= self.sweep_threshold {
            let ttl = self.ttl;
            states.retain(|_, entry| !entry.is_expired(ttl));
        }

        if let Some(existing) = states.get(&pending.state) {
            if !existing.is_expired(self.ttl) {
                return Err(OidcError::DuplicateState);
            }
        }

        states.insert(pending.state.clone(), pending);
        Ok(())
    }

    async fn take_and_remove(&self, state: &str) -> OidcResult<PendingLogin> {
        let mut states = self.states.write().await;

        // Remove first so an expired entry is reclaimed as well
        let pending = states.remove(state).ok_or(OidcError::StateNotFound)?;

        if pending.is_expired(self.ttl) {
            return Err(OidcError::StateNotFound);
        }

        Ok(pending)
    }

    async fn contains(&self, state: &str) -> bool {
        let states = self.states.read().await;
        states
            .get(state)
            .is_some_and(|entry| !entry.is_expired(self.ttl))
    }

    async fn cleanup_expired(&self) -> OidcResult<usize> {
        let mut states = self.states.write().await;
        let before = states.len();
        let ttl = self.ttl;
        states.retain(|_, entry| !entry.is_expired(ttl));
        Ok(before - states.len())
    }

    async fn len(&self) -> usize {
        self.states.read().await.len()
    }
}

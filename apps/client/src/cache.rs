//! Stale-while-revalidate reads over a [`SnapshotStore`].

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chocoo_core::time::Clock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::api::CallerContext;
use crate::error::ClientError;
use crate::snapshot::{self, Envelope, SnapshotStore, CACHE_PREFIX, SCHEMA_VERSION};

/// Remembers whose data the cache holds. Not `cache_`-prefixed, so flushes keep it.
const IDENTITY_KEY: &str = "identity";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Salon profile, services, FAQ, own bookings.
    Long,
    /// Availability counts.
    Short,
}

impl Ttl {
    pub fn duration(self) -> Duration {
        match self {
            Ttl::Long => Duration::from_secs(60 * 60),
            Ttl::Short => Duration::from_secs(5 * 60),
        }
    }
}

/// What a read hands back right away.
pub struct CachedRead<T> {
    /// Snapshot value, present only while younger than the TTL.
    pub cached: Option<T>,
    /// Last good snapshot regardless of age.
    stale: Option<T>,
    refresh: JoinHandle<Result<T, ClientError>>,
}

impl<T> CachedRead<T> {
    /// Waits for the authoritative value.
    pub async fn refresh(self) -> Result<T, ClientError> {
        join(self.refresh).await
    }

    /// Waits for the refresh; on failure falls back to the last good snapshot.
    pub async fn settle(self) -> Result<T, ClientError> {
        match join(self.refresh).await {
            Ok(fresh) => Ok(fresh),
            Err(e) => match self.stale {
                Some(stale) => {
                    tracing::warn!("Refresh failed, serving last snapshot: {}", e);
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }
}

async fn join<T>(handle: JoinHandle<Result<T, ClientError>>) -> Result<T, ClientError> {
    handle
        .await
        .map_err(|e| ClientError::Network(format!("refresh task failed: {}", e)))?
}

#[derive(Clone)]
pub struct SwrCache {
    store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    /// Bumped on every identity flush. Refreshes started under an older
    /// epoch hand their value back but never write it.
    epoch: Arc<Mutex<u64>>,
}

impl SwrCache {
    pub fn new(store: Arc<dyn SnapshotStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            epoch: Arc::new(Mutex::new(0)),
        }
    }

    fn current_epoch(&self) -> u64 {
        *self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now_ms(&self) -> i64 {
        self.clock.now_utc().timestamp_millis()
    }

    /// Returns the snapshot (if fresh enough) and always starts a refresh.
    ///
    /// The refresh is spawned, so it finishes and writes its snapshot even if
    /// the caller drops the returned handle.
    pub fn read<T, F, Fut>(&self, name: &str, ttl: Ttl, fetch: F) -> CachedRead<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
    {
        let key = cache_key(name);
        let snapshot = snapshot::read::<T>(self.store.as_ref(), &key);

        let ttl_ms = ttl.duration().as_millis() as i64;
        let now = self.now_ms();
        let cached = snapshot
            .as_ref()
            .filter(|env| now - env.fetched_at_ms <= ttl_ms)
            .map(|env| env.value.clone());
        let stale = snapshot.map(|env| env.value);

        let started_in = self.current_epoch();
        let pending = fetch();
        let store = self.store.clone();
        let clock = self.clock.clone();
        let epoch = self.epoch.clone();
        let refresh = tokio::spawn(async move {
            let fresh = pending.await?;
            let env = Envelope {
                schema: SCHEMA_VERSION,
                fetched_at_ms: clock.now_utc().timestamp_millis(),
                value: fresh.clone(),
            };
            // Held across the write so a flush cannot slip in between
            let current = epoch.lock().unwrap_or_else(PoisonError::into_inner);
            if *current == started_in {
                snapshot::write(store.as_ref(), &key, &env);
            } else {
                tracing::debug!("Dropping snapshot {} fetched for a previous caller", key);
            }
            Ok(fresh)
        });

        CachedRead {
            cached,
            stale,
            refresh,
        }
    }

    /// Stores a value as if it had just been fetched.
    pub fn put<T: Serialize>(&self, name: &str, value: &T) {
        let env = Envelope {
            schema: SCHEMA_VERSION,
            fetched_at_ms: self.now_ms(),
            value,
        };
        snapshot::write(self.store.as_ref(), &cache_key(name), &env);
    }

    pub fn invalidate(&self, name: &str) {
        self.store.remove(&cache_key(name));
    }

    /// Flushes every snapshot when the caller differs from the one that wrote them.
    /// Returns true if a flush happened.
    pub fn ensure_identity(&self, ctx: &CallerContext) -> bool {
        let identity = ctx.identity();
        if self.store.load(IDENTITY_KEY).as_deref() == Some(identity.as_str()) {
            return false;
        }

        let dropped = {
            let mut epoch = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
            *epoch += 1;
            snapshot::flush(self.store.as_ref())
        };
        tracing::info!("Caller changed, flushed {} cached snapshots", dropped);
        if let Err(e) = self.store.save(IDENTITY_KEY, &identity) {
            tracing::warn!("Failed to remember cache identity: {}", e);
        }
        true
    }
}

pub fn cache_key(name: &str) -> String {
    format!("{}{}", CACHE_PREFIX, name)
}

// ── Tests ──

//! Resolution of signing keys by identifier
//!
//! The [`KeyResolver`] holds the most recently fetched [`KeySet`] behind an
//! [`ArcSwapOption`]. Readers take a snapshot without locking; a fetch
//! installs a whole new set with a single store, so a reader sees either the
//! old set or the new one.
//!
//! Fetches go through a [`KeySource`] guarded by an async mutex, so at most
//! one is in flight. A caller that queued behind another caller's fetch
//! reuses that result instead of fetching again.

use std::{
    error::Error as StdError,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;

use crate::{
    error::{AuthError, KeyFetchError},
    jwks::{KeyIdRef, KeySet, SigningKey},
};

/// The outcome of a successful fetch
#[derive(Debug)]
pub enum Fetched {
    /// A new key set was retrieved
    Updated(KeySet),
    /// The provider reported that the set has not changed
    NotModified,
}

/// A place key sets come from
#[async_trait]
pub trait KeySource: Send + Sync + fmt::Debug {
    /// Retrieves the current key set
    ///
    /// Fetches are never run concurrently against the same source.
    async fn fetch(&mut self) -> Result<Fetched, KeyFetchError>;
}

/// A source that always returns the same key set
#[derive(Clone, Debug, Default)]
pub struct StaticKeySource(KeySet);

impl StaticKeySource {
    /// Constructs a source around a fixed key set
    #[must_use]
    pub fn new(keys: KeySet) -> Self {
        Self(keys)
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn fetch(&mut self) -> Result<Fetched, KeyFetchError> {
        Ok(Fetched::Updated(self.0.clone()))
    }
}

/// A cache of signing keys that refreshes itself on a miss
#[derive(Debug)]
pub struct KeyResolver {
    cache: ArcSwapOption<KeySet>,
    generation: AtomicU64,
    source: tokio::sync::Mutex<Box<dyn KeySource>>,
}

impl KeyResolver {
    /// Constructs a resolver with an empty cache
    ///
    /// The first call to [`resolve`](Self::resolve) fetches the key set.
    pub fn new(source: impl KeySource + 'static) -> Self {
        Self {
            cache: ArcSwapOption::empty(),
            generation: AtomicU64::new(0),
            source: tokio::sync::Mutex::new(Box::new(source)),
        }
    }

    /// Constructs a resolver whose cache already holds `keys`
    ///
    /// The source is only consulted once a lookup misses.
    pub fn with_keys(keys: KeySet, source: impl KeySource + 'static) -> Self {
        let resolver = Self::new(source);
        resolver.cache.store(Some(Arc::new(keys)));
        resolver
    }

    /// A snapshot of the cached key set, if one has been fetched
    #[must_use]
    pub fn keys(&self) -> Option<Arc<KeySet>> {
        self.cache.load_full()
    }

    /// Replaces the cached key set
    pub fn set_keys(&self, keys: KeySet) {
        self.cache.store(Some(Arc::new(keys)));
    }

    /// Finds the key with identifier `kid`
    ///
    /// If the cached set has no such key, the set is fetched once and the
    /// lookup retried. A call never fetches more than once: when the cache
    /// was empty, the fetch that filled it counts as the re-fetch.
    ///
    /// # Errors
    ///
    /// * [`AuthError::KeyNotFound`] if the key is absent after the fetch
    /// * [`AuthError::KeyFetchError`] if the fetch fails
    pub async fn resolve(&self, kid: &KeyIdRef) -> Result<SigningKey, AuthError> {
        let seen_generation = self.generation.load(Ordering::SeqCst);
        let snapshot = self.cache.load_full();

        if let Some(keys) = &snapshot {
            if let Some(key) = keys.get(kid) {
                return Ok(key.clone());
            }

            tracing::debug!(%kid, "key not found in cached set, refreshing");
        }

        let keys = self.refresh_after(seen_generation).await?;

        keys.get(kid).cloned().ok_or_else(|| {
            tracing::debug!(%kid, "key not found after refresh");
            AuthError::KeyNotFound {
                kid: kid.as_str().to_owned(),
            }
        })
    }

    /// Fetches the key set from the source and installs it
    ///
    /// If the fetch fails, the cached set is left as it was.
    ///
    /// # Errors
    ///
    /// Returns the source's error if the fetch fails.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self) -> Result<(), KeyFetchError> {
        let mut source = self.source.lock().await;
        self.fetch_locked(&mut **source).await.map(drop)
    }

    async fn refresh_after(&self, seen_generation: u64) -> Result<Arc<KeySet>, KeyFetchError> {
        let mut source = self.source.lock().await;

        if self.generation.load(Ordering::SeqCst) != seen_generation {
            if let Some(keys) = self.cache.load_full() {
                tracing::trace!("reusing key set fetched by a concurrent request");
                return Ok(keys);
            }
        }

        self.fetch_locked(&mut **source).await
    }

    async fn fetch_locked(&self, source: &mut dyn KeySource) -> Result<Arc<KeySet>, KeyFetchError> {
        tracing::debug!("fetching key set");

        let result = match source.fetch().await {
            Ok(Fetched::Updated(keys)) => {
                let keys = Arc::new(keys);
                self.cache.store(Some(Arc::clone(&keys)));
                tracing::info!(jwks.keys = keys.len(), "key set installed");
                Ok(keys)
            }
            Ok(Fetched::NotModified) => match self.cache.load_full() {
                Some(keys) => {
                    tracing::debug!("key set not modified");
                    Ok(keys)
                }
                None => Err(KeyFetchError::Status { status: 304 }),
            },
            Err(err) => Err(err),
        };

        match &result {
            Ok(_) => {
                self.generation.fetch_add(1, Ordering::SeqCst);
            }
            Err(err) => {
                let error: &dyn StdError = err;
                tracing::warn!(error, "key set fetch failed");
            }
        }

        result
    }
}

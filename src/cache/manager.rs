//! TTL-keyed in-memory cache shared by every store of a session.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::key::{CacheKey, FilterSignature, View};
use crate::resources::ResourceKind;

type AnyData = Arc<dyn Any + Send + Sync>;

/// Time-to-live per resource, plus one for aggregate views.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
  per_resource: HashMap<ResourceKind, Duration>,
  analytics: Duration,
}

impl Default for TtlPolicy {
  fn default() -> Self {
    Self {
      per_resource: ResourceKind::ALL
        .into_iter()
        .map(|kind| (kind, kind.default_ttl()))
        .collect(),
      analytics: Duration::from_secs(300),
    }
  }
}

impl TtlPolicy {
  pub fn with_ttl(mut self, resource: ResourceKind, ttl: Duration) -> Self {
    self.per_resource.insert(resource, ttl);
    self
  }

  pub fn with_analytics_ttl(mut self, ttl: Duration) -> Self {
    self.analytics = ttl;
    self
  }

  pub fn ttl_for(&self, key: &CacheKey) -> Duration {
    match key.view {
      View::Analytics => self.analytics,
      View::List | View::Detail => self
        .per_resource
        .get(&key.resource)
        .copied()
        .unwrap_or_else(|| key.resource.default_ttl()),
    }
  }
}

/// A typed view of one cache entry.
#[derive(Debug)]
pub struct CacheEntry<T> {
  pub data: Arc<T>,
  pub fetched_at: Instant,
  pub ttl: Duration,
  pub filter_signature: FilterSignature,
  pub loading: bool,
  invalidated: bool,
}

impl<T> CacheEntry<T> {
  /// Fresh iff younger than its TTL and not explicitly invalidated.
  pub fn is_fresh(&self) -> bool {
    !self.invalidated && self.fetched_at.elapsed() < self.ttl
  }
}

struct RawEntry {
  data: Option<AnyData>,
  fetched_at: Instant,
  ttl: Duration,
  loading: bool,
  invalidated: bool,
}

/// What to force stale.
#[derive(Debug, Clone)]
pub enum Invalidation {
  Key(CacheKey),
  View(ResourceKind, View),
  Resource(ResourceKind),
  All,
}

impl Invalidation {
  fn matches(&self, key: &CacheKey) -> bool {
    match self {
      Self::Key(k) => k == key,
      Self::View(resource, view) => key.resource == *resource && key.view == *view,
      Self::Resource(resource) => key.resource == *resource,
      Self::All => true,
    }
  }
}

/// Session-scoped cache. Cloning shares the same map.
///
/// Never calls network or UI code; the only side effects are on its own map.
#[derive(Clone)]
pub struct CacheManager {
  entries: Arc<Mutex<HashMap<CacheKey, RawEntry>>>,
  ttl: Arc<TtlPolicy>,
}

impl CacheManager {
  pub fn new(ttl: TtlPolicy) -> Self {
    Self {
      entries: Arc::new(Mutex::new(HashMap::new())),
      ttl: Arc::new(ttl),
    }
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, RawEntry>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Get the entry for `key` if it holds data of type `T`.
  pub fn get<T: Any + Send + Sync>(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
    let entries = self.entries();
    let raw = entries.get(key)?;
    let data = raw.data.clone()?.downcast::<T>().ok()?;
    Some(CacheEntry {
      data,
      fetched_at: raw.fetched_at,
      ttl: raw.ttl,
      filter_signature: key.signature.clone(),
      loading: raw.loading,
      invalidated: raw.invalidated,
    })
  }

  /// Whether an entry with data exists, fresh or not.
  pub fn contains(&self, key: &CacheKey) -> bool {
    self
      .entries()
      .get(key)
      .is_some_and(|raw| raw.data.is_some())
  }

  /// Store `data` with `fetched_at = now`, clearing any invalidation.
  pub fn set<T: Any + Send + Sync>(&self, key: &CacheKey, data: T) {
    let ttl = self.ttl.ttl_for(key);
    debug!(key = %key, ?ttl, "cache set");
    self.entries().insert(
      key.clone(),
      RawEntry {
        data: Some(Arc::new(data)),
        fetched_at: Instant::now(),
        ttl,
        loading: false,
        invalidated: false,
      },
    );
  }

  /// Swap the data of an existing entry, keeping its timestamp and state.
  ///
  /// Returns false when there is no entry with data to replace.
  pub fn replace<T: Any + Send + Sync>(&self, key: &CacheKey, data: T) -> bool {
    match self.entries().get_mut(key) {
      Some(raw) if raw.data.is_some() => {
        raw.data = Some(Arc::new(data));
        true
      }
      _ => false,
    }
  }

  pub fn is_fresh(&self, key: &CacheKey) -> bool {
    self.entries().get(key).is_some_and(|raw| {
      raw.data.is_some() && !raw.invalidated && raw.fetched_at.elapsed() < raw.ttl
    })
  }

  pub fn mark_loading(&self, key: &CacheKey, loading: bool) {
    let ttl = self.ttl.ttl_for(key);
    let mut entries = self.entries();
    match entries.get_mut(key) {
      Some(raw) => raw.loading = loading,
      None if loading => {
        entries.insert(
          key.clone(),
          RawEntry {
            data: None,
            fetched_at: Instant::now(),
            ttl,
            loading,
            invalidated: true,
          },
        );
      }
      None => {}
    }
  }

  pub fn is_loading(&self, key: &CacheKey) -> bool {
    self.entries().get(key).is_some_and(|raw| raw.loading)
  }

  /// True if any entry of `resource` is loading.
  pub fn is_resource_loading(&self, resource: ResourceKind) -> bool {
    self
      .entries()
      .iter()
      .any(|(key, raw)| key.resource == resource && raw.loading)
  }

  /// Force matching entries stale regardless of their timestamp.
  ///
  /// Data is kept so lookups by id can still be served from it.
  pub fn invalidate(&self, what: Invalidation) -> usize {
    let count = self.invalidate_if(|key| what.matches(key));
    debug!(?what, count, "cache invalidated");
    count
  }

  /// Force every entry whose key satisfies `predicate` stale.
  pub fn invalidate_if(&self, predicate: impl Fn(&CacheKey) -> bool) -> usize {
    let mut count = 0;
    for (key, raw) in self.entries().iter_mut() {
      if predicate(key) {
        raw.invalidated = true;
        count += 1;
      }
    }
    count
  }

  /// Drop every entry. Used on session teardown.
  pub fn clear(&self) {
    self.entries().clear();
  }

  pub fn len(&self) -> usize {
    self.entries().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries().is_empty()
  }
}

impl Default for CacheManager {
  fn default() -> Self {
    Self::new(TtlPolicy::default())
  }
}

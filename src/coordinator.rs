//! In-flight request coalescing.
//!
//! Concurrent or rapidly repeated fetches for the same cache key share one
//! network call. Each issued request gets a generation number, increasing
//! across the session, so a store can tell whether a response is still the
//! newest one for its key. A key is forgotten once its window has passed.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;
use tracing::debug;

use crate::cache::CacheKey;
use crate::error::{Result, SyncError};

type Outcome = Result<Arc<dyn Any + Send + Sync>>;
type SharedOutcome = Shared<BoxFuture<'static, Outcome>>;

/// Default time a settled outcome keeps answering identical requests.
pub const DEFAULT_COALESCE_WINDOW: Duration = Duration::from_secs(30);

/// Which existing request, if any, a new call may join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reuse {
  /// Join an in-flight request or an outcome settled within the window.
  Any,
  /// Join an in-flight request only; settled outcomes are ignored.
  InFlightOnly,
  /// Always issue a new request, superseding any in-flight one.
  Never,
}

struct PendingRequest {
  outcome: SharedOutcome,
  started_at: Instant,
  generation: u64,
  settled_at: Option<Instant>,
}

#[derive(Default)]
struct CoordinatorState {
  /// Newest request per key; replaced when a request is superseded
  pending: HashMap<CacheKey, PendingRequest>,
  last_generation: u64,
}

impl CoordinatorState {
  fn prune(&mut self, now: Instant, window: Duration) {
    self.pending.retain(|_, request| match request.settled_at {
      Some(at) => now.duration_since(at) < window,
      None => true,
    });
  }
}

/// The eventual result of a coalesced request.
pub struct Deferred<T> {
  key: CacheKey,
  generation: u64,
  reused: bool,
  outcome: SharedOutcome,
  _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> Deferred<T> {
  pub fn generation(&self) -> u64 {
    self.generation
  }

  /// True when this call joined an existing request instead of issuing one.
  pub fn is_reused(&self) -> bool {
    self.reused
  }

  pub async fn wait(self) -> Result<Arc<T>> {
    let data = self.outcome.await?;
    data.downcast::<T>().map_err(|_| {
      SyncError::payload(
        self.key.resource,
        "coalesced response has an unexpected type",
      )
    })
  }
}

/// Session-scoped request deduplicator. Cloning shares the same state.
#[derive(Clone)]
pub struct RequestCoordinator {
  state: Arc<Mutex<CoordinatorState>>,
  window: Duration,
}

impl RequestCoordinator {
  pub fn new(window: Duration) -> Self {
    Self {
      state: Arc::new(Mutex::new(CoordinatorState::default())),
      window,
    }
  }

  fn state(&self) -> MutexGuard<'_, CoordinatorState> {
    lock(&self.state)
  }

  /// Return the existing deferred result for `key` when `reuse` allows it,
  /// otherwise call `issue` and record a new pending request.
  pub fn dedupe<T, F, Fut>(&self, key: &CacheKey, reuse: Reuse, issue: F) -> Deferred<T>
  where
    T: Any + Send + Sync,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let now = Instant::now();
    let mut state = self.state();
    state.prune(now, self.window);

    if let Some(existing) = state.pending.get(key) {
      let reusable = match reuse {
        Reuse::Any => true,
        Reuse::InFlightOnly => existing.settled_at.is_none(),
        Reuse::Never => false,
      };
      if reusable {
        debug!(
          key = %key,
          generation = existing.generation,
          age_ms = now.duration_since(existing.started_at).as_millis() as u64,
          "request coalesced"
        );
        return Deferred {
          key: key.clone(),
          generation: existing.generation,
          reused: true,
          outcome: existing.outcome.clone(),
          _marker: PhantomData,
        };
      }
    }

    state.last_generation += 1;
    let generation = state.last_generation;

    let fetch = issue();
    let outcome = settle(Arc::downgrade(&self.state), key.clone(), generation, fetch)
      .boxed()
      .shared();

    debug!(key = %key, generation, ?reuse, "request issued");
    state.pending.insert(
      key.clone(),
      PendingRequest {
        outcome: outcome.clone(),
        started_at: now,
        generation,
        settled_at: None,
      },
    );

    Deferred {
      key: key.clone(),
      generation,
      reused: false,
      outcome,
      _marker: PhantomData,
    }
  }

  /// Whether `generation` is the most recent request issued for `key`.
  pub fn is_current(&self, key: &CacheKey, generation: u64) -> bool {
    self.latest_generation(key) == Some(generation)
  }

  /// None once the key's last request has aged out of the window.
  pub fn latest_generation(&self, key: &CacheKey) -> Option<u64> {
    self.state().pending.get(key).map(|request| request.generation)
  }

  /// Number of keys still tracked, settled or not.
  pub fn tracked_count(&self) -> usize {
    self.state().pending.len()
  }

  /// Number of requests still waiting on the network.
  pub fn pending_count(&self) -> usize {
    self
      .state()
      .pending
      .values()
      .filter(|request| request.settled_at.is_none())
      .count()
  }

  /// Drop settled entries whose coalescing window has passed.
  pub fn prune(&self) {
    self.state().prune(Instant::now(), self.window);
  }

  /// Forget every request. Used on session teardown.
  pub fn clear(&self) {
    self.state().pending.clear();
  }
}

impl Default for RequestCoordinator {
  fn default() -> Self {
    Self::new(DEFAULT_COALESCE_WINDOW)
  }
}

fn lock(state: &Mutex<CoordinatorState>) -> MutexGuard<'_, CoordinatorState> {
  state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Await the fetch, then mark its entry settled before any waiter sees the
/// result, so a waiter that immediately fetches again finds a consistent entry.
async fn settle<T, Fut>(
  state: Weak<Mutex<CoordinatorState>>,
  key: CacheKey,
  generation: u64,
  fetch: Fut,
) -> Outcome
where
  T: Any + Send + Sync,
  Fut: Future<Output = Result<T>> + Send + 'static,
{
  let result = fetch
    .await
    .map(|data| Arc::new(data) as Arc<dyn Any + Send + Sync>);

  if let Some(state) = state.upgrade() {
    let mut state = lock(&state);
    if let Some(request) = state.pending.get_mut(&key) {
      if request.generation == generation {
        request.settled_at = Some(Instant::now());
      }
    }
  }

  result
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::Filters;
  use crate::resources::ResourceKind;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn key() -> CacheKey {
    CacheKey::list(ResourceKind::Employees, &Filters::new())
  }

  fn counting_fetch(
    counter: &Arc<AtomicU32>,
  ) -> impl FnOnce() -> BoxFuture<'static, Result<u32>> {
    let counter = counter.clone();
    move || {
      async move {
        tokio::task::yield_now().await;
        Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
      }
      .boxed()
    }
  }

  #[tokio::test]
  async fn test_concurrent_requests_share_one_call() {
    let coordinator = RequestCoordinator::default();
    let counter = Arc::new(AtomicU32::new(0));

    let first = coordinator.dedupe(&key(), Reuse::Any, counting_fetch(&counter));
    let second = coordinator.dedupe(&key(), Reuse::Any, counting_fetch(&counter));
    let third = coordinator.dedupe(&key(), Reuse::InFlightOnly, counting_fetch(&counter));
    assert!(!first.is_reused());
    assert!(second.is_reused());
    assert!(third.is_reused());
    assert_eq!(coordinator.pending_count(), 1);

    let (a, b, c) = tokio::join!(first.wait(), second.wait(), third.wait());
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
    assert!(Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&a, &c));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.pending_count(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_settled_outcome_reused_within_window() {
    let coordinator = RequestCoordinator::new(Duration::from_secs(30));
    let counter = Arc::new(AtomicU32::new(0));

    let first = coordinator.dedupe(&key(), Reuse::Any, counting_fetch(&counter));
    assert_eq!(*first.wait().await.unwrap(), 1);

    tokio::time::advance(Duration::from_secs(29)).await;
    let again = coordinator.dedupe(&key(), Reuse::Any, counting_fetch(&counter));
    assert!(again.is_reused());
    assert_eq!(*again.wait().await.unwrap(), 1);
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    let after_window = coordinator.dedupe(&key(), Reuse::Any, counting_fetch(&counter));
    assert!(!after_window.is_reused());
    assert_eq!(after_window.generation(), 2);
    assert_eq!(*after_window.wait().await.unwrap(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_expired_keys_are_forgotten() {
    let coordinator = RequestCoordinator::new(Duration::from_secs(30));
    let counter = Arc::new(AtomicU32::new(0));
    let other = CacheKey::list(ResourceKind::Employees, &Filters::new().with("status", "active"));

    let first = coordinator.dedupe(&key(), Reuse::Any, counting_fetch(&counter));
    first.wait().await.unwrap();
    let second = coordinator.dedupe(&other, Reuse::Any, counting_fetch(&counter));
    second.wait().await.unwrap();
    assert_eq!(coordinator.tracked_count(), 2);

    tokio::time::advance(Duration::from_secs(31)).await;
    coordinator.prune();
    assert_eq!(coordinator.tracked_count(), 0);
    assert_eq!(coordinator.latest_generation(&key()), None);

    // Generations keep increasing after a key is forgotten
    let again = coordinator.dedupe(&key(), Reuse::Any, counting_fetch(&counter));
    assert_eq!(again.generation(), 3);
    assert!(coordinator.is_current(&key(), 3));
  }

  #[tokio::test]
  async fn test_in_flight_only_ignores_settled_outcome() {
    let coordinator = RequestCoordinator::default();
    let counter = Arc::new(AtomicU32::new(0));

    coordinator
      .dedupe(&key(), Reuse::Any, counting_fetch(&counter))
      .wait()
      .await
      .unwrap();
    let refresh = coordinator.dedupe(&key(), Reuse::InFlightOnly, counting_fetch(&counter));
    assert!(!refresh.is_reused());
    assert_eq!(*refresh.wait().await.unwrap(), 2);
  }

  #[tokio::test]
  async fn test_never_supersedes_in_flight_request() {
    let coordinator = RequestCoordinator::default();
    let counter = Arc::new(AtomicU32::new(0));

    let first = coordinator.dedupe(&key(), Reuse::Any, counting_fetch(&counter));
    let forced = coordinator.dedupe(&key(), Reuse::Never, counting_fetch(&counter));
    assert_eq!(first.generation(), 1);
    assert_eq!(forced.generation(), 2);
    assert!(!coordinator.is_current(&key(), 1));
    assert!(coordinator.is_current(&key(), 2));

    let (a, b) = tokio::join!(first.wait(), forced.wait());
    assert_ne!(a.unwrap(), b.unwrap());
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    // The superseded request does not mark the newer entry settled early
    assert_eq!(coordinator.latest_generation(&key()), Some(2));
  }

  #[tokio::test]
  async fn test_failure_is_shared() {
    let coordinator = RequestCoordinator::default();
    let calls = Arc::new(AtomicU32::new(0));
    let make = |calls: &Arc<AtomicU32>| {
      let calls = calls.clone();
      move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err::<u32, _>(SyncError::network("connection reset"))
      }
    };

    let first = coordinator.dedupe(&key(), Reuse::Any, make(&calls));
    let second = coordinator.dedupe(&key(), Reuse::Any, make(&calls));
    assert_eq!(
      first.wait().await.unwrap_err(),
      SyncError::network("connection reset")
    );
    assert!(second.wait().await.is_err());

    // A retry moments later reuses the settled failure
    let retry = coordinator.dedupe(&key(), Reuse::Any, make(&calls));
    assert!(retry.is_reused());
    assert!(retry.wait().await.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_clear_forgets_everything() {
    let coordinator = RequestCoordinator::default();
    let counter = Arc::new(AtomicU32::new(0));
    let _pending = coordinator.dedupe(&key(), Reuse::Any, counting_fetch(&counter));
    assert_eq!(coordinator.pending_count(), 1);

    coordinator.clear();
    assert_eq!(coordinator.pending_count(), 0);
    assert_eq!(coordinator.latest_generation(&key()), None);
  }
}

//! Per-resource stores: fetch through the cache, optimistic writes, and the
//! hooks the push channel uses to merge remote changes.
//!
//! A store exposes its current collection through a `watch` channel so any
//! number of views can render it; every change publishes a new collection.

mod adapter;
mod collection;
mod mutation;

pub use adapter::{entity_fields, normalize_collection, normalize_entity};
pub use collection::ResourceCollection;
pub use mutation::{apply_patch, Applied, Mutation, MutationEngine, MutationId};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::api::ResourceApi;
use crate::cache::{CacheKey, CacheManager, Entity, Filters, Invalidation, View};
use crate::coordinator::{RequestCoordinator, Reuse};
use crate::error::{Result, SyncError};
use crate::reporter::{ErrorReporter, ReportedError};

/// Everything a store shares with the rest of its session.
#[derive(Clone)]
pub struct StoreContext {
  pub api: Arc<dyn ResourceApi>,
  pub cache: CacheManager,
  pub coordinator: RequestCoordinator,
  pub reporter: ErrorReporter,
}

/// Where a pushed entity lands in the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
  Merge,
  Prepend,
  Append,
}

struct StoreState<E> {
  /// Key of the list the current collection came from
  active: Option<CacheKey>,
  /// Key of the list most recently asked for; becomes active once its
  /// response is committed
  requested: Option<CacheKey>,
  collection: ResourceCollection<E>,
  mutations: MutationEngine<E>,
  /// Newest generation committed per key the coordinator still tracks
  committed: HashMap<CacheKey, u64>,
}

struct StoreInner<E> {
  ctx: StoreContext,
  state: Mutex<StoreState<E>>,
  published: watch::Sender<ResourceCollection<E>>,
}

/// Cache-backed store for one resource. Cloning shares the same store.
pub struct ResourceStore<E> {
  inner: Arc<StoreInner<E>>,
}

impl<E> Clone for ResourceStore<E> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<E: Entity> ResourceStore<E> {
  pub fn new(ctx: StoreContext) -> Self {
    let (published, _) = watch::channel(ResourceCollection::default());
    Self {
      inner: Arc::new(StoreInner {
        ctx,
        state: Mutex::new(StoreState {
          active: None,
          requested: None,
          collection: ResourceCollection::default(),
          mutations: MutationEngine::default(),
          committed: HashMap::new(),
        }),
        published,
      }),
    }
  }

  fn state(&self) -> MutexGuard<'_, StoreState<E>> {
    self
      .inner
      .state
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  fn ctx(&self) -> &StoreContext {
    &self.inner.ctx
  }

  /// Replace the current collection, mirror it into the active cache entry
  /// and notify subscribers.
  fn publish(&self, state: &mut StoreState<E>, next: ResourceCollection<E>) {
    if next.ptr_eq(&state.collection) {
      return;
    }
    state.collection = next.clone();
    if let Some(active) = &state.active {
      self.ctx().cache.replace(active, next.clone());
    }
    self.inner.published.send_replace(next);
  }

  /// Report a failure unless it belongs to the caller alone.
  fn fail(&self, err: SyncError) -> SyncError {
    if !err.is_validation() {
      self.ctx().reporter.report(E::KIND, &err);
    }
    err
  }

  // ==========================================================================
  // Reads
  // ==========================================================================

  pub fn collection(&self) -> ResourceCollection<E> {
    self.state().collection.clone()
  }

  pub fn subscribe(&self) -> watch::Receiver<ResourceCollection<E>> {
    self.inner.published.subscribe()
  }

  pub fn is_loading(&self) -> bool {
    self.ctx().cache.is_resource_loading(E::KIND)
  }

  pub fn error(&self) -> Option<ReportedError> {
    self.ctx().reporter.latest(E::KIND)
  }

  /// Fetch the collection matching `filters`, serving fresh cache entries
  /// without a network call. `force` bypasses the cache and supersedes any
  /// request already in flight for the same filters.
  pub async fn fetch_collection(
    &self,
    filters: &Filters,
    force: bool,
  ) -> Result<ResourceCollection<E>> {
    let key = CacheKey::list(E::KIND, filters);
    let cache = &self.ctx().cache;

    if !force {
      if let Some(entry) = cache.get::<ResourceCollection<E>>(&key) {
        if entry.is_fresh() {
          debug!(key = %key, "cache hit");
          let cached = (*entry.data).clone();
          let mut state = self.state();
          state.requested = Some(key.clone());
          state.active = Some(key);
          self.publish(&mut state, cached.clone());
          return Ok(cached);
        }
      }
    }

    let reuse = if force {
      Reuse::Never
    } else if cache.contains(&key) {
      Reuse::InFlightOnly
    } else {
      Reuse::Any
    };

    self.state().requested = Some(key.clone());
    cache.mark_loading(&key, true);

    let api = Arc::clone(&self.ctx().api);
    let filters = filters.clone();
    let deferred = self.ctx().coordinator.dedupe(&key, reuse, move || {
      let request = api.fetch_collection(E::KIND, &filters);
      async move { normalize_collection::<E>(request.await?) }
    });
    let generation = deferred.generation();

    match deferred.wait().await {
      Ok(fetched) => Ok(self.commit_fetch(&key, generation, &fetched)),
      Err(err) => {
        if self.ctx().coordinator.is_current(&key, generation) {
          cache.mark_loading(&key, false);
        }
        Err(self.fail(err))
      }
    }
  }

  /// Commit a fetched collection unless a newer request for the same key was
  /// issued after it. Returns what the cache holds for the key afterwards.
  fn commit_fetch(
    &self,
    key: &CacheKey,
    generation: u64,
    fetched: &ResourceCollection<E>,
  ) -> ResourceCollection<E> {
    let ctx = self.ctx();
    let mut state = self.state();

    let newest = ctx.coordinator.is_current(key, generation);
    let already_committed = state
      .committed
      .get(key)
      .is_some_and(|committed| *committed >= generation);

    if newest && !already_committed {
      state
        .committed
        .retain(|tracked, _| ctx.coordinator.latest_generation(tracked).is_some());
      state.committed.insert(key.clone(), generation);
      ctx.cache.set(key, fetched.clone());
      ctx.reporter.clear(E::KIND);
      if state.requested.as_ref() == Some(key) {
        state.active = Some(key.clone());
        self.publish(&mut state, fetched.clone());
      }
    } else if newest {
      ctx.cache.mark_loading(key, false);
      if state.requested.as_ref() == Some(key) && state.active.as_ref() != Some(key) {
        if let Some(entry) = ctx.cache.get::<ResourceCollection<E>>(key) {
          state.active = Some(key.clone());
          self.publish(&mut state, (*entry.data).clone());
        }
      }
    } else {
      debug!(key = %key, generation, "discarding superseded response");
    }

    ctx
      .cache
      .get::<ResourceCollection<E>>(key)
      .map(|entry| (*entry.data).clone())
      .unwrap_or_else(|| fetched.clone())
  }

  /// Look an entity up in the loaded collection, falling back to a
  /// single-entity fetch.
  pub async fn get_by_id(&self, id: &str) -> Result<Option<E>> {
    if let Some(entity) = self.state().collection.get(id) {
      return Ok(Some(entity.clone()));
    }

    let key = CacheKey::detail(E::KIND, id);
    let cache = &self.ctx().cache;
    if let Some(entry) = cache.get::<E>(&key) {
      if entry.is_fresh() {
        return Ok(Some((*entry.data).clone()));
      }
    }

    let api = Arc::clone(&self.ctx().api);
    let entity_id = id.to_string();
    let deferred = self.ctx().coordinator.dedupe(&key, Reuse::InFlightOnly, move || {
      let request = api.fetch_one(E::KIND, &entity_id);
      async move {
        match request.await? {
          Some(payload) => normalize_entity::<E>(payload).map(Some),
          None => Ok(None),
        }
      }
    });

    match deferred.wait().await {
      Ok(found) => {
        if let Some(entity) = &*found {
          cache.set(&key, entity.clone());
        }
        Ok((*found).clone())
      }
      Err(err) => Err(self.fail(err)),
    }
  }

  /// Server-computed aggregate view, cached under the analytics TTL.
  pub async fn fetch_analytics(&self, filters: &Filters) -> Result<Arc<Value>> {
    let key = CacheKey::analytics(E::KIND, filters);
    let cache = &self.ctx().cache;
    if let Some(entry) = cache.get::<Value>(&key) {
      if entry.is_fresh() {
        return Ok(entry.data);
      }
    }

    let api = Arc::clone(&self.ctx().api);
    let filters = filters.clone();
    let deferred = self.ctx().coordinator.dedupe(&key, Reuse::InFlightOnly, move || {
      api.fetch_analytics(E::KIND, &filters)
    });
    let generation = deferred.generation();

    match deferred.wait().await {
      Ok(view) => {
        if self.ctx().coordinator.is_current(&key, generation) {
          cache.set(&key, (*view).clone());
        }
        Ok(view)
      }
      Err(err) => Err(self.fail(err)),
    }
  }

  // ==========================================================================
  // Optimistic writes
  // ==========================================================================

  /// Create an entity. It appears immediately under a temporary id which is
  /// swapped for the server's entity once confirmed.
  pub async fn create(&self, draft: E) -> Result<E> {
    let mut payload = serde_json::to_value(&draft).map_err(|e| SyncError::Validation {
      status: 400,
      message: format!("invalid {}: {}", E::KIND.singular(), e),
    })?;
    if let Some(fields) = payload.as_object_mut() {
      fields.remove("_id");
    }

    let applied = self.begin(Mutation::Create(draft))?;
    let response = self.ctx().api.create(E::KIND, payload).await;
    self
      .finish(applied, response.map(Some))?
      .ok_or_else(|| SyncError::payload(E::KIND, "create response carried no entity"))
  }

  /// Patch an entity's fields. `patch` must be a JSON object.
  pub async fn update(&self, id: &str, patch: Value) -> Result<E> {
    let Value::Object(fields) = patch else {
      return Err(SyncError::Validation {
        status: 400,
        message: format!("{} update must be an object", E::KIND.singular()),
      });
    };

    let applied = self.begin(Mutation::Update {
      id: id.to_string(),
      patch: fields.clone(),
    })?;
    let response = self
      .ctx()
      .api
      .update(E::KIND, id, Value::Object(fields))
      .await;

    match self.finish(applied, response.map(Some))? {
      Some(confirmed) => Ok(confirmed),
      None => self
        .state()
        .collection
        .get(id)
        .cloned()
        .ok_or_else(|| SyncError::NotFound {
          resource: E::KIND,
          id: id.to_string(),
        }),
    }
  }

  pub async fn delete(&self, id: &str) -> Result<()> {
    let applied = self.begin(Mutation::Delete { id: id.to_string() })?;
    let response = self.ctx().api.remove(E::KIND, id).await;
    self.finish(applied, response.map(|()| None))?;
    Ok(())
  }

  fn begin(&self, mutation: Mutation<E>) -> Result<Applied<E>> {
    let mut state = self.state();
    let current = state.collection.clone();
    let applied = state.mutations.begin(&current, &mutation)?;
    debug!(
      resource = %E::KIND,
      mutation = applied.id,
      correlation = %applied.correlation_id,
      "optimistic write applied"
    );
    self.publish(&mut state, applied.collection.clone());
    Ok(applied)
  }

  /// Reconcile or roll back once the server has answered.
  ///
  /// `response` is `Ok(None)` for calls that return no body.
  fn finish(&self, applied: Applied<E>, response: Result<Option<Value>>) -> Result<Option<E>> {
    match response {
      Ok(body) => {
        let confirmed = body.and_then(|payload| match normalize_entity::<E>(payload) {
          Ok(entity) => Some(entity),
          Err(e) => {
            warn!(resource = %E::KIND, error = %e, "write succeeded with unreadable response");
            None
          }
        });

        let mut state = self.state();
        let current = state.collection.clone();
        let next = state.mutations.commit(applied.id, &current, confirmed.clone());
        self.publish(&mut state, next);
        let active = state.active.clone();
        drop(state);

        self.invalidate_after_write(active.as_ref());
        Ok(confirmed)
      }
      Err(cause) => {
        let mut state = self.state();
        let current = state.collection.clone();
        let next = state.mutations.rollback(applied.id, &current);
        self.publish(&mut state, next);
        drop(state);

        warn!(
          resource = %E::KIND,
          mutation = applied.id,
          error = %cause,
          "optimistic write rolled back"
        );
        Err(self.fail(SyncError::stale_write(E::KIND, cause)))
      }
    }
  }

  /// A confirmed write makes other filtered lists, cached details and
  /// aggregate views of this resource (and of dependent resources) stale.
  fn invalidate_after_write(&self, active: Option<&CacheKey>) {
    let cache = &self.ctx().cache;
    cache.invalidate_if(|key| key.resource == E::KIND && Some(key) != active);
    for dependent in E::KIND.dependents() {
      cache.invalidate(Invalidation::View(*dependent, View::Analytics));
    }
  }

  // ==========================================================================
  // Remote changes
  // ==========================================================================

  /// Merge a pushed entity by id. Fields the payload leaves out keep their
  /// loaded values.
  ///
  /// Returns false when no loaded entity has that id; the resource's lists
  /// are then invalidated so the next read picks the entity up.
  pub fn merge_remote(&self, payload: Value) -> Result<bool> {
    self.apply_remote(payload, Placement::Merge)
  }

  /// Insert a pushed entity at the front, or merge it if already loaded.
  pub fn prepend_remote(&self, payload: Value) -> Result<bool> {
    self.apply_remote(payload, Placement::Prepend)
  }

  /// Insert a pushed entity at the end, or merge it if already loaded.
  pub fn append_remote(&self, payload: Value) -> Result<bool> {
    self.apply_remote(payload, Placement::Append)
  }

  fn apply_remote(&self, payload: Value, placement: Placement) -> Result<bool> {
    let fields = entity_fields::<E>(payload)?;
    let entity = normalize_entity::<E>(Value::Object(fields.clone()))?;
    let mut state = self.state();
    let current = state.collection.clone();

    let next = match (current.merge_fields(entity.id(), &fields)?, placement) {
      (Some(merged), _) => Some(merged),
      (None, Placement::Merge) => None,
      (None, Placement::Prepend) => Some(current.prepend(entity)),
      (None, Placement::Append) => Some(current.append(entity)),
    };

    let applied = match next {
      Some(next) => {
        self.publish(&mut state, next);
        true
      }
      None => false,
    };
    drop(state);

    let cache = &self.ctx().cache;
    if applied {
      cache.invalidate(Invalidation::View(E::KIND, View::Analytics));
    } else {
      debug!(resource = %E::KIND, "pushed entity not loaded; invalidating lists");
      cache.invalidate(Invalidation::Resource(E::KIND));
    }
    Ok(applied)
  }

  /// Mark every cached view of this resource stale.
  pub fn invalidate(&self) {
    self.ctx().cache.invalidate(Invalidation::Resource(E::KIND));
  }

  /// Forget the loaded collection and any in-flight write bookkeeping.
  pub fn reset(&self) {
    let mut state = self.state();
    state.active = None;
    state.requested = None;
    state.committed.clear();
    state.mutations.clear();
    self.publish(&mut state, ResourceCollection::default());
  }
}

//! Debounced, per-store error surface.
//!
//! Rapid repeated failures for the same store (several components retrying
//! over a flaky connection) collapse into one emitted error whose counters are
//! refreshed in place.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::resources::ResourceKind;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1500);

/// The latest failure of one store.
#[derive(Debug, Clone)]
pub struct ReportedError {
  pub resource: ResourceKind,
  pub error: SyncError,
  /// Text for the user
  pub message: String,
  pub first_seen: DateTime<Utc>,
  pub occurrences: u32,
  last_seen: Instant,
}

struct ReporterInner {
  slots: Mutex<HashMap<ResourceKind, ReportedError>>,
  debounce: Duration,
  events: broadcast::Sender<ReportedError>,
  expired: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct ErrorReporter {
  inner: Arc<ReporterInner>,
}

impl ErrorReporter {
  pub fn new(debounce: Duration) -> Self {
    let (events, _) = broadcast::channel(64);
    let (expired, _) = watch::channel(false);
    Self {
      inner: Arc::new(ReporterInner {
        slots: Mutex::new(HashMap::new()),
        debounce,
        events,
        expired,
      }),
    }
  }

  fn slots(&self) -> MutexGuard<'_, HashMap<ResourceKind, ReportedError>> {
    self
      .inner
      .slots
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  /// Record a failure. Returns true if it was emitted as a new error.
  ///
  /// Session expiry is not a store error: it raises the session-expired
  /// signal instead.
  pub fn report(&self, resource: ResourceKind, error: &SyncError) -> bool {
    if error.is_session_expired() {
      warn!(%resource, "session rejected by the API");
      self.inner.expired.send_replace(true);
      return false;
    }

    let now = Instant::now();
    let message = error.user_message();
    let mut slots = self.slots();

    if let Some(existing) = slots.get_mut(&resource) {
      if existing.message == message && now.duration_since(existing.last_seen) < self.inner.debounce
      {
        existing.occurrences += 1;
        existing.last_seen = now;
        existing.error = error.clone();
        debug!(%resource, occurrences = existing.occurrences, "error debounced");
        return false;
      }
    }

    let reported = ReportedError {
      resource,
      error: error.clone(),
      message,
      first_seen: Utc::now(),
      occurrences: 1,
      last_seen: now,
    };
    warn!(%resource, error = %reported.message, "store error");
    slots.insert(resource, reported.clone());
    drop(slots);

    // No subscribers is fine
    let _ = self.inner.events.send(reported);
    true
  }

  pub fn latest(&self, resource: ResourceKind) -> Option<ReportedError> {
    self.slots().get(&resource).cloned()
  }

  pub fn clear(&self, resource: ResourceKind) {
    self.slots().remove(&resource);
  }

  pub fn clear_all(&self) {
    self.slots().clear();
  }

  /// Stream of newly emitted (non-debounced) errors.
  pub fn subscribe(&self) -> broadcast::Receiver<ReportedError> {
    self.inner.events.subscribe()
  }

  pub fn session_expired(&self) -> watch::Receiver<bool> {
    self.inner.expired.subscribe()
  }

  pub fn is_session_expired(&self) -> bool {
    *self.inner.expired.borrow()
  }
}

impl Default for ErrorReporter {
  fn default() -> Self {
    Self::new(DEFAULT_DEBOUNCE)
  }
}

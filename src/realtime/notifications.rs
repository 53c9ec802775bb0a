//! Bounded, dismissible feed of push notifications.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast;

use super::event::PushEventKind;

pub const DEFAULT_CAPACITY: usize = 50;

#[derive(Debug, Clone)]
pub struct Notification {
  pub id: u64,
  pub kind: PushEventKind,
  /// Event name as received
  pub event: String,
  pub message: String,
  pub payload: Value,
  pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct FeedState {
  entries: VecDeque<Notification>,
  next_id: u64,
}

struct FeedInner {
  state: Mutex<FeedState>,
  capacity: usize,
  events: broadcast::Sender<Notification>,
}

/// Newest entries last. Cloning shares the same feed.
#[derive(Clone)]
pub struct NotificationFeed {
  inner: Arc<FeedInner>,
}

impl NotificationFeed {
  pub fn new(capacity: usize) -> Self {
    let (events, _) = broadcast::channel(capacity.max(1));
    Self {
      inner: Arc::new(FeedInner {
        state: Mutex::new(FeedState::default()),
        capacity: capacity.max(1),
        events,
      }),
    }
  }

  fn state(&self) -> MutexGuard<'_, FeedState> {
    self
      .inner
      .state
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  /// Append an entry, dropping the oldest when full.
  pub fn push(&self, kind: PushEventKind, event: &str, payload: Value) -> Notification {
    let mut state = self.state();
    state.next_id += 1;
    let notification = Notification {
      id: state.next_id,
      kind,
      event: event.to_string(),
      message: kind.describe().to_string(),
      payload,
      timestamp: Utc::now(),
    };

    if state.entries.len() >= self.inner.capacity {
      state.entries.pop_front();
    }
    state.entries.push_back(notification.clone());
    drop(state);

    let _ = self.inner.events.send(notification.clone());
    notification
  }

  pub fn dismiss(&self, id: u64) -> bool {
    let mut state = self.state();
    let before = state.entries.len();
    state.entries.retain(|n| n.id != id);
    state.entries.len() != before
  }

  pub fn dismiss_at(&self, index: usize) -> Option<Notification> {
    self.state().entries.remove(index)
  }

  pub fn clear(&self) {
    self.state().entries.clear();
  }

  pub fn snapshot(&self) -> Vec<Notification> {
    self.state().entries.iter().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.state().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.state().entries.is_empty()
  }

  pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
    self.inner.events.subscribe()
  }
}

impl Default for NotificationFeed {
  fn default() -> Self {
    Self::new(DEFAULT_CAPACITY)
  }
}

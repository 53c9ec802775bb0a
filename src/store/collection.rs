//! Immutable, id-keyed entity collections.
//!
//! Every change produces a new collection; the previous one stays valid, which
//! makes snapshots free and lets callers compare versions by pointer.

use std::sync::Arc;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::cache::Entity;
use crate::error::{self, SyncError};

/// Ordered list of entities keyed by id.
#[derive(Debug)]
pub struct ResourceCollection<E> {
  items: Arc<Vec<E>>,
}

impl<E> Clone for ResourceCollection<E> {
  fn clone(&self) -> Self {
    Self {
      items: Arc::clone(&self.items),
    }
  }
}

impl<E> Default for ResourceCollection<E> {
  fn default() -> Self {
    Self {
      items: Arc::new(Vec::new()),
    }
  }
}

impl<E: PartialEq> PartialEq for ResourceCollection<E> {
  fn eq(&self, other: &Self) -> bool {
    self.items == other.items
  }
}

impl<E: Serialize> Serialize for ResourceCollection<E> {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    self.items.serialize(serializer)
  }
}

impl<E> ResourceCollection<E> {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, E> {
    self.items.iter()
  }

  pub fn as_slice(&self) -> &[E] {
    &self.items
  }

  /// Same underlying list, not merely equal contents.
  pub fn ptr_eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.items, &other.items)
  }
}

impl<E: Entity> ResourceCollection<E> {
  pub fn new(items: Vec<E>) -> Self {
    Self {
      items: Arc::new(items),
    }
  }

  pub fn get(&self, id: &str) -> Option<&E> {
    self.items.iter().find(|e| e.id() == id)
  }

  pub fn position(&self, id: &str) -> Option<usize> {
    self.items.iter().position(|e| e.id() == id)
  }

  pub fn contains(&self, id: &str) -> bool {
    self.position(id).is_some()
  }

  fn with_items(&self, f: impl FnOnce(&mut Vec<E>)) -> Self {
    let mut items = self.items.as_ref().clone();
    f(&mut items);
    Self::new(items)
  }

  pub fn prepend(&self, entity: E) -> Self {
    self.with_items(|items| items.insert(0, entity))
  }

  pub fn append(&self, entity: E) -> Self {
    self.with_items(|items| items.push(entity))
  }

  /// Insert at `index`, clamped to the current length.
  pub fn insert_at(&self, index: usize, entity: E) -> Self {
    self.with_items(|items| {
      let index = index.min(items.len());
      items.insert(index, entity);
    })
  }

  /// Replace the entity currently stored under `id`. The replacement may carry
  /// a different id (a temporary id swapped for the server's).
  pub fn replace(&self, id: &str, entity: E) -> Option<Self> {
    let index = self.position(id)?;
    Some(self.with_items(|items| items[index] = entity))
  }

  /// Remove by id, returning the new collection, the old index and the entity.
  pub fn remove(&self, id: &str) -> Option<(Self, usize, E)> {
    let index = self.position(id)?;
    let removed = self.items[index].clone();
    let next = self.with_items(|items| {
      items.remove(index);
    });
    Some((next, index, removed))
  }

  /// Merge `incoming` into the entity with the same id.
  ///
  /// The later-timestamped write wins. Without timestamps on both sides the
  /// last applied write wins. Returns None when no entity has that id.
  pub fn merge(&self, incoming: E) -> Option<Self> {
    let index = self.position(incoming.id())?;
    let existing = &self.items[index];
    if let (Some(current), Some(next)) = (existing.updated_at(), incoming.updated_at()) {
      if next < current {
        return Some(self.clone());
      }
    }
    Some(self.with_items(|items| items[index] = incoming))
  }

  /// Overlay pushed fields onto the entity with the same id, keeping every
  /// field the push left out. Ordering follows [`merge`](Self::merge).
  pub fn merge_fields(&self, id: &str, fields: &Map<String, Value>) -> error::Result<Option<Self>> {
    let Some(existing) = self.get(id) else {
      return Ok(None);
    };
    let mut merged = match serde_json::to_value(existing) {
      Ok(Value::Object(map)) => map,
      Ok(_) => return Err(SyncError::payload(E::KIND, "entity is not an object")),
      Err(e) => return Err(SyncError::payload(E::KIND, e)),
    };
    for (key, value) in fields {
      merged.insert(key.clone(), value.clone());
    }
    let incoming: E =
      serde_json::from_value(Value::Object(merged)).map_err(|e| SyncError::payload(E::KIND, e))?;
    Ok(self.merge(incoming))
  }
}

impl<'a, E> IntoIterator for &'a ResourceCollection<E> {
  type Item = &'a E;
  type IntoIter = std::slice::Iter<'a, E>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.iter()
  }
}

//! Payload normalization.
//!
//! The API answers list calls either with a bare array or with an envelope
//! such as `{ "data": { "employees": [...] } }`, and single-entity calls with
//! either the object itself or `{ "data": { "employee": {...} } }`. Everything
//! past this module sees one canonical shape.

use serde_json::{Map, Value};
use tracing::warn;

use super::collection::ResourceCollection;
use crate::cache::Entity;
use crate::error::{Result, SyncError};

/// Turn any accepted list payload into a collection.
pub fn normalize_collection<E: Entity>(payload: Value) -> Result<ResourceCollection<E>> {
  let items = match unwrap_list(payload, E::KIND.as_str()) {
    Some(items) => items,
    None => {
      return Err(SyncError::payload(
        E::KIND,
        format!("expected a list or a '{}' envelope", E::KIND),
      ))
    }
  };

  let mut entities = Vec::with_capacity(items.len());
  for item in items {
    let entity: E = serde_json::from_value(item).map_err(|e| SyncError::payload(E::KIND, e))?;
    if entity.id().is_empty() {
      warn!(resource = %E::KIND, "dropping entity without id");
      continue;
    }
    entities.push(entity);
  }
  Ok(ResourceCollection::new(entities))
}

/// Turn any accepted single-entity payload into an entity.
pub fn normalize_entity<E: Entity>(payload: Value) -> Result<E> {
  let object = unwrap_one(payload, E::KIND.singular()).ok_or_else(|| {
    SyncError::payload(
      E::KIND,
      format!("expected an object or a '{}' envelope", E::KIND.singular()),
    )
  })?;
  let entity: E = serde_json::from_value(object).map_err(|e| SyncError::payload(E::KIND, e))?;
  if entity.id().is_empty() {
    return Err(SyncError::payload(E::KIND, "entity has no id"));
  }
  Ok(entity)
}

/// The raw fields of a single-entity payload, for overlaying a partial
/// entity onto one already loaded.
pub fn entity_fields<E: Entity>(payload: Value) -> Result<Map<String, Value>> {
  match unwrap_one(payload, E::KIND.singular()) {
    Some(Value::Object(fields)) => {
      if fields.get("_id").and_then(Value::as_str).is_some_and(|id| !id.is_empty()) {
        Ok(fields)
      } else {
        Err(SyncError::payload(E::KIND, "entity has no id"))
      }
    }
    _ => Err(SyncError::payload(
      E::KIND,
      format!("expected an object or a '{}' envelope", E::KIND.singular()),
    )),
  }
}

fn unwrap_list(payload: Value, field: &str) -> Option<Vec<Value>> {
  match payload {
    Value::Array(items) => Some(items),
    Value::Object(mut map) => {
      if let Some(inner) = map.remove(field) {
        return unwrap_list(inner, field);
      }
      match map.remove("data") {
        Some(inner) => unwrap_list(inner, field),
        None => None,
      }
    }
    _ => None,
  }
}

fn unwrap_one(payload: Value, field: &str) -> Option<Value> {
  match payload {
    Value::Object(mut map) => {
      if map.contains_key("_id") {
        return Some(Value::Object(map));
      }
      if let Some(inner) = map.remove(field) {
        return unwrap_one(inner, field);
      }
      match map.remove("data") {
        Some(inner) => unwrap_one(inner, field),
        None => Some(Value::Object(map)),
      }
    }
    _ => None,
  }
}

//! Optimistic mutation bookkeeping.
//!
//! The engine is synchronous: each transition takes the collection as it is
//! right now and returns the next one. The store drives the network call in
//! between and publishes whatever the engine returns.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::warn;

use super::collection::ResourceCollection;
use crate::cache::Entity;
use crate::error::{Result, SyncError};

pub type MutationId = u64;

/// A write against one resource.
#[derive(Debug, Clone)]
pub enum Mutation<E> {
  Create(E),
  Update {
    id: String,
    patch: Map<String, Value>,
  },
  Delete {
    id: String,
  },
}

/// How to take back a single mutation's local effect.
#[derive(Debug)]
enum Undo<E> {
  RemoveTemp { temp_id: String },
  RestoreFields {
    id: String,
    prior: Vec<(String, Option<Value>)>,
  },
  Reinsert { index: usize, entity: E },
  Nothing,
}

#[derive(Debug)]
struct MutationSnapshot<E> {
  /// Collection at the moment the mutation started
  before: ResourceCollection<E>,
  /// Collection this mutation published
  applied: ResourceCollection<E>,
  undo: Undo<E>,
}

/// Result of applying a mutation locally.
#[derive(Debug)]
pub struct Applied<E> {
  pub id: MutationId,
  /// Id under which the predicted entity is stored (temporary id for creates)
  pub correlation_id: String,
  pub collection: ResourceCollection<E>,
}

/// Per-resource optimistic write tracker, one snapshot per in-flight mutation.
#[derive(Debug)]
pub struct MutationEngine<E> {
  next_id: MutationId,
  in_flight: HashMap<MutationId, MutationSnapshot<E>>,
}

impl<E> Default for MutationEngine<E> {
  fn default() -> Self {
    Self {
      next_id: 0,
      in_flight: HashMap::new(),
    }
  }
}

impl<E: Entity> MutationEngine<E> {
  pub fn in_flight(&self) -> usize {
    self.in_flight.len()
  }

  /// Apply the predicted effect of `mutation` to `current`.
  pub fn begin(
    &mut self,
    current: &ResourceCollection<E>,
    mutation: &Mutation<E>,
  ) -> Result<Applied<E>> {
    let id = self.next_id + 1;

    let (correlation_id, applied, undo) = match mutation {
      Mutation::Create(draft) => {
        let temp_id = format!("tmp-{}", id);
        let mut predicted = draft.clone();
        predicted.set_id(temp_id.clone());
        (
          temp_id.clone(),
          current.prepend(predicted),
          Undo::RemoveTemp { temp_id },
        )
      }
      Mutation::Update { id: entity_id, patch } => match current.get(entity_id) {
        Some(existing) => {
          let prior = prior_fields(existing, patch)?;
          let patched = apply_patch(existing, patch)?;
          let next = current
            .replace(entity_id, patched)
            .unwrap_or_else(|| current.clone());
          (
            entity_id.clone(),
            next,
            Undo::RestoreFields {
              id: entity_id.clone(),
              prior,
            },
          )
        }
        None => (entity_id.clone(), current.clone(), Undo::Nothing),
      },
      Mutation::Delete { id: entity_id } => match current.remove(entity_id) {
        Some((next, index, entity)) => (entity_id.clone(), next, Undo::Reinsert { index, entity }),
        None => (entity_id.clone(), current.clone(), Undo::Nothing),
      },
    };

    self.next_id = id;
    self.in_flight.insert(
      id,
      MutationSnapshot {
        before: current.clone(),
        applied: applied.clone(),
        undo,
      },
    );

    Ok(Applied {
      id,
      correlation_id,
      collection: applied,
    })
  }

  /// Reconcile a confirmed mutation with the server's authoritative entity.
  pub fn commit(
    &mut self,
    id: MutationId,
    current: &ResourceCollection<E>,
    server: Option<E>,
  ) -> ResourceCollection<E> {
    let Some(snapshot) = self.in_flight.remove(&id) else {
      return current.clone();
    };

    match (snapshot.undo, server) {
      (Undo::RemoveTemp { temp_id }, Some(confirmed)) => {
        if current.contains(confirmed.id()) {
          // The server entity already arrived through another path
          let without_temp = current
            .remove(&temp_id)
            .map(|(next, _, _)| next)
            .unwrap_or_else(|| current.clone());
          without_temp
            .merge(confirmed)
            .unwrap_or(without_temp)
        } else {
          current
            .replace(&temp_id, confirmed)
            .unwrap_or_else(|| current.clone())
        }
      }
      (Undo::RemoveTemp { temp_id }, None) => current
        .remove(&temp_id)
        .map(|(next, _, _)| next)
        .unwrap_or_else(|| current.clone()),
      (Undo::RestoreFields { id, .. }, Some(confirmed)) => current
        .replace(&id, confirmed)
        .unwrap_or_else(|| current.clone()),
      (Undo::Reinsert { entity, .. }, _) => current
        .remove(entity.id())
        .map(|(next, _, _)| next)
        .unwrap_or_else(|| current.clone()),
      _ => current.clone(),
    }
  }

  /// Take back a failed mutation.
  ///
  /// If nothing touched the collection since this mutation published it, the
  /// start snapshot is restored exactly. Otherwise only this mutation's own
  /// effect is reverted on top of `current`.
  pub fn rollback(
    &mut self,
    id: MutationId,
    current: &ResourceCollection<E>,
  ) -> ResourceCollection<E> {
    let Some(snapshot) = self.in_flight.remove(&id) else {
      return current.clone();
    };

    if current.ptr_eq(&snapshot.applied) {
      return snapshot.before;
    }

    match snapshot.undo {
      Undo::RemoveTemp { temp_id } => current
        .remove(&temp_id)
        .map(|(next, _, _)| next)
        .unwrap_or_else(|| current.clone()),
      Undo::RestoreFields { id, prior } => match current.get(&id) {
        Some(entity) => {
          let reverted = revert_fields(entity, &prior);
          current.replace(&id, reverted).unwrap_or_else(|| current.clone())
        }
        None => current.clone(),
      },
      Undo::Reinsert { index, entity } => {
        if current.contains(entity.id()) {
          current.clone()
        } else {
          current.insert_at(index, entity)
        }
      }
      Undo::Nothing => current.clone(),
    }
  }

  pub fn clear(&mut self) {
    self.in_flight.clear();
  }
}

fn invalid_patch(kind: impl std::fmt::Display, err: impl std::fmt::Display) -> SyncError {
  SyncError::Validation {
    status: 400,
    message: format!("invalid {} update: {}", kind, err),
  }
}

fn to_object<E: Entity>(entity: &E) -> Result<Map<String, Value>> {
  match serde_json::to_value(entity) {
    Ok(Value::Object(map)) => Ok(map),
    Ok(_) => Err(invalid_patch(E::KIND, "entity is not an object")),
    Err(e) => Err(invalid_patch(E::KIND, e)),
  }
}

/// Merge the top-level fields of `patch` into `entity`.
pub fn apply_patch<E: Entity>(entity: &E, patch: &Map<String, Value>) -> Result<E> {
  if patch.contains_key("_id") {
    return Err(invalid_patch(E::KIND, "the id cannot be changed"));
  }
  let mut fields = to_object(entity)?;
  for (key, value) in patch {
    fields.insert(key.clone(), value.clone());
  }
  let mut patched: E =
    serde_json::from_value(Value::Object(fields)).map_err(|e| invalid_patch(E::KIND, e))?;
  patched.set_id(entity.id().to_string());
  Ok(patched)
}

fn prior_fields<E: Entity>(
  entity: &E,
  patch: &Map<String, Value>,
) -> Result<Vec<(String, Option<Value>)>> {
  let fields = to_object(entity)?;
  Ok(
    patch
      .keys()
      .map(|key| (key.clone(), fields.get(key).cloned()))
      .collect(),
  )
}

fn revert_fields<E: Entity>(entity: &E, prior: &[(String, Option<Value>)]) -> E {
  let Ok(mut fields) = to_object(entity) else {
    return entity.clone();
  };
  for (key, value) in prior {
    match value {
      Some(value) => fields.insert(key.clone(), value.clone()),
      None => fields.remove(key),
    };
  }
  match serde_json::from_value(Value::Object(fields)) {
    Ok(reverted) => reverted,
    Err(e) => {
      warn!(resource = %E::KIND, id = entity.id(), error = %e, "could not revert fields");
      entity.clone()
    }
  }
}

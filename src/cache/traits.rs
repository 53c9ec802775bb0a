//! Core traits for cached entities.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::resources::ResourceKind;

/// Trait for entities held in a resource collection.
///
/// Implementors expose the server-assigned id and, when the server tracks it,
/// the last modification time used to order competing writes.
pub trait Entity:
  Clone + std::fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
  /// The resource this entity belongs to.
  const KIND: ResourceKind;

  /// Server id (or a temporary client id while a create is in flight).
  fn id(&self) -> &str;

  fn set_id(&mut self, id: String);

  /// Last modification timestamp.
  /// Returns None if the entity doesn't track modification time.
  fn updated_at(&self) -> Option<DateTime<Utc>>;
}

//! Remote API collaborators.
//!
//! The sync layer only consumes these traits; [`HttpApi`] is the production
//! implementation.

mod api_types;
mod http;

pub use api_types::LoginResponse;
pub use http::HttpApi;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::cache::Filters;
use crate::error::Result;
use crate::resources::ResourceKind;

/// Future returned by API calls. Owned so it can be coalesced and shared.
pub type ApiFuture<T> = BoxFuture<'static, Result<T>>;

/// Fetch and mutate interface for every resource.
///
/// Payloads are raw JSON; shape normalization happens in the store.
pub trait ResourceApi: Send + Sync {
  fn fetch_collection(&self, resource: ResourceKind, filters: &Filters) -> ApiFuture<Value>;

  /// Resolves to `None` when the entity does not exist.
  fn fetch_one(&self, resource: ResourceKind, id: &str) -> ApiFuture<Option<Value>>;

  fn create(&self, resource: ResourceKind, payload: Value) -> ApiFuture<Value>;

  fn update(&self, resource: ResourceKind, id: &str, payload: Value) -> ApiFuture<Value>;

  fn remove(&self, resource: ResourceKind, id: &str) -> ApiFuture<()>;

  /// Server-computed aggregate view of a resource.
  fn fetch_analytics(&self, resource: ResourceKind, filters: &Filters) -> ApiFuture<Value>;
}

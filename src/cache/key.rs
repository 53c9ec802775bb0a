//! Cache keys and filter signatures.

use std::collections::BTreeMap;
use std::fmt;

use sha2::{Digest, Sha256};

use crate::resources::ResourceKind;

/// Query parameters for a collection fetch.
///
/// Keys are kept sorted so two filter sets with the same pairs always
/// produce the same signature.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters(BTreeMap<String, String>);

impl Filters {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.insert(key, value);
    self
  }

  pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
    self.0.insert(key.into(), value.into());
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  /// Canonical, order-independent signature of these filters.
  ///
  /// Every key and value is length-prefixed so separators inside a value
  /// cannot make two different filter sets encode alike.
  pub fn signature(&self) -> FilterSignature {
    let canonical: String = self
      .0
      .iter()
      .map(|(k, v)| format!("{}:{}{}:{}", k.len(), k, v.len(), v))
      .collect();
    FilterSignature::digest(&canonical)
  }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Filters {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    Self(
      iter
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect(),
    )
  }
}

/// Fixed-length hash of a filter set (or of an entity id for detail views).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterSignature(String);

impl FilterSignature {
  fn digest(input: &str) -> Self {
    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    Self(hex::encode(hasher.finalize()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

/// Which view of a resource a cache entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum View {
  /// A filtered collection
  List,
  /// A single entity fetched by id
  Detail,
  /// A server-computed aggregate (counts, totals)
  Analytics,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
  pub resource: ResourceKind,
  pub view: View,
  pub signature: FilterSignature,
}

impl CacheKey {
  pub fn list(resource: ResourceKind, filters: &Filters) -> Self {
    Self {
      resource,
      view: View::List,
      signature: filters.signature(),
    }
  }

  pub fn detail(resource: ResourceKind, id: &str) -> Self {
    Self {
      resource,
      view: View::Detail,
      signature: FilterSignature::digest(&format!("id={}", id)),
    }
  }

  pub fn analytics(resource: ResourceKind, filters: &Filters) -> Self {
    Self {
      resource,
      view: View::Analytics,
      signature: filters.signature(),
    }
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}:{:?}:{}",
      self.resource,
      self.view,
      &self.signature.as_str()[..12]
    )
  }
}

//! Session-scoped caching for resource collections.
//!
//! This module provides:
//! - A TTL-keyed store mapping `(resource, view, filter signature)` to data
//! - Order-independent filter signatures
//! - Explicit invalidation by key, view, resource or everything

mod key;
mod manager;
mod traits;

pub use key::{CacheKey, FilterSignature, Filters, View};
pub use manager::{CacheEntry, CacheManager, Invalidation, TtlPolicy};
pub use traits::Entity;

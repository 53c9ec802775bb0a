//! Client-side resource synchronization for the staff management API.
//!
//! A [`session::Session`] owns one cache, one request coordinator, one error
//! reporter, a store per resource and the push channel router. Dropping the
//! session through [`session::Session::logout`] tears all of it down.

pub mod api;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod realtime;
pub mod reporter;
pub mod resources;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Result, SyncError};
pub use session::{Role, Session, SessionIdentity};

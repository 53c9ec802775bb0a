//! Error taxonomy for the sync layer.
//!
//! Transport failures are converted into [`SyncError`] at the store boundary so
//! callers never see raw `reqwest` or websocket errors.

use crate::resources::ResourceKind;

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Errors surfaced by stores, the coordinator and the push channel.
///
/// `Clone` because a single coalesced request outcome is handed to every
/// waiter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
  /// The request never produced a usable response.
  #[error("network error: {0}")]
  Network(String),

  /// The remote API rejected the payload.
  #[error("{message}")]
  Validation { status: u16, message: String },

  /// An optimistic write failed on the server and was rolled back locally.
  #[error("{resource} write rolled back: {cause}")]
  StaleWrite {
    resource: ResourceKind,
    cause: Box<SyncError>,
  },

  /// The API no longer accepts the session token.
  #[error("session expired")]
  SessionExpired,

  #[error("{resource} {id} not found")]
  NotFound { resource: ResourceKind, id: String },

  /// The server answered with a shape the adapter cannot normalize.
  #[error("unexpected {resource} payload: {message}")]
  Payload {
    resource: ResourceKind,
    message: String,
  },

  /// Push channel failure.
  #[error("push channel: {0}")]
  Transport(String),
}

impl SyncError {
  pub fn network(err: impl std::fmt::Display) -> Self {
    Self::Network(err.to_string())
  }

  pub fn payload(resource: ResourceKind, err: impl std::fmt::Display) -> Self {
    Self::Payload {
      resource,
      message: err.to_string(),
    }
  }

  pub fn stale_write(resource: ResourceKind, cause: SyncError) -> Self {
    Self::StaleWrite {
      resource,
      cause: Box::new(cause),
    }
  }

  /// Text shown to the user. A rolled-back write shows the server's message.
  pub fn user_message(&self) -> String {
    match self {
      Self::StaleWrite { cause, .. } => cause.user_message(),
      other => other.to_string(),
    }
  }

  /// True when the failure must escalate to a full session teardown.
  pub fn is_session_expired(&self) -> bool {
    match self {
      Self::SessionExpired => true,
      Self::StaleWrite { cause, .. } => cause.is_session_expired(),
      _ => false,
    }
  }

  /// Validation failures belong to the caller and are not reported globally.
  pub fn is_validation(&self) -> bool {
    matches!(self, Self::Validation { .. })
  }
}

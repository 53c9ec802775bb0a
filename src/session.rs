//! Authenticated session: owns every cache, store and the push router, and
//! tears them all down on logout.

use std::sync::Arc;

use tracing::info;

use crate::api::ResourceApi;
use crate::cache::{CacheManager, Invalidation};
use crate::config::Config;
use crate::coordinator::RequestCoordinator;
use crate::error::Result;
use crate::realtime::{NotificationFeed, PushTransport, RealtimeEventRouter};
use crate::reporter::ErrorReporter;
use crate::resources::Stores;
use crate::store::StoreContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
  Admin,
  Employee,
}

impl Role {
  /// Anything other than `admin` is treated as a regular employee.
  pub fn parse(role: &str) -> Self {
    if role.trim().eq_ignore_ascii_case("admin") {
      Self::Admin
    } else {
      Self::Employee
    }
  }
}

/// Who the session belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionIdentity {
  pub user_id: String,
  pub role: Role,
  pub token: String,
  pub name: Option<String>,
}

impl SessionIdentity {
  pub fn is_admin(&self) -> bool {
    self.role == Role::Admin
  }
}

pub struct Session {
  identity: SessionIdentity,
  cache: CacheManager,
  coordinator: RequestCoordinator,
  reporter: ErrorReporter,
  stores: Stores,
  router: RealtimeEventRouter,
}

impl Session {
  pub fn new(identity: SessionIdentity, api: Arc<dyn ResourceApi>, config: &Config) -> Self {
    let ctx = StoreContext {
      api,
      cache: CacheManager::new(config.cache.ttl_policy()),
      coordinator: RequestCoordinator::new(config.cache.coalesce_window()),
      reporter: ErrorReporter::new(config.errors.debounce()),
    };
    let stores = Stores::new(&ctx);
    let router = RealtimeEventRouter::new(
      identity.clone(),
      stores.clone(),
      NotificationFeed::new(config.notifications.capacity),
    );

    info!(user = %identity.user_id, role = ?identity.role, "session started");
    Self {
      identity,
      cache: ctx.cache,
      coordinator: ctx.coordinator,
      reporter: ctx.reporter,
      stores,
      router,
    }
  }

  pub fn identity(&self) -> &SessionIdentity {
    &self.identity
  }

  pub fn stores(&self) -> &Stores {
    &self.stores
  }

  pub fn cache(&self) -> &CacheManager {
    &self.cache
  }

  pub fn coordinator(&self) -> &RequestCoordinator {
    &self.coordinator
  }

  pub fn reporter(&self) -> &ErrorReporter {
    &self.reporter
  }

  pub fn router(&self) -> &RealtimeEventRouter {
    &self.router
  }

  pub fn notifications(&self) -> &NotificationFeed {
    self.router.feed()
  }

  /// Subscribe to the push channel for this session.
  pub async fn connect(&self, transport: &dyn PushTransport) -> Result<()> {
    self.router.connect(transport).await
  }

  /// Resolves once the API has rejected the session token.
  pub async fn expired(&self) {
    let mut expired = self.reporter.session_expired();
    // The sender lives as long as the reporter, which `self` owns
    let _ = expired.wait_for(|expired| *expired).await;
  }

  pub fn is_expired(&self) -> bool {
    self.reporter.is_session_expired()
  }

  /// Tear the session down: drop cached data, forget pending requests, clear
  /// error state and close the push channel.
  pub async fn logout(self) {
    self.router.disconnect().await;
    self.cache.invalidate(Invalidation::All);
    self.cache.clear();
    self.coordinator.clear();
    self.reporter.clear_all();
    self.stores.reset_all();
    self.router.feed().clear();
    info!(user = %self.identity.user_id, "session ended");
  }
}

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::event::{PushEvent, PushFrame, ADMIN_ROOM};
use super::notifications::{Notification, NotificationFeed};
use super::transport::{PushConnection, PushTransport};
use crate::error::Result;
use crate::resources::Stores;
use crate::session::{Role, SessionIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  Disconnected,
  Connecting,
  Connected,
}

/// Applies in-scope events to the stores and the feed.
#[derive(Clone)]
struct Dispatcher {
  identity: SessionIdentity,
  stores: Stores,
  feed: NotificationFeed,
}

impl Dispatcher {
  fn dispatch(&self, frame: PushFrame) -> Option<Notification> {
    let event = PushEvent::from(frame);
    if !event.is_addressed_to(&self.identity) {
      debug!(event = %event.name, scope = ?event.scope, "push event out of scope");
      return None;
    }

    if let Some((resource, action)) = event.kind.route() {
      match self.stores.apply_push(resource, action, event.payload.clone()) {
        Ok(applied) => debug!(event = %event.name, %resource, ?action, applied, "push event applied"),
        Err(e) => warn!(event = %event.name, %resource, error = %e, "push payload not applied"),
      }
    }

    Some(self.feed.push(event.kind, &event.name, event.payload))
  }
}

struct Listener {
  shutdown: oneshot::Sender<()>,
  handle: JoinHandle<()>,
}

/// Owns the push subscription of one session.
pub struct RealtimeEventRouter {
  dispatcher: Dispatcher,
  state: Arc<watch::Sender<ConnectionState>>,
  listener: Mutex<Option<Listener>>,
}

impl RealtimeEventRouter {
  pub fn new(identity: SessionIdentity, stores: Stores, feed: NotificationFeed) -> Self {
    let (state, _) = watch::channel(ConnectionState::Disconnected);
    Self {
      dispatcher: Dispatcher {
        identity,
        stores,
        feed,
      },
      state: Arc::new(state),
      listener: Mutex::new(None),
    }
  }

  fn listener(&self) -> MutexGuard<'_, Option<Listener>> {
    self.listener.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn state(&self) -> ConnectionState {
    *self.state.borrow()
  }

  pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
    self.state.subscribe()
  }

  pub fn feed(&self) -> &NotificationFeed {
    &self.dispatcher.feed
  }

  /// Rooms joined on connect: the user's own, plus the admin room for admins.
  pub fn rooms(&self) -> Vec<String> {
    let identity = &self.dispatcher.identity;
    let mut rooms = vec![identity.user_id.clone()];
    if identity.role == Role::Admin {
      rooms.push(ADMIN_ROOM.to_string());
    }
    rooms
  }

  /// Open the push channel, join the session's rooms and start dispatching.
  ///
  /// Does nothing if already connected.
  pub async fn connect(&self, transport: &dyn PushTransport) -> Result<()> {
    {
      let mut listener = self.listener();
      if listener.as_ref().is_some_and(|l| !l.handle.is_finished()) {
        return Ok(());
      }
      // Listener ended on its own (server hang-up)
      *listener = None;
    }

    self.state.send_replace(ConnectionState::Connecting);
    let mut connection = match self.open(transport).await {
      Ok(connection) => connection,
      Err(e) => {
        self.state.send_replace(ConnectionState::Disconnected);
        return Err(e);
      }
    };

    let (shutdown, shutdown_rx) = oneshot::channel();
    let dispatcher = self.dispatcher.clone();
    let state = Arc::clone(&self.state);
    self.state.send_replace(ConnectionState::Connected);
    info!(user = %self.dispatcher.identity.user_id, "push channel connected");

    let handle = tokio::spawn(async move {
      listen(&mut *connection, &dispatcher, shutdown_rx).await;
      state.send_replace(ConnectionState::Disconnected);
    });

    *self.listener() = Some(Listener { shutdown, handle });
    Ok(())
  }

  async fn open(&self, transport: &dyn PushTransport) -> Result<Box<dyn PushConnection>> {
    let mut connection = transport.connect(&self.dispatcher.identity.token).await?;
    for room in self.rooms() {
      connection.send(PushFrame::join(room)).await?;
    }
    Ok(connection)
  }

  /// Apply one frame as if it had arrived on the channel.
  pub fn dispatch(&self, frame: PushFrame) -> Option<Notification> {
    self.dispatcher.dispatch(frame)
  }

  /// Close the channel and wait for the listener to stop.
  pub async fn disconnect(&self) {
    let listener = self.listener().take();
    if let Some(listener) = listener {
      let _ = listener.shutdown.send(());
      if let Err(e) = listener.handle.await {
        warn!(error = %e, "push listener ended abnormally");
      }
      info!("push channel disconnected");
    }
    self.state.send_replace(ConnectionState::Disconnected);
  }
}

async fn listen(
  connection: &mut dyn PushConnection,
  dispatcher: &Dispatcher,
  mut shutdown: oneshot::Receiver<()>,
) {
  loop {
    tokio::select! {
      _ = &mut shutdown => {
        if let Err(e) = connection.close().await {
          debug!(error = %e, "push channel close failed");
        }
        break;
      }
      frame = connection.next() => match frame {
        Some(Ok(frame)) => {
          dispatcher.dispatch(frame);
        }
        Some(Err(e)) => {
          warn!(error = %e, "push channel failed");
          break;
        }
        None => {
          info!("push channel closed by server");
          break;
        }
      }
    }
  }
}

//! Push channel: subscription lifecycle, scope gate, store dispatch and the
//! notification feed.

mod event;
mod notifications;
mod router;
mod transport;

pub use event::{PushEvent, PushEventKind, PushFrame, Scope, StoreAction, ADMIN_ROOM};
pub use notifications::{Notification, NotificationFeed, DEFAULT_CAPACITY};
pub use router::{ConnectionState, RealtimeEventRouter};
pub use transport::{PushConnection, PushTransport, WsTransport};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::resources::ResourceKind;
use crate::session::{Role, SessionIdentity};

/// Room every admin session joins in addition to its own user room.
pub const ADMIN_ROOM: &str = "admin-room";

/// One text frame on the push channel, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushFrame {
  pub event: String,
  #[serde(default)]
  pub data: Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub to: Option<String>,
}

impl PushFrame {
  pub fn new(event: impl Into<String>, data: Value) -> Self {
    Self {
      event: event.into(),
      data,
      to: None,
    }
  }

  pub fn to(mut self, scope: impl Into<String>) -> Self {
    self.to = Some(scope.into());
    self
  }

  pub fn join(room: impl Into<String>) -> Self {
    Self::new("join", Value::String(room.into()))
  }

  pub fn parse(text: &str) -> serde_json::Result<Self> {
    serde_json::from_str(text)
  }
}

/// Known push event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushEventKind {
  DutyReassignment,
  StatusChange,
  TaskStatusUpdated,
  LeaveStatusUpdated,
  SalaryAdded,
  LeaveRequested,
  NewDuty,
  /// Anything else; only notified
  Other,
}

/// What a push event does to its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreAction {
  Merge,
  Prepend,
  Append,
}

impl PushEventKind {
  pub fn from_name(name: &str) -> Self {
    match name {
      "duty-reassignment" => Self::DutyReassignment,
      "status-change" => Self::StatusChange,
      "task-status-updated" => Self::TaskStatusUpdated,
      "leave-status-updated" => Self::LeaveStatusUpdated,
      "salary-added" => Self::SalaryAdded,
      "leave-requested" => Self::LeaveRequested,
      "new-duty" => Self::NewDuty,
      _ => Self::Other,
    }
  }

  /// Events only admins receive, whatever the payload says.
  pub fn admin_only(self) -> bool {
    matches!(self, Self::LeaveRequested | Self::NewDuty)
  }

  pub fn route(self) -> Option<(ResourceKind, StoreAction)> {
    match self {
      Self::DutyReassignment | Self::StatusChange => {
        Some((ResourceKind::Employees, StoreAction::Merge))
      }
      Self::TaskStatusUpdated => Some((ResourceKind::Tasks, StoreAction::Merge)),
      Self::LeaveStatusUpdated => Some((ResourceKind::Leaves, StoreAction::Merge)),
      Self::SalaryAdded => Some((ResourceKind::Salaries, StoreAction::Prepend)),
      Self::LeaveRequested => Some((ResourceKind::Leaves, StoreAction::Append)),
      Self::NewDuty => Some((ResourceKind::Duties, StoreAction::Append)),
      Self::Other => None,
    }
  }

  /// Text for the notification feed.
  pub fn describe(self) -> &'static str {
    match self {
      Self::DutyReassignment => "A duty was reassigned",
      Self::StatusChange => "An employee status changed",
      Self::TaskStatusUpdated => "A task status was updated",
      Self::LeaveStatusUpdated => "A leave request was reviewed",
      Self::SalaryAdded => "A salary payment was added",
      Self::LeaveRequested => "A new leave request was submitted",
      Self::NewDuty => "A new duty was created",
      Self::Other => "Something changed",
    }
  }
}

/// Who a push event is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
  User(String),
  Admin,
}

impl Scope {
  fn parse(target: &str) -> Self {
    if target == "admin" || target == ADMIN_ROOM {
      Self::Admin
    } else {
      Self::User(target.to_string())
    }
  }

  pub fn matches(&self, identity: &SessionIdentity) -> bool {
    match self {
      Self::Admin => identity.role == Role::Admin,
      Self::User(id) => *id == identity.user_id,
    }
  }
}

/// A decoded push frame with its recipient scope resolved.
#[derive(Debug, Clone)]
pub struct PushEvent {
  pub kind: PushEventKind,
  pub name: String,
  pub payload: Value,
  /// None when the frame names no recipient at all
  pub scope: Option<Scope>,
}

impl From<PushFrame> for PushEvent {
  fn from(frame: PushFrame) -> Self {
    let kind = PushEventKind::from_name(&frame.event);
    let scope = match frame.to.as_deref() {
      Some(target) => Some(Scope::parse(target)),
      None if kind.admin_only() => Some(Scope::Admin),
      None => ["recipientId", "userId"]
        .iter()
        .find_map(|field| frame.data.get(*field).and_then(Value::as_str))
        .map(|id| Scope::User(id.to_string())),
    };

    Self {
      kind,
      name: frame.event,
      payload: frame.data,
      scope,
    }
  }
}

impl PushEvent {
  /// Admin-only kinds never reach other roles and salary payments only reach
  /// their own user, whatever the frame is addressed to.
  pub fn is_addressed_to(&self, identity: &SessionIdentity) -> bool {
    let Some(scope) = &self.scope else {
      return false;
    };
    if self.kind.admin_only() && !identity.is_admin() {
      return false;
    }
    if self.kind == PushEventKind::SalaryAdded && !matches!(scope, Scope::User(_)) {
      return false;
    }
    scope.matches(identity)
  }
}

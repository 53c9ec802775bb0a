//! The six resources managed by the sync layer.

mod department;
mod duty;
mod employee;
mod leave;
mod salary;
mod task;

pub use department::Department;
pub use duty::Duty;
pub use employee::Employee;
pub use leave::Leave;
pub use salary::Salary;
pub use task::Task;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde_json::Value;

use crate::error::Result;
use crate::realtime::StoreAction;
use crate::store::{ResourceStore, StoreContext};

/// Tagged variant over the managed resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
  Employees,
  Departments,
  Duties,
  Leaves,
  Salaries,
  Tasks,
}

impl ResourceKind {
  pub const ALL: [ResourceKind; 6] = [
    Self::Employees,
    Self::Departments,
    Self::Duties,
    Self::Leaves,
    Self::Salaries,
    Self::Tasks,
  ];

  /// Collection name, also used as the REST path segment and envelope field.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Employees => "employees",
      Self::Departments => "departments",
      Self::Duties => "duties",
      Self::Leaves => "leaves",
      Self::Salaries => "salaries",
      Self::Tasks => "tasks",
    }
  }

  /// Field name used when the server wraps a single entity.
  pub fn singular(self) -> &'static str {
    match self {
      Self::Employees => "employee",
      Self::Departments => "department",
      Self::Duties => "duty",
      Self::Leaves => "leave",
      Self::Salaries => "salary",
      Self::Tasks => "task",
    }
  }

  /// Administrative aggregate lists change rarely; per-user lists churn.
  pub fn default_ttl(self) -> Duration {
    match self {
      Self::Employees | Self::Departments => Duration::from_secs(300),
      Self::Duties | Self::Leaves | Self::Salaries | Self::Tasks => Duration::from_secs(30),
    }
  }

  /// Resources whose aggregate views are affected by writes to this one.
  pub fn dependents(self) -> &'static [ResourceKind] {
    match self {
      Self::Employees => &[Self::Departments],
      Self::Departments => &[],
      Self::Duties | Self::Leaves | Self::Salaries | Self::Tasks => &[Self::Employees],
    }
  }
}

impl fmt::Display for ResourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ResourceKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let lower = s.trim().to_lowercase();
    Self::ALL
      .into_iter()
      .find(|kind| kind.as_str() == lower || kind.singular() == lower)
      .ok_or_else(|| format!("unknown resource '{}'", s))
  }
}

/// One store per resource, created together for a session.
#[derive(Clone)]
pub struct Stores {
  pub employees: ResourceStore<Employee>,
  pub departments: ResourceStore<Department>,
  pub duties: ResourceStore<Duty>,
  pub leaves: ResourceStore<Leave>,
  pub salaries: ResourceStore<Salary>,
  pub tasks: ResourceStore<Task>,
}

impl Stores {
  pub fn new(ctx: &StoreContext) -> Self {
    Self {
      employees: ResourceStore::new(ctx.clone()),
      departments: ResourceStore::new(ctx.clone()),
      duties: ResourceStore::new(ctx.clone()),
      leaves: ResourceStore::new(ctx.clone()),
      salaries: ResourceStore::new(ctx.clone()),
      tasks: ResourceStore::new(ctx.clone()),
    }
  }

  /// Apply a pushed entity to the store owning `resource`.
  pub fn apply_push(&self, resource: ResourceKind, action: StoreAction, payload: Value) -> Result<bool> {
    match resource {
      ResourceKind::Employees => apply(&self.employees, action, payload),
      ResourceKind::Departments => apply(&self.departments, action, payload),
      ResourceKind::Duties => apply(&self.duties, action, payload),
      ResourceKind::Leaves => apply(&self.leaves, action, payload),
      ResourceKind::Salaries => apply(&self.salaries, action, payload),
      ResourceKind::Tasks => apply(&self.tasks, action, payload),
    }
  }

  pub fn reset_all(&self) {
    self.employees.reset();
    self.departments.reset();
    self.duties.reset();
    self.leaves.reset();
    self.salaries.reset();
    self.tasks.reset();
  }
}

fn apply<E: crate::cache::Entity>(
  store: &ResourceStore<E>,
  action: StoreAction,
  payload: Value,
) -> Result<bool> {
  match action {
    StoreAction::Merge => store.merge_remote(payload),
    StoreAction::Prepend => store.prepend_remote(payload),
    StoreAction::Append => store.append_remote(payload),
  }
}

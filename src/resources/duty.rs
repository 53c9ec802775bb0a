use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::cache::Entity;
use crate::error::Result;
use crate::store::ResourceStore;

use super::ResourceKind;

/// A duty assigned to an employee
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Duty {
  #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
  pub id: String,
  #[serde(default)]
  pub title: String,
  pub description: Option<String>,
  /// Employee id the duty is assigned to
  pub assigned_to: Option<String>,
  #[serde(default)]
  pub status: String,
  pub due_date: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub updated_at: Option<DateTime<Utc>>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Entity for Duty {
  const KIND: ResourceKind = ResourceKind::Duties;

  fn id(&self) -> &str {
    &self.id
  }

  fn set_id(&mut self, id: String) {
    self.id = id;
  }

  fn updated_at(&self) -> Option<DateTime<Utc>> {
    self.updated_at
  }
}

impl ResourceStore<Duty> {
  /// Hand a duty over to another employee.
  pub async fn reassign(&self, id: &str, employee_id: &str) -> Result<Duty> {
    self.update(id, json!({ "assignedTo": employee_id })).await
  }
}

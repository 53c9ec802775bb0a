use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::cache::Entity;
use crate::error::Result;
use crate::store::ResourceStore;

use super::ResourceKind;

/// Employee record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
  #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
  pub id: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub email: String,
  #[serde(default)]
  pub role: String,
  pub department: Option<String>,
  pub position: Option<String>,
  #[serde(default)]
  pub status: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub updated_at: Option<DateTime<Utc>>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Entity for Employee {
  const KIND: ResourceKind = ResourceKind::Employees;

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

impl ResourceStore<Employee> {
  /// Change an employee's status (active, suspended, ...).
  pub async fn update_status(&self, id: &str, status: &str) -> Result<Employee> {
    self.update(id, json!({ "status": status })).await
  }
}

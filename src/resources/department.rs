use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cache::Entity;

use super::ResourceKind;

/// Department record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Department {
  #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
  pub id: String,
  #[serde(default)]
  pub name: String,
  pub description: Option<String>,
  /// Employee id of the department head
  pub manager: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub updated_at: Option<DateTime<Utc>>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Entity for Department {
  const KIND: ResourceKind = ResourceKind::Departments;

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

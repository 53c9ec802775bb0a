use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::cache::Entity;
use crate::error::Result;
use crate::store::ResourceStore;

use super::ResourceKind;

/// Work item, optionally attached to a duty
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
  #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
  pub id: String,
  #[serde(default)]
  pub title: String,
  pub employee: Option<String>,
  pub duty: Option<String>,
  #[serde(default)]
  pub status: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub updated_at: Option<DateTime<Utc>>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Entity for Task {
  const KIND: ResourceKind = ResourceKind::Tasks;

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

impl ResourceStore<Task> {
  pub async fn update_status(&self, id: &str, status: &str) -> Result<Task> {
    self.update(id, json!({ "status": status })).await
  }
}

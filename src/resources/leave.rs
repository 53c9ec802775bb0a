use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::cache::Entity;
use crate::error::Result;
use crate::store::ResourceStore;

use super::ResourceKind;

/// Leave request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leave {
  #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
  pub id: String,
  /// Requesting employee id
  #[serde(default)]
  pub employee: String,
  #[serde(default)]
  pub leave_type: String,
  pub start_date: Option<String>,
  pub end_date: Option<String>,
  pub reason: Option<String>,
  /// "pending", "approved" or "rejected"
  #[serde(default)]
  pub status: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub updated_at: Option<DateTime<Utc>>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Entity for Leave {
  const KIND: ResourceKind = ResourceKind::Leaves;

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

impl ResourceStore<Leave> {
  /// Approve or reject a leave request.
  pub async fn set_status(&self, id: &str, status: &str) -> Result<Leave> {
    self.update(id, json!({ "status": status })).await
  }
}

//! Serde-deserializable types matching API responses that are not entities.

use serde::Deserialize;
use serde_json::Value;

/// Body of `POST /auth/login`.
#[derive(Debug, Deserialize)]
pub struct LoginResponse {
  pub token: String,
  pub user: ApiUser,
}

#[derive(Debug, Deserialize)]
pub struct ApiUser {
  #[serde(rename = "_id", alias = "id")]
  pub id: String,
  #[serde(default)]
  pub role: String,
  pub name: Option<String>,
}

impl LoginResponse {
  /// Accepts the bare body or one wrapped in `data`.
  pub fn from_value(value: Value) -> serde_json::Result<Self> {
    match value {
      Value::Object(mut map) if !map.contains_key("token") && map.contains_key("data") => {
        serde_json::from_value(map.remove("data").unwrap_or(Value::Null))
      }
      other => serde_json::from_value(other),
    }
  }
}

/// Error text carried in a failed response body.
pub fn error_message(body: &Value) -> Option<String> {
  ["message", "error", "msg"]
    .iter()
    .find_map(|field| body.get(field).and_then(Value::as_str))
    .map(String::from)
}

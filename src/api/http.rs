use color_eyre::{eyre::eyre, Result as EyreResult};
use futures::FutureExt;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use url::Url;

use super::api_types::{error_message, LoginResponse};
use super::{ApiFuture, ResourceApi};
use crate::cache::Filters;
use crate::error::{Result, SyncError};
use crate::resources::ResourceKind;
use crate::session::{Role, SessionIdentity};

/// REST client for the staff management API
#[derive(Clone)]
pub struct HttpApi {
  client: Client,
  base: Url,
  token: String,
}

impl HttpApi {
  pub fn new(base_url: &str, token: impl Into<String>) -> EyreResult<Self> {
    let base = Url::parse(base_url).map_err(|e| eyre!("Invalid API url {}: {}", base_url, e))?;
    if base.cannot_be_a_base() {
      return Err(eyre!("API url {} cannot be used as a base", base_url));
    }

    let client = Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base,
      token: token.into(),
    })
  }

  /// Exchange credentials for a session token.
  pub async fn login(base_url: &str, email: &str, password: &str) -> EyreResult<SessionIdentity> {
    let api = Self::new(base_url, String::new())?;
    let url = api
      .endpoint(&["auth", "login"])
      .map_err(|e| eyre!("Failed to build login url: {}", e))?;

    let body = send(
      api
        .client
        .post(url)
        .json(&json!({ "email": email, "password": password })),
    )
    .await
    .map_err(|e| eyre!("Login failed: {}", e))?;

    let response =
      LoginResponse::from_value(body).map_err(|e| eyre!("Failed to parse login response: {}", e))?;

    Ok(SessionIdentity {
      user_id: response.user.id,
      role: Role::parse(&response.user.role),
      token: response.token,
      name: response.user.name,
    })
  }

  fn endpoint(&self, segments: &[&str]) -> Result<Url> {
    let mut url = self.base.clone();
    url
      .path_segments_mut()
      .map_err(|_| SyncError::network("API url cannot be a base"))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
    request.bearer_auth(&self.token)
  }

  fn get(&self, segments: &[&str], filters: Option<&Filters>) -> ApiFuture<Value> {
    let url = match self.endpoint(segments) {
      Ok(mut url) => {
        if let Some(filters) = filters.filter(|f| !f.is_empty()) {
          url.query_pairs_mut().extend_pairs(filters.iter());
        }
        url
      }
      Err(e) => return futures::future::ready(Err(e)).boxed(),
    };
    let request = self.authorized(self.client.get(url));
    send(request).boxed()
  }
}

impl ResourceApi for HttpApi {
  fn fetch_collection(&self, resource: ResourceKind, filters: &Filters) -> ApiFuture<Value> {
    self.get(&[resource.as_str()], Some(filters))
  }

  fn fetch_one(&self, resource: ResourceKind, id: &str) -> ApiFuture<Option<Value>> {
    let fetch = self.get(&[resource.as_str(), id], None);
    async move {
      match fetch.await {
        Ok(value) => Ok(Some(value)),
        Err(SyncError::Validation { status: 404, .. }) => Ok(None),
        Err(e) => Err(e),
      }
    }
    .boxed()
  }

  fn create(&self, resource: ResourceKind, payload: Value) -> ApiFuture<Value> {
    let url = self.endpoint(&[resource.as_str()]);
    let this = self.clone();
    async move { send(this.authorized(this.client.post(url?).json(&payload))).await }.boxed()
  }

  fn update(&self, resource: ResourceKind, id: &str, payload: Value) -> ApiFuture<Value> {
    let url = self.endpoint(&[resource.as_str(), id]);
    let this = self.clone();
    async move { send(this.authorized(this.client.put(url?).json(&payload))).await }.boxed()
  }

  fn remove(&self, resource: ResourceKind, id: &str) -> ApiFuture<()> {
    let url = self.endpoint(&[resource.as_str(), id]);
    let this = self.clone();
    async move {
      send(this.authorized(this.client.delete(url?))).await?;
      Ok(())
    }
    .boxed()
  }

  fn fetch_analytics(&self, resource: ResourceKind, filters: &Filters) -> ApiFuture<Value> {
    self.get(&[resource.as_str(), "analytics"], Some(filters))
  }
}

/// Send a request and convert the response into the sync error taxonomy.
async fn send(request: RequestBuilder) -> Result<Value> {
  let response = request.send().await.map_err(SyncError::network)?;
  let status = response.status();
  let text = response.text().await.map_err(SyncError::network)?;
  let body = if text.trim().is_empty() {
    Value::Null
  } else {
    serde_json::from_str(&text).unwrap_or(Value::String(text))
  };

  if status.is_success() {
    Ok(body)
  } else {
    Err(error_for_status(status, &body))
  }
}

fn error_for_status(status: StatusCode, body: &Value) -> SyncError {
  let message = error_message(body)
    .or_else(|| body.as_str().map(String::from))
    .unwrap_or_else(|| {
      status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string()
    });

  match status {
    StatusCode::UNAUTHORIZED => SyncError::SessionExpired,
    StatusCode::BAD_REQUEST
    | StatusCode::FORBIDDEN
    | StatusCode::NOT_FOUND
    | StatusCode::CONFLICT
    | StatusCode::UNPROCESSABLE_ENTITY => SyncError::Validation {
      status: status.as_u16(),
      message,
    },
    _ => SyncError::Network(format!("{}: {}", status, message)),
  }
}

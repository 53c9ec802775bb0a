//! Push channel transport over a WebSocket.

use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use super::event::PushFrame;
use crate::error::{Result, SyncError};

/// Opens push connections for a session token.
pub trait PushTransport: Send + Sync {
  fn connect(&self, token: &str) -> BoxFuture<'static, Result<Box<dyn PushConnection>>>;
}

/// An open push connection.
pub trait PushConnection: Send {
  fn send(&mut self, frame: PushFrame) -> BoxFuture<'_, Result<()>>;

  /// Next decoded frame; `None` once the server has closed the connection.
  fn next(&mut self) -> BoxFuture<'_, Option<Result<PushFrame>>>;

  fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

fn transport_error(err: impl std::fmt::Display) -> SyncError {
  SyncError::Transport(err.to_string())
}

pub struct WsTransport {
  url: Url,
}

impl WsTransport {
  pub fn new(url: Url) -> Self {
    Self { url }
  }
}

impl PushTransport for WsTransport {
  fn connect(&self, token: &str) -> BoxFuture<'static, Result<Box<dyn PushConnection>>> {
    let url = self.url.clone();
    let bearer = format!("Bearer {}", token);
    async move {
      let mut request = url.as_str().into_client_request().map_err(transport_error)?;
      let value = HeaderValue::from_str(&bearer).map_err(transport_error)?;
      request.headers_mut().insert(AUTHORIZATION, value);

      let (stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(transport_error)?;
      debug!(%url, "push channel open");
      Ok(Box::new(WsConnection { stream }) as Box<dyn PushConnection>)
    }
    .boxed()
  }
}

struct WsConnection {
  stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl PushConnection for WsConnection {
  fn send(&mut self, frame: PushFrame) -> BoxFuture<'_, Result<()>> {
    async move {
      let text = serde_json::to_string(&frame).map_err(transport_error)?;
      self
        .stream
        .send(Message::Text(text))
        .await
        .map_err(transport_error)
    }
    .boxed()
  }

  fn next(&mut self) -> BoxFuture<'_, Option<Result<PushFrame>>> {
    async move {
      loop {
        let message = match self.stream.next().await {
          Some(message) => message,
          None => return None,
        };
        match message {
          Ok(Message::Text(text)) => match PushFrame::parse(&text) {
            Ok(frame) => return Some(Ok(frame)),
            Err(e) => warn!(error = %e, "undecodable push frame"),
          },
          Ok(Message::Close(_)) => return None,
          Ok(_) => {}
          Err(e) => return Some(Err(transport_error(e))),
        }
      }
    }
    .boxed()
  }

  fn close(&mut self) -> BoxFuture<'_, Result<()>> {
    async move { self.stream.close(None).await.map_err(transport_error) }.boxed()
  }
}

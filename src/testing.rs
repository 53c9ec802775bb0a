//! In-memory collaborators for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use crate::api::{ApiFuture, ResourceApi};
use crate::cache::{CacheManager, Filters, TtlPolicy};
use crate::coordinator::RequestCoordinator;
use crate::error::{Result, SyncError};
use crate::realtime::{PushConnection, PushFrame, PushTransport};
use crate::reporter::ErrorReporter;
use crate::resources::ResourceKind;
use crate::session::{Role, SessionIdentity};
use crate::store::StoreContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
  FetchCollection,
  FetchOne,
  Create,
  Update,
  Remove,
  FetchAnalytics,
}

#[derive(Debug, Clone)]
pub(crate) struct Call {
  pub op: Op,
  pub resource: ResourceKind,
  pub id: Option<String>,
  pub filters: Filters,
  pub body: Option<Value>,
}

enum Reply {
  Fail(SyncError),
  Respond(Value),
  Gated(oneshot::Receiver<Result<Value>>),
}

#[derive(Default)]
struct MockState {
  records: HashMap<ResourceKind, Vec<Value>>,
  calls: Vec<Call>,
  scripted: HashMap<(Op, ResourceKind), VecDeque<Reply>>,
  next_id: u64,
  latency: Option<Duration>,
}

/// Scriptable in-memory API. Unscripted calls behave like a small CRUD server
/// over the seeded records.
#[derive(Clone, Default)]
pub(crate) struct MockApi {
  state: Arc<Mutex<MockState>>,
}

impl MockApi {
  fn state(&self) -> MutexGuard<'_, MockState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn seed(&self, resource: ResourceKind, records: Vec<Value>) {
    self.state().records.insert(resource, records);
  }

  pub fn records(&self, resource: ResourceKind) -> Vec<Value> {
    self
      .state()
      .records
      .get(&resource)
      .cloned()
      .unwrap_or_default()
  }

  fn script(&self, op: Op, resource: ResourceKind, reply: Reply) {
    self
      .state()
      .scripted
      .entry((op, resource))
      .or_default()
      .push_back(reply);
  }

  pub fn fail_next(&self, op: Op, resource: ResourceKind, err: SyncError) {
    self.script(op, resource, Reply::Fail(err));
  }

  pub fn respond_next(&self, op: Op, resource: ResourceKind, body: Value) {
    self.script(op, resource, Reply::Respond(body));
  }

  /// The next matching call waits until the returned sender delivers its
  /// outcome.
  pub fn gate_next(&self, op: Op, resource: ResourceKind) -> oneshot::Sender<Result<Value>> {
    let (tx, rx) = oneshot::channel();
    self.script(op, resource, Reply::Gated(rx));
    tx
  }

  /// Delay applied to unscripted replies.
  pub fn set_latency(&self, latency: Duration) {
    self.state().latency = Some(latency);
  }

  pub fn calls(&self, op: Op, resource: ResourceKind) -> usize {
    self
      .state()
      .calls
      .iter()
      .filter(|call| call.op == op && call.resource == resource)
      .count()
  }

  pub fn call_log(&self) -> Vec<Call> {
    self.state().calls.clone()
  }

  fn call(
    &self,
    op: Op,
    resource: ResourceKind,
    id: Option<&str>,
    filters: Option<&Filters>,
    body: Option<Value>,
  ) -> ApiFuture<Value> {
    let mut state = self.state();
    state.calls.push(Call {
      op,
      resource,
      id: id.map(String::from),
      filters: filters.cloned().unwrap_or_default(),
      body: body.clone(),
    });

    let scripted = state
      .scripted
      .get_mut(&(op, resource))
      .and_then(VecDeque::pop_front);
    match scripted {
      Some(Reply::Fail(err)) => futures::future::ready(Err(err)).boxed(),
      Some(Reply::Respond(body)) => futures::future::ready(Ok(body)).boxed(),
      Some(Reply::Gated(rx)) => async move {
        rx.await
          .unwrap_or_else(|_| Err(SyncError::network("gate dropped")))
      }
      .boxed(),
      None => {
        let reply = serve(&mut state, op, resource, id, filters, body);
        let latency = state.latency;
        async move {
          if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
          }
          reply
        }
        .boxed()
      }
    }
  }
}

fn not_found(resource: ResourceKind, id: &str) -> SyncError {
  SyncError::Validation {
    status: 404,
    message: format!("{} {} not found", resource.singular(), id),
  }
}

fn matches(record: &Value, filters: &Filters) -> bool {
  filters.iter().all(|(key, value)| match record.get(key) {
    Some(Value::String(s)) => s == value,
    Some(other) => other.to_string() == value,
    None => false,
  })
}

fn serve(
  state: &mut MockState,
  op: Op,
  resource: ResourceKind,
  id: Option<&str>,
  filters: Option<&Filters>,
  body: Option<Value>,
) -> Result<Value> {
  state.next_id += 1;
  let next_id = state.next_id;
  let records = state.records.entry(resource).or_default();
  let position = id.and_then(|id| records.iter().position(|r| r["_id"] == id));
  let id = id.unwrap_or_default();

  match op {
    Op::FetchCollection => {
      let filters = filters.cloned().unwrap_or_default();
      let items: Vec<Value> = records
        .iter()
        .filter(|record| matches(record, &filters))
        .cloned()
        .collect();
      Ok(json!({ resource.as_str(): items }))
    }
    Op::FetchOne => position
      .map(|i| records[i].clone())
      .ok_or_else(|| not_found(resource, id)),
    Op::Create => {
      let mut record = body.unwrap_or_else(|| json!({}));
      record["_id"] = Value::String(format!("srv-{}", next_id));
      records.insert(0, record.clone());
      Ok(json!({ resource.singular(): record }))
    }
    Op::Update => {
      let i = position.ok_or_else(|| not_found(resource, id))?;
      if let (Some(target), Some(Value::Object(fields))) = (records[i].as_object_mut(), body) {
        target.extend(fields);
      }
      Ok(records[i].clone())
    }
    Op::Remove => {
      let i = position.ok_or_else(|| not_found(resource, id))?;
      records.remove(i);
      Ok(Value::Null)
    }
    Op::FetchAnalytics => Ok(json!({ "total": records.len() })),
  }
}

impl ResourceApi for MockApi {
  fn fetch_collection(&self, resource: ResourceKind, filters: &Filters) -> ApiFuture<Value> {
    self.call(Op::FetchCollection, resource, None, Some(filters), None)
  }

  fn fetch_one(&self, resource: ResourceKind, id: &str) -> ApiFuture<Option<Value>> {
    let fetch = self.call(Op::FetchOne, resource, Some(id), None, None);
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
    self.call(Op::Create, resource, None, None, Some(payload))
  }

  fn update(&self, resource: ResourceKind, id: &str, payload: Value) -> ApiFuture<Value> {
    self.call(Op::Update, resource, Some(id), None, Some(payload))
  }

  fn remove(&self, resource: ResourceKind, id: &str) -> ApiFuture<()> {
    let remove = self.call(Op::Remove, resource, Some(id), None, None);
    async move { remove.await.map(|_| ()) }.boxed()
  }

  fn fetch_analytics(&self, resource: ResourceKind, filters: &Filters) -> ApiFuture<Value> {
    self.call(Op::FetchAnalytics, resource, None, Some(filters), None)
  }
}

pub(crate) fn context(api: MockApi) -> StoreContext {
  context_with(api, TtlPolicy::default())
}

pub(crate) fn context_with(api: MockApi, ttl: TtlPolicy) -> StoreContext {
  StoreContext {
    api: Arc::new(api),
    cache: CacheManager::new(ttl),
    coordinator: RequestCoordinator::default(),
    reporter: ErrorReporter::default(),
  }
}

pub(crate) fn identity(user_id: &str, role: Role) -> SessionIdentity {
  SessionIdentity {
    user_id: user_id.to_string(),
    role,
    token: format!("token-{}", user_id),
    name: None,
  }
}

#[derive(Default)]
struct PushState {
  inbound: Option<mpsc::UnboundedSender<PushFrame>>,
  sent: Vec<PushFrame>,
  tokens: Vec<String>,
  closed: bool,
  refuse: bool,
}

/// In-memory push transport; the test plays the server.
#[derive(Clone, Default)]
pub(crate) struct MockPush {
  state: Arc<Mutex<PushState>>,
}

impl MockPush {
  fn state(&self) -> MutexGuard<'_, PushState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Deliver a frame to the connected client. False when nobody is connected.
  pub fn emit(&self, frame: PushFrame) -> bool {
    self
      .state()
      .inbound
      .as_ref()
      .is_some_and(|tx| tx.send(frame).is_ok())
  }

  /// Frames the client sent.
  pub fn sent(&self) -> Vec<PushFrame> {
    self.state().sent.clone()
  }

  /// Tokens presented on connect.
  pub fn tokens(&self) -> Vec<String> {
    self.state().tokens.clone()
  }

  /// Close the connection from the server side.
  pub fn hang_up(&self) {
    self.state().inbound = None;
  }

  pub fn is_closed(&self) -> bool {
    self.state().closed
  }

  pub fn refuse_connections(&self) {
    self.state().refuse = true;
  }
}

impl PushTransport for MockPush {
  fn connect(&self, token: &str) -> BoxFuture<'static, Result<Box<dyn PushConnection>>> {
    let mut state = self.state();
    if state.refuse {
      return futures::future::ready(Err(SyncError::Transport("connection refused".into()))).boxed();
    }
    let (tx, rx) = mpsc::unbounded_channel();
    state.inbound = Some(tx);
    state.tokens.push(token.to_string());
    state.closed = false;

    let connection = MockConnection {
      frames: rx,
      state: Arc::clone(&self.state),
    };
    futures::future::ready(Ok(Box::new(connection) as Box<dyn PushConnection>)).boxed()
  }
}

struct MockConnection {
  frames: mpsc::UnboundedReceiver<PushFrame>,
  state: Arc<Mutex<PushState>>,
}

impl MockConnection {
  fn state(&self) -> MutexGuard<'_, PushState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl PushConnection for MockConnection {
  fn send(&mut self, frame: PushFrame) -> BoxFuture<'_, Result<()>> {
    self.state().sent.push(frame);
    futures::future::ready(Ok(())).boxed()
  }

  fn next(&mut self) -> BoxFuture<'_, Option<Result<PushFrame>>> {
    async move { self.frames.recv().await.map(Ok) }.boxed()
  }

  fn close(&mut self) -> BoxFuture<'_, Result<()>> {
    self.state().closed = true;
    futures::future::ready(Ok(())).boxed()
  }
}

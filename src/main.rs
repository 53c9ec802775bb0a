use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use tracing::info;
use url::Url;

use staffsync::api::{HttpApi, ResourceApi};
use staffsync::cache::{Entity, Filters};
use staffsync::config::{Config, Credentials};
use staffsync::realtime::WsTransport;
use staffsync::resources::{ResourceKind, Stores};
use staffsync::store::ResourceStore;
use staffsync::{logging, Role, Session, SessionIdentity};

#[derive(Parser, Debug)]
#[command(name = "staffsync")]
#[command(about = "Drive a staff management sync session from the terminal")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/staffsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log at debug level (STAFFSYNC_LOG overrides)
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Print a resource collection as JSON
  List {
    resource: ResourceKind,
    /// Query filter, repeatable
    #[arg(short, long = "filter", value_parser = parse_filter)]
    filters: Vec<(String, String)>,
    /// Skip the cache
    #[arg(long)]
    force: bool,
  },
  /// Print a resource's aggregate view as JSON
  Analytics {
    resource: ResourceKind,
    #[arg(short, long = "filter", value_parser = parse_filter)]
    filters: Vec<(String, String)>,
  },
  /// Print push notifications until interrupted
  Watch,
}

fn parse_filter(s: &str) -> std::result::Result<(String, String), String> {
  s.split_once('=')
    .map(|(k, v)| (k.trim().to_string(), v.to_string()))
    .filter(|(k, _)| !k.is_empty())
    .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log = logging::init(args.verbose)?;

  let config = Config::load(args.config.as_deref())?;
  let identity = authenticate(&config).await?;
  let api: Arc<dyn ResourceApi> = Arc::new(HttpApi::new(&config.api.url, identity.token.clone())?);
  let session = Session::new(identity, api, &config);

  let outcome = run(&session, &config, args.command).await;
  session.logout().await;
  outcome
}

async fn authenticate(config: &Config) -> Result<SessionIdentity> {
  match Config::credentials()? {
    Credentials::Token {
      token,
      user_id,
      role,
    } => Ok(SessionIdentity {
      user_id,
      role: Role::parse(&role),
      token,
      name: None,
    }),
    Credentials::Login { email, password } => {
      HttpApi::login(&config.api.url, &email, &password).await
    }
  }
}

async fn run(session: &Session, config: &Config, command: Command) -> Result<()> {
  match command {
    Command::List {
      resource,
      filters,
      force,
    } => {
      let filters: Filters = filters.into_iter().collect();
      let value = list(session.stores(), resource, &filters, force).await?;
      println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Command::Analytics { resource, filters } => {
      let filters: Filters = filters.into_iter().collect();
      let value = analytics(session.stores(), resource, &filters).await?;
      println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Command::Watch => watch(session, config).await?,
  }
  Ok(())
}

async fn collection_json<E: Entity>(
  store: &ResourceStore<E>,
  filters: &Filters,
  force: bool,
) -> Result<Value> {
  let collection = store.fetch_collection(filters, force).await?;
  Ok(serde_json::to_value(&collection)?)
}

async fn list(stores: &Stores, resource: ResourceKind, filters: &Filters, force: bool) -> Result<Value> {
  match resource {
    ResourceKind::Employees => collection_json(&stores.employees, filters, force).await,
    ResourceKind::Departments => collection_json(&stores.departments, filters, force).await,
    ResourceKind::Duties => collection_json(&stores.duties, filters, force).await,
    ResourceKind::Leaves => collection_json(&stores.leaves, filters, force).await,
    ResourceKind::Salaries => collection_json(&stores.salaries, filters, force).await,
    ResourceKind::Tasks => collection_json(&stores.tasks, filters, force).await,
  }
}

async fn analytics(stores: &Stores, resource: ResourceKind, filters: &Filters) -> Result<Value> {
  let view = match resource {
    ResourceKind::Employees => stores.employees.fetch_analytics(filters).await?,
    ResourceKind::Departments => stores.departments.fetch_analytics(filters).await?,
    ResourceKind::Duties => stores.duties.fetch_analytics(filters).await?,
    ResourceKind::Leaves => stores.leaves.fetch_analytics(filters).await?,
    ResourceKind::Salaries => stores.salaries.fetch_analytics(filters).await?,
    ResourceKind::Tasks => stores.tasks.fetch_analytics(filters).await?,
  };
  Ok((*view).clone())
}

async fn watch(session: &Session, config: &Config) -> Result<()> {
  let push_url = config
    .api
    .push_url
    .as_deref()
    .ok_or_else(|| eyre!("api.push_url must be set to watch notifications"))?;
  let url = Url::parse(push_url).map_err(|e| eyre!("Invalid push url {}: {}", push_url, e))?;

  let mut notifications = session.notifications().subscribe();
  session.connect(&WsTransport::new(url)).await?;
  println!("Watching notifications for {} (Ctrl-C to stop)", session.identity().user_id);

  loop {
    tokio::select! {
      received = notifications.recv() => match received {
        Ok(n) => println!("[{}] {}: {}", n.timestamp.format("%H:%M:%S"), n.event, n.message),
        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
          info!(skipped, "notification printer lagged");
        }
        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
      },
      _ = session.expired() => {
        eprintln!("Session expired");
        break;
      }
      _ = tokio::signal::ctrl_c() => break,
    }
  }
  Ok(())
}

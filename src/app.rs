//! App: wires the registry, lifecycle, router and writer together.

use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

use crate::config::Config;
use crate::lifecycle::LifecycleManager;
use crate::message::{spawn_writer, Ack, CommandEnvelope, DedicatedStoreWriter};
use crate::net::{Fetcher, HttpFetcher};
use crate::router::{InterceptedRequest, RequestMode, RouteOutcome, Router};
use crate::strategy::FetchStrategies;
use crate::tier::{SqliteStorage, TierNames, TierRegistry, TierStorage};

/// The engine behind the runtime adapter: one registry shared by the
/// lifecycle manager, the router's strategies and the dedicated-store writer.
pub struct App<S: TierStorage + 'static, F: Fetcher> {
  registry: TierRegistry<S>,
  lifecycle: LifecycleManager<S, F>,
  router: Router<S, F>,
  writer: DedicatedStoreWriter<S>,
}

impl App<SqliteStorage, HttpFetcher> {
  /// Build the production engine: SQLite tiers, reqwest transport.
  pub fn open(config: &Config) -> Result<Self> {
    let storage = match &config.data_dir {
      Some(dir) => {
        std::fs::create_dir_all(dir)?;
        SqliteStorage::open_at(&dir.join("tiers.db"))?
      }
      None => SqliteStorage::open()?,
    };

    Self::new(config, Arc::new(storage), Arc::new(HttpFetcher::new()))
  }
}

impl<S: TierStorage + 'static, F: Fetcher> App<S, F> {
  pub fn new(config: &Config, storage: Arc<S>, fetcher: Arc<F>) -> Result<Self> {
    let registry = TierRegistry::new(storage, TierNames::new(config.version));
    let store_url = config.store_url()?;
    let fallback_url = config.fallback_url()?;

    let strategies = FetchStrategies::new(
      registry.clone(),
      Arc::clone(&fetcher),
      &fallback_url,
      &store_url,
    );
    let router = Router::new(strategies, config.origin.clone(), config.store_path.clone());
    let lifecycle = LifecycleManager::new(
      registry.clone(),
      fetcher,
      config.origin.clone(),
      config.manifest.clone(),
    );
    let writer = DedicatedStoreWriter::new(registry.clone(), store_url);

    Ok(Self {
      registry,
      lifecycle,
      router,
      writer,
    })
  }

  /// Install phase: populate the shell tier from the manifest.
  pub async fn provision(&self) -> Result<()> {
    self.lifecycle.provision().await
  }

  /// Activate phase: reclaim stale tiers and take over interception.
  pub async fn activate(&self) -> Result<()> {
    self.lifecycle.activate().await
  }

  /// Route one intercepted request. Until activation has claimed control,
  /// requests pass through to the underlying transport untouched.
  pub async fn route(&self, req: &InterceptedRequest) -> RouteOutcome {
    if !self.lifecycle.is_controlling() {
      return RouteOutcome::Passthrough;
    }
    self.router.route(req).await
  }

  /// Convenience: route a GET for a URL.
  pub async fn get(&self, url: Url, mode: RequestMode) -> RouteOutcome {
    self.route(&InterceptedRequest::get(url, mode)).await
  }

  /// Whether the shell tier finished a complete provision.
  pub fn is_provisioned(&self) -> Result<bool> {
    self.lifecycle.is_provisioned()
  }

  /// Dispatch a raw JSON command; unrecognized kinds are ignored.
  pub fn handle_raw_command(&self, raw: &str) -> Result<Option<Ack>> {
    self.writer.handle_raw(raw)
  }

  /// Open the out-of-band write channel. Commands sent on the returned
  /// sender are acked back over each envelope's own reply channel.
  pub fn command_channel(
    &self,
  ) -> (
    mpsc::UnboundedSender<CommandEnvelope>,
    tokio::task::JoinHandle<()>,
  ) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = spawn_writer(self.writer.clone(), rx);
    (tx, handle)
  }

  /// Tier names currently present in storage.
  pub fn tiers(&self) -> Result<Vec<String>> {
    self.registry.list_tiers()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::message::Command;
  use crate::net::fake::FakeFetcher;
  use crate::tier::MemoryStorage;
  use std::time::Duration;
  use tokio::sync::oneshot;

  fn config() -> Config {
    serde_yaml::from_str(
      "origin: https://app.example\n\
       version: 2\n\
       manifest: [\"/\", \"/index.html\"]\n",
    )
    .unwrap()
  }

  fn app() -> (App<MemoryStorage, FakeFetcher>, FakeFetcher) {
    let fetcher = FakeFetcher::new();
    let app = App::new(
      &config(),
      Arc::new(MemoryStorage::new()),
      Arc::new(fetcher.clone()),
    )
    .unwrap();
    (app, fetcher)
  }

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  fn shell_assets(fetcher: &FakeFetcher) {
    fetcher.insert("https://app.example/", 200, "text/html", "root");
    fetcher.insert("https://app.example/index.html", 200, "text/html", "index");
  }

  #[tokio::test]
  async fn test_requests_pass_through_before_activation() {
    let (app, fetcher) = app();
    shell_assets(&fetcher);
    app.provision().await.unwrap();

    let outcome = app
      .get(url("https://app.example/index.html"), RequestMode::Navigate)
      .await;
    assert_eq!(outcome, RouteOutcome::Passthrough);
  }

  #[tokio::test]
  async fn test_install_then_serve_offline() {
    let (app, fetcher) = app();
    shell_assets(&fetcher);

    app.provision().await.unwrap();
    app.activate().await.unwrap();

    fetcher.set_offline(true);
    let outcome = app
      .get(url("https://app.example/index.html"), RequestMode::Navigate)
      .await;
    match outcome {
      RouteOutcome::Response(response) => assert_eq!(response.body, b"index"),
      other => panic!("expected cached shell asset, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_store_command_round_trip() {
    let (app, fetcher) = app();
    shell_assets(&fetcher);
    app.provision().await.unwrap();
    app.activate().await.unwrap();

    let (tx, handle) = app.command_channel();
    let (reply, ack) = oneshot::channel();
    tx.send(CommandEnvelope {
      command: Command::Store {
        payload: "<p>hi</p>".to_string(),
      },
      reply,
    })
    .unwrap();
    assert_eq!(ack.await.unwrap(), Ack::StoreOk);

    let outcome = app
      .get(url("https://app.example/_doc_"), RequestMode::Navigate)
      .await;
    match outcome {
      RouteOutcome::Response(response) => {
        assert_eq!(response.body, b"<p>hi</p>");
        assert_eq!(
          response.content_type.as_deref(),
          Some("text/html; charset=utf-8")
        );
      }
      other => panic!("expected user document, got {:?}", other),
    }

    // Clear and the placeholder comes back
    let ack = app
      .handle_raw_command(r#"{"kind":"CLEAR"}"#)
      .unwrap()
      .unwrap();
    assert_eq!(ack, Ack::ClearOk);

    let outcome = app
      .get(url("https://app.example/_doc_"), RequestMode::Navigate)
      .await;
    match outcome {
      RouteOutcome::Response(response) => assert_ne!(response.body, b"<p>hi</p>"),
      other => panic!("expected placeholder, got {:?}", other),
    }

    drop(tx);
    handle.await.unwrap();
  }

  #[tokio::test]
  async fn test_user_writes_never_leak_into_shell_lookups() {
    let (app, fetcher) = app();
    shell_assets(&fetcher);
    app.provision().await.unwrap();
    app.activate().await.unwrap();

    app
      .handle_raw_command(r#"{"kind":"STORE","payload":"<p>user</p>"}"#)
      .unwrap()
      .unwrap();

    // A same-origin request for a path that only exists in the user tier
    // must not be served from it: the cache misses and the network answers
    fetcher.insert("https://app.example/other", 200, "text/html", "net");
    let outcome = app
      .get(url("https://app.example/other"), RequestMode::Subresource)
      .await;
    match outcome {
      RouteOutcome::Response(response) => assert_eq!(response.body, b"net"),
      other => panic!("expected network response, got {:?}", other),
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
      app.tiers().unwrap(),
      vec!["shellkeeper-shell-v2", "shellkeeper-user-v2"]
    );
  }
}

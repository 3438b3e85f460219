//! Tier provisioning, stale-tier reclamation and interception takeover.

use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::net::Fetcher;
use crate::tier::{Entry, TierKind, TierRegistry, TierStorage};

/// Owns tier creation and destruction. No other component deletes tiers.
pub struct LifecycleManager<S: TierStorage, F: Fetcher> {
  registry: TierRegistry<S>,
  fetcher: Arc<F>,
  origin: Url,
  manifest: Vec<String>,
  controlling: AtomicBool,
}

impl<S: TierStorage, F: Fetcher> LifecycleManager<S, F> {
  pub fn new(registry: TierRegistry<S>, fetcher: Arc<F>, origin: Url, manifest: Vec<String>) -> Self {
    Self {
      registry,
      fetcher,
      origin,
      manifest,
      controlling: AtomicBool::new(false),
    }
  }

  /// Populate the shell tier from the static asset manifest.
  ///
  /// Every manifest path must fetch with a success status; responses are
  /// collected first and written only once all of them succeeded, so a
  /// failure never leaves a partial shell marked current. On success the
  /// tier is flagged ready and requests may be taken over immediately.
  pub async fn provision(&self) -> Result<()> {
    self.registry.open(TierKind::Shell)?;

    let mut fetched: Vec<(Url, crate::net::HttpResponse)> = Vec::with_capacity(self.manifest.len());
    for path in &self.manifest {
      let url = self
        .origin
        .join(path)
        .map_err(|e| eyre!("Invalid manifest path {}: {}", path, e))?;

      let response = self
        .fetcher
        .fetch(&url)
        .await
        .map_err(|e| eyre!("Provision failed fetching {}: {}", url, e))?;

      if !response.is_cacheable() {
        return Err(eyre!(
          "Provision failed fetching {}: status {}",
          url,
          response.status
        ));
      }

      fetched.push((url, response));
    }

    for (url, response) in &fetched {
      let entry = Entry::from_response("GET", url, response);
      self.registry.put(TierKind::Shell, &entry)?;
    }

    self.registry.mark_ready(TierKind::Shell)?;
    info!(
      "provisioned shell tier {} with {} assets",
      self.registry.names().shell(),
      fetched.len()
    );

    Ok(())
  }

  /// Reclaim superseded tiers and take over request interception.
  ///
  /// The two halves run concurrently and both must finish before activation
  /// is complete. A tier that fails to delete is skipped and left for the
  /// next activation; the deletion itself is irreversible.
  pub async fn activate(&self) -> Result<()> {
    let (reclaimed, ()) = tokio::join!(self.reclaim_stale(), self.claim());
    reclaimed?;

    info!("activated; controlling requests");
    Ok(())
  }

  /// Whether this manager has claimed request interception.
  pub fn is_controlling(&self) -> bool {
    self.controlling.load(Ordering::SeqCst)
  }

  /// Whether the shell tier finished a complete provision.
  pub fn is_provisioned(&self) -> Result<bool> {
    self.registry.is_ready(TierKind::Shell)
  }

  async fn reclaim_stale(&self) -> Result<()> {
    let names = self.registry.names().clone();

    for tier in self.registry.list_tiers()? {
      if names.is_live(&tier) {
        continue;
      }

      match self.registry.delete_tier(&tier) {
        Ok(_) => debug!("reclaimed stale tier {}", tier),
        // Left in place; the next activate retries it
        Err(e) => warn!("failed to reclaim tier {}: {}", tier, e),
      }
    }

    Ok(())
  }

  async fn claim(&self) {
    self.controlling.store(true, Ordering::SeqCst);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::fake::FakeFetcher;
  use crate::tier::{MemoryStorage, TierNames};

  const ORIGIN: &str = "https://app.example";

  fn manager(
    manifest: &[&str],
    version: u32,
  ) -> (LifecycleManager<MemoryStorage, FakeFetcher>, FakeFetcher) {
    let storage = Arc::new(MemoryStorage::new());
    manager_with_storage(storage, manifest, version)
  }

  fn manager_with_storage(
    storage: Arc<MemoryStorage>,
    manifest: &[&str],
    version: u32,
  ) -> (LifecycleManager<MemoryStorage, FakeFetcher>, FakeFetcher) {
    let registry = TierRegistry::new(storage, TierNames::new(version));
    let fetcher = FakeFetcher::new();
    let manager = LifecycleManager::new(
      registry,
      Arc::new(fetcher.clone()),
      Url::parse(ORIGIN).unwrap(),
      manifest.iter().map(|s| s.to_string()).collect(),
    );
    (manager, fetcher)
  }

  #[tokio::test]
  async fn test_provision_populates_and_marks_ready() {
    let (manager, fetcher) = manager(&["/", "/index.html"], 2);
    fetcher.insert("https://app.example/", 200, "text/html", "root");
    fetcher.insert("https://app.example/index.html", 200, "text/html", "index");

    manager.provision().await.unwrap();

    assert!(manager.is_provisioned().unwrap());
    let key = crate::tier::request_key("GET", &Url::parse("https://app.example/index.html").unwrap());
    let entry = manager.registry.get(TierKind::Shell, &key).unwrap().unwrap();
    assert_eq!(entry.body, b"index");
  }

  #[tokio::test]
  async fn test_provision_fails_whole_on_one_bad_asset() {
    let (manager, fetcher) = manager(&["/", "/index.html"], 2);
    fetcher.insert("https://app.example/", 200, "text/html", "root");
    // /index.html missing: that fetch fails

    assert!(manager.provision().await.is_err());
    assert!(!manager.is_provisioned().unwrap());

    // No partial shell: nothing was written
    let key = crate::tier::request_key("GET", &Url::parse("https://app.example/").unwrap());
    assert!(manager.registry.get(TierKind::Shell, &key).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_provision_rejects_error_statuses() {
    let (manager, fetcher) = manager(&["/icons/icon-192.png"], 2);
    fetcher.insert("https://app.example/icons/icon-192.png", 404, "text/html", "nope");

    assert!(manager.provision().await.is_err());
    assert!(!manager.is_provisioned().unwrap());
  }

  #[tokio::test]
  async fn test_activate_reclaims_everything_but_live_set() {
    let storage = Arc::new(MemoryStorage::new());
    // Tiers left behind by earlier versions
    storage.ensure_tier("shellkeeper-shell-v1").unwrap();
    storage.ensure_tier("shellkeeper-user-v1").unwrap();
    storage.ensure_tier("some-other-cache").unwrap();
    storage.ensure_tier("shellkeeper-shell-v2").unwrap();
    storage.ensure_tier("shellkeeper-user-v2").unwrap();

    let (manager, _) = manager_with_storage(storage, &[], 2);
    manager.activate().await.unwrap();

    assert_eq!(
      manager.registry.list_tiers().unwrap(),
      vec!["shellkeeper-shell-v2", "shellkeeper-user-v2"]
    );
  }

  #[tokio::test]
  async fn test_activate_claims_control() {
    let (manager, _) = manager(&[], 2);
    assert!(!manager.is_controlling());

    manager.activate().await.unwrap();
    assert!(manager.is_controlling());
  }

  /// Storage wrapper whose tier deletion always fails.
  struct StuckTiers(MemoryStorage);

  impl crate::tier::TierStorage for StuckTiers {
    fn ensure_tier(&self, name: &str) -> Result<()> {
      self.0.ensure_tier(name)
    }
    fn put_entry(&self, tier: &str, entry: &Entry) -> Result<()> {
      self.0.put_entry(tier, entry)
    }
    fn get_entry(&self, tier: &str, key: &str) -> Result<Option<Entry>> {
      self.0.get_entry(tier, key)
    }
    fn delete_entry(&self, tier: &str, key: &str) -> Result<bool> {
      self.0.delete_entry(tier, key)
    }
    fn list_tiers(&self) -> Result<Vec<String>> {
      self.0.list_tiers()
    }
    fn delete_tier(&self, _name: &str) -> Result<bool> {
      Err(eyre!("database is locked"))
    }
    fn set_ready(&self, tier: &str, ready: bool) -> Result<()> {
      self.0.set_ready(tier, ready)
    }
    fn is_ready(&self, tier: &str) -> Result<bool> {
      self.0.is_ready(tier)
    }
  }

  #[tokio::test]
  async fn test_failed_reclaim_does_not_fail_activation() {
    let storage = Arc::new(StuckTiers(MemoryStorage::new()));
    storage.ensure_tier("shellkeeper-shell-v1").unwrap();

    let registry = TierRegistry::new(storage, TierNames::new(2));
    let manager = LifecycleManager::new(
      registry,
      Arc::new(FakeFetcher::new()),
      Url::parse(ORIGIN).unwrap(),
      Vec::new(),
    );

    manager.activate().await.unwrap();
    assert!(manager.is_controlling());
    // The stale tier stays behind for the next activation to retry
    assert_eq!(
      manager.registry.list_tiers().unwrap(),
      vec!["shellkeeper-shell-v1"]
    );
  }

  #[tokio::test]
  async fn test_upgrade_reclaims_prior_version_after_provision() {
    let storage = Arc::new(MemoryStorage::new());

    let (old, fetcher) = manager_with_storage(Arc::clone(&storage), &["/"], 1);
    fetcher.insert("https://app.example/", 200, "text/html", "v1 shell");
    old.provision().await.unwrap();
    old.activate().await.unwrap();

    let (new, fetcher) = manager_with_storage(Arc::clone(&storage), &["/"], 2);
    fetcher.insert("https://app.example/", 200, "text/html", "v2 shell");
    new.provision().await.unwrap();
    new.activate().await.unwrap();

    assert_eq!(
      new.registry.list_tiers().unwrap(),
      vec!["shellkeeper-shell-v2"]
    );
  }
}

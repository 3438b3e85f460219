//! Tier registry: the single handle through which every component reaches
//! the live tiers.

use color_eyre::Result;
use std::sync::Arc;

use super::entry::Entry;
use super::storage::TierStorage;

/// The two kinds of live tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierKind {
  /// Fixed static assets the application needs to load offline
  Shell,
  /// Single-slot store for the user-supplied document
  User,
}

/// Current tier names, with the version tag baked in.
///
/// The tag exists only to tell the live set apart from superseded tiers so
/// activation can reclaim them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierNames {
  shell: String,
  user: String,
}

impl TierNames {
  pub fn new(version: u32) -> Self {
    Self {
      shell: format!("shellkeeper-shell-v{}", version),
      user: format!("shellkeeper-user-v{}", version),
    }
  }

  pub fn shell(&self) -> &str {
    &self.shell
  }

  pub fn user(&self) -> &str {
    &self.user
  }

  pub fn name(&self, kind: TierKind) -> &str {
    match kind {
      TierKind::Shell => &self.shell,
      TierKind::User => &self.user,
    }
  }

  /// Whether a stored tier name belongs to the live set.
  pub fn is_live(&self, name: &str) -> bool {
    name == self.shell || name == self.user
  }
}

/// Registry over a storage backend and the current live-set names.
///
/// Tiers are opened lazily: the backing row is created on first access.
/// Entry-level writes belong to the strategies and the dedicated-store
/// writer; wholesale tier deletion belongs to the lifecycle manager alone.
pub struct TierRegistry<S: TierStorage> {
  storage: Arc<S>,
  names: TierNames,
}

impl<S: TierStorage> TierRegistry<S> {
  pub fn new(storage: Arc<S>, names: TierNames) -> Self {
    Self { storage, names }
  }

  pub fn names(&self) -> &TierNames {
    &self.names
  }

  /// Open a live tier, creating it if absent. Returns its name.
  pub fn open(&self, kind: TierKind) -> Result<&str> {
    let name = self.names.name(kind);
    self.storage.ensure_tier(name)?;
    Ok(name)
  }

  /// Write an entry into a live tier.
  pub fn put(&self, kind: TierKind, entry: &Entry) -> Result<()> {
    let name = self.open(kind)?;
    self.storage.put_entry(name, entry)
  }

  /// Look up an entry in a live tier.
  pub fn get(&self, kind: TierKind, key: &str) -> Result<Option<Entry>> {
    self.storage.get_entry(self.names.name(kind), key)
  }

  /// Delete an entry from a live tier. Absent entries are not an error.
  pub fn delete(&self, kind: TierKind, key: &str) -> Result<bool> {
    self.storage.delete_entry(self.names.name(kind), key)
  }

  /// Look up a key across the live set, shell tier first.
  pub fn match_live(&self, key: &str) -> Result<Option<Entry>> {
    if let Some(entry) = self.get(TierKind::Shell, key)? {
      return Ok(Some(entry));
    }
    self.get(TierKind::User, key)
  }

  /// All tier names present in storage, live or stale.
  pub fn list_tiers(&self) -> Result<Vec<String>> {
    self.storage.list_tiers()
  }

  /// Irreversibly delete a tier and its entries.
  pub fn delete_tier(&self, name: &str) -> Result<bool> {
    self.storage.delete_tier(name)
  }

  /// Mark the shell tier fully provisioned.
  pub fn mark_ready(&self, kind: TierKind) -> Result<()> {
    self.storage.set_ready(self.names.name(kind), true)
  }

  pub fn is_ready(&self, kind: TierKind) -> Result<bool> {
    self.storage.is_ready(self.names.name(kind))
  }
}

impl<S: TierStorage> Clone for TierRegistry<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      names: self.names.clone(),
    }
  }
}

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the application shell is served from
  pub origin: Url,
  /// Version tag baked into tier names; bump it to retire the previous tiers
  pub version: u32,
  /// Exact path of the dedicated user-document slot
  #[serde(default = "default_store_path")]
  pub store_path: String,
  /// Static asset manifest: paths pre-populated into the shell tier
  #[serde(default = "default_manifest")]
  pub manifest: Vec<String>,
  /// Document served when a navigation fails offline
  #[serde(default = "default_navigation_fallback")]
  pub navigation_fallback: String,
  /// Where the tier database and logs live (defaults to the XDG data dir)
  pub data_dir: Option<PathBuf>,
}

fn default_store_path() -> String {
  "/_doc_".to_string()
}

fn default_navigation_fallback() -> String {
  "/index.html".to_string()
}

fn default_manifest() -> Vec<String> {
  vec![
    "/".to_string(),
    "/index.html".to_string(),
    "/manifest.webmanifest".to_string(),
    "/icons/icon-192.png".to_string(),
    "/icons/icon-512.png".to_string(),
  ]
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shellkeeper.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shellkeeper/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/shellkeeper/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("shellkeeper.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shellkeeper").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Absolute URL of the dedicated user-document slot.
  pub fn store_url(&self) -> Result<Url> {
    self
      .origin
      .join(&self.store_path)
      .map_err(|e| eyre!("Invalid store path {}: {}", self.store_path, e))
  }

  /// Absolute URL of the offline navigation fallback document.
  pub fn fallback_url(&self) -> Result<Url> {
    self
      .origin
      .join(&self.navigation_fallback)
      .map_err(|e| eyre!("Invalid fallback path {}: {}", self.navigation_fallback, e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_gets_defaults() {
    let config: Config = serde_yaml::from_str(
      "origin: https://app.example\n\
       version: 2\n",
    )
    .unwrap();

    assert_eq!(config.store_path, "/_doc_");
    assert_eq!(config.navigation_fallback, "/index.html");
    assert!(config.manifest.contains(&"/index.html".to_string()));
    assert!(config.data_dir.is_none());
  }

  #[test]
  fn test_explicit_fields_override_defaults() {
    let config: Config = serde_yaml::from_str(
      "origin: https://notes.example\n\
       version: 7\n\
       store_path: /_site_\n\
       manifest: [\"/\", \"/app.js\"]\n\
       navigation_fallback: /offline.html\n",
    )
    .unwrap();

    assert_eq!(config.version, 7);
    assert_eq!(config.store_path, "/_site_");
    assert_eq!(config.manifest, vec!["/", "/app.js"]);
    assert_eq!(config.navigation_fallback, "/offline.html");
  }

  #[test]
  fn test_urls_resolve_against_origin() {
    let config: Config = serde_yaml::from_str(
      "origin: https://app.example\n\
       version: 1\n",
    )
    .unwrap();

    assert_eq!(
      config.store_url().unwrap().as_str(),
      "https://app.example/_doc_"
    );
    assert_eq!(
      config.fallback_url().unwrap().as_str(),
      "https://app.example/index.html"
    );
  }
}

//! Out-of-band command channel: store or clear the user document.

use chrono::Utc;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};
use url::Url;

use crate::tier::{request_key, Entry, TierKind, TierRegistry, TierStorage, HTML_CONTENT_TYPE};

/// Commands accepted on the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Command {
  /// Store the payload as the current user document
  #[serde(rename = "STORE")]
  Store { payload: String },
  /// Drop the current user document
  #[serde(rename = "CLEAR")]
  Clear,
}

/// Acknowledgement sent back to the command's originating caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Ack {
  #[serde(rename = "STORE_OK")]
  StoreOk,
  #[serde(rename = "CLEAR_OK")]
  ClearOk,
}

/// A command paired with the reply address of its caller.
#[derive(Debug)]
pub struct CommandEnvelope {
  pub command: Command,
  pub reply: oneshot::Sender<Ack>,
}

/// Handles write and clear commands against the user tier.
///
/// Both operations are idempotent; concurrent commands race with
/// last-write-wins and no locking beyond the storage layer.
pub struct DedicatedStoreWriter<S: TierStorage> {
  registry: TierRegistry<S>,
  store_url: Url,
}

impl<S: TierStorage> DedicatedStoreWriter<S> {
  pub fn new(registry: TierRegistry<S>, store_url: Url) -> Self {
    Self {
      registry,
      store_url,
    }
  }

  fn dedicated_key(&self) -> String {
    request_key("GET", &self.store_url)
  }

  /// Overwrite the single user-document slot with the payload.
  pub fn store(&self, payload: &str) -> Result<Ack> {
    let entry = Entry {
      key: self.dedicated_key(),
      url: self.store_url.to_string(),
      status: 200,
      content_type: Some(HTML_CONTENT_TYPE.to_string()),
      body: payload.as_bytes().to_vec(),
      stored_at: Utc::now(),
    };

    self.registry.put(TierKind::User, &entry)?;
    info!("stored user document ({} bytes)", payload.len());
    Ok(Ack::StoreOk)
  }

  /// Delete the user document if present. Absence is not an error.
  pub fn clear(&self) -> Result<Ack> {
    self.registry.open(TierKind::User)?;
    self.registry.delete(TierKind::User, &self.dedicated_key())?;
    info!("cleared user document");
    Ok(Ack::ClearOk)
  }

  /// Dispatch a typed command.
  pub fn handle(&self, command: &Command) -> Result<Ack> {
    match command {
      Command::Store { payload } => self.store(payload),
      Command::Clear => self.clear(),
    }
  }

  /// Dispatch a raw JSON command. Unrecognized kinds are silently ignored.
  pub fn handle_raw(&self, raw: &str) -> Result<Option<Ack>> {
    match serde_json::from_str::<Command>(raw) {
      Ok(command) => self.handle(&command).map(Some),
      Err(e) => {
        debug!("ignoring unrecognized command: {}", e);
        Ok(None)
      }
    }
  }
}

impl<S: TierStorage> Clone for DedicatedStoreWriter<S> {
  fn clone(&self) -> Self {
    Self {
      registry: self.registry.clone(),
      store_url: self.store_url.clone(),
    }
  }
}

/// Spawn the writer loop; each envelope's ack goes back over its own reply
/// channel, so concurrent callers each receive exactly their own ack.
pub fn spawn_writer<S: TierStorage + 'static>(
  writer: DedicatedStoreWriter<S>,
  mut rx: mpsc::UnboundedReceiver<CommandEnvelope>,
) -> tokio::task::JoinHandle<()> {
  tokio::spawn(async move {
    while let Some(envelope) = rx.recv().await {
      match writer.handle(&envelope.command) {
        Ok(ack) => {
          // A departed caller is fine; the write already happened
          let _ = envelope.reply.send(ack);
        }
        Err(e) => {
          debug!("command failed, no ack sent: {}", e);
        }
      }
    }
  })
}

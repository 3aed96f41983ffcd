//! Lazily built, config-keyed model clients.
//!
//! A [`ClientRegistry`] owns at most one live client. Every acquisition
//! passes the current [`ClientConfig`]; if it equals the config the cached
//! client was built with, the same `Arc` is handed out again, otherwise
//! the factory builds a replacement and the old client is dropped once
//! in-flight callers release it.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::config::ClientConfig;
use crate::error::Result;

/// Builds a client from its configuration.
pub type ClientFactory<T> = Box<dyn Fn(&ClientConfig) -> Result<Arc<T>> + Send + Sync>;

/// Cache of one client, invalidated by config changes or [`reset`](Self::reset).
pub struct ClientRegistry<T: ?Sized> {
    name: &'static str,
    factory: ClientFactory<T>,
    slot: Mutex<Option<(ClientConfig, Arc<T>)>>,
}

impl<T: ?Sized> ClientRegistry<T> {
    pub fn new(name: &'static str, factory: ClientFactory<T>) -> Self {
        Self {
            name,
            factory,
            slot: Mutex::new(None),
        }
    }

    /// Return the client for `config`, building it if needed.
    ///
    /// Construction happens under the registry lock, so two racing callers
    /// with the same config never build two clients.
    pub fn acquire(&self, config: &ClientConfig) -> Result<Arc<T>> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((cached_config, client)) = slot.as_ref() {
            if cached_config == config {
                return Ok(Arc::clone(client));
            }
            debug!(registry = self.name, "Config changed, rebuilding client");
        } else {
            debug!(registry = self.name, model = %config.model_name, "Building client");
        }

        let client = (self.factory)(config)?;
        *slot = Some((config.clone(), Arc::clone(&client)));
        Ok(client)
    }

    /// Drop the cached client; the next acquisition rebuilds.
    pub fn reset(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.take().is_some() {
            debug!(registry = self.name, "Client cache reset");
        }
    }

    /// Whether a client is currently cached.
    pub fn is_cached(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

//! Backend registry.
//!
//! Each engine owns one registry holding the single active backend for its
//! protocol family. Registering replaces the previous backend; the last
//! registration wins.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use qkd_etsi_api::etsi004::{SimulatedStreamBackend, StreamBackend};
//! use qkd_etsi_api::registry::BackendRegistry;
//!
//! let registry: BackendRegistry<dyn StreamBackend> = BackendRegistry::new();
//! assert!(registry.active().is_none());
//!
//! registry.register(Arc::new(SimulatedStreamBackend::new()));
//! assert_eq!(registry.active().unwrap().name(), "simulated");
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

/// Boxed future returned by backend trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Holder of the active backend for one protocol family.
pub struct BackendRegistry<B: ?Sized> {
    active: RwLock<Option<Arc<B>>>,
}

impl<B: ?Sized> BackendRegistry<B> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            active: RwLock::new(None),
        }
    }

    /// Create a registry with `backend` already active.
    pub fn with_backend(backend: Arc<B>) -> Self {
        Self {
            active: RwLock::new(Some(backend)),
        }
    }

    /// Make `backend` the active one. Returns the backend it replaced.
    pub fn register(&self, backend: Arc<B>) -> Option<Arc<B>> {
        let mut slot = self.active.write().unwrap_or_else(PoisonError::into_inner);
        slot.replace(backend)
    }

    /// The active backend, if any.
    pub fn active(&self) -> Option<Arc<B>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Unregister the active backend.
    pub fn clear(&self) -> Option<Arc<B>> {
        self.active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Check whether a backend is registered.
    pub fn is_registered(&self) -> bool {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl<B: ?Sized> Default for BackendRegistry<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: ?Sized> std::fmt::Debug for BackendRegistry<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("registered", &self.is_registered())
            .finish()
    }
}

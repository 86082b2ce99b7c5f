//! Function registry and the startup initialization pass.
//!
//! Functions are registered exactly once, during [`Registry::initialize`].
//! After that the registry is read-only and shared behind an `Arc`.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use tracing::{debug, info};

use super::context::Context;
use super::error::InvokeError;
use super::logger::RuntimeLogger;
use super::module::Module;
use crate::{LinnaError, Result};

/// Future returned by an [`RpcFunction`].
pub type RpcFuture = BoxFuture<'static, std::result::Result<String, InvokeError>>;

/// A registered RPC function: payload in, payload out.
pub trait RpcFunction: Send + Sync {
    fn call(
        &self,
        ctx: Arc<Context>,
        logger: RuntimeLogger,
        nk: Arc<Module>,
        payload: String,
    ) -> RpcFuture;
}

/// Adapter turning an async closure into an [`RpcFunction`].
struct FnRpc<F>(F);

impl<F, Fut> RpcFunction for FnRpc<F>
where
    F: Fn(Arc<Context>, RuntimeLogger, Arc<Module>, String) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<String, InvokeError>> + Send + 'static,
{
    fn call(
        &self,
        ctx: Arc<Context>,
        logger: RuntimeLogger,
        nk: Arc<Module>,
        payload: String,
    ) -> RpcFuture {
        Box::pin((self.0)(ctx, logger, nk, payload))
    }
}

/// Lifecycle of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    Uninitialized,
    Initializing,
    Ready,
}

/// Registration handle, valid only during the initialization pass.
pub struct Initializer {
    functions: IndexMap<String, Arc<dyn RpcFunction>>,
}

impl Initializer {
    fn new() -> Self {
        Self {
            functions: IndexMap::new(),
        }
    }

    pub fn state(&self) -> RegistryState {
        RegistryState::Initializing
    }

    /// Register `function` under `id`.
    ///
    /// Identifiers are case-insensitive. An empty or already registered
    /// identifier is rejected.
    pub fn register_rpc(&mut self, id: &str, function: Arc<dyn RpcFunction>) -> Result<()> {
        let id = normalize_id(id);
        if id.is_empty() {
            return Err(LinnaError::Registration(
                "RPC function id must not be empty".to_string(),
            ));
        }
        if self.functions.contains_key(&id) {
            return Err(LinnaError::Registration(format!(
                "RPC function '{id}' is already registered"
            )));
        }

        debug!("Registered RPC function '{}'", id);
        self.functions.insert(id, function);
        Ok(())
    }

    /// Register an async closure under `id`.
    pub fn register_fn<F, Fut>(&mut self, id: &str, function: F) -> Result<()>
    where
        F: Fn(Arc<Context>, RuntimeLogger, Arc<Module>, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<String, InvokeError>> + Send + 'static,
    {
        self.register_rpc(id, Arc::new(FnRpc(function)))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.functions.contains_key(&normalize_id(id))
    }
}

/// Read-only mapping from identifier to function.
pub struct Registry {
    functions: IndexMap<String, Arc<dyn RpcFunction>>,
    state: RegistryState,
}

impl Registry {
    /// Run the initialization pass.
    ///
    /// If `init` fails nothing is published and the error is returned.
    pub fn initialize<F>(init: F) -> Result<Registry>
    where
        F: FnOnce(&mut Initializer) -> Result<()>,
    {
        let mut initializer = Initializer::new();
        init(&mut initializer)?;

        info!(
            "Registry ready with {} RPC function(s)",
            initializer.functions.len()
        );
        Ok(Registry {
            functions: initializer.functions,
            state: RegistryState::Ready,
        })
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn RpcFunction>> {
        self.functions.get(&normalize_id(id)).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.functions.contains_key(&normalize_id(id))
    }

    /// Registered identifiers in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn state(&self) -> RegistryState {
        self.state
    }
}

impl Default for Registry {
    /// An uninitialized registry. Every lookup misses.
    fn default() -> Self {
        Self {
            functions: IndexMap::new(),
            state: RegistryState::Uninitialized,
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("state", &self.state)
            .field("ids", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub(crate) fn normalize_id(id: &str) -> String {
    id.trim().to_lowercase()
}

//! Lua script host.
//!
//! Loads every module under the runtime directory into a pool of sandboxed
//! VMs and registers the RPC functions they declare.

mod api;
mod engine;
mod journal;
mod loader;
mod worker;

pub use engine::{LuaEngine, ResourceLimits};
pub use loader::{LuaModule, ModuleLoader};

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::info;

use super::context::Context;
use super::logger::RuntimeLogger;
use super::module::Module;
use super::registry::{Initializer, RpcFunction, RpcFuture};
use crate::config::RuntimeConfig;
use crate::{LinnaError, Result};
use worker::{LuaPool, WorkerSetup};

/// Entry point for loading Lua modules.
pub struct LuaRuntime;

impl LuaRuntime {
    /// Load all modules from `config.path` and register their functions.
    ///
    /// Must be called from within a tokio runtime; capability calls made by
    /// scripts run on it. Returns the number of functions registered.
    pub fn load(
        config: &RuntimeConfig,
        module: Arc<Module>,
        init: &mut Initializer,
    ) -> Result<usize> {
        let modules = ModuleLoader::new(&config.path).load_all()?;
        if modules.is_empty() {
            return Ok(0);
        }
        let module_count = modules.len();

        let handle = Handle::try_current().map_err(|_| {
            LinnaError::Script("Lua runtime must be loaded inside a tokio runtime".to_string())
        })?;

        let setup = WorkerSetup {
            modules,
            module,
            handle,
            limits: ResourceLimits::from_config(config),
            env: config.env.clone(),
            node: config.node.clone(),
        };
        let (pool, ids) = LuaPool::start(setup, config.pool_size.max(1))?;
        let pool = Arc::new(pool);

        for id in &ids {
            init.register_rpc(
                id,
                Arc::new(LuaRpcFunction {
                    id: id.clone(),
                    pool: Arc::clone(&pool),
                }),
            )?;
        }

        info!(
            "Loaded {} Lua module(s) registering {} RPC function(s) on {} VM(s)",
            module_count,
            ids.len(),
            config.pool_size.max(1)
        );
        Ok(ids.len())
    }
}

/// RPC function implemented by a Lua module.
struct LuaRpcFunction {
    id: String,
    pool: Arc<LuaPool>,
}

impl RpcFunction for LuaRpcFunction {
    fn call(
        &self,
        ctx: Arc<Context>,
        logger: RuntimeLogger,
        _nk: Arc<Module>,
        payload: String,
    ) -> RpcFuture {
        let pool = Arc::clone(&self.pool);
        let id = self.id.clone();
        Box::pin(async move { pool.call(id, ctx, logger, payload).await })
    }
}

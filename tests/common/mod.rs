//! Test helpers for integration tests.
//!
//! Builds modules, registries and dispatchers around temporary Lua module
//! directories.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use linna::config::RuntimeConfig;
use linna::{Dispatcher, LuaRuntime, Module, Registry, Result};

/// Node name used by test dispatchers.
pub const TEST_NODE: &str = "test-node";

/// A module with no database and a short HTTP timeout.
pub fn test_module() -> Arc<Module> {
    Arc::new(
        Module::builder()
            .http_timeout(Duration::from_secs(2))
            .build()
            .expect("Failed to build module"),
    )
}

/// Write a Lua module into `dir`.
pub fn write_module(dir: &Path, name: &str, source: &str) {
    std::fs::write(dir.join(name), source).expect("Failed to write module");
}

/// Runtime configuration pointing at `dir`.
pub fn runtime_config(dir: &Path, pool_size: usize) -> RuntimeConfig {
    RuntimeConfig {
        path: dir.to_string_lossy().into_owned(),
        env: HashMap::from([("region".to_string(), "eu".to_string())]),
        pool_size,
        node: TEST_NODE.to_string(),
        ..Default::default()
    }
}

/// Load every module in `dir` into a fresh registry.
///
/// Must run inside a multi-thread tokio runtime. Module init functions may
/// call async capabilities, so the runtime keeps running while this blocks.
pub fn load_registry(dir: &Path, module: Arc<Module>, pool_size: usize) -> Result<Registry> {
    let config = runtime_config(dir, pool_size);
    tokio::task::block_in_place(|| {
        Registry::initialize(|init| LuaRuntime::load(&config, module, init).map(|_| ()))
    })
}

/// Dispatcher over the Lua modules given as `(file name, source)` pairs.
///
/// The returned directory must outlive the dispatcher's startup.
pub fn lua_dispatcher(modules: &[(&str, &str)]) -> (Dispatcher, TempDir) {
    lua_dispatcher_with(test_module(), modules)
}

/// Like [`lua_dispatcher`] with a caller-built capability module.
pub fn lua_dispatcher_with(module: Arc<Module>, modules: &[(&str, &str)]) -> (Dispatcher, TempDir) {
    lua_dispatcher_sized(module, modules, 2)
}

/// Like [`lua_dispatcher_with`] over `pool_size` VMs.
pub fn lua_dispatcher_sized(
    module: Arc<Module>,
    modules: &[(&str, &str)],
    pool_size: usize,
) -> (Dispatcher, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    for (name, source) in modules {
        write_module(dir.path(), name, source);
    }

    let registry =
        load_registry(dir.path(), Arc::clone(&module), pool_size).expect("Failed to load");
    let dispatcher = Dispatcher::new(
        HashMap::from([("region".to_string(), "eu".to_string())]),
        TEST_NODE,
        Arc::new(registry),
        module,
    );
    (dispatcher, dir)
}

/// Lua module registering a handful of RPCs used across tests.
pub const GAME_MODULE: &str = r#"
local function echo(ctx, logger, nk, payload)
  return payload
end

local function whoami(ctx, logger, nk, payload)
  return nk.json_encode({
    user_id = ctx.user_id,
    session_id = ctx.session_id,
    node = ctx.node,
    region = ctx.env.region,
    lang = ctx.lang,
  })
end

local function forbidden(ctx, logger, nk, payload)
  nk.error("not allowed", nk.codes.PERMISSION_DENIED)
end

return function(ctx, logger, nk, initializer)
  initializer:register_rpc("echo", echo)
  initializer:register_rpc("whoami", whoami)
  initializer:register_rpc("forbidden", forbidden)
end
"#;

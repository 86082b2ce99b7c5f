//! Sandboxed Lua VM with resource limits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mlua::{FromLuaMulti, Function, HookTriggers, IntoLuaMulti, Lua, Value, VmState};

use crate::config::RuntimeConfig;
use crate::{LinnaError, Result};

/// Globals removed from every VM.
const BLOCKED_GLOBALS: [&str; 9] = [
    "os",
    "io",
    "loadfile",
    "dofile",
    "load",
    "require",
    "package",
    "debug",
    "collectgarbage",
];

/// Instructions between limit checks.
const HOOK_INTERVAL: u32 = 10_000;

/// Resource limits for script execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Maximum number of instructions per call (0 = unlimited).
    pub max_instructions: u64,
    /// Maximum memory in bytes (0 = unlimited).
    pub max_memory: usize,
}

impl ResourceLimits {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            max_instructions: config.max_instructions,
            max_memory: config.max_memory_mb * 1024 * 1024,
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_instructions: 10_000_000,
            max_memory: 64 * 1024 * 1024,
        }
    }
}

/// One Lua VM with the sandbox applied.
pub struct LuaEngine {
    lua: Lua,
    instruction_count: Arc<AtomicU64>,
    limits: ResourceLimits,
}

impl LuaEngine {
    pub fn new(limits: ResourceLimits) -> Result<Self> {
        let lua = Lua::new();
        Self::apply_sandbox(&lua)?;

        if limits.max_memory > 0 {
            lua.set_memory_limit(limits.max_memory)
                .map_err(|e| LinnaError::Script(format!("failed to set memory limit: {e}")))?;
        }

        Ok(Self {
            lua,
            instruction_count: Arc::new(AtomicU64::new(0)),
            limits,
        })
    }

    fn apply_sandbox(lua: &Lua) -> Result<()> {
        let globals = lua.globals();
        for name in BLOCKED_GLOBALS {
            globals
                .set(name, Value::Nil)
                .map_err(|e| LinnaError::Script(format!("failed to disable {name}: {e}")))?;
        }
        Ok(())
    }

    /// Run a module chunk and return its result.
    pub fn exec_chunk(&self, name: &str, source: &str) -> mlua::Result<Value> {
        self.limited(|| self.lua.load(source).set_name(name).eval())
    }

    /// Call `function` under the instruction limit.
    pub fn call<R: FromLuaMulti>(
        &self,
        function: &Function,
        args: impl IntoLuaMulti,
    ) -> mlua::Result<R> {
        self.limited(|| function.call(args))
    }

    fn limited<R>(&self, run: impl FnOnce() -> mlua::Result<R>) -> mlua::Result<R> {
        self.instruction_count.store(0, Ordering::SeqCst);

        if self.limits.max_instructions > 0 {
            let count = Arc::clone(&self.instruction_count);
            let limit = self.limits.max_instructions;

            self.lua.set_hook(
                HookTriggers::new().every_nth_instruction(HOOK_INTERVAL),
                move |_lua, _debug| {
                    let current = count.fetch_add(u64::from(HOOK_INTERVAL), Ordering::SeqCst)
                        + u64::from(HOOK_INTERVAL);
                    if current > limit {
                        Err(mlua::Error::RuntimeError(
                            "script exceeded instruction limit".to_string(),
                        ))
                    } else {
                        Ok(VmState::Continue)
                    }
                },
            );
        }

        let result = run();
        self.lua.remove_hook();
        result
    }

    /// Freeze the current globals behind a read-only fallback.
    ///
    /// Globals assigned afterwards land in the globals table itself and
    /// shadow the frozen set until [`LuaEngine::clear_call_globals`] runs.
    pub fn seal_globals(&self) -> mlua::Result<()> {
        let globals = self.lua.globals();
        let frozen = self.lua.create_table()?;
        let mut names = Vec::new();
        for pair in globals.clone().pairs::<Value, Value>() {
            let (name, value) = pair?;
            frozen.raw_set(name.clone(), value)?;
            names.push(name);
        }
        for name in names {
            globals.raw_set(name, Value::Nil)?;
        }

        let meta = self.lua.create_table()?;
        meta.raw_set("__index", frozen)?;
        meta.raw_set("__metatable", false)?;
        globals.set_metatable(Some(meta));
        Ok(())
    }

    /// Drop every global assigned since [`LuaEngine::seal_globals`].
    pub fn clear_call_globals(&self) -> mlua::Result<()> {
        let globals = self.lua.globals();
        let names = globals
            .clone()
            .pairs::<Value, Value>()
            .map(|pair| pair.map(|(name, _)| name))
            .collect::<mlua::Result<Vec<_>>>()?;
        for name in names {
            globals.raw_set(name, Value::Nil)?;
        }
        Ok(())
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }
}

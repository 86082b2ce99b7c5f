//! Pool of Lua VMs, each owned by one worker thread.
//!
//! Lua state is not thread-safe, so every worker boots its own VM with all
//! modules loaded. The first VM boots alone and records the side effects its
//! init makes; the rest replay that record. Calls arrive on a shared job
//! channel and answers go back over a oneshot channel per call.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use indexmap::IndexMap;
use mlua::{Function, Table, Value};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use super::api::{context_value, invoke_error, payload_from_value, LuaInitializer, LuaLogger, NkApi};
use super::engine::{LuaEngine, ResourceLimits};
use super::journal::{InitJournal, Journal};
use super::loader::LuaModule;
use crate::runtime::context::Context;
use crate::runtime::error::InvokeError;
use crate::runtime::logger::RuntimeLogger;
use crate::runtime::module::Module;
use crate::{LinnaError, Result};

/// Everything a worker needs to boot its VM.
pub(crate) struct WorkerSetup {
    pub modules: Vec<LuaModule>,
    pub module: Arc<Module>,
    pub handle: Handle,
    pub limits: ResourceLimits,
    pub env: HashMap<String, String>,
    pub node: String,
}

struct Job {
    id: String,
    ctx: Arc<Context>,
    logger: RuntimeLogger,
    payload: String,
    span: tracing::Span,
    reply: oneshot::Sender<std::result::Result<String, InvokeError>>,
}

/// How a VM treats init-time side effects.
enum Boot {
    Primary,
    Replica(Arc<Journal>),
}

type BootReport = std::result::Result<(Vec<String>, Journal), String>;

/// Handle to the running workers. Dropping it stops them.
pub(crate) struct LuaPool {
    jobs: Sender<Job>,
}

impl LuaPool {
    /// Boot `size` workers and wait until every VM has run its init pass.
    ///
    /// Returns the RPC ids registered by the first VM. Every VM must
    /// register the same set.
    pub(crate) fn start(setup: WorkerSetup, size: usize) -> Result<(LuaPool, Vec<String>)> {
        let setup = Arc::new(setup);
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let spawn = |index: usize, boot: Boot, ready: Sender<BootReport>| {
            let setup = Arc::clone(&setup);
            let jobs = Arc::clone(&job_rx);
            thread::Builder::new()
                .name(format!("lua-worker-{index}"))
                .spawn(move || run_worker(index, boot, &setup, &jobs, ready))
        };
        let startup_failed =
            || LinnaError::Script("Lua worker exited during startup".to_string());

        let (primary_tx, primary_rx) = mpsc::channel::<BootReport>();
        spawn(0, Boot::Primary, primary_tx)?;
        let report = primary_rx.recv().map_err(|_| startup_failed())?;
        let (ids, journal) = report.map_err(LinnaError::Script)?;

        let journal = Arc::new(journal);
        let (ready_tx, ready_rx) = mpsc::channel::<BootReport>();
        for index in 1..size {
            spawn(index, Boot::Replica(Arc::clone(&journal)), ready_tx.clone())?;
        }
        drop(ready_tx);

        let mut expected = ids.clone();
        expected.sort();
        for _ in 1..size {
            let report = ready_rx.recv().map_err(|_| startup_failed())?;
            let (mut other, _) = report.map_err(LinnaError::Script)?;
            other.sort();
            if other != expected {
                return Err(LinnaError::Script(
                    "Lua VMs registered different RPC functions".to_string(),
                ));
            }
        }

        Ok((LuaPool { jobs: job_tx }, ids))
    }

    /// Run `id` on the next free VM.
    pub(crate) async fn call(
        &self,
        id: String,
        ctx: Arc<Context>,
        logger: RuntimeLogger,
        payload: String,
    ) -> std::result::Result<String, InvokeError> {
        let (reply, answer) = oneshot::channel();
        self.jobs
            .send(Job {
                id,
                ctx,
                logger,
                payload,
                span: tracing::Span::current(),
                reply,
            })
            .map_err(|_| InvokeError::unexpected("Lua worker pool is shut down"))?;

        answer
            .await
            .map_err(|_| InvokeError::unexpected("Lua worker dropped the call"))?
    }
}

fn run_worker(
    index: usize,
    boot: Boot,
    setup: &WorkerSetup,
    jobs: &Mutex<Receiver<Job>>,
    ready: Sender<BootReport>,
) {
    let journal = match &boot {
        Boot::Primary => InitJournal::recording(),
        Boot::Replica(recorded) => InitJournal::replaying(recorded),
    };
    let (vm, recorded) = match LuaVm::boot(setup, &journal) {
        Ok(booted) => booted,
        Err(e) => {
            error!("Lua worker {} failed to start: {}", index, e);
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };
    let _ = ready.send(Ok((vm.ids(), recorded)));
    drop(ready);
    debug!("Lua worker {} ready", index);

    loop {
        let job = {
            let Ok(rx) = jobs.lock() else {
                break;
            };
            match rx.recv() {
                Ok(job) => job,
                Err(_) => break,
            }
        };

        let result = {
            let _entered = job.span.enter();
            vm.invoke(&job)
        };
        if let Err(e) = vm.engine.clear_call_globals() {
            warn!("Lua worker {} failed to reset globals: {}", index, e);
        }
        let _ = job.reply.send(result);
    }
    debug!("Lua worker {} stopped", index);
}

/// A booted VM and the functions its modules registered.
struct LuaVm {
    engine: LuaEngine,
    nk: Table,
    functions: IndexMap<String, Function>,
}

impl LuaVm {
    fn boot(setup: &WorkerSetup, journal: &InitJournal) -> Result<(LuaVm, Journal)> {
        let engine = LuaEngine::new(setup.limits)?;
        let lua = engine.lua();
        let nk = NkApi::new(Arc::clone(&setup.module), setup.handle.clone()).register(lua)?;
        journal.install(lua, &nk)?;

        let initializer = LuaInitializer::new();
        let ctx = Context::for_init(&setup.env, &setup.node);

        for module in &setup.modules {
            let value = engine
                .exec_chunk(&module.name, &module.source)
                .map_err(|e| LinnaError::Script(format!("failed to load {}: {e}", module.name)))?;

            let init_fn = match value {
                Value::Function(f) => Some(f),
                _ => lua.globals().get::<Option<Function>>("InitModule")?,
            };
            lua.globals().set("InitModule", Value::Nil)?;

            let Some(init_fn) = init_fn else {
                warn!("Lua module {} has no init function", module.name);
                continue;
            };

            let logger = LuaLogger(RuntimeLogger::new().with_field("module", module.name.as_str()));
            engine
                .call::<()>(
                    &init_fn,
                    (context_value(lua, &ctx)?, logger, nk.clone(), initializer.handle()),
                )
                .map_err(|e| {
                    LinnaError::Script(format!("init of {} failed: {e}", module.name))
                })?;
        }

        let recorded = journal.finish().map_err(LinnaError::Script)?;
        engine.seal_globals()?;

        Ok((
            LuaVm {
                engine,
                nk,
                functions: initializer.close(),
            },
            recorded,
        ))
    }

    fn ids(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }

    fn invoke(&self, job: &Job) -> std::result::Result<String, InvokeError> {
        let function = self.functions.get(&job.id).ok_or_else(|| {
            InvokeError::unexpected(format!("RPC function '{}' is not loaded", job.id))
        })?;

        let lua = self.engine.lua();
        let ctx = context_value(lua, &job.ctx).map_err(|e| invoke_error(&e))?;
        let value: Value = self
            .engine
            .call(
                function,
                (
                    ctx,
                    LuaLogger(job.logger.clone()),
                    self.nk.clone(),
                    job.payload.as_str(),
                ),
            )
            .map_err(|e| invoke_error(&e))?;

        payload_from_value(value)
    }
}

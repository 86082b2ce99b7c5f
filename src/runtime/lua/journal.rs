//! Init-time side effects across the VM pool.
//!
//! The first VM runs every module's init against the live capabilities and
//! records what each side-effecting call returned. The other VMs run the
//! same init against that record, so an init that writes a row, sends a
//! request or emits a metric does it once per process. After init every VM
//! calls the live capabilities again.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use mlua::{Function, Lua, LuaSerdeExt, MultiValue, Result as LuaResult, Table, Value};

use super::api::{invoke_error, to_lua};
use crate::runtime::error::InvokeError;

/// `nk` functions whose effects must not repeat per VM.
pub(crate) const SIDE_EFFECTS: [&str; 8] = [
    "authenticate",
    "http_request",
    "sql_exec",
    "sql_query",
    "metrics_counter_add",
    "metrics_gauge_set",
    "metrics_timer_record",
    "event",
];

/// One recorded capability call.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    capability: &'static str,
    outcome: Result<Vec<serde_json::Value>, InvokeError>,
}

/// Calls recorded by the first VM, in call order.
pub(crate) type Journal = Vec<Entry>;

enum Mode {
    Record(Journal),
    Replay(VecDeque<Entry>),
    Live,
}

/// Switch installed in front of the side-effecting `nk` functions.
#[derive(Clone)]
pub(crate) struct InitJournal(Rc<RefCell<Mode>>);

impl InitJournal {
    pub(crate) fn recording() -> Self {
        Self(Rc::new(RefCell::new(Mode::Record(Vec::new()))))
    }

    pub(crate) fn replaying(journal: &[Entry]) -> Self {
        Self(Rc::new(RefCell::new(Mode::Replay(
            journal.iter().cloned().collect(),
        ))))
    }

    /// Wrap every side-effecting function in `nk`.
    pub(crate) fn install(&self, lua: &Lua, nk: &Table) -> LuaResult<()> {
        for capability in SIDE_EFFECTS {
            let real: Function = nk.get(capability)?;
            let mode = Rc::clone(&self.0);
            let wrapper = lua.create_function(move |lua, args: MultiValue| {
                let recording = match &mut *mode.borrow_mut() {
                    Mode::Live => false,
                    Mode::Record(_) => true,
                    Mode::Replay(entries) => return replay(lua, capability, entries.pop_front()),
                };

                let result = real.call::<MultiValue>(args);
                if recording {
                    let outcome = match &result {
                        Ok(values) => Ok(values
                            .iter()
                            .map(|value| lua.from_value(value.clone()))
                            .collect::<LuaResult<Vec<serde_json::Value>>>()?),
                        Err(err) => Err(invoke_error(err)),
                    };
                    if let Mode::Record(entries) = &mut *mode.borrow_mut() {
                        entries.push(Entry {
                            capability,
                            outcome,
                        });
                    }
                }
                result
            })?;
            nk.set(capability, wrapper)?;
        }
        Ok(())
    }

    /// Leave init mode and return what was recorded.
    ///
    /// Fails when a replaying VM made fewer calls than the first VM.
    pub(crate) fn finish(&self) -> Result<Journal, String> {
        match std::mem::replace(&mut *self.0.borrow_mut(), Mode::Live) {
            Mode::Record(entries) => Ok(entries),
            Mode::Replay(left) if !left.is_empty() => Err(format!(
                "init skipped {} capability call(s) the first VM made",
                left.len()
            )),
            Mode::Replay(_) | Mode::Live => Ok(Vec::new()),
        }
    }
}

fn replay(lua: &Lua, capability: &'static str, entry: Option<Entry>) -> LuaResult<MultiValue> {
    let entry = match entry {
        Some(entry) if entry.capability == capability => entry,
        _ => {
            return Err(mlua::Error::RuntimeError(format!(
                "init called nk.{capability} out of step with the first VM"
            )))
        }
    };

    match entry.outcome {
        Ok(values) => Ok(MultiValue::from_vec(
            values
                .iter()
                .map(|value| to_lua(lua, value))
                .collect::<LuaResult<Vec<Value>>>()?,
        )),
        Err(InvokeError::Runtime(err)) => Err(mlua::Error::external(err)),
        Err(InvokeError::Type(err)) => Err(mlua::Error::external(err)),
        Err(InvokeError::Unexpected(message)) => Err(mlua::Error::RuntimeError(message)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Lua state with an `nk` table whose side-effecting functions count calls.
    fn lua_with_counter(calls: Arc<AtomicUsize>) -> (Lua, Table) {
        let lua = Lua::new();
        let nk = lua.create_table().unwrap();
        for capability in SIDE_EFFECTS {
            let calls = Arc::clone(&calls);
            let f = lua
                .create_function(move |lua, ()| {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    let row = lua.create_table()?;
                    row.set("n", n)?;
                    Ok((n, row))
                })
                .unwrap();
            nk.set(capability, f).unwrap();
        }
        lua.globals().set("nk", nk.clone()).unwrap();
        (lua, nk)
    }

    const INIT: &str = r#"
        local n, row = nk.sql_exec()
        nk.metrics_counter_add()
        return n + row.n
    "#;

    #[test]
    fn test_replay_skips_live_calls() {
        let calls = Arc::new(AtomicUsize::new(0));

        let (primary, nk) = lua_with_counter(Arc::clone(&calls));
        let journal = InitJournal::recording();
        journal.install(&primary, &nk).unwrap();
        let first: i64 = primary.load(INIT).eval().unwrap();
        let recorded = journal.finish().unwrap();
        assert_eq!(recorded.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let (replica, nk) = lua_with_counter(Arc::clone(&calls));
        let journal = InitJournal::replaying(&recorded);
        journal.install(&replica, &nk).unwrap();
        let second: i64 = replica.load(INIT).eval().unwrap();
        journal.finish().unwrap();
        assert_eq!(second, first);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Live after init.
        replica.load("nk.event()").exec().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_divergent_init_fails() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (primary, nk) = lua_with_counter(Arc::clone(&calls));
        let journal = InitJournal::recording();
        journal.install(&primary, &nk).unwrap();
        primary.load("nk.sql_exec()").exec().unwrap();
        let recorded = journal.finish().unwrap();

        let (replica, nk) = lua_with_counter(Arc::clone(&calls));
        let journal = InitJournal::replaying(&recorded);
        journal.install(&replica, &nk).unwrap();
        assert!(replica.load("nk.http_request()").exec().is_err());

        let (idle, nk) = lua_with_counter(Arc::clone(&calls));
        let journal = InitJournal::replaying(&recorded);
        journal.install(&idle, &nk).unwrap();
        assert!(journal.finish().is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

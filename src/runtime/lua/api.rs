//! Host API exposed to Lua modules.
//!
//! Provides the `nk` table, the logger and initializer userdata, and the
//! mapping of Lua errors back into the error taxonomy.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use indexmap::IndexMap;
use mlua::{
    Function, Lua, LuaSerdeExt, Result as LuaResult, SerializeOptions, Table, UserData,
    UserDataMethods, Value, Variadic,
};
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::Level;

use crate::runtime::context::Context;
use crate::runtime::error::{ErrorCode, InvokeError, RuntimeError, TypeError};
use crate::runtime::logger::RuntimeLogger;
use crate::runtime::module::{HttpMethod, Module, Tags};
use crate::runtime::registry::normalize_id;

fn raise(err: RuntimeError) -> mlua::Error {
    mlua::Error::external(err)
}

fn type_error(message: impl Into<String>) -> mlua::Error {
    mlua::Error::external(TypeError::new(message))
}

/// Convert a Rust value to Lua. `None` and JSON null become `nil`.
pub(crate) fn to_lua<T: Serialize + ?Sized>(lua: &Lua, value: &T) -> LuaResult<Value> {
    lua.to_value_with(
        value,
        SerializeOptions::new()
            .serialize_none_to_null(false)
            .serialize_unit_to_null(false),
    )
}

/// Execution context as a Lua table.
pub(crate) fn context_value(lua: &Lua, ctx: &Context) -> LuaResult<Value> {
    to_lua(lua, ctx)
}

/// Map a Lua failure to an invocation error.
///
/// Taxonomy errors raised through `nk` keep their code, argument conversion
/// failures are type errors and everything else is unexpected.
pub(crate) fn invoke_error(err: &mlua::Error) -> InvokeError {
    match err {
        mlua::Error::CallbackError { cause, .. } => invoke_error(cause),
        mlua::Error::ExternalError(inner) => {
            if let Some(e) = inner.downcast_ref::<RuntimeError>() {
                InvokeError::Runtime(e.clone())
            } else if let Some(e) = inner.downcast_ref::<TypeError>() {
                InvokeError::Type(e.clone())
            } else {
                InvokeError::unexpected(inner.to_string())
            }
        }
        mlua::Error::BadArgument { .. } | mlua::Error::FromLuaConversionError { .. } => {
            InvokeError::Type(TypeError::new(err.to_string()))
        }
        other => InvokeError::unexpected(other.to_string()),
    }
}

/// Turn an RPC function's return value into a payload.
pub(crate) fn payload_from_value(value: Value) -> Result<String, InvokeError> {
    match value {
        Value::Nil => Ok(String::new()),
        Value::String(s) => s
            .to_str()
            .map(|s| s.to_string())
            .map_err(|_| TypeError::new("RPC function returned a non UTF-8 string").into()),
        other => Err(TypeError::new(format!(
            "RPC function must return a string or nil, got {}",
            other.type_name()
        ))
        .into()),
    }
}

fn error_code_from_lua(value: Option<Value>) -> Result<ErrorCode, TypeError> {
    match value {
        None | Some(Value::Nil) => Ok(ErrorCode::Internal),
        Some(Value::Integer(n)) => i32::try_from(n)
            .map_err(|_| TypeError::new(format!("invalid error code: {n}")))
            .and_then(ErrorCode::try_from),
        Some(Value::Number(n)) if n.fract() == 0.0 => ErrorCode::try_from(n as i32),
        Some(Value::String(s)) => s.to_string_lossy().parse(),
        Some(other) => Err(TypeError::new(format!(
            "error code must be a number or name, got {}",
            other.type_name()
        ))),
    }
}

fn bytes_from_table(table: &Table) -> Result<Vec<u8>, TypeError> {
    table
        .sequence_values::<Value>()
        .map(|value| {
            let n = match value {
                Ok(Value::Integer(n)) => n,
                Ok(Value::Number(n)) if n.fract() == 0.0 => n as i64,
                _ => return Err(TypeError::new("binary data must be an array of integers")),
            };
            u8::try_from(n).map_err(|_| TypeError::new(format!("byte value out of range: {n}")))
        })
        .collect()
}

/// Logger handle passed to Lua functions.
pub(crate) struct LuaLogger(pub RuntimeLogger);

fn format_message(lua: &Lua, args: Variadic<Value>) -> LuaResult<String> {
    let format: Function = lua.globals().get::<Table>("string")?.get("format")?;
    format.call(args)
}

impl UserData for LuaLogger {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        let levels = [
            ("debug", Level::DEBUG),
            ("info", Level::INFO),
            ("warn", Level::WARN),
            ("error", Level::ERROR),
        ];
        for (name, level) in levels {
            methods.add_method(name, move |lua, this, args: Variadic<Value>| {
                let message = format_message(lua, args)?;
                Ok(this.0.emit(level, message))
            });
        }

        methods.add_method("with_field", |_, this, (key, value): (String, String)| {
            Ok(LuaLogger(this.0.with_field(key, value)))
        });
        methods.add_method("with_fields", |_, this, fields: HashMap<String, String>| {
            Ok(LuaLogger(this.0.with_fields(fields)))
        });
        methods.add_method("get_fields", |lua, this, ()| {
            let table = lua.create_table()?;
            for (k, v) in this.0.fields() {
                table.set(k, v)?;
            }
            Ok(table)
        });
    }
}

/// Registration handle passed to module init functions.
///
/// Closed once the init pass finishes; later registrations raise an error.
pub(crate) struct LuaInitializer {
    registered: Rc<RefCell<IndexMap<String, Function>>>,
    open: Rc<Cell<bool>>,
}

impl LuaInitializer {
    pub(crate) fn new() -> Self {
        Self {
            registered: Rc::new(RefCell::new(IndexMap::new())),
            open: Rc::new(Cell::new(true)),
        }
    }

    /// Handle sharing this initializer's state, for handing to Lua.
    pub(crate) fn handle(&self) -> Self {
        Self {
            registered: Rc::clone(&self.registered),
            open: Rc::clone(&self.open),
        }
    }

    /// End the init pass and return what was registered.
    pub(crate) fn close(&self) -> IndexMap<String, Function> {
        self.open.set(false);
        std::mem::take(&mut *self.registered.borrow_mut())
    }
}

impl UserData for LuaInitializer {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("register_rpc", |_, this, (id, function): (String, Function)| {
            if !this.open.get() {
                return Err(mlua::Error::RuntimeError(
                    "RPC functions can only be registered during module initialization"
                        .to_string(),
                ));
            }
            let id = normalize_id(&id);
            if id.is_empty() {
                return Err(mlua::Error::RuntimeError(
                    "RPC function id must not be empty".to_string(),
                ));
            }

            let mut registered = this.registered.borrow_mut();
            if registered.contains_key(&id) {
                return Err(mlua::Error::RuntimeError(format!(
                    "RPC function '{id}' is already registered"
                )));
            }
            registered.insert(id, function);
            Ok(())
        });
    }
}

/// Builder for the `nk` table.
pub(crate) struct NkApi {
    module: Arc<Module>,
    handle: Handle,
}

impl NkApi {
    pub(crate) fn new(module: Arc<Module>, handle: Handle) -> Self {
        Self { module, handle }
    }

    /// Build the `nk` table and install it as a global.
    pub(crate) fn register(self, lua: &Lua) -> LuaResult<Table> {
        let nk = lua.create_table()?;

        self.register_errors(lua, &nk)?;
        self.register_encoding(lua, &nk)?;
        self.register_crypto(lua, &nk)?;
        self.register_tokens(lua, &nk)?;
        self.register_accounts(lua, &nk)?;
        self.register_http(lua, &nk)?;
        self.register_sql(lua, &nk)?;
        self.register_telemetry(lua, &nk)?;

        lua.globals().set("nk", nk.clone())?;
        Ok(nk)
    }

    fn register_errors(&self, lua: &Lua, nk: &Table) -> LuaResult<()> {
        let codes = lua.create_table()?;
        for code in ErrorCode::ALL {
            codes.set(code.as_str(), code.as_i32())?;
        }
        nk.set("codes", codes)?;

        // nk.error(message, code) - raise a taxonomy error
        let error_fn = lua.create_function(|_, (message, code): (String, Option<Value>)| {
            let code = error_code_from_lua(code).map_err(mlua::Error::external)?;
            Err::<(), _>(raise(RuntimeError::new(code, message)))
        })?;
        nk.set("error", error_fn)?;

        Ok(())
    }

    fn register_encoding(&self, lua: &Lua, nk: &Table) -> LuaResult<()> {
        let m = Arc::clone(&self.module);
        nk.set(
            "binary_to_string",
            lua.create_function(move |_, data: Table| {
                let bytes = bytes_from_table(&data).map_err(mlua::Error::external)?;
                m.binary_to_string(&bytes).map_err(mlua::Error::external)
            })?,
        )?;

        let m = Arc::clone(&self.module);
        nk.set(
            "string_to_binary",
            lua.create_function(move |lua, s: String| {
                lua.create_sequence_from(m.string_to_binary(&s))
            })?,
        )?;

        let m = Arc::clone(&self.module);
        nk.set(
            "base64_encode",
            lua.create_function(move |_, (input, padding): (mlua::String, Option<bool>)| {
                let bytes = input.as_bytes();
                Ok(m.base64_encode(&bytes[..], padding.unwrap_or(true)))
            })?,
        )?;

        let m = Arc::clone(&self.module);
        nk.set(
            "base64_decode",
            lua.create_function(move |lua, (input, padding): (String, Option<bool>)| {
                let bytes = m
                    .base64_decode(&input, padding.unwrap_or(true))
                    .map_err(raise)?;
                lua.create_string(bytes)
            })?,
        )?;

        let m = Arc::clone(&self.module);
        nk.set(
            "base64_url_encode",
            lua.create_function(move |_, (input, padding): (mlua::String, Option<bool>)| {
                let bytes = input.as_bytes();
                Ok(m.base64_url_encode(&bytes[..], padding.unwrap_or(true)))
            })?,
        )?;

        let m = Arc::clone(&self.module);
        nk.set(
            "base64_url_decode",
            lua.create_function(move |lua, (input, padding): (String, Option<bool>)| {
                let bytes = m
                    .base64_url_decode(&input, padding.unwrap_or(true))
                    .map_err(raise)?;
                lua.create_string(bytes)
            })?,
        )?;

        let m = Arc::clone(&self.module);
        nk.set(
            "base16_encode",
            lua.create_function(move |_, input: mlua::String| {
                let bytes = input.as_bytes();
                Ok(m.base16_encode(&bytes[..]))
            })?,
        )?;

        let m = Arc::clone(&self.module);
        nk.set(
            "base16_decode",
            lua.create_function(move |lua, input: String| {
                let bytes = m.base16_decode(&input).map_err(raise)?;
                lua.create_string(bytes)
            })?,
        )?;

        let m = Arc::clone(&self.module);
        nk.set("uuid_v4", lua.create_function(move |_, ()| Ok(m.uuid_v4()))?)?;

        nk.set(
            "json_encode",
            lua.create_function(|lua, value: Value| {
                let json: serde_json::Value = lua.from_value(value)?;
                serde_json::to_string(&json).map_err(|e| type_error(e.to_string()))
            })?,
        )?;
        nk.set(
            "json_decode",
            lua.create_function(|lua, input: String| {
                let json: serde_json::Value = serde_json::from_str(&input).map_err(|e| {
                    raise(RuntimeError::invalid_argument(format!("invalid JSON: {e}")))
                })?;
                to_lua(lua, &json)
            })?,
        )?;

        Ok(())
    }

    fn register_crypto(&self, lua: &Lua, nk: &Table) -> LuaResult<()> {
        type KeyedOp = fn(&Module, &str, &str) -> Result<String, RuntimeError>;
        let keyed: [(&str, KeyedOp); 6] = [
            ("aes128_encrypt", Module::aes128_encrypt),
            ("aes128_decrypt", Module::aes128_decrypt),
            ("aes256_encrypt", Module::aes256_encrypt),
            ("aes256_decrypt", Module::aes256_decrypt),
            ("rsa_sha256_hash", Module::rsa_sha256_hash),
            ("hmac_sha256_hash", Module::hmac_sha256_hash),
        ];
        for (name, op) in keyed {
            let m = Arc::clone(&self.module);
            nk.set(
                name,
                lua.create_function(move |_, (input, key): (String, String)| {
                    op(&m, &input, &key).map_err(raise)
                })?,
            )?;
        }

        let m = Arc::clone(&self.module);
        nk.set(
            "md5_hash",
            lua.create_function(move |_, input: String| Ok(m.md5_hash(&input)))?,
        )?;

        let m = Arc::clone(&self.module);
        nk.set(
            "sha256_hash",
            lua.create_function(move |_, input: String| Ok(m.sha256_hash(&input)))?,
        )?;

        let m = Arc::clone(&self.module);
        nk.set(
            "bcrypt_hash",
            lua.create_function(move |_, password: String| {
                m.bcrypt_hash(&password).map_err(raise)
            })?,
        )?;

        let m = Arc::clone(&self.module);
        nk.set(
            "bcrypt_compare",
            lua.create_function(move |_, (hash, password): (String, String)| {
                m.bcrypt_compare(&hash, &password).map_err(raise)
            })?,
        )?;

        Ok(())
    }

    fn register_tokens(&self, lua: &Lua, nk: &Table) -> LuaResult<()> {
        let m = Arc::clone(&self.module);
        nk.set(
            "jwt_generate",
            lua.create_function(
                move |lua, (algorithm, key, claims): (String, String, Value)| {
                    let claims = match lua.from_value::<serde_json::Value>(claims)? {
                        serde_json::Value::Object(map) => map,
                        _ => return Err(type_error("claims must be a table")),
                    };
                    m.jwt_generate(&algorithm, &key, &claims).map_err(raise)
                },
            )?,
        )?;
        Ok(())
    }

    fn register_accounts(&self, lua: &Lua, nk: &Table) -> LuaResult<()> {
        // nk.authenticate(custom_id, username, create) -> user_id, username, created
        let m = Arc::clone(&self.module);
        nk.set(
            "authenticate",
            lua.create_function(
                move |_, (custom_id, username, create): (String, Option<String>, Option<bool>)| {
                    m.authenticate(
                        &custom_id,
                        username.as_deref().unwrap_or_default(),
                        create.unwrap_or(true),
                    )
                    .map_err(raise)
                },
            )?,
        )?;

        // nk.authenticate_token_generate(user_id, username, expires_at, vars) -> token, exp
        let m = Arc::clone(&self.module);
        nk.set(
            "authenticate_token_generate",
            lua.create_function(
                move |_,
                      (user_id, username, expires_at, vars): (
                    String,
                    Option<String>,
                    Option<i64>,
                    Option<HashMap<String, String>>,
                )| {
                    m.authenticate_token_generate(
                        &user_id,
                        username.as_deref().unwrap_or_default(),
                        expires_at.filter(|exp| *exp > 0),
                        vars.unwrap_or_default(),
                    )
                    .map_err(raise)
                },
            )?,
        )?;

        Ok(())
    }

    fn register_http(&self, lua: &Lua, nk: &Table) -> LuaResult<()> {
        let m = Arc::clone(&self.module);
        let handle = self.handle.clone();

        // nk.http_request(url, method, headers, body, timeout_ms)
        let http_fn = lua.create_function(
            move |lua,
                  (url, method, headers, body, timeout_ms): (
                String,
                String,
                Option<HashMap<String, String>>,
                Option<String>,
                Option<u64>,
            )| {
                let method: HttpMethod = method.parse().map_err(raise)?;
                let headers = headers.unwrap_or_default();
                let timeout = timeout_ms.filter(|ms| *ms > 0).map(Duration::from_millis);

                let response = handle
                    .block_on(m.http_request(&url, method, &headers, body, timeout))
                    .map_err(raise)?;

                let table = lua.create_table()?;
                table.set("code", response.code)?;
                table.set("headers", to_lua(lua, &response.headers)?)?;
                table.set("body", response.body)?;
                Ok(table)
            },
        )?;
        nk.set("http_request", http_fn)?;

        Ok(())
    }

    fn register_sql(&self, lua: &Lua, nk: &Table) -> LuaResult<()> {
        fn sql_args(lua: &Lua, params: Option<Value>) -> LuaResult<Vec<serde_json::Value>> {
            match params {
                None | Some(Value::Nil) => Ok(Vec::new()),
                Some(value) => lua.from_value(value),
            }
        }

        let m = Arc::clone(&self.module);
        let handle = self.handle.clone();
        nk.set(
            "sql_exec",
            lua.create_function(move |lua, (query, params): (String, Option<Value>)| {
                let args = sql_args(lua, params)?;
                handle
                    .block_on(m.sql_exec(&query, &args))
                    .map_err(raise)
            })?,
        )?;

        let m = Arc::clone(&self.module);
        let handle = self.handle.clone();
        nk.set(
            "sql_query",
            lua.create_function(move |lua, (query, params): (String, Option<Value>)| {
                let args = sql_args(lua, params)?;
                let rows = handle
                    .block_on(m.sql_query(&query, &args))
                    .map_err(raise)?;
                to_lua(lua, &rows)
            })?,
        )?;

        Ok(())
    }

    fn register_telemetry(&self, lua: &Lua, nk: &Table) -> LuaResult<()> {
        let m = Arc::clone(&self.module);
        nk.set(
            "metrics_counter_add",
            lua.create_function(
                move |_, (name, tags, delta): (String, Option<Tags>, i64)| {
                    m.metrics_counter_add(&name, &tags.unwrap_or_default(), delta);
                    Ok(())
                },
            )?,
        )?;

        let m = Arc::clone(&self.module);
        nk.set(
            "metrics_gauge_set",
            lua.create_function(
                move |_, (name, tags, value): (String, Option<Tags>, f64)| {
                    m.metrics_gauge_set(&name, &tags.unwrap_or_default(), value);
                    Ok(())
                },
            )?,
        )?;

        // Timer values are nanoseconds.
        let m = Arc::clone(&self.module);
        nk.set(
            "metrics_timer_record",
            lua.create_function(
                move |_, (name, tags, nanos): (String, Option<Tags>, i64)| {
                    let value = Duration::from_nanos(nanos.max(0) as u64);
                    m.metrics_timer_record(&name, &tags.unwrap_or_default(), value);
                    Ok(())
                },
            )?,
        )?;

        // nk.event(name, properties, timestamp_secs, external)
        let m = Arc::clone(&self.module);
        nk.set(
            "event",
            lua.create_function(
                move |_,
                      (name, properties, timestamp, external): (
                    String,
                    Option<HashMap<String, String>>,
                    Option<i64>,
                    Option<bool>,
                )| {
                    let timestamp = match timestamp {
                        Some(secs) => Some(
                            DateTime::from_timestamp(secs, 0)
                                .ok_or_else(|| type_error(format!("invalid timestamp: {secs}")))?,
                        ),
                        None => None,
                    };
                    m.event(
                        &name,
                        properties.unwrap_or_default(),
                        timestamp,
                        external.unwrap_or(false),
                    );
                    Ok(())
                },
            )?,
        )?;

        Ok(())
    }
}

//! Script runtime bridge.
//!
//! Connects registered functions (native closures or Lua modules) to
//! inbound calls:
//!
//! - [`context`]: per-call metadata handed to functions
//! - [`error`]: status codes and error types crossing the RPC boundary
//! - [`logger`]: structured logger handed to functions
//! - [`module`]: host capabilities callable from functions
//! - [`registry`]: startup registration and lookup
//! - [`dispatcher`]: invocation and error mapping
//! - [`lua`]: Lua module host

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod logger;
pub mod lua;
pub mod module;
pub mod registry;

pub use context::{Context, ExecutionMode, HeaderMultiMap, InboundRequest};
pub use dispatcher::Dispatcher;
pub use error::{ErrorCode, InvokeError, RuntimeError, TypeError};
pub use logger::RuntimeLogger;
pub use lua::LuaRuntime;
pub use module::Module;
pub use registry::{Initializer, Registry, RegistryState, RpcFunction, RpcFuture};

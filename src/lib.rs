//! Linna - game server script runtime
//!
//! Hosts server-side modules that register RPC functions at startup and
//! serves calls to them over an HTTP gateway.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod web;

pub use config::Config;
pub use error::{LinnaError, Result};
pub use runtime::{
    Context, Dispatcher, ErrorCode, InboundRequest, Initializer, InvokeError, LuaRuntime, Module,
    Registry, RuntimeError, RuntimeLogger,
};
pub use web::{Gateway, GatewayState, SessionKeys};

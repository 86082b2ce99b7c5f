//! Routes inbound calls to registered functions.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{warn, Instrument};

use super::context::{Context, InboundRequest};
use super::error::{InvokeError, RuntimeError};
use super::logger::RuntimeLogger;
use super::module::Module;
use super::registry::{normalize_id, Registry};

/// Message returned for any failure whose details stay in the server log.
const INTERNAL_MESSAGE: &str = "Error calling RPC function";

/// Resolves, invokes and maps the outcome of one call.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    env: Arc<HashMap<String, String>>,
    node: String,
    registry: Arc<Registry>,
    module: Arc<Module>,
}

impl Dispatcher {
    pub fn new(
        env: HashMap<String, String>,
        node: impl Into<String>,
        registry: Arc<Registry>,
        module: Arc<Module>,
    ) -> Self {
        Self {
            env: Arc::new(env),
            node: node.into(),
            registry,
            module,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Dispatch one call.
    ///
    /// Taxonomy errors from the function pass through unchanged. Type
    /// errors, unexpected failures and panics become `INTERNAL`.
    pub async fn dispatch(&self, request: InboundRequest) -> Result<String, RuntimeError> {
        let Some(function) = self.registry.get(&request.id) else {
            warn!(rpc_id = %request.id, "RPC function not found");
            return Err(RuntimeError::not_found("RPC function not found"));
        };

        let ctx = Arc::new(Context::for_request(&self.env, &self.node, &request));
        let logger = request_logger(&request);

        let span = tracing::info_span!(
            "rpc",
            rpc_id = %normalize_id(&request.id),
            session_id = %request.session_id,
            user_id = %request.user_id,
        );
        let call = function.call(ctx, logger.clone(), self.module.clone(), request.payload);
        match AssertUnwindSafe(call).catch_unwind().instrument(span).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(InvokeError::Runtime(err))) => Err(err),
            Ok(Err(err)) => {
                logger.error(format_args!("RPC function failed: {err}"));
                Err(RuntimeError::internal(INTERNAL_MESSAGE))
            }
            Err(panic) => {
                logger.error(format_args!(
                    "RPC function panicked: {}",
                    panic_message(panic.as_ref())
                ));
                Err(RuntimeError::internal(INTERNAL_MESSAGE))
            }
        }
    }
}

fn request_logger(request: &InboundRequest) -> RuntimeLogger {
    let mut logger = RuntimeLogger::new().with_field("rpc_id", normalize_id(&request.id));
    if !request.session_id.is_empty() {
        logger = logger.with_field("session_id", request.session_id.as_str());
    }
    if !request.user_id.is_empty() {
        logger = logger.with_field("user_id", request.user_id.as_str());
    }
    logger
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

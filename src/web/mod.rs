//! HTTP gateway for RPC calls.

pub mod auth;
pub mod error;
pub mod router;
pub mod server;

pub use auth::{SessionClaims, SessionKeys};
pub use error::ApiError;
pub use router::{create_router, GatewayState};
pub use server::Gateway;

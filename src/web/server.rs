//! Gateway server.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use super::router::{create_router, GatewayState};
use crate::config::ServerConfig;
use crate::{LinnaError, Result};

/// HTTP server exposing registered RPC functions.
pub struct Gateway {
    addr: SocketAddr,
    state: Arc<GatewayState>,
}

impl Gateway {
    pub fn new(config: &ServerConfig, state: GatewayState) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| LinnaError::Config(format!("invalid server address: {e}")))?;

        Ok(Self {
            addr,
            state: Arc::new(state),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until the process stops.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        tracing::info!("RPC gateway listening on http://{}", listener.local_addr()?);

        let router = create_router(self.state);
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }

    /// Serve in the background and return the bound address.
    ///
    /// Useful for tests binding to port 0.
    pub async fn run_with_addr(self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("RPC gateway listening on http://{}", local_addr);

        let router = create_router(self.state);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            {
                tracing::error!("RPC gateway error: {}", e);
            }
        });

        Ok(local_addr)
    }
}

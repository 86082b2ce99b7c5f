//! Capability surface exposed to registered functions.
//!
//! [`Module`] groups the host operations scripts may call. It holds handles
//! to external collaborators only (HTTP client, database pool, account store,
//! session keys, metrics and event sinks) and no per-call data.

mod account;
mod crypto;
mod encoding;
mod http;
mod session;
mod sql;
mod telemetry;
mod token;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use crate::db::DbPool;
use crate::{LinnaError, Result};

pub use account::{Account, AccountStore, MemoryAccountStore};
pub use http::{HttpMethod, HttpResponse};
pub use session::{SessionClaims, SessionKeys};
pub use sql::SqlRow;
pub use telemetry::{Event, EventSink, MetricsSink, Tags, TracingEventSink, TracingMetricsSink};

/// User agent sent with outbound script requests.
const USER_AGENT: &str = concat!("linna-runtime/", env!("CARGO_PKG_VERSION"));

/// Host capability handle.
#[derive(Clone)]
pub struct Module {
    http: Client,
    http_timeout: Duration,
    db: Option<DbPool>,
    accounts: Arc<dyn AccountStore>,
    session_keys: Option<SessionKeys>,
    token_expiry: Duration,
    metrics: Arc<dyn MetricsSink>,
    events: Arc<dyn EventSink>,
}

impl Module {
    /// Start building a module.
    pub fn builder() -> ModuleBuilder {
        ModuleBuilder::default()
    }

    /// Default timeout applied to HTTP requests without an explicit one.
    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    /// Whether a database is attached.
    pub fn has_database(&self) -> bool {
        self.db.is_some()
    }

    /// Generate a random version-4 UUID.
    pub fn uuid_v4(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("http_timeout", &self.http_timeout)
            .field("has_database", &self.db.is_some())
            .field("token_expiry", &self.token_expiry)
            .finish()
    }
}

/// Builder for [`Module`].
pub struct ModuleBuilder {
    http_timeout: Duration,
    db: Option<DbPool>,
    accounts: Arc<dyn AccountStore>,
    session_keys: Option<SessionKeys>,
    token_expiry: Duration,
    metrics: Arc<dyn MetricsSink>,
    events: Arc<dyn EventSink>,
}

impl Default for ModuleBuilder {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(5),
            db: None,
            accounts: Arc::new(MemoryAccountStore::default()),
            session_keys: None,
            token_expiry: Duration::from_secs(60),
            metrics: Arc::new(TracingMetricsSink),
            events: Arc::new(TracingEventSink),
        }
    }
}

impl ModuleBuilder {
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn database(mut self, pool: DbPool) -> Self {
        self.db = Some(pool);
        self
    }

    pub fn account_store(mut self, store: Arc<dyn AccountStore>) -> Self {
        self.accounts = store;
        self
    }

    /// Keys used to issue session tokens from scripts.
    pub fn session_keys(mut self, keys: SessionKeys) -> Self {
        self.session_keys = Some(keys);
        self
    }

    /// Lifetime of generated session tokens.
    pub fn token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }

    pub fn metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = sink;
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    pub fn build(self) -> Result<Module> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| LinnaError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Module {
            http,
            http_timeout: self.http_timeout,
            db: self.db,
            accounts: self.accounts,
            session_keys: self.session_keys,
            token_expiry: self.token_expiry,
            metrics: self.metrics,
            events: self.events,
        })
    }
}

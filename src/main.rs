use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use linna::{
    db, Config, Dispatcher, Gateway, GatewayState, LuaRuntime, Module, Registry, SessionKeys,
};

#[tokio::main]
async fn main() {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    // Load configuration
    let config = if Path::new(&path).exists() {
        match Config::load_with_env(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load {path}: {e}");
                std::process::exit(1);
            }
        }
    } else {
        eprintln!("{path} not found. Using default configuration.");
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    };

    // Initialize logging
    if let Err(e) = linna::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        linna::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = run(config).await {
        error!("Startup failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> linna::Result<()> {
    config.validate()?;
    info!("Linna - game server runtime");

    let session_keys = SessionKeys::new(&config.session.encryption_key);
    let mut builder = Module::builder()
        .http_timeout(Duration::from_millis(config.runtime.http_timeout_ms))
        .session_keys(session_keys.clone())
        .token_expiry(Duration::from_secs(config.session.token_expiry_sec));
    if config.database.url.is_empty() {
        info!("No database configured, SQL access disabled for modules");
    } else {
        builder = builder.database(db::connect(&config.database).await?);
    }
    let module = Arc::new(builder.build()?);

    // Init functions may call async capabilities while the pool boots.
    let registry = tokio::task::block_in_place(|| {
        Registry::initialize(|init| {
            LuaRuntime::load(&config.runtime, Arc::clone(&module), init).map(|_| ())
        })
    })?;

    let dispatcher = Dispatcher::new(
        config.runtime.env.clone(),
        config.runtime.node.clone(),
        Arc::new(registry),
        module,
    );
    let state = GatewayState {
        dispatcher,
        http_key: config.runtime.http_key.clone(),
        session_keys,
    };

    Gateway::new(&config.server, state)?.run().await
}

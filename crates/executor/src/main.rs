use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use am_executor::{
    config::Config,
    dispatch::Dispatcher,
    exec::ProcessExecutor,
    handler::Handlers,
    server::Server,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let default_level = if config.server.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
    info!("Loaded configuration: {:?}", config);
    if config.execution.debug {
        warn!("Debug mode enabled, handler commands will not be executed");
    }

    let handlers = Handlers::load(&config.handlers_path)
        .with_context(|| format!("Configuration error, aborting: {}", config.handlers_path.display()))?;
    info!("Loaded {} handler(s)", handlers.len());

    let executor = Arc::new(ProcessExecutor::new(&config.execution));
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(handlers), executor));

    // Initialize server
    let server = Server::new(&config.server, dispatcher);

    // Start server
    server.start(&config.server.addr).await?;

    Ok(())
}

use balance_engine::{Config, Runtime};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Balance Engine starting...");

    // Load configuration
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Build the runtime (transports, workers, ingress)
    let runtime = match Runtime::build(config).await {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };

    // Run until shutdown; a lost critical resource is exit code 2
    match runtime.run().await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!("Unrecoverable failure: {}", e);
            std::process::exit(2);
        }
    }
}

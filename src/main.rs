//! Platform datasource - command line entry point.
//!
//! Builds the pool and both query backends fail-fast, then runs one
//! command against them.

use platform_datasource::config::{Command, Config};
use platform_datasource::mapper::UserMapper;
use platform_datasource::Platform;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse_args();
    init_tracing(&config);

    info!("Starting platform-datasource v{}", env!("CARGO_PKG_VERSION"));

    let platform = match Platform::build(&config).await {
        Ok(platform) => platform,
        Err(e) => {
            error!(error = %e, "Startup failed");
            if let Some(suggestion) = e.suggestion() {
                eprintln!("Hint: {}", suggestion);
            }
            return Err(e.into());
        }
    };

    let result = run(&platform, config.command.clone().unwrap_or(Command::Check)).await;
    platform.close().await;

    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }
    result
}

async fn run(platform: &Platform, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Check => {
            let status = platform.status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::FindUser { user_id } => {
            match platform.user_mapper().find_user_by_user_id(&user_id).await? {
                Some(user) => println!("{}", serde_json::to_string_pretty(&user)?),
                None => {
                    info!(user_id = %user_id, "User not found");
                    println!("null");
                }
            }
        }
    }
    Ok(())
}

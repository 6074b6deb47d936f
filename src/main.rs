use std::collections::BTreeMap;
use std::process::ExitCode;

use axum::Router;
use axum::routing::get;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use axum_boot::config::LogEncoding;
use axum_boot::{AxumEntry, BootConfig, BootError, handlers, middleware, utils};

const DEFAULT_BOOT_CONFIG: &str = "boot.yaml";

#[tokio::main]
async fn main() -> ExitCode {
    // Best effort: a missing .env is fine
    let _ = dotenvy::dotenv();

    let path =
        std::env::var("BOOT_CONFIG").unwrap_or_else(|_| DEFAULT_BOOT_CONFIG.to_string());

    // Config is loaded before logging so the encoding can be chosen
    let config = BootConfig::from_file(&path);
    init_tracing(config.as_ref().ok());
    middleware::install_panic_hook();

    info!("Starting axum-boot v{}", env!("CARGO_PKG_VERSION"));

    let code = match config {
        Ok(config) => match run(&config).await {
            Ok(()) => exitcode::OK,
            Err(code) => code,
        },
        Err(e) => {
            error!(path = %path, "Configuration error: {e}");
            exit_code_for(&e)
        }
    };

    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn init_tracing(config: Option<&BootConfig>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = config.is_some_and(|c| {
        c.enabled_entries()
            .any(|e| e.middleware.logging.encoding == LogEncoding::Json)
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn exit_code_for(e: &BootError) -> exitcode::ExitCode {
    match e {
        BootError::ConfigRead { .. } => exitcode::NOINPUT,
        BootError::ConfigParse(_)
        | BootError::ConfigError(_)
        | BootError::RateLimit(_)
        | BootError::Jwt(_) => exitcode::CONFIG,
        BootError::Bind { .. } => exitcode::UNAVAILABLE,
        BootError::Serve(_) | BootError::Metrics(_) => exitcode::SOFTWARE,
    }
}

/// Boot every enabled entry, then wait for a shutdown signal.
async fn run(config: &BootConfig) -> Result<(), exitcode::ExitCode> {
    let mut entries: BTreeMap<String, AxumEntry> = AxumEntry::from_boot_config(config);
    if entries.is_empty() {
        error!("No enabled axum entries in boot config");
        return Err(exitcode::CONFIG);
    }

    let mut failure = None;
    for entry in entries.values_mut() {
        entry.add_routes(Router::new().route("/v1/greeter", get(handlers::greeter)));

        if let Err(e) = entry.bootstrap().await {
            error!(entry = %entry.name(), "Failed to bootstrap: {e}");
            failure = Some(exit_code_for(&e));
            break;
        }
    }

    if let Some(code) = failure {
        for entry in entries.values() {
            entry.interrupt().await;
        }
        return Err(code);
    }

    info!("API endpoints:");
    info!("  GET  /v1/greeter?name=<name> - Greeting");

    utils::shutdown_signal().await;

    for entry in entries.values() {
        entry.interrupt().await;
    }

    info!("Shutdown complete");
    Ok(())
}

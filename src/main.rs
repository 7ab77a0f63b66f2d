use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use clap::Parser;
use parcelsync::{
    adapter::{LogAdapter, SensorView, spawn_adapter},
    client::{DeliveryApi, NewDelivery, ParcelAppClient},
    config::{DEFAULT_CONFIG_PATH, DEFAULT_CONFIG_TEMPLATE, ParcelSyncConfig},
    coordinator::{Coordinator, CoordinatorHandle, CoordinatorSettings},
    delivery::DeliveryRecord,
    observability,
};

/// CLI arguments for parcelsync
#[derive(Parser, Debug)]
#[command(version, about = "Parcel delivery sync", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Poll the Parcel API and keep the snapshot current (default)
    Run,
    /// Validate the API key with a single fetch and print the deliveries
    Check {
        /// Print sensor views as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a delivery to the Parcel account
    Add {
        tracking_number: String,
        carrier_code: String,
        description: String,
        /// Language for carrier messages
        #[arg(long, default_value = "en")]
        language: String,
        /// Ask Parcel to send a push confirmation
        #[arg(long)]
        push: bool,
    },
    /// Initialize a new configuration file
    Init {
        /// Path to create the config file (defaults to the --config path)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::Init { output, force }) => {
            run_init(output.unwrap_or(args.config), force);
        }
        Some(Command::Check { json }) => {
            run_check(&args.config, json).await;
        }
        Some(Command::Add {
            tracking_number,
            carrier_code,
            description,
            language,
            push,
        }) => {
            let delivery = NewDelivery {
                language,
                send_push_confirmation: push,
                ..NewDelivery::new(tracking_number, carrier_code, description)
            };
            run_add(&args.config, delivery).await;
        }
        Some(Command::Run) | None => {
            run_sync(&args.config).await;
        }
    }
}

/// Load the config file and install the log subscriber, or exit.
fn load_config(config_path: &Path) -> ParcelSyncConfig {
    let config = match ParcelSyncConfig::from_file(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "Failed to load config from {}: {}",
                config_path.display(),
                e
            );
            std::process::exit(1);
        }
    };

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    config
}

fn build_client(config: &ParcelSyncConfig) -> ParcelAppClient {
    let http = match reqwest::Client::builder()
        .user_agent(concat!("parcelsync/", env!("CARGO_PKG_VERSION")))
        .build()
    {
        Ok(http) => http,
        Err(e) => {
            eprintln!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };
    ParcelAppClient::from_config(http, &config.parcel)
}

fn run_init(output_path: PathBuf, force: bool) {
    if output_path.exists() && !force {
        eprintln!(
            "Config file already exists: {}\nUse --force to overwrite.",
            output_path.display()
        );
        std::process::exit(1);
    }

    // Create parent directories if needed
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty())
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create directory {}: {}", parent.display(), e);
        std::process::exit(1);
    }

    if let Err(e) = std::fs::write(&output_path, DEFAULT_CONFIG_TEMPLATE) {
        eprintln!("Failed to write config file: {}", e);
        std::process::exit(1);
    }

    println!("Created config file: {}", output_path.display());
    println!();
    println!("Set PARCEL_API_KEY, then run:");
    println!("  parcelsync run --config {}", output_path.display());
}

async fn run_check(config_path: &Path, json: bool) {
    let config = load_config(config_path);
    let client = build_client(&config);

    let entries = match client.fetch_deliveries(config.parcel.filter_mode).await {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!("API key check failed ({}): {}", e.kind(), e);
            std::process::exit(1);
        }
    };

    let views: Vec<SensorView> = entries
        .into_iter()
        .filter_map(|value| match DeliveryRecord::from_value(value) {
            Ok(record) => Some(SensorView::from_record(&record)),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed delivery entry");
                None
            }
        })
        .collect();

    if json {
        match serde_json::to_string_pretty(&views) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Failed to serialize deliveries: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    println!(
        "API key OK: {} deliveries ({} filter)",
        views.len(),
        config.parcel.filter_mode
    );
    for view in &views {
        println!("  {:<40} {:<24} {}", view.name, view.state, view.unique_id);
    }
}

async fn run_add(config_path: &Path, delivery: NewDelivery) {
    let config = load_config(config_path);
    let client = build_client(&config);

    match client.submit_delivery(&delivery).await {
        Ok(()) => println!(
            "Added {} ({}): {}",
            delivery.tracking_number, delivery.carrier_code, delivery.description
        ),
        Err(e) => {
            eprintln!("Failed to add delivery ({}): {}", e.kind(), e);
            std::process::exit(1);
        }
    }
}

async fn run_sync(config_path: &Path) {
    let config = load_config(config_path);

    tracing::info!(
        config_file = %config_path.display(),
        base_url = %config.parcel.base_url,
        "Starting parcelsync"
    );

    let client: Arc<dyn DeliveryApi> = Arc::new(build_client(&config));
    let handle = Coordinator::new(client, CoordinatorSettings::from_config(&config)).start();
    let adapter = spawn_adapter(&handle, LogAdapter);

    shutdown_signal(handle).await;

    if let Err(e) = adapter.await {
        tracing::warn!(error = %e, "Log adapter task failed");
    }
    tracing::info!("Shutdown complete");
}

async fn shutdown_signal(handle: CoordinatorHandle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping coordinator...");

    // Wait for the in-flight cycle to unwind (with timeout)
    match tokio::time::timeout(Duration::from_secs(30), handle.stop()).await {
        Ok(()) => tracing::info!("Coordinator stopped"),
        Err(_) => tracing::warn!("Timeout waiting for coordinator to stop"),
    }
}

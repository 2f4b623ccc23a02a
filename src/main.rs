//! phaseshift binary
//!
//! Runs the migration controller, or talks to a running one.

use clap::Parser;
use phaseshift::cli::{Cli, Command, generate_config_template};
use phaseshift::client::AdminClient;
use phaseshift::config::Config;
use phaseshift::error::AppError;
use phaseshift::handlers::{self, AppState};
use phaseshift::telemetry;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => serve(&cli.config).await?,
        Command::Config { output } => write_template(output.as_deref())?,
        command => run_client(&cli, command).await?,
    }

    Ok(())
}

async fn serve(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(Config::from_file(config_path)?);

    telemetry::init(&config.observability.log_level);

    tracing::info!(
        "Starting phaseshift on {}:{}",
        config.server.host,
        config.server.port
    );

    let state = AppState::new(Arc::clone(&config))?;
    let app = handlers::router(state.clone());

    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0])),
        config.server.port,
    ));

    tracing::info!("Listening on {}", addr);
    tracing::info!("Admin API at http://{}/admin/migration", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Migration state is in memory only; never leave real traffic unsupervised
    if state.coordinator().snapshot().active {
        tracing::warn!("Shutting down with an active migration, aborting it");
        state.coordinator().abort("controller shutdown").await;
    }
    state.supervisor().stop();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

fn write_template(output: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let template = generate_config_template();
    match output {
        Some(path) => {
            std::fs::write(path, template)?;
            eprintln!("Wrote configuration template to {}", path);
        }
        None => print!("{}", template),
    }
    Ok(())
}

async fn run_client(cli: &Cli, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    let operator = cli.operator_name().ok_or_else(|| {
        AppError::Validation("no operator identity: pass --operator or set $USER".to_string())
    })?;
    let client = AdminClient::new(&cli.server, operator)?;

    match command {
        Command::Status => print_json(&client.status().await?)?,
        Command::Start { force } => print_json(&client.start(force).await?)?,
        Command::Rollback => print_json(&client.rollback().await?)?,
        Command::Abort { reason } => print_json(&client.abort(&reason).await?)?,
        Command::Reset { emergency: true } => print_json(&client.emergency_reset().await?)?,
        Command::Reset { emergency: false } => print_json(&client.reset().await?)?,
        Command::Events => print_json(&client.events().await?)?,
        Command::Serve | Command::Config { .. } => {}
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

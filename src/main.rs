//! Health Telemetry demo service
//!
//! Serves a small axum application with the health plugin attached, so the
//! liveness, readiness and metrics endpoints can be exercised with curl.

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use clap::{Parser, Subcommand};
use health_telemetry::{
    init_logging, monitor_route, AuthStrategies, BasicAuth, Fault, HealthOptions, HealthPlugin, LoggingConfig,
    ProbeSet,
};
use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// Health Telemetry - liveness, readiness and Prometheus metrics for axum
#[derive(Parser)]
#[command(name = "health-telemetry")]
#[command(about = "Demo service exposing health probes and request metrics")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Port the demo application listens on
    #[arg(long, default_value_t = 9876)]
    port: u16,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// JSON file holding the plugin options (optional)
    #[arg(long)]
    config_file: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the demo application
    Serve,
    /// Validate the plugin options and exit
    Validate,
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Version) = cli.command {
        println!("health-telemetry {}", health_telemetry::VERSION);
        println!("Liveness, readiness and Prometheus request telemetry for axum applications");
        return Ok(());
    }

    let logging = LoggingConfig {
        filter: format!("{},health_telemetry={}", cli.log_level, cli.log_level),
        json: cli.json_logs,
    };
    if let Err(e) = init_logging(&logging) {
        eprintln!("Fatal: failed to initialize logging: {}. Exiting.", e);
        return Err(anyhow::anyhow!("logging initialization failed: {}", e));
    }

    let options = load_options(cli.config_file.as_deref())?;

    if matches!(cli.command, Some(Commands::Validate)) {
        return validate_options(&options);
    }

    serve(options, cli.port).await
}

fn load_options(config_file: Option<&str>) -> anyhow::Result<HealthOptions> {
    match config_file {
        Some(path) => {
            info!(path = %path, "Loading plugin options from file");
            Ok(HealthOptions::from_file(path)?)
        }
        None => Ok(HealthOptions::default()),
    }
}

fn validate_options(options: &HealthOptions) -> anyhow::Result<()> {
    match options.validate() {
        Ok(()) => {
            info!("Plugin options are valid");
            info!(
                liveness = %options.liveness_route,
                readiness = %options.readiness_route,
                metrics = %options.metrics_route,
                "Endpoint routes"
            );
            info!(
                success = options.probes_success_code,
                error = options.probes_error_code,
                "Probe status codes"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Plugin options are invalid");
            Err(anyhow::anyhow!("invalid plugin options: {}", e))
        }
    }
}

/// Strategies offered to the `auth` option. `HEALTH_BASIC_AUTH=user:password`
/// registers a `basic` strategy accepting that user.
fn auth_strategies() -> AuthStrategies {
    let mut strategies = AuthStrategies::new();
    if let Ok(credentials) = env::var("HEALTH_BASIC_AUTH") {
        match credentials.split_once(':') {
            Some((user, password)) if !user.is_empty() => {
                info!(user = %user, "Registering the basic authentication strategy from HEALTH_BASIC_AUTH");
                strategies = strategies.with("basic", BasicAuth::new("health-telemetry").with_user(user, password));
            }
            _ => warn!("HEALTH_BASIC_AUTH must look like user:password, ignoring it"),
        }
    }
    strategies
}

fn demo_routes() -> Router {
    Router::new()
        .route("/", get(|| async { "OK" }).post(|| async { (StatusCode::CREATED, "OK") }))
        .route(
            "/long",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                "OK"
            }),
        )
        .route("/badRequest", axum::routing::post(|| async { Fault::bad_request("this is bad") }))
        .route("/forbidden", get(|| async { Fault::forbidden("try again") }))
        .route("/unmonitored", get(|| async { "OK" }).layer(monitor_route(false)))
        .route("/monitored", get(|| async { "OK" }).layer(monitor_route(true)))
}

async fn serve(options: HealthOptions, port: u16) -> anyhow::Result<()> {
    let started = std::time::Instant::now();
    let readiness = ProbeSet::new().with_fn("uptime", move || async move {
        Ok::<_, anyhow::Error>(Some(format!("up for {}s", started.elapsed().as_secs())))
    });

    let app = HealthPlugin::new(options)
        .readiness_probes(readiness)
        .auth_strategies(auth_strategies())
        .register(demo_routes())?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Demo application listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Demo application stopped");
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
        Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
    }
}

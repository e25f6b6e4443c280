use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use veracam::{MemoryHistory, VeracamConfig, VerificationPipelineBuilder};

#[derive(Parser, Debug)]
#[command(name = "veracam")]
#[command(about = "Rust-based live verification camera pipeline with object detection and remote authenticity checks")]
#[command(version)]
#[command(long_about = "Drives a continuous object-detection loop against a live video source, \
lets a user select a detected object and dispatch it to a remote verification service, and \
routes asynchronous results back to the camera overlay or upload panel with an optional \
verification history log.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "veracam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the pipeline")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - build the pipeline but don't start it
    #[arg(long, help = "Perform dry run - build the pipeline but don't start it")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// User id the verification history is scoped to
    #[arg(long, value_name = "USER", help = "User id for history log entries")]
    user: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if args.print_config {
        print_default_config();
        return Ok(());
    }

    // Initialize logging
    init_logging(&args)?;

    info!("Starting Veracam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    // Load and validate configuration
    let config = match VeracamConfig::load_from_file(&args.config) {
        Ok(config) => {
            info!("Configuration loaded successfully from: {}", args.config);
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    config.validate()?;

    // Build the pipeline with its default collaborators
    let mut pipeline = VerificationPipelineBuilder::new()
        .config(config)
        .history(Arc::new(MemoryHistory::new()))
        .build()
        .map_err(|e| {
            error!("Failed to build pipeline: {}", e);
            e
        })?;

    if args.dry_run {
        info!("Dry run mode - pipeline built but not started");
        println!("✓ Dry run completed successfully - pipeline built");
        return Ok(());
    }

    pipeline.start().await.map_err(|e| {
        error!("Failed to start pipeline: {}", e);
        e
    })?;

    if let Some(user) = args.user {
        pipeline.set_current_user(Some(user)).await;
    }

    info!("Veracam running ({}). Press Ctrl+C to stop.", pipeline.source_state().name());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    pipeline.shutdown().await;
    info!("Veracam exited cleanly");

    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, fmt, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    // Create environment filter
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("veracam={}", log_level)));

    // Configure format based on options
    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => {
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .boxed()
        }
        Some("compact") => {
            fmt::layer()
                .compact()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .boxed()
        }
        Some("pretty") | None => {
            fmt::layer()
                .pretty()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() {
    println!("# Veracam Configuration File");
    println!("# This is the default configuration with all available options");
    println!();

    let default_config = r#"[source]
# Preferred camera facing: "user" or "environment"
facing = "environment"
# Ideal capture resolution (width, height)
resolution = [1920, 1080]
# Frames per second requested from the device
fps = 30

[detector]
# Base URL of the inference engine
endpoint = "http://127.0.0.1:8500"
# Detection tick interval in milliseconds
tick_interval_ms = 33
# Raw detections at or below this confidence are discarded
confidence_threshold = 0.6
# Interpolation weight toward each new observation
smoothing_factor = 0.2
# Per-attempt inference request timeout in seconds
request_timeout_secs = 10

[verify]
# Base URL of the verification service
endpoint = "http://127.0.0.1:8600"
# Verification request timeout in seconds
request_timeout_secs = 30
# Agent used when the caller does not name one
default_agent = "general_purpose"

[history]
# Emit append-history side effects for identified results
enabled = true

[system]
# Grace period when joining background tasks at shutdown
shutdown_timeout_secs = 3
"#;

    println!("{}", default_config);
}

//! # ISP Driver Binary
//!
//! Brings up an ISP backend and runs a short statistics session: one
//! processor, AWB in continuous mode for a number of frames, then a single
//! AE oneshot measurement.
//!
//! # Usage
//!
//! ```bash
//! # Simulation backend with built-in defaults
//! isp_driver
//!
//! # Explicit config, 60 AWB frames, verbose JSON logs
//! isp_driver --config config/driver.toml --frames 60 -v --json
//! ```

use clap::Parser;
use isp_common::config::{ConfigLoader, DriverConfig, LogLevel};
use isp_common::consts::DEFAULT_CONFIG_PATH;
use isp_common::isp::types::{ControllerConfig, ControllerHandle, ControllerKind, Statistics};
use isp_driver::{BackendRegistry, IspDriver};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// ISP driver - processor and statistics controller session runner
#[derive(Parser, Debug)]
#[command(name = "isp_driver")]
#[command(version)]
#[command(about = "ISP processor/controller driver with pluggable hardware backends")]
#[command(long_about = None)]
struct Args {
    /// Path to driver configuration (driver.toml).
    /// Built-in defaults are used if the default path does not exist.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend to use (overrides `backend` in the config)
    #[arg(short, long)]
    backend: Option<String>,

    /// Number of continuous AWB results to collect
    #[arg(short, long, default_value_t = 30)]
    frames: u32,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();

    // Config comes first: its log level seeds the subscriber
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(2);
        }
    };
    setup_tracing(&args, config.shared.log_level);

    if let Err(e) = run(&args, config) {
        error!("ISP session failed: {}", e);
        std::process::exit(1);
    }
}

fn load_config(args: &Args) -> Result<DriverConfig, Box<dyn std::error::Error>> {
    let path = args
        .config
        .clone()
        .or_else(|| Some(PathBuf::from(DEFAULT_CONFIG_PATH)).filter(|p| p.exists()));
    let mut config = match path {
        Some(path) => DriverConfig::load(&path)?,
        None => DriverConfig::default(),
    };
    if let Some(backend) = &args.backend {
        config.backend = backend.clone();
    }
    if config.backend == "simulation" {
        config.simulation.auto_frames = true;
    }
    config.validate()?;
    Ok(config)
}

fn run(args: &Args, config: DriverConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("ISP driver v{} starting...", env!("CARGO_PKG_VERSION"));
    match &args.config {
        Some(path) => info!("Loaded config from {:?}", path),
        None => debug!("Config: {:?}", config),
    }

    let registry = BackendRegistry::with_builtin();
    let hal = registry.create_backend(&config.backend, &config)?;
    let driver = IspDriver::new(hal, config.hardware)?;
    info!(
        "Service '{}' on backend '{}'",
        config.shared.service_name,
        driver.backend_name()
    );

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            info!("Received shutdown signal");
            running.store(false, Ordering::SeqCst);
        })?;
    }

    let processor = driver.new_processor(&config.processor)?;
    let (h_res, v_res) = (config.processor.h_res, config.processor.v_res);
    let awb = driver.new_controller(
        processor,
        ControllerConfig::default_for(ControllerKind::Awb, h_res, v_res),
    )?;
    let ae = driver.new_controller(
        processor,
        ControllerConfig::default_for(ControllerKind::Ae, h_res, v_res),
    )?;

    let (tx, rx) = mpsc::channel();
    let limit = args.frames;
    let mut seen = 0u32;
    driver.register_callback(
        awb,
        Some(Box::new(move |_: ControllerHandle, stats: &Statistics| {
            seen += 1;
            let _ = tx.send(*stats);
            seen >= limit
        })),
    )?;

    driver.enable_processor(processor)?;
    driver.enable_controller(awb)?;
    driver.enable_controller(ae)?;
    driver.start_continuous(awb)?;

    let mut received = 0u32;
    while received < limit && running.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(stats) => {
                received += 1;
                report(received, &stats);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    if driver.controller_state(awb).statistics_running() {
        driver.stop_continuous(awb)?;
    }

    if running.load(Ordering::SeqCst) {
        match driver.get_oneshot(ae, Duration::from_secs(1)) {
            Ok(stats) => report(0, &stats),
            Err(e) => warn!("AE oneshot failed: {}", e),
        }
    }

    driver.disable_controller(ae)?;
    driver.disable_controller(awb)?;
    driver.del_controller(ae)?;
    driver.del_controller(awb)?;
    driver.disable_processor(processor)?;
    driver.del_processor(processor)?;

    info!("ISP session complete: {} AWB results", received);
    Ok(())
}

fn report(index: u32, stats: &Statistics) {
    match serde_json::to_string(stats) {
        Ok(json) => println!("{json}"),
        Err(e) => warn!("Failed to serialize statistics: {}", e),
    }
    if let Statistics::Awb(awb) = stats {
        if awb.white_patch_num > 0 {
            let g = f64::from(awb.sum_g.max(1));
            info!(
                "AWB #{}: {} patches, R/G {:.3}, B/G {:.3}",
                index,
                awb.white_patch_num,
                f64::from(awb.sum_r) / g,
                f64::from(awb.sum_b) / g
            );
        }
    }
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
fn setup_tracing(args: &Args, log_level: LogLevel) {
    let filter = if args.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.as_directive()))
    };

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

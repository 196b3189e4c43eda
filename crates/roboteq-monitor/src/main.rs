//! roboteq-monitor
//!
//! Polls a Roboteq controller and prints every telemetry update as one JSON
//! line on stdout. Logs go to stderr, filtered by `RUST_LOG`.

use anyhow::{Context, Result};
use clap::Parser;
use roboteq_core::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How often diagnostics are printed
const DIAGNOSTICS_PERIOD: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "roboteq-monitor")]
#[command(about = "Poll a Roboteq motor controller and print telemetry as JSON lines", long_about = None)]
struct Args {
    /// Serial device; falls back to /dev/ttyACM0 and /dev/ttyACM1
    #[arg(long)]
    port: Option<String>,

    /// Baud rate
    #[arg(long)]
    baud: Option<u32>,

    /// Re-sends after a failed attempt
    #[arg(long)]
    retries: Option<u32>,

    /// Per-attempt reply timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Time between polling rounds in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// JSON configuration file; command line flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Talk to a simulated controller instead of a serial device
    #[arg(long)]
    demo: bool,

    /// Also print threshold diagnostics once per second
    #[arg(long)]
    diagnostics: bool,

    /// Name prefixed to diagnostic statuses
    #[arg(long, default_value = "Roboteq")]
    name: String,
}

impl Args {
    fn driver_config(&self) -> Result<DriverConfig> {
        let mut config = match &self.config {
            Some(path) => DriverConfig::from_json_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => DriverConfig::default(),
        };

        if let Some(port) = &self.port {
            config.controller.port = port.clone();
        }
        if let Some(baud) = self.baud {
            config.controller.baud_rate = baud;
        }
        if let Some(retries) = self.retries {
            config.controller.max_retries = retries;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.controller.timeout_ms = timeout_ms;
        }
        if let Some(interval_ms) = self.interval_ms {
            config.poll.interval_ms = interval_ms;
        }
        config.controller.validate()?;
        Ok(config)
    }
}

fn open_controller(args: &Args, config: ControllerConfig) -> Result<Controller> {
    if args.demo {
        info!("using simulated controller");
        return Ok(Controller::with_transport(
            config,
            Box::new(SimulatedController::new()),
        ));
    }

    let port = config.port.clone();
    Controller::open_first_available(config)
        .with_context(|| format!("no controller port available (tried {} first)", port))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.driver_config()?;

    let controller = Arc::new(open_controller(&args, config.controller.clone())?);
    info!("opened {}", controller.config().port);

    let probe = Arc::clone(&controller);
    let present = tokio::task::spawn_blocking(move || probe.controller_present()).await?;
    match controller.link_state().firmware_id {
        Some(id) if present => info!("controller present: {}", id),
        _ => warn!("controller not answering, polling anyway"),
    }

    let poller = TelemetryPoller::new(Arc::clone(&controller), config.poll.clone());
    let mut events = poller.subscribe();
    let cancel = CancellationToken::new();
    let poller_task = tokio::spawn(poller.run(cancel.clone()));

    let mut diagnostics_tick = tokio::time::interval(DIAGNOSTICS_PERIOD);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => print_json(&event)?,
                Err(RecvError::Lagged(skipped)) => warn!("output lagging, skipped {} updates", skipped),
                Err(RecvError::Closed) => break,
            },
            _ = diagnostics_tick.tick(), if args.diagnostics => {
                let statuses = evaluate(controller.cache(), &args.name, &config.thresholds);
                if !statuses.is_empty() {
                    print_json(&serde_json::json!({ "diagnostics": statuses }))?;
                }
            }
        }
    }

    cancel.cancel();
    poller_task.await.context("poller task failed")?;
    Ok(())
}

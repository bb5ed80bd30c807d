use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use plbridge::{
    broker::MqttBroker,
    config::Config,
    orchestrator::{ExitOptions, Gateway},
    serial::SerialConnector,
    shutdown,
    transport::PlTransport,
};

/// Publish PLxx solar controller readings to an MQTT broker.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "plbridge.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.debug);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "plbridge starting"
    );

    match run(&args) {
        Ok(()) => {
            info!("exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: &Args) -> anyhow::Result<()> {
    let config = Config::load(&args.config)
        .with_context(|| format!("reading config file {}", args.config.display()))?;

    let exit = Arc::new(AtomicBool::new(false));
    shutdown::spawn_listener(Arc::clone(&exit)).context("installing signal handlers")?;

    info!(
        device = %config.plxx.device,
        baudrate = config.plxx.baudrate,
        "using PL controller"
    );
    let transport = PlTransport::new(SerialConnector::new(
        config.plxx.device.as_str(),
        config.plxx.baudrate,
    ));
    let broker = MqttBroker::new(config.mqtt_settings());
    let on_exit = ExitOptions {
        publish_noread: config.mqtt.noreadonexit,
        clear_retained: config.mqtt.clearonexit,
    };

    let mut gateway = Gateway::new(
        config.scheduler(),
        transport,
        broker,
        config.loop_interval(),
        on_exit,
    );
    gateway.run(&exit);
    Ok(())
}

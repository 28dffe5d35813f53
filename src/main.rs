use anyhow::Context;
use clap::Parser;
use motorkit::console::{Console, SIMULATED_PORT};
use motorkit::{
    init_logging, list_ports, session_options, Config, Connector, MotorSession, SerialConnector,
    SimulatedConnector, SimulatedDevice,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Drive a two-axis stepper controller and record its travel limits
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Serial port to open (overrides the config file)
    #[arg(long)]
    port: Option<String>,

    /// Baud rate (overrides the config file)
    #[arg(long)]
    baud: Option<u32>,

    /// Config file (.toml or .json); defaults to the platform config dir
    #[arg(long)]
    config: Option<PathBuf>,

    /// Talk to an in-process simulated controller instead of a serial port
    #[arg(long)]
    simulate: bool,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_file.as_deref())?;

    if args.list_ports {
        for port in list_ports(args.port.as_deref().unwrap_or_default())? {
            println!("{}  {}", port.port_name, port.description);
        }
        return Ok(());
    }

    let mut config = Config::load_or_default(args.config.as_deref())
        .context("loading configuration")?;
    if let Some(port) = args.port {
        config.connection.port = port;
    }
    if let Some(baud) = args.baud {
        config.connection.baud_rate = baud;
    }
    config.validate()?;

    let mut options = session_options(&config);
    let connector: Arc<dyn Connector> = if args.simulate {
        options.params.port = SIMULATED_PORT.to_string();
        Arc::new(SimulatedConnector::new(SimulatedDevice::new()))
    } else {
        Arc::new(SerialConnector)
    };

    tracing::info!("motorkit {} starting", motorkit::VERSION);
    let (session, completions) =
        MotorSession::new(options, connector, tokio::runtime::Handle::current());
    Console::new(session, completions, args.simulate)
        .run(tokio::io::stdout())
        .await
}

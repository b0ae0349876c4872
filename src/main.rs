use std::fs::File;
use std::io::Read as _;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, ensure};
use btleplug::api::Manager as _;
use btleplug::platform::Manager;
use clap::{Parser, Subcommand};
use log::info;

mod beacon;
mod config;
mod dispatch;
mod presence;
mod scanner;
mod wiz;

use config::Settings;
use dispatch::Dispatcher;
use presence::ProximityGate;
use scanner::ScanSession;
use wiz::WizClient;

#[derive(Parser, Debug)]
#[command(version, about = "Toggle WiZ bulbs when an iBeacon comes near")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan for the configured beacon and toggle bulbs on approach
    Watch {
        /// Stop after this many seconds, overriding the configured window
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Run a single toggle round over the configured bulbs and exit
    Toggle,
    /// Probe the local network for WiZ bulbs
    Discover {
        /// Broadcast address to probe
        #[arg(long, default_value = "255.255.255.255")]
        broadcast: Ipv4Addr,
        /// Seconds to listen for replies
        #[arg(long, default_value_t = 4)]
        wait: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::formatted_timed_builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let Cli { config, command } = Cli::parse();
    match command.unwrap_or(Command::Watch { duration: None }) {
        Command::Watch { duration } => watch(&config, duration).await,
        Command::Toggle => toggle(&config).await,
        Command::Discover { broadcast, wait } => discover(broadcast, wait).await,
    }
}

fn load_settings(path: &Path) -> Result<Settings> {
    let mut file =
        File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut config_contents = String::new();
    file.read_to_string(&mut config_contents)?;

    let config: config::AppConfig = toml::de::from_str(&config_contents)
        .with_context(|| format!("cannot parse {}", path.display()))?;
    config.resolve()
}

async fn watch(config_path: &Path, duration: Option<u64>) -> Result<()> {
    let mut settings = load_settings(config_path)?;
    if let Some(seconds) = duration {
        ensure!(seconds > 0, "--duration must be positive");
        settings.scan_window = Some(Duration::from_secs(seconds));
    }

    info!("Watching for beacon {}", settings.target_uuid);
    info!("In-range band: {}", settings.band);
    for bulb in &settings.bulbs {
        info!("Bulb: {bulb}");
    }

    let bt_manager = Manager::new().await?;

    // get the first bluetooth adapter
    let adapters = bt_manager.adapters().await?;
    let central = adapters
        .into_iter()
        .next()
        .context("no Bluetooth adapter found")?;

    let client = WizClient::new(settings.call_timeout);
    let dispatcher = Arc::new(Dispatcher::new(client, settings.bulbs, settings.pacing));
    let gate = ProximityGate::new(settings.target_uuid, settings.target_address, settings.band);

    let session = ScanSession::new(central, gate, dispatcher, settings.scan_window);
    session.run().await?;

    Ok(())
}

async fn toggle(config_path: &Path) -> Result<()> {
    let settings = load_settings(config_path)?;
    let client = WizClient::new(settings.call_timeout);
    let dispatcher = Dispatcher::new(client, settings.bulbs, settings.pacing);

    for report in dispatcher.toggle_all().await {
        println!("{}: {}", report.target, report.outcome);
    }
    Ok(())
}

async fn discover(broadcast: Ipv4Addr, wait: u64) -> Result<()> {
    println!(
        "Probing {broadcast}:{} for WiZ bulbs ({wait}s)...",
        wiz::WIZ_PORT
    );
    let found = wiz::discover(broadcast, wiz::WIZ_PORT, Duration::from_secs(wait)).await?;

    for (i, bulb) in found.iter().enumerate() {
        match &bulb.mac {
            Some(mac) => println!("{}. {} (mac {mac})", i + 1, bulb.addr),
            None => println!("{}. {}", i + 1, bulb.addr),
        }
    }
    println!("{} bulb(s) answered", found.len());
    Ok(())
}

//! Binary entrypoint for the ec25-router CLI.
//!
//! Commands:
//! - `init` - write a starter `config.toml`
//! - `detect` - probe serial ports for the modem AT interface
//! - `signal` / `info` / `status` - one-shot modem queries, printed as JSON
//! - `apn <APN>` - program the APN and persist it once the modem accepts it
//! - `reset` - reboot the modem
//! - `monitor` - run the background monitor and stream snapshots as JSON lines
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use ec25_router::config::Config;
use ec25_router::metrics;
use ec25_router::modem::transport::AtTransport;
use ec25_router::modem::{Modem, ModemError};
use ec25_router::monitor::ModemMonitor;

#[derive(Parser)]
#[command(name = "ec25-router")]
#[command(about = "EC25 modem control for the router panel")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,
    /// Find the modem AT port (always re-probes)
    Detect,
    /// Print signal quality
    Signal,
    /// Print operator, technology, registration and SIM state
    Info,
    /// Print detection, signal, network info and counters
    Status,
    /// Program the APN and save it to the config file
    Apn {
        /// Access point name, e.g. internet.movil
        apn: String,
    },
    /// Reboot the modem (AT+CFUN=1,1)
    Reset,
    /// Run the background monitor and print each snapshot
    Monitor {
        /// Poll interval in seconds (defaults to monitor.interval_secs)
        #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
        interval: Option<u64>,
        /// Start with polling disabled
        #[arg(long)]
        disabled: bool,
        /// Exit after this many snapshots
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Init writes the file, so it must not try to read it first
    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Some(Config::load_or_default(&cli.config).await?),
    };
    init_logging(&pre_config, cli.verbose);
    let config = pre_config.unwrap_or_default();

    let modem = Arc::new(Modem::new(AtTransport::system(
        config.modem.transport_settings(),
    )));

    match cli.command {
        Commands::Init => {
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Detect => {
            let port = blocking(&modem, |m| m.rediscover()).await?;
            match port {
                Some(port) => println!("{}", port.path),
                None => {
                    eprintln!("modem not detected ({})", config.modem.port_glob);
                    std::process::exit(1);
                }
            }
        }
        Commands::Signal => {
            let signal = blocking(&modem, |m| m.signal()).await?;
            println!("{}", serde_json::to_string_pretty(&signal)?);
        }
        Commands::Info => {
            let network = blocking(&modem, |m| m.network_info()).await?;
            println!("{}", serde_json::to_string_pretty(&network)?);
        }
        Commands::Status => {
            let (detected, signal, network) = blocking(&modem, |m| {
                if m.is_detected() {
                    (true, Some(m.signal()), Some(m.network_info()))
                } else {
                    (false, None, None)
                }
            })
            .await?;
            let payload = serde_json::json!({
                "detected": detected,
                "signal": signal.unwrap_or_default(),
                "network": network.unwrap_or_default(),
                "metrics": metrics::snapshot(),
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        Commands::Apn { apn } => {
            let apn = apn.trim().to_string();
            if apn.is_empty() {
                bail!("APN must not be empty");
            }
            let requested = apn.clone();
            let exchange = blocking(&modem, move |m| m.set_apn(&requested)).await??;
            println!("{}", exchange.response.trim());
            if exchange.ok {
                let mut updated = config.clone();
                updated.apn = Some(apn.clone());
                updated.save(&cli.config).await?;
                info!("APN updated to {}", apn);
            } else {
                warn!("Modem did not accept APN {}; config left unchanged", apn);
                std::process::exit(1);
            }
        }
        Commands::Reset => {
            let exchange = blocking(&modem, |m| m.reset()).await??;
            info!("Modem reset requested");
            println!("{}", exchange.response.trim());
        }
        Commands::Monitor {
            interval,
            disabled,
            count,
        } => {
            let monitor = ModemMonitor::new(modem.clone(), config.monitor.settings());
            let interval = interval
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.monitor.settings().interval);
            monitor.start(interval, !disabled && config.monitor.enabled);
            if !monitor.is_enabled() {
                info!("Monitor started disabled; waiting for Ctrl-C");
            }
            let history = monitor.history();
            let mut printed = 0usize;
            loop {
                tokio::select! {
                    snapshot = history.recv() => {
                        println!("{}", serde_json::to_string(&snapshot)?);
                        printed += 1;
                        if count.is_some_and(|n| printed >= n) {
                            break;
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("Interrupted");
                        break;
                    }
                }
            }
            if !monitor.stop().await {
                warn!("Monitor stop incomplete; exiting anyway");
            }
        }
    }

    Ok(())
}

/// Run a blocking modem call off the async runtime.
async fn blocking<T, F>(modem: &Arc<Modem>, f: F) -> Result<T, ModemError>
where
    T: Send + 'static,
    F: FnOnce(&Modem) -> T + Send + 'static,
{
    let modem = modem.clone();
    tokio::task::spawn_blocking(move || f(&modem))
        .await
        .map_err(|e| ModemError::Join(e.to_string()))
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .map(|c| c.logging.level_filter())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.log_file())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| eprintln!("Cannot open log file {path}: {e}"))
                .ok()
        });

    if let Some(file) = log_file {
        let file = std::sync::Mutex::new(file);
        // echo to the console only when attached to a terminal
        let is_tty = atty::is(atty::Stream::Stderr);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = file.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}

//! Scanlink CLI - Command-line interface
//!
//! Lists ports, manages the user device table, classifies barcodes offline
//! and monitors a live scanner.

use anyhow::Context;
use clap::{Parser, Subcommand};
use scanlink_core::cli::{ends_manual_session, format_device_table, format_event, format_parse_result, format_port};
use scanlink_core::config::{self, ConfigError, LoggingConfig};
use scanlink_core::core::parser::FrameParser;
use scanlink_core::core::transport::{list_usb_ports, DEFAULT_POLL_INTERVAL};
use scanlink_core::{
    AppConfig, BarcodeParser, CliResult, ConnectionManager, DeviceRegistry, ExitCodes, FileSettingsStore,
    Frame, OutputFormat, SerialPortProvider, SettingsStore,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Scanlink CLI
#[derive(Parser, Debug)]
#[command(name = "scanlink", version, about = "USB-serial barcode scanner monitor", long_about = None)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file
    #[arg(long, env = "SCANLINK_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Settings file holding the user device table
    #[arg(long, env = "SCANLINK_SETTINGS", global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List USB serial ports and the scanner they match
    Ports {
        /// Only ports matching a known or user device
        #[arg(long)]
        known: bool,
    },

    /// Manage user-added scanner ids
    Devices {
        #[command(subcommand)]
        action: DeviceAction,
    },

    /// Classify a barcode without a scanner
    Parse {
        /// Scanned text
        #[arg(required_unless_present = "hex")]
        text: Option<String>,

        /// Raw frame bytes as hex
        #[arg(long, conflicts_with = "text")]
        hex: Option<String>,
    },

    /// Connect and print scans until Ctrl-C
    Monitor {
        /// Port used for a manual connection
        #[arg(short, long)]
        port: Option<String>,

        /// Poll for known scanners instead of connecting once
        #[arg(short, long)]
        auto: bool,

        /// Baud rate
        #[arg(short, long)]
        baud: Option<u32>,

        /// Inter-byte timeout that ends a frame (ms)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Delay between auto-connect attempts (ms)
        #[arg(long)]
        reconnect_ms: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
enum DeviceAction {
    /// Show device tables
    List {
        /// Only user-added devices
        #[arg(long)]
        user: bool,
    },
    /// Add a VID/PID pair for auto-connection
    Add {
        /// Vendor id (4 hex digits)
        vid: String,
        /// Product id (4 hex digits)
        pid: String,
    },
    /// Remove a user-added VID/PID pair
    Remove {
        /// Vendor id (4 hex digits)
        vid: String,
        /// Product id (4 hex digits)
        pid: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let app_config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => return report(&CliResult::from(e)),
    };

    let _guard = match init_logging(&app_config.logging, cli.verbose) {
        Ok(guard) => guard,
        Err(e) => return report(&CliResult::error(ExitCodes::CONFIG_ERROR, format!("{e:#}"))),
    };

    tracing::debug!(version = scanlink_core::VERSION, "Starting scanlink");

    let result = match run(&cli, app_config).await {
        Ok(result) => result,
        Err(e) => CliResult::error(ExitCodes::ERROR, format!("{e:#}")),
    };
    report(&result)
}

fn report(result: &CliResult) -> ExitCode {
    match (result.is_success(), result.message()) {
        (true, Some(msg)) => println!("{msg}"),
        (false, Some(msg)) => eprintln!("error: {msg}"),
        _ => {}
    }
    result.to_exit_code()
}

fn load_config(cli: &Cli) -> Result<AppConfig, ConfigError> {
    match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
}

fn init_logging(logging: &LoggingConfig, verbose: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&logging.level))?
    };

    let stderr = if logging.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    };

    let (file, guard) = if logging.file {
        let dir = logging
            .directory
            .clone()
            .or_else(config::log_dir)
            .ok_or(ConfigError::NoConfigDir)?;
        std::fs::create_dir_all(&dir).with_context(|| format!("creating log directory {}", dir.display()))?;
        let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "scanlink.log"));
        let layer = fmt::layer().with_ansi(false).with_writer(writer);
        let layer = if logging.json { layer.json().boxed() } else { layer.boxed() };
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .try_init()?;
    Ok(guard)
}

fn settings_store(cli: &Cli) -> Result<FileSettingsStore, ConfigError> {
    match &cli.settings {
        Some(path) => Ok(FileSettingsStore::new(path)),
        None => FileSettingsStore::default_location(),
    }
}

async fn run(cli: &Cli, app_config: AppConfig) -> anyhow::Result<CliResult> {
    match &cli.command {
        Commands::Ports { known } => list_ports(cli, *known),
        Commands::Devices { action } => manage_devices(cli, action),
        Commands::Parse { text, hex } => parse_barcode(cli, text.as_deref(), hex.as_deref()),
        Commands::Monitor {
            port,
            auto,
            baud,
            timeout_ms,
            reconnect_ms,
        } => {
            let mut scanner = app_config.scanner;
            if let Some(baud) = baud {
                scanner.baud_rate = *baud;
            }
            if let Some(ms) = timeout_ms {
                scanner.inter_byte_timeout_ms = *ms;
            }
            if let Some(ms) = reconnect_ms {
                scanner.reconnect_delay_ms = *ms;
            }
            monitor(cli, scanner, port.clone(), *auto).await
        }
    }
}

fn list_ports(cli: &Cli, known_only: bool) -> anyhow::Result<CliResult> {
    let store = settings_store(cli)?;
    let registry = DeviceRegistry::with_user_devices(store.load()?.user_devices);
    let ports: Vec<_> = list_usb_ports()?
        .into_iter()
        .filter(|p| {
            !known_only || p.usb_ids().is_some_and(|(vid, pid)| registry.lookup_ids(vid, pid).is_some())
        })
        .collect();

    if ports.is_empty() {
        return Ok(CliResult::error(ExitCodes::DEVICE_NOT_FOUND, "No USB serial ports found"));
    }
    for port in &ports {
        println!("{}", format_port(port, &registry, cli.format)?);
    }
    Ok(CliResult::success())
}

fn manage_devices(cli: &Cli, action: &DeviceAction) -> anyhow::Result<CliResult> {
    let store = settings_store(cli)?;
    let mut settings = store.load()?;
    let mut registry = DeviceRegistry::with_user_devices(settings.user_devices.clone());

    let message = match action {
        DeviceAction::List { user } => {
            let table = if *user {
                registry.user_devices().clone()
            } else {
                registry.all_devices()
            };
            println!("{}", format_device_table(&table, cli.format)?);
            return Ok(CliResult::success());
        }
        DeviceAction::Add { vid, pid } => match registry.add_user_device(vid, pid) {
            Ok(device) => format!(
                "Device (VID:0x{}, PID:0x{}) added for auto-connection",
                device.vendor_id, device.product_id
            ),
            Err(e) => return Ok(e.into()),
        },
        DeviceAction::Remove { vid, pid } => match registry.remove_user_device(vid, pid) {
            Ok(()) => format!(
                "Device (VID:0x{}, PID:0x{}) removed from user devices list",
                vid.to_ascii_uppercase(),
                pid.to_ascii_uppercase()
            ),
            Err(e) => return Ok(e.into()),
        },
    };

    settings.user_devices = registry.user_devices().clone();
    store.save(&settings)?;
    Ok(CliResult::success_with_message(message))
}

fn parse_barcode(cli: &Cli, text: Option<&str>, hex_bytes: Option<&str>) -> anyhow::Result<CliResult> {
    let raw = match (hex_bytes, text) {
        (Some(h), _) => match hex::decode(h.trim()) {
            Ok(raw) => raw,
            Err(e) => return Ok(CliResult::error(ExitCodes::INVALID_ARGS, format!("Invalid hex input: {e}"))),
        },
        (None, Some(t)) => t.as_bytes().to_vec(),
        (None, None) => return Ok(CliResult::error(ExitCodes::INVALID_ARGS, "Nothing to parse")),
    };

    let parsed = BarcodeParser::new().parse_frame(&Frame::from(raw));
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&parsed)?),
        OutputFormat::Text => println!("{}", format_parse_result(&parsed.result, &parsed.text)),
    }

    if parsed.result.is_parsed() {
        Ok(CliResult::success())
    } else {
        Ok(CliResult::error(ExitCodes::VALIDATION_FAILED, "Barcode not recognised"))
    }
}

async fn monitor(
    cli: &Cli,
    scanner: scanlink_core::config::ScannerConfig,
    port: Option<String>,
    auto: bool,
) -> anyhow::Result<CliResult> {
    let mut provider = SerialPortProvider::new().with_hotplug(DEFAULT_POLL_INTERVAL);
    if let Some(port) = port {
        provider = provider.with_port(port);
    }

    let manager = ConnectionManager::builder(Arc::new(provider))
        .parser(Arc::new(BarcodeParser::new()))
        .settings_store(Arc::new(settings_store(cli)?))
        .scanner_config(scanner)
        .build();
    let mut rx = manager.subscribe();

    if auto {
        manager.enable_auto_connect().await;
    } else if let Err(e) = manager.connect().await {
        return Ok(e.into());
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            event = rx.recv() => match event {
                Ok(event) => {
                    println!("{}", format_event(&event, cli.format)?);
                    if !auto && ends_manual_session(&event, manager.state()) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "Event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    manager.disconnect().await;
    Ok(CliResult::success())
}

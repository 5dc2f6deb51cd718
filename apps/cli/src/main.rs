use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use canboot_core::protocol::constants::{
    APP_END, APP_START, FLASH_SIZE_KB, MAX_ADDRESSABLE_NODE_ID, RAM_SIZE_KB,
};
use canboot_core::{BusTransport, FirmwareImage, Uploader, UploaderConfig};
use clap::{Parser, Subcommand};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "CAN bootloader upload tool", long_about = None)]
struct Cli {
    /// CAN interface (e.g. can0, vcan0)
    #[arg(short, long, global = true)]
    interface: Option<String>,

    /// Target node ID, hex (0x05) or decimal, 0..=0x0F (11-bit identifiers)
    #[arg(short, long, global = true, value_parser = parse_node_id)]
    node_id: Option<u8>,

    /// Load settings from a TOML file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Acknowledgement timeout in milliseconds
    #[arg(long, global = true)]
    ack_timeout_ms: Option<u64>,

    /// CRC reply timeout in milliseconds
    #[arg(long, global = true)]
    crc_timeout_ms: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Erase the application area
    Erase,
    /// Write a firmware binary and verify it
    Write {
        /// Firmware binary to upload
        file: PathBuf,
    },
    /// Read the application CRC from the node
    Crc,
    /// Show device layout and application status
    Info,
}

fn parse_node_id(s: &str) -> Result<u8, String> {
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse::<u8>(),
    }
    .map_err(|e| format!("invalid node ID '{}': {}", s, e))?;

    if value > MAX_ADDRESSABLE_NODE_ID {
        return Err(format!(
            "node ID must be between 0 and 0x{:02X} so identifiers fit in 11 bits, got 0x{:02X}",
            MAX_ADDRESSABLE_NODE_ID, value
        ));
    }
    Ok(value)
}

fn main() {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if cli.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install log subscriber: {}", e);
    }

    if let Err(e) = run(cli) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn resolve_config(cli: &Cli) -> Result<UploaderConfig> {
    let mut config = match &cli.config {
        Some(path) => UploaderConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => UploaderConfig::default(),
    };

    if let Some(interface) = &cli.interface {
        config.interface = interface.clone();
    }
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(ms) = cli.ack_timeout_ms {
        config.ack_timeout_ms = ms;
    }
    if let Some(ms) = cli.crc_timeout_ms {
        config.checksum_timeout_ms = ms;
    }

    config.validate()?;
    Ok(config)
}

#[cfg(target_os = "linux")]
fn open_transport(interface: &str) -> Result<canboot_core::SocketCanTransport> {
    canboot_core::SocketCanTransport::open(interface)
        .with_context(|| format!("Failed to open CAN interface {}", interface))
}

#[cfg(not(target_os = "linux"))]
fn open_transport(interface: &str) -> Result<canboot_core::MockTransport> {
    anyhow::bail!("SocketCAN is not available on this platform ({})", interface)
}

fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli)?;
    info!(
        interface = %config.interface,
        node = %format!("0x{:02X}", config.node_id),
        "Starting canboot"
    );

    let transport = open_transport(&config.interface)?;
    let mut uploader = Uploader::new(transport, &config)?;

    match &cli.command {
        Commands::Erase => erase(&uploader),
        Commands::Write { file } => write(&mut uploader, file),
        Commands::Crc => crc(&uploader),
        Commands::Info => device_info(&uploader),
    }
}

fn erase<T: BusTransport>(uploader: &Uploader<T>) -> Result<()> {
    info!("Erasing application area...");
    uploader.erase()?;
    println!("Erase completed");
    Ok(())
}

fn write<T: BusTransport>(uploader: &mut Uploader<T>, file: &Path) -> Result<()> {
    let image = FirmwareImage::load(file)
        .with_context(|| format!("Failed to read firmware {}", file.display()))?;

    let report = uploader.upload(image.bytes())?;
    println!(
        "Wrote {} bytes in {} words, CRC 0x{:08X} verified ({:.1}s)",
        report.bytes,
        report.chunks,
        report.crc,
        report.elapsed.as_secs_f64()
    );
    Ok(())
}

fn crc<T: BusTransport>(uploader: &Uploader<T>) -> Result<()> {
    let crc = uploader.query_checksum()?;
    println!("Application CRC: 0x{:08X}", crc);
    Ok(())
}

fn device_info<T: BusTransport>(uploader: &Uploader<T>) -> Result<()> {
    println!("Node ID:           0x{:02X}", uploader.node_id());
    println!("Application start: 0x{:08X}", APP_START);
    println!("Application end:   0x{:08X}", APP_END);
    println!("Application size:  {} KB", (APP_END - APP_START) / 1024);
    println!("Flash size:        {} KB", FLASH_SIZE_KB);
    println!("RAM size:          {} KB", RAM_SIZE_KB);

    let status = uploader.application_status()?;
    println!("Application CRC:   0x{:08X}", status.crc);
    println!(
        "Application:       {}",
        if status.programmed { "valid" } else { "invalid (erased)" }
    );
    Ok(())
}

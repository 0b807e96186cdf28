use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use owlink_hub::{Hub, HubConfig};
use owlink_transport::LinkAddress;

use crate::exit::{hub_error, transport_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod capture;
pub mod monitor;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Watch device state and print hub statistics periodically.
    Monitor(MonitorArgs),
    /// Send one acknowledged command and print its outcome.
    Send(SendArgs),
    /// Trigger a photo capture and retrieve the image.
    Capture(CaptureArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Monitor(args) => monitor::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Capture(args) => capture::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Link address (serial:/dev/ttyUSB0@115200, tcp:host:port, unix:/path).
    pub link: String,
    /// Devices to greet on start (comma-separated). Others appear once heard.
    #[arg(long, value_delimiter = ',')]
    pub devices: Option<Vec<u8>>,
    /// Time between statistics snapshots (e.g. 1s, 500ms).
    #[arg(long, default_value = "1s")]
    pub interval: String,
    /// Exit after printing N snapshots.
    #[arg(long)]
    pub count: Option<usize>,
    /// Do not send ground-station heartbeats.
    #[arg(long)]
    pub no_heartbeat: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Link address (serial:/dev/ttyUSB0@115200, tcp:host:port, unix:/path).
    pub link: String,
    /// Target device id (0-15).
    #[arg(long, short = 'd')]
    pub device: u8,
    /// Command name (arm-disarm, return-to-launch, ...) or numeric id.
    #[arg(long, short = 'c')]
    pub command: String,
    /// Up to six numeric parameters (comma-separated).
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
    pub params: Vec<f32>,
    /// Succeed only once the device reports the command finished.
    #[arg(long)]
    pub wait_finish: bool,
    /// Send attempts before giving up.
    #[arg(long, default_value = "3")]
    pub retries: u32,
    /// Time to wait for an ack before resending (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s")]
    pub retry_interval: String,
    /// Total time budget for the command (e.g. 5s).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Fixed timestamp tag instead of one derived from the clock.
    #[arg(long)]
    pub tag: Option<u32>,
}

#[derive(Args, Debug)]
pub struct CaptureArgs {
    /// Link address (serial:/dev/ttyUSB0@115200, tcp:host:port, unix:/path).
    pub link: String,
    /// Target device id (0-15).
    #[arg(long, short = 'd')]
    pub device: u8,
    /// Write the retrieved image to this file.
    #[arg(long, short = 'o')]
    pub out: Option<PathBuf>,
    /// Time to wait for the whole capture and transfer (e.g. 30s).
    #[arg(long, default_value = "30s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_link(input: &str) -> CliResult<LinkAddress> {
    input
        .parse::<LinkAddress>()
        .map_err(|err| transport_error("invalid link", err))
}

pub(crate) fn open_hub(link: &str, config: HubConfig) -> CliResult<Hub> {
    let address = parse_link(link)?;
    Hub::open(&address, config).map_err(|err| hub_error(&format!("failed to open {address}"), err))
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(number) => (number, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

use std::io::{IsTerminal, Write};
use std::path::Path;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use owlink_hub::{CommandOutcome, CommandStatus, DeviceStats, HubStats, Position, TransferEvent};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn print_stats(stats: &HubStats, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(stats),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "DEVICE", "ARMED", "MODE", "LANDED", "POSITION", "CACHED", "PENDING",
                    "TRANSFERS",
                ]);
            for device in &stats.devices {
                table.add_row(vec![
                    device.device_id.to_string(),
                    device.armed.to_string(),
                    format!("{:?}", device.flight_mode).to_lowercase(),
                    format!("{:?}", device.landed).to_lowercase(),
                    position_text(device.position.as_ref()),
                    device.cached_messages.to_string(),
                    device.pending_commands.to_string(),
                    device.active_transfers.to_string(),
                ]);
            }
            println!(
                "link={} running={} frames={} corrupt={}",
                stats.link, stats.running, stats.frames_received, stats.corrupt_frames
            );
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "link={} running={} frames={} corrupt={} devices={}",
                stats.link,
                stats.running,
                stats.frames_received,
                stats.corrupt_frames,
                stats.endpoints
            );
            for device in &stats.devices {
                println!("  {}", device_line(device));
            }
        }
    }
}

fn device_line(device: &DeviceStats) -> String {
    format!(
        "device={} armed={} mode={:?} landed={:?} position={} pending={} transfers={}",
        device.device_id,
        device.armed,
        device.flight_mode,
        device.landed,
        position_text(device.position.as_ref()),
        device.pending_commands,
        device.active_transfers
    )
}

fn position_text(position: Option<&Position>) -> String {
    match position {
        Some(pos) => format!("{:.6},{:.6} {:.1}m", pos.lat, pos.lon, pos.relative_alt),
        None => "-".to_string(),
    }
}

#[derive(Serialize)]
struct CommandOutput {
    device: u8,
    command: String,
    sequence: u32,
    tag: u32,
    status: CommandStatus,
    attempts: u32,
    elapsed_ms: u128,
}

pub fn print_command_outcome(device: u8, outcome: &CommandOutcome, format: OutputFormat) {
    let out = CommandOutput {
        device,
        command: outcome.kind.to_string(),
        sequence: outcome.sequence,
        tag: outcome.tag,
        status: outcome.status,
        attempts: outcome.attempts,
        elapsed_ms: outcome.elapsed.as_millis(),
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["DEVICE", "COMMAND", "STATUS", "ATTEMPTS", "ELAPSED", "TAG"])
                .add_row(vec![
                    out.device.to_string(),
                    out.command.clone(),
                    status_name(out.status).to_string(),
                    out.attempts.to_string(),
                    format!("{}ms", out.elapsed_ms),
                    out.tag.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!(
            "device={} command={} status={} attempts={} elapsed={}ms tag={}",
            out.device,
            out.command,
            status_name(out.status),
            out.attempts,
            out.elapsed_ms,
            out.tag
        ),
        OutputFormat::Raw => println!("{}", status_name(out.status)),
    }
}

fn status_name(status: CommandStatus) -> &'static str {
    match status {
        CommandStatus::Pending => "pending",
        CommandStatus::Received => "received",
        CommandStatus::Finished => "finished",
        CommandStatus::Error => "error",
        CommandStatus::Superseded => "superseded",
        CommandStatus::TimedOut => "timed_out",
    }
}

#[derive(Serialize)]
struct TransferOutput<'a> {
    device: u8,
    transfer_id: u8,
    bytes: usize,
    complete: bool,
    missing: &'a [u32],
    checksum_mismatches: u32,
    path: Option<String>,
}

/// Summarize a finished transfer. In raw mode the payload itself goes to
/// stdout unless it was written to a file.
pub fn print_transfer(event: &TransferEvent, path: Option<&Path>, format: OutputFormat) {
    let out = TransferOutput {
        device: event.device_id,
        transfer_id: event.transfer_id,
        bytes: event.payload.len(),
        complete: event.complete,
        missing: &event.missing,
        checksum_mismatches: event.checksum_mismatches,
        path: path.map(|path| path.display().to_string()),
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["DEVICE", "TRANSFER", "BYTES", "COMPLETE", "MISSING", "FILE"])
                .add_row(vec![
                    out.device.to_string(),
                    out.transfer_id.to_string(),
                    out.bytes.to_string(),
                    out.complete.to_string(),
                    out.missing.len().to_string(),
                    out.path.clone().unwrap_or_else(|| "-".to_string()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!(
            "device={} transfer={} bytes={} complete={} missing={:?} checksum_mismatches={}",
            out.device,
            out.transfer_id,
            out.bytes,
            out.complete,
            out.missing,
            out.checksum_mismatches
        ),
        OutputFormat::Raw => {
            if path.is_none() {
                print_raw(&event.payload);
            }
        }
    }
}

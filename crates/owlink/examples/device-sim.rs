//! Simulated devices on a Unix socket, for trying the CLI without hardware.
//!
//! Run with:
//!   cargo run --example device-sim -- /tmp/owlink-sim.sock 1,2,3
//!
//! In another terminal:
//!   cargo run --features cli -- send unix:/tmp/owlink-sim.sock -d 1 -c arm --params 1 --wait-finish
//!   cargo run --features cli -- capture unix:/tmp/owlink-sim.sock -d 2 --out /tmp/photo.bin

#[path = "../tests/common/mod.rs"]
mod common;

use std::fs;
use std::os::unix::net::UnixListener;
use std::thread;
use std::time::Duration;

use common::{Profile, SimDevice};
use owlink::transport::LinkStream;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let sock_path = args
        .next()
        .unwrap_or_else(|| "/tmp/owlink-sim.sock".to_string());
    let devices: Vec<u8> = args
        .next()
        .unwrap_or_else(|| "1".to_string())
        .split(',')
        .map(str::parse)
        .collect::<Result<_, _>>()?;

    let _ = fs::remove_file(&sock_path);
    let listener = UnixListener::bind(&sock_path)?;
    eprintln!("Simulating devices {devices:?} on {sock_path}");

    // One ground connection at a time, until interrupted.
    loop {
        let (stream, _) = listener.accept()?;
        eprintln!("Ground connected");
        let profiles = devices.iter().map(|id| (*id, Profile::default())).collect();
        let sim = SimDevice::spawn(LinkStream::from_unix(stream), profiles);

        let mut tick = 0u32;
        while sim.is_running() {
            for device in &devices {
                // Alternate between Hold and Position so the monitor shows change.
                let mode = if tick % 10 < 5 { 2 << 24 } else { 3 << 24 };
                sim.send_heartbeat(*device, tick % 20 >= 10, mode);
            }
            tick = tick.wrapping_add(1);
            thread::sleep(Duration::from_secs(1));
        }

        let log = sim.log();
        eprintln!(
            "Ground disconnected after {} command(s), {} clear(s)",
            log.commands.len(),
            log.clears.len()
        );
    }
}

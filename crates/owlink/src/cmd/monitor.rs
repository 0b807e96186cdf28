use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use owlink_hub::HubConfig;
use tracing::{info, warn};

use crate::cmd::{open_hub, parse_duration, MonitorArgs};
use crate::exit::{hub_error, CliError, CliResult, INTERNAL, SUCCESS, TRANSPORT_ERROR};
use crate::output::{print_stats, OutputFormat};

const TICK: Duration = Duration::from_millis(50);

pub fn run(args: MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let interval = parse_duration(&args.interval)?;
    let config = HubConfig {
        heartbeat_enabled: !args.no_heartbeat,
        ..HubConfig::default()
    };
    let hub = open_hub(&args.link, config)?;

    for device in args.devices.iter().flatten() {
        hub.endpoint(*device)
            .map_err(|err| hub_error(&format!("device {device}"), err))?;
    }
    info!(link = %args.link, devices = hub.device_ids().len(), "monitoring");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;
    let mut next = Instant::now() + interval;
    while running.load(Ordering::SeqCst) {
        if !hub.is_running() {
            warn!("link closed");
            hub.shutdown();
            return Err(CliError::new(TRANSPORT_ERROR, "link closed"));
        }
        if Instant::now() < next {
            thread::sleep(TICK.min(next.saturating_duration_since(Instant::now())));
            continue;
        }
        next += interval;

        print_stats(&hub.statistics(), format);
        printed = printed.saturating_add(1);
        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
    }

    hub.shutdown();
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use owlink_hub::{CaptureError, HubConfig, TransferEvent};
use tracing::{info, warn};

use crate::cmd::{open_hub, parse_duration, CaptureArgs};
use crate::exit::{
    capture_error, hub_error, io_error, CliError, CliResult, DATA_INVALID, SUCCESS, TIMEOUT,
    TRANSPORT_ERROR,
};
use crate::output::{print_transfer, OutputFormat};

pub fn run(args: CaptureArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let deadline = Instant::now() + timeout;

    let hub = open_hub(&args.link, HubConfig::default())?;
    let events = hub.subscribe_transfers();
    let handle = hub
        .trigger_capture(args.device)
        .map_err(|err| hub_error("capture failed", err))?;

    let result = match handle.wait_timeout(timeout) {
        Some(Ok(transfer_id)) => {
            info!(device = args.device, transfer_id, "capture acknowledged");
            wait_for_transfer(&events, args.device, transfer_id, deadline)
        }
        Some(Err(err)) => Err(capture_error("capture failed", err)),
        None => Err(capture_error("capture failed", CaptureError::TimedOut)),
    };
    hub.shutdown();
    let event = result?;

    if let Some(path) = &args.out {
        std::fs::write(path, &event.payload)
            .map_err(|err| io_error(&format!("failed writing {}", path.display()), err))?;
    }
    print_transfer(&event, args.out.as_deref(), format);

    if event.complete {
        Ok(SUCCESS)
    } else {
        warn!(
            device = event.device_id,
            transfer_id = event.transfer_id,
            missing = event.missing.len(),
            "transfer completed with missing chunks"
        );
        Ok(DATA_INVALID)
    }
}

fn wait_for_transfer(
    events: &Receiver<TransferEvent>,
    device_id: u8,
    transfer_id: u8,
    deadline: Instant,
) -> CliResult<TransferEvent> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining == Duration::ZERO {
            return Err(CliError::new(
                TIMEOUT,
                format!("transfer {transfer_id} from device {device_id} did not finish in time"),
            ));
        }
        match events.recv_timeout(remaining) {
            Ok(event) if event.device_id == device_id && event.transfer_id == transfer_id => {
                return Ok(event)
            }
            Ok(_) => continue,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(CliError::new(TRANSPORT_ERROR, "link closed during transfer"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use bytes::Bytes;

    use super::*;

    fn event(device_id: u8, transfer_id: u8) -> TransferEvent {
        TransferEvent {
            device_id,
            transfer_id,
            payload: Bytes::from_static(b"jpeg"),
            complete: true,
            missing: Vec::new(),
            checksum_mismatches: 0,
        }
    }

    #[test]
    fn skips_events_for_other_transfers() {
        let (tx, rx) = mpsc::channel();
        tx.send(event(4, 9)).unwrap();
        tx.send(event(3, 7)).unwrap();
        tx.send(event(3, 9)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(1);
        let found = wait_for_transfer(&rx, 3, 9, deadline).unwrap();
        assert_eq!((found.device_id, found.transfer_id), (3, 9));
    }

    #[test]
    fn deadline_is_a_timeout() {
        let (_tx, rx) = mpsc::channel::<TransferEvent>();
        let deadline = Instant::now() + Duration::from_millis(30);
        let err = wait_for_transfer(&rx, 1, 1, deadline).unwrap_err();
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn closed_channel_is_transport_error() {
        let (tx, rx) = mpsc::channel::<TransferEvent>();
        drop(tx);
        let deadline = Instant::now() + Duration::from_secs(1);
        let err = wait_for_transfer(&rx, 1, 1, deadline).unwrap_err();
        assert_eq!(err.code, TRANSPORT_ERROR);
    }
}

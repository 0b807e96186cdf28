use owlink_hub::{CommandRequest, HubConfig, RetryPolicy};
use owlink_message::CommandKind;
use tracing::{debug, info};

use crate::cmd::{open_hub, parse_duration, SendArgs};
use crate::exit::{command_error, hub_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_command_outcome, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let request = build_request(&args)?;
    let hub = open_hub(&args.link, HubConfig::default())?;

    let handle = hub
        .submit_command(args.device, request)
        .map_err(|err| hub_error("submit failed", err))?;
    debug!(
        device = args.device,
        sequence = handle.sequence(),
        tag = handle.tag(),
        "command submitted"
    );

    let result = handle.wait();
    hub.shutdown();

    let outcome = result.map_err(|err| command_error("command failed", err))?;
    info!(
        device = args.device,
        attempts = outcome.attempts,
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        "command acknowledged"
    );
    print_command_outcome(args.device, &outcome, format);
    Ok(SUCCESS)
}

fn build_request(args: &SendArgs) -> CliResult<CommandRequest> {
    let kind: CommandKind = args
        .command
        .parse()
        .map_err(|err: String| CliError::new(USAGE, err))?;

    if args.params.len() > 6 {
        return Err(CliError::new(
            USAGE,
            format!("at most 6 parameters are allowed, got {}", args.params.len()),
        ));
    }
    let mut params = [0.0f32; 6];
    params[..args.params.len()].copy_from_slice(&args.params);

    let policy = RetryPolicy {
        max_retries: args.retries,
        retry_interval: parse_duration(&args.retry_interval)?,
        timeout: parse_duration(&args.timeout)?,
        ..RetryPolicy::default()
    };

    let mut request = CommandRequest::new(kind)
        .params(params)
        .wait_for_finish(args.wait_finish)
        .policy(policy);
    if let Some(tag) = args.tag {
        request = request.tag(tag);
    }
    Ok(request)
}

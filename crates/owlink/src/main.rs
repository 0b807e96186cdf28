mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "owlink", version, about = "Ground-station link for owlink devices")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        env = "OWLINK_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    match cmd::run(cli.command, format) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "owlink",
            "send",
            "unix:/tmp/owlink.sock",
            "--device",
            "3",
            "--command",
            "arm",
            "--params",
            "1,0",
            "--wait-finish",
        ])
        .expect("send args should parse");

        match cli.command {
            Command::Send(args) => {
                assert_eq!(args.device, 3);
                assert_eq!(args.params, vec![1.0, 0.0]);
                assert!(args.wait_finish);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn send_requires_device() {
        let err = Cli::try_parse_from(["owlink", "send", "tcp:127.0.0.1:5760", "--command", "rtl"])
            .expect_err("missing device should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_capture_with_output_file() {
        let cli = Cli::try_parse_from([
            "owlink",
            "--format",
            "json",
            "capture",
            "/dev/ttyUSB0",
            "-d",
            "1",
            "--out",
            "/tmp/photo.jpg",
            "--timeout",
            "45s",
        ])
        .expect("capture args should parse");
        assert!(matches!(cli.format, Some(OutputFormat::Json)));
        assert!(matches!(cli.command, Command::Capture(_)));
    }

    #[test]
    fn parses_monitor_device_list() {
        let cli = Cli::try_parse_from([
            "owlink",
            "monitor",
            "unix:/tmp/sim.sock",
            "--devices",
            "1,2,5",
            "--count",
            "2",
        ])
        .expect("monitor args should parse");
        match cli.command {
            Command::Monitor(args) => {
                assert_eq!(args.devices, Some(vec![1, 2, 5]));
                assert_eq!(args.count, Some(2));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_log_level() {
        let err = Cli::try_parse_from(["owlink", "--log-level", "loud", "version"])
            .expect_err("bad level should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }
}

#![cfg(all(unix, feature = "cli"))]

mod common;

use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::thread::{self, JoinHandle};

use common::{sample_photo, Profile, SimDevice};
use owlink::message::CommandKind;
use owlink::transport::LinkStream;

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/owlink-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

/// Accept one ground connection on `path` and serve it with simulated devices.
fn serve_once(path: &Path, profiles: Vec<(u8, Profile)>) -> JoinHandle<SimDevice> {
    let listener = UnixListener::bind(path).expect("sim socket should bind");
    thread::spawn(move || {
        let (stream, _) = listener.accept().expect("ground should connect");
        SimDevice::spawn(LinkStream::from_unix(stream), profiles)
    })
}

fn owlink(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_owlink"))
        .arg("--log-level")
        .arg("error")
        .args(args)
        .output()
        .expect("owlink should run")
}

#[test]
fn send_prints_finished_outcome() {
    let dir = unique_temp_dir("send");
    let sock = dir.join("link.sock");
    let sim = serve_once(&sock, vec![(3, Profile::default())]);
    let link = format!("unix:{}", sock.display());

    let output = owlink(&[
        "--format",
        "json",
        "send",
        &link,
        "--device",
        "3",
        "--command",
        "arm",
        "--params",
        "1",
        "--wait-finish",
    ]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(json["device"], 3);
    assert_eq!(json["status"], "finished");
    assert_eq!(json["command"], "arm-disarm");

    let sim = sim.join().expect("sim thread");
    let sent = sim.log().commands_for(3, CommandKind::ArmDisarm);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].params[0], 1.0);
}

#[test]
fn rejected_command_exits_with_rejected_code() {
    let dir = unique_temp_dir("reject");
    let sock = dir.join("link.sock");
    let profile = Profile {
        reject: vec![CommandKind::ReturnToLaunch.id()],
        ..Profile::default()
    };
    let _sim = serve_once(&sock, vec![(1, profile)]);
    let link = format!("unix:{}", sock.display());

    let output = owlink(&["send", &link, "-d", "1", "-c", "rtl"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("rejected"));
}

#[test]
fn capture_writes_image_to_file() {
    let dir = unique_temp_dir("capture");
    let sock = dir.join("link.sock");
    let out = dir.join("photo.jpg");
    let profile = Profile {
        drop_first_pass: vec![1],
        ..Profile::default()
    };
    let _sim = serve_once(&sock, vec![(4, profile)]);
    let link = format!("unix:{}", sock.display());

    let output = owlink(&[
        "--format",
        "json",
        "capture",
        &link,
        "-d",
        "4",
        "--out",
        out.to_str().expect("utf-8 path"),
        "--timeout",
        "10s",
    ]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(std::fs::read(&out).expect("image written"), sample_photo(6));

    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(json["transfer_id"], 7);
    assert_eq!(json["complete"], true);
}

#[test]
fn version_prints_package_version() {
    let output = owlink(&["version"]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("owlink {}", env!("CARGO_PKG_VERSION")));

    let extended = owlink(&["version", "--extended"]);
    assert!(String::from_utf8_lossy(&extended.stdout).contains("devices: 16"));
}

#[test]
fn malformed_link_is_a_usage_error() {
    let output = owlink(&["send", "tcp:nohost", "-d", "1", "-c", "arm"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn missing_socket_is_a_transport_error() {
    let dir = unique_temp_dir("missing");
    let link = format!("unix:{}", dir.join("absent.sock").display());
    let output = owlink(&["send", &link, "-d", "1", "-c", "arm"]);
    assert_eq!(output.status.code(), Some(3));
}

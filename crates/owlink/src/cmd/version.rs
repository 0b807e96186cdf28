use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("owlink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: owlink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target: {}", env!("OWLINK_BUILD_TARGET"));
    println!("profile: {}", env!("OWLINK_BUILD_PROFILE"));
    println!(
        "features: hub={}, serial={}, cli=true",
        cfg!(feature = "hub"),
        cfg!(feature = "serial")
    );
    println!("devices: {}", owlink_frame::DEVICE_COUNT);
    println!("max_frame_payload: {}", owlink_frame::MAX_PAYLOAD);

    Ok(SUCCESS)
}

use serde::Serialize;

use crate::cmd::device::{finish, open_session};
use crate::cmd::DeviceArgs;
use crate::exit::{pmem_error, CliResult, SUCCESS};
use crate::output::{print_fields, print_json, OutputFormat};

#[derive(Serialize)]
struct StatusOutput {
    charge: u8,
}

pub fn run(args: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    let mut session = open_session(args, true)?;
    let status = session
        .device_status()
        .map_err(|err| pmem_error("device status", err))?;
    finish(session)?;

    match format {
        OutputFormat::Json => print_json(&StatusOutput {
            charge: status.charge,
        }),
        _ => print_fields(
            "Device Status",
            &[("Charge", format!("{}%", status.charge))],
            format,
        ),
    }
    Ok(SUCCESS)
}

use serde::Serialize;

use crate::cmd::device::{finish, open_session};
use crate::cmd::DeviceArgs;
use crate::exit::{pmem_error, CliResult, SUCCESS};
use crate::output::{print_fields, print_json, OutputFormat};

#[derive(Serialize)]
struct InfoOutput {
    model: String,
    serial: String,
    fw_version: String,
    hw_version: String,
    bsl_version: String,
}

pub fn run(args: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    let mut session = open_session(args, true)?;
    let info = session
        .device_info()
        .map_err(|err| pmem_error("device info", err))?;
    finish(session)?;

    let out = InfoOutput {
        model: info.model,
        serial: info.serial,
        fw_version: info.fw_version.to_string(),
        hw_version: info.hw_version.to_string(),
        bsl_version: info.bsl_version.to_string(),
    };
    match format {
        OutputFormat::Json => print_json(&out),
        _ => print_fields(
            "Device Info",
            &[
                ("Model", out.model.clone()),
                ("Serial", out.serial.clone()),
                ("Firmware", out.fw_version.clone()),
                ("Hardware", out.hw_version.clone()),
                ("Bootloader", out.bsl_version.clone()),
            ],
            format,
        ),
    }
    Ok(SUCCESS)
}

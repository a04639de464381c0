use serde::Serialize;

use crate::cmd::device::{finish, open_session};
use crate::cmd::DeviceArgs;
use crate::exit::{pmem_error, CliResult, SUCCESS};
use crate::output::{hex, print_fields, print_json, OutputFormat};

#[derive(Serialize)]
struct SettingsOutput {
    sounds: Option<bool>,
    raw: String,
}

pub fn run(args: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    let mut session = open_session(args, true)?;
    let settings = session
        .read_settings()
        .map_err(|err| pmem_error("read settings", err))?;
    finish(session)?;

    let out = SettingsOutput {
        sounds: settings.sounds(),
        raw: hex(&settings.raw),
    };
    match format {
        OutputFormat::Json => print_json(&out),
        _ => {
            let sounds = match out.sounds {
                Some(true) => "on".to_string(),
                Some(false) => "off".to_string(),
                None => "unknown".to_string(),
            };
            print_fields("Settings", &[("Sounds", sounds), ("Raw", out.raw)], format);
        }
    }
    Ok(SUCCESS)
}

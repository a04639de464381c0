use serde::Serialize;

use crate::cmd::device::{finish, open_session};
use crate::cmd::DeviceArgs;
use crate::exit::{pmem_error, CliResult, SUCCESS};
use crate::output::{hex, print_json, table, OutputFormat};

#[derive(Serialize)]
struct HeaderOutput {
    index: usize,
    kind: u16,
    header_part: u16,
    data: String,
}

pub fn run(args: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    let mut session = open_session(args, true)?;
    let entries = session
        .device_log_headers()
        .map_err(|err| pmem_error("log headers", err))?;
    finish(session)?;

    let out: Vec<HeaderOutput> = entries
        .iter()
        .enumerate()
        .map(|(index, entry)| HeaderOutput {
            index,
            kind: entry.kind,
            header_part: entry.header_part,
            data: hex(&entry.data),
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut t = table(vec!["INDEX", "KIND", "PART", "DATA"]);
            for h in &out {
                t.add_row(vec![
                    h.index.to_string(),
                    h.kind.to_string(),
                    h.header_part.to_string(),
                    h.data.clone(),
                ]);
            }
            println!("{t}");
        }
        OutputFormat::Pretty => {
            for h in &out {
                println!("{: >2}: kind {} part {}: {}", h.index, h.kind, h.header_part, h.data);
            }
        }
    }
    Ok(SUCCESS)
}

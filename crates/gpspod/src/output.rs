use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

/// Print `(field, value)` rows in the requested human format.
pub fn print_fields(title: &str, fields: &[(&str, String)], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            let mut t = table(vec!["FIELD", "VALUE"]);
            for (name, value) in fields {
                t.add_row(vec![name.to_string(), value.clone()]);
            }
            println!("{t}");
        }
        OutputFormat::Pretty | OutputFormat::Json => {
            println!("{title}:");
            let width = fields.iter().map(|(n, _)| n.len()).max().unwrap_or(0);
            for (name, value) in fields {
                println!("  {:<width$}  {value}", format!("{name}:"), width = width + 1);
            }
        }
    }
}

pub fn hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_is_spaced_lowercase() {
        assert_eq!(hex(&[0x3f, 0x0a, 0xff]), "3f 0a ff");
        assert_eq!(hex(&[]), "");
    }
}

use gencp_gateway::{read_manifest, ManifestEntry, SchemaType};
use serde::Serialize;

use crate::cmd::ManifestArgs;
use crate::exit::{gateway_error, CliResult, SUCCESS};
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct EntryOutput<'a> {
    index: usize,
    version: String,
    schema_version: String,
    schema_type: SchemaType,
    #[serde(flatten)]
    entry: &'a ManifestEntry,
}

pub fn run(args: ManifestArgs, format: OutputFormat) -> CliResult<i32> {
    let mut client = args.device.client()?;
    let entries =
        read_manifest(&mut client).map_err(|err| gateway_error("manifest read failed", err))?;

    let rows: Vec<EntryOutput<'_>> = entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let (major, minor, sub) = entry.file_version();
            let (schema_major, schema_minor) = entry.schema_version();
            EntryOutput {
                index,
                version: format!("{major}.{minor}.{sub}"),
                schema_version: format!("{schema_major}.{schema_minor}"),
                schema_type: entry.schema_type(),
                entry,
            }
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&rows),
        OutputFormat::Table | OutputFormat::Pretty => print_table(
            &["#", "VERSION", "SCHEMA", "TYPE", "ADDRESS", "SIZE", "SHA1"],
            rows.iter().map(|row| {
                vec![
                    row.index.to_string(),
                    row.version.clone(),
                    row.schema_version.clone(),
                    schema_label(row.schema_type),
                    format!("0x{:X}", row.entry.address),
                    row.entry.size.to_string(),
                    row.entry.sha1_hex(),
                ]
            }),
        ),
        OutputFormat::Raw => {
            for row in &rows {
                println!("{} {} {}", row.index, row.entry.size, row.entry.sha1_hex());
            }
        }
    }
    Ok(SUCCESS)
}

fn schema_label(schema: SchemaType) -> String {
    match schema {
        SchemaType::Uncompressed => "xml".to_string(),
        SchemaType::Zip => "zip".to_string(),
        SchemaType::Other(bits) => format!("type {bits}"),
    }
}

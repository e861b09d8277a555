use std::path::{Path, PathBuf};

use gencp_gateway::{retrieve_file, DeviceClient, SchemaType};
use serde::Serialize;

use crate::cmd::FetchArgs;
use crate::exit::{gateway_error, io_error, CliResult, SUCCESS};
use crate::output::{print_fields, print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct FetchOutput {
    index: usize,
    path: String,
    size: usize,
    expected_sha1: String,
    computed_sha1: String,
    digest_ok: bool,
}

pub fn run(args: FetchArgs, format: OutputFormat) -> CliResult<i32> {
    let config = gencp_gateway::ClientConfig {
        max_file_size: args.max_size,
        ..args.device.client_config()?
    };
    let mut client = DeviceClient::with_config(args.device.open()?, config);
    let file =
        retrieve_file(&mut client, args.index).map_err(|err| gateway_error("fetch failed", err))?;

    let path = output_path(&args.out, file.entry.schema_type());
    std::fs::write(&path, &file.data)
        .map_err(|err| io_error(&format!("failed writing {}", path.display()), err))?;

    if !file.digest_ok {
        eprintln!(
            "warning: SHA-1 mismatch for entry {} (expected {}, computed {})",
            args.index,
            file.entry.sha1_hex(),
            file.digest_hex()
        );
    }

    let out = FetchOutput {
        index: args.index,
        path: path.display().to_string(),
        size: file.data.len(),
        expected_sha1: file.entry.sha1_hex(),
        computed_sha1: file.digest_hex(),
        digest_ok: file.digest_ok,
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_table(
            &["#", "PATH", "SIZE", "SHA1", "VERIFIED"],
            [vec![
                out.index.to_string(),
                out.path.clone(),
                out.size.to_string(),
                out.computed_sha1.clone(),
                out.digest_ok.to_string(),
            ]],
        ),
        OutputFormat::Pretty => print_fields(
            "Fetched",
            &[
                ("Path", out.path.clone()),
                ("Size", format!("{} bytes", out.size)),
                ("SHA-1", out.computed_sha1.clone()),
                ("Verified", out.digest_ok.to_string()),
            ],
        ),
        OutputFormat::Raw => println!("{}", out.path),
    }
    Ok(SUCCESS)
}

/// Zip-compressed files get a `.zip` suffix unless they already have one.
fn output_path(out: &Path, schema: SchemaType) -> PathBuf {
    let has_zip = out
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
    if schema == SchemaType::Zip && !has_zip {
        let mut name = out.as_os_str().to_owned();
        name.push(".zip");
        PathBuf::from(name)
    } else {
        out.to_path_buf()
    }
}

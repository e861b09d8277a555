use gencp_gateway::Command;
use serde::Serialize;

use crate::cmd::WriteArgs;
use crate::exit::{gateway_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct WriteOutput<'a> {
    address: String,
    kind: &'a str,
    value: &'a str,
    bytes: usize,
    ok: bool,
}

pub fn run(args: WriteArgs, format: OutputFormat) -> CliResult<i32> {
    // String values are taken verbatim after `=`.
    let line = format!("{} {} ={}", args.kind, args.address, args.value);
    let (address, value) = match gencp_gateway::parse(&line, args.device.max_payload) {
        Ok(Command::Write { address, value }) => (address, value),
        Ok(Command::Read { .. }) => {
            return Err(CliError::new(USAGE, "expected a register kind, address and value"))
        }
        Err(err) => return Err(CliError::new(USAGE, format!("invalid write: {err}"))),
    };

    let mut client = args.device.client()?;
    let payload = value.payload();
    client
        .write_payload(address, &payload)
        .map_err(|err| gateway_error("write failed", err))?;

    let out = WriteOutput {
        address: format!("0x{address:X}"),
        kind: &args.kind,
        value: &args.value,
        bytes: payload.len(),
        ok: true,
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_table(
            &["ADDRESS", "KIND", "VALUE", "BYTES"],
            [vec![
                out.address.clone(),
                out.kind.to_string(),
                out.value.to_string(),
                out.bytes.to_string(),
            ]],
        ),
        OutputFormat::Pretty | OutputFormat::Raw => println!("OK"),
    }
    Ok(SUCCESS)
}

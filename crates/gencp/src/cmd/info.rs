use gencp_gateway::read_identity;
use serde::Serialize;

use crate::cmd::InfoArgs;
use crate::exit::{gateway_error, CliResult, SUCCESS};
use crate::output::{print_fields, print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct InfoOutput<'a> {
    device: String,
    #[serde(flatten)]
    identity: &'a gencp_gateway::DeviceIdentity,
}

pub fn run(args: InfoArgs, format: OutputFormat) -> CliResult<i32> {
    let mut client = args.device.client()?;
    let identity = read_identity(&mut client).map_err(|err| gateway_error("info failed", err))?;

    let fields = [
        ("GenCP version", identity.gencp_version.clone()),
        ("Manufacturer", identity.manufacturer.clone()),
        ("Model", identity.model.clone()),
        ("Family", identity.family.clone()),
        ("Device version", identity.device_version.clone()),
        ("Manufacturer info", identity.manufacturer_info.clone()),
        ("Serial number", identity.serial_number.clone()),
        ("User name", identity.user_defined_name.clone()),
        ("Capability", format!("0x{:016X}", identity.capability)),
        ("Max response", format!("{} ms", identity.max_response_time_ms)),
        ("Manifest at", format!("0x{:X}", identity.manifest_address)),
        ("Heartbeat", format!("{} ms", identity.heartbeat_timeout_ms)),
    ];

    match format {
        OutputFormat::Json => print_json(&InfoOutput {
            device: args.device.device.display().to_string(),
            identity: &identity,
        }),
        OutputFormat::Table => print_table(
            &["REGISTER", "VALUE"],
            fields.iter().map(|(k, v)| vec![k.to_string(), v.clone()]),
        ),
        OutputFormat::Pretty => print_fields("Device", &fields),
        OutputFormat::Raw => println!("{} {}", identity.manufacturer, identity.model),
    }
    Ok(SUCCESS)
}

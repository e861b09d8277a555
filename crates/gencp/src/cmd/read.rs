use gencp_gateway::{Command, DeviceClient, GatewayError, ValueKind};
use gencp_transport::Transport;
use serde::Serialize;

use crate::cmd::ReadArgs;
use crate::exit::{gateway_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Unsigned(u64),
    Float(f64),
}

impl Value {
    /// The value alone.
    fn plain(&self) -> String {
        match self {
            Value::Text(text) => text.clone(),
            Value::Unsigned(v) => v.to_string(),
            Value::Float(v) => format!("{v:.6}"),
        }
    }

    /// The value with its hex form for integers of `width` bytes.
    fn display(&self, width: usize) -> String {
        match self {
            Value::Unsigned(v) => format!("{v} (0x{v:0digits$X})", digits = width * 2),
            other => other.plain(),
        }
    }
}

#[derive(Serialize)]
struct ReadOutput<'a> {
    address: String,
    kind: &'a str,
    value: Value,
}

pub fn run(args: ReadArgs, format: OutputFormat) -> CliResult<i32> {
    let line = format!("{} {} ?", args.kind, args.address);
    let (address, kind) = match gencp_gateway::parse(&line, args.device.max_payload) {
        Ok(Command::Read { address, kind }) => (address, kind),
        Ok(Command::Write { .. }) => {
            return Err(CliError::new(USAGE, "expected a register kind and address"))
        }
        Err(err) => return Err(CliError::new(USAGE, format!("invalid read: {err}"))),
    };

    let mut client = args.device.client()?;
    let value = read_value(&mut client, address, kind)
        .map_err(|err| gateway_error("read failed", err))?;

    let out = ReadOutput {
        address: format!("0x{address:X}"),
        kind: &args.kind,
        value,
    };
    let text = out.value.display(kind.byte_len());
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_table(
            &["ADDRESS", "KIND", "VALUE"],
            [vec![out.address.clone(), out.kind.to_string(), text]],
        ),
        OutputFormat::Pretty => println!("{} = {text}", out.address),
        OutputFormat::Raw => println!("{}", out.value.plain()),
    }
    Ok(SUCCESS)
}

pub fn read_value<T: Transport>(
    client: &mut DeviceClient<T>,
    address: u64,
    kind: ValueKind,
) -> Result<Value, GatewayError> {
    Ok(match kind {
        ValueKind::String { len } => Value::Text(client.read_string(address, len)?),
        ValueKind::Unsigned { width: 2 } => {
            Value::Unsigned(client.read_register::<u16>(address)?.into())
        }
        ValueKind::Unsigned { width: 4 } => {
            Value::Unsigned(client.read_register::<u32>(address)?.into())
        }
        ValueKind::Unsigned { .. } => Value::Unsigned(client.read_register::<u64>(address)?),
        ValueKind::Float { width: 4 } => {
            Value::Float(client.read_register::<f32>(address)?.into())
        }
        ValueKind::Float { .. } => Value::Float(client.read_register::<f64>(address)?),
    })
}

use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use gencp_gateway::{ClientConfig, DeviceClient};
use gencp_packet::{CodecConfig, DEFAULT_MAX_PAYLOAD};
use gencp_transport::{Link, SerialConfig};

use crate::exit::{transport_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod fetch;
pub mod gateway;
pub mod info;
pub mod manifest;
pub mod read;
pub mod simulate;
pub mod version;
pub mod write;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Read one register.
    Read(ReadArgs),
    /// Write one register.
    Write(WriteArgs),
    /// Show the device's bootstrap identity registers.
    Info(InfoArgs),
    /// List the device's manifest entries.
    Manifest(ManifestArgs),
    /// Download a file described by the manifest.
    Fetch(FetchArgs),
    /// Run an ASCII gateway shell on stdin/stdout.
    Gateway(GatewayArgs),
    /// Serve a simulated device on a Unix socket.
    Simulate(SimulateArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Read(args) => read::run(args, format),
        Command::Write(args) => write::run(args, format),
        Command::Info(args) => info::run(args, format),
        Command::Manifest(args) => manifest::run(args, format),
        Command::Fetch(args) => fetch::run(args, format),
        Command::Gateway(args) => gateway::run(args),
        Command::Simulate(args) => simulate::run(args),
        Command::Version(args) => version::run(args),
    }
}

/// How to reach a device.
#[derive(Args, Debug)]
pub struct DeviceArgs {
    /// Serial TTY or Unix socket of the device.
    #[arg(env = "GENCP_DEVICE")]
    pub device: PathBuf,
    /// Serial baud rate.
    #[arg(long, default_value_t = 115_200)]
    pub baud: u32,
    /// Acknowledgement timeout (e.g. 500ms, 2s).
    #[arg(long, default_value = "500ms")]
    pub timeout: String,
    /// Largest data block per packet in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_PAYLOAD)]
    pub max_payload: usize,
}

impl DeviceArgs {
    pub fn codec(&self) -> CodecConfig {
        CodecConfig {
            max_payload: self.max_payload,
        }
    }

    pub fn open(&self) -> CliResult<Link> {
        if self.max_payload == 0 || self.max_payload > usize::from(u16::MAX) - 64 {
            return Err(CliError::new(
                USAGE,
                format!("--max-payload out of range: {}", self.max_payload),
            ));
        }
        let serial = SerialConfig {
            baud_rate: self.baud,
        };
        gencp_transport::open(&self.device, &serial).map_err(|err| {
            transport_error(&format!("cannot open {}", self.device.display()), err)
        })
    }

    pub fn client_config(&self) -> CliResult<ClientConfig> {
        Ok(ClientConfig {
            codec: self.codec(),
            timeout: parse_duration(&self.timeout)?,
            ..ClientConfig::default()
        })
    }

    pub fn client(&self) -> CliResult<DeviceClient<Link>> {
        let config = self.client_config()?;
        Ok(DeviceClient::with_config(self.open()?, config))
    }
}

#[derive(Args, Debug)]
pub struct ReadArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// Value kind: C<n> (string of n bytes), U16, U32, U64, F32 or F64.
    pub kind: String,
    /// Register address (decimal, 0x hex or 0 octal).
    pub address: String,
}

#[derive(Args, Debug)]
pub struct WriteArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// Value kind: C<n> (string of n bytes), U16, U32, U64, F32 or F64.
    pub kind: String,
    /// Register address (decimal, 0x hex or 0 octal).
    pub address: String,
    /// Value to write.
    #[arg(allow_hyphen_values = true)]
    pub value: String,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
}

#[derive(Args, Debug)]
pub struct ManifestArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// Manifest entry to download.
    #[arg(long, default_value_t = 0)]
    pub index: usize,
    /// Output file. `.zip` is appended for zip-compressed entries.
    #[arg(long, short = 'o')]
    pub out: PathBuf,
    /// Refuse files larger than this many bytes.
    #[arg(long, default_value_t = gencp_gateway::config::DEFAULT_MAX_FILE_SIZE)]
    pub max_size: u64,
}

#[derive(Args, Debug)]
pub struct GatewayArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// Bytes requested per read of the response.
    #[arg(long, default_value_t = 16)]
    pub chunk_size: usize,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Precede every acknowledgement with a PendingAck of this many ms.
    #[arg(long)]
    pub pending_ack: Option<u16>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `500ms`, `2s` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(num) => (num, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

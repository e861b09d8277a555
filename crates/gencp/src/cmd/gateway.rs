use std::io::BufRead;

use gencp_gateway::{format_error, Gateway, GatewayConfig, GatewayError};
use gencp_transport::Transport;

use crate::cmd::{parse_duration, GatewayArgs};
use crate::exit::{gateway_error, io_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::print_raw;

/// One text command per input line; responses go to stdout.
pub fn run(args: GatewayArgs) -> CliResult<i32> {
    if args.chunk_size == 0 {
        return Err(CliError::new(USAGE, "--chunk-size must be at least 1"));
    }
    let config = GatewayConfig {
        codec: args.device.codec(),
        read_timeout: Some(parse_duration(&args.device.timeout)?),
        ..GatewayConfig::default()
    };
    let mut gateway = Gateway::with_config(args.device.open()?, config);

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.map_err(|err| io_error("failed reading stdin", err))?;
        if line.trim().is_empty() {
            continue;
        }
        let response = exchange(&mut gateway, &line, args.chunk_size)?;
        print_raw(&response);
    }
    Ok(SUCCESS)
}

/// Send one command and collect its response in `chunk_size` pieces.
///
/// Commands that do not parse are answered locally with an `ERR` line.
fn exchange<T: Transport>(
    gateway: &mut Gateway<T>,
    line: &str,
    chunk_size: usize,
) -> CliResult<Vec<u8>> {
    match gateway.write(line) {
        Ok(request_id) => tracing::debug!(request_id, command = line, "sent command"),
        Err(err @ GatewayError::Parse(_)) => {
            tracing::warn!(error = %err, command = line, "rejected command");
            return Ok(format_error(err.code()).into_bytes());
        }
        Err(err) => return Err(gateway_error("send failed", err)),
    }

    let mut response = Vec::new();
    let mut chunk = vec![0u8; chunk_size];
    loop {
        let outcome = gateway
            .read(&mut chunk)
            .map_err(|err| gateway_error("receive failed", err))?;
        response.extend_from_slice(&chunk[..outcome.bytes_read]);
        if outcome.end_of_message {
            return Ok(response);
        }
    }
}

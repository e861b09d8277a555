//! Bootstrap register map.
//!
//! Every GenCP device exposes these registers at fixed offsets from
//! address 0. Strings are 64 bytes, NUL-padded.

use gencp_transport::Transport;
use serde::Serialize;

use crate::client::DeviceClient;
use crate::error::Result;

pub const GENCP_VERSION: u64 = 0x0000;
pub const MANUFACTURER_NAME: u64 = 0x0004;
pub const MODEL_NAME: u64 = 0x0044;
pub const FAMILY_NAME: u64 = 0x0084;
pub const DEVICE_VERSION: u64 = 0x00C4;
pub const MANUFACTURER_INFO: u64 = 0x0104;
pub const SERIAL_NUMBER: u64 = 0x0144;
pub const USER_DEFINED_NAME: u64 = 0x0184;
pub const DEVICE_CAPABILITY: u64 = 0x01C4;
pub const MAX_DEVICE_RESPONSE_TIME: u64 = 0x01CC;
pub const MANIFEST_TABLE_ADDRESS: u64 = 0x01D0;
pub const SBRM_ADDRESS: u64 = 0x01D8;
pub const DEVICE_CONFIGURATION: u64 = 0x01E0;
pub const HEARTBEAT_TIMEOUT: u64 = 0x01E8;
pub const MESSAGE_CHANNEL_ID: u64 = 0x01EC;
pub const TIMESTAMP: u64 = 0x01F0;
pub const TIMESTAMP_LATCH: u64 = 0x01F8;
pub const TIMESTAMP_INCREMENT: u64 = 0x01FC;
pub const ACCESS_PRIVILEGE: u64 = 0x0204;
pub const PROTOCOL_ENDIANESS: u64 = 0x0208;
pub const IMPLEMENTATION_ENDIANESS: u64 = 0x020C;

/// Length of every bootstrap string register.
pub const STRING_LEN: usize = 64;

/// Identity and capability registers of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    /// `major.minor` from the GenCP version register.
    pub gencp_version: String,
    pub manufacturer: String,
    pub model: String,
    pub family: String,
    pub device_version: String,
    pub manufacturer_info: String,
    pub serial_number: String,
    pub user_defined_name: String,
    pub capability: u64,
    pub max_response_time_ms: u32,
    pub manifest_address: u64,
    pub heartbeat_timeout_ms: u32,
}

/// Read the identity registers through `client`.
pub fn read_identity<T: Transport>(client: &mut DeviceClient<T>) -> Result<DeviceIdentity> {
    let version = client.read_register::<u32>(GENCP_VERSION)?;
    Ok(DeviceIdentity {
        gencp_version: format!("{}.{}", version >> 16, version & 0xFFFF),
        manufacturer: client.read_string(MANUFACTURER_NAME, STRING_LEN)?,
        model: client.read_string(MODEL_NAME, STRING_LEN)?,
        family: client.read_string(FAMILY_NAME, STRING_LEN)?,
        device_version: client.read_string(DEVICE_VERSION, STRING_LEN)?,
        manufacturer_info: client.read_string(MANUFACTURER_INFO, STRING_LEN)?,
        serial_number: client.read_string(SERIAL_NUMBER, STRING_LEN)?,
        user_defined_name: client.read_string(USER_DEFINED_NAME, STRING_LEN)?,
        capability: client.read_register(DEVICE_CAPABILITY)?,
        max_response_time_ms: client.read_register(MAX_DEVICE_RESPONSE_TIME)?,
        manifest_address: client.read_register(MANIFEST_TABLE_ADDRESS)?,
        heartbeat_timeout_ms: client.read_register(HEARTBEAT_TIMEOUT)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{SimulatedDevice, MANIFEST_BASE};
    use crate::testing::Loopback;

    #[test]
    fn reads_simulated_identity() {
        let mut client = DeviceClient::new(Loopback::new(SimulatedDevice::new()));
        let id = read_identity(&mut client).unwrap();
        assert_eq!(id.gencp_version, "1.0");
        assert_eq!(id.manufacturer, "GenCP Labs");
        assert_eq!(id.model, "SimCam GenCP-1");
        assert_eq!(id.serial_number, "SIM-000001");
        assert_eq!(id.user_defined_name, "");
        assert_eq!(id.manifest_address, MANIFEST_BASE);
        assert_eq!(id.max_response_time_ms, 300);
    }

    #[test]
    fn user_name_is_writable() {
        let mut client = DeviceClient::new(Loopback::new(SimulatedDevice::new()));
        client.write_bytes(USER_DEFINED_NAME, b"bench-left\0").unwrap();
        let id = read_identity(&mut client).unwrap();
        assert_eq!(id.user_defined_name, "bench-left");
    }

    #[test]
    fn string_registers_do_not_overlap() {
        let strings = [
            MANUFACTURER_NAME,
            MODEL_NAME,
            FAMILY_NAME,
            DEVICE_VERSION,
            MANUFACTURER_INFO,
            SERIAL_NUMBER,
            USER_DEFINED_NAME,
        ];
        for pair in strings.windows(2) {
            assert_eq!(pair[1] - pair[0], STRING_LEN as u64);
        }
        assert_eq!(USER_DEFINED_NAME + STRING_LEN as u64, DEVICE_CAPABILITY);
    }
}

//! GenCP command identifiers and CCD flags.

/// ReadMem request.
pub const READMEM_CMD: u16 = 0x0800;

/// ReadMem acknowledgement.
pub const READMEM_ACK: u16 = 0x0801;

/// WriteMem request.
pub const WRITEMEM_CMD: u16 = 0x0802;

/// WriteMem acknowledgement.
pub const WRITEMEM_ACK: u16 = 0x0803;

/// Pending acknowledgement: the device needs more time.
pub const PENDING_ACK: u16 = 0x0805;

/// CCD request flag asking the device to acknowledge.
pub const FLAG_ACK_REQUESTED: u16 = 0x4000;

/// Returns a human-readable name for a command id.
pub fn command_name(id: u16) -> &'static str {
    match id {
        READMEM_CMD => "READMEM_CMD",
        READMEM_ACK => "READMEM_ACK",
        WRITEMEM_CMD => "WRITEMEM_CMD",
        WRITEMEM_ACK => "WRITEMEM_ACK",
        PENDING_ACK => "PENDING_ACK",
        _ => "UNKNOWN",
    }
}

/// The acknowledgement a device sends for a request command.
pub fn ack_for(request: u16) -> Option<u16> {
    match request {
        READMEM_CMD => Some(READMEM_ACK),
        WRITEMEM_CMD => Some(WRITEMEM_ACK),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_is_request_plus_one() {
        assert_eq!(ack_for(READMEM_CMD), Some(READMEM_ACK));
        assert_eq!(ack_for(WRITEMEM_CMD), Some(WRITEMEM_ACK));
        assert_eq!(ack_for(PENDING_ACK), None);
    }

    #[test]
    fn names() {
        assert_eq!(command_name(0x0801), "READMEM_ACK");
        assert_eq!(command_name(0x1234), "UNKNOWN");
    }
}

//! Host-side GenICam GenCP over byte-stream links.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte-stream peers (Unix sockets, serial TTYs)
//! - [`packet`]: checksum, packet codec, status codes and packet framing
//! - [`gateway`]: request sequencing, the ASCII gateway, typed device
//!   access, manifest retrieval and a simulated device

/// Re-export transport types.
pub mod transport {
    pub use gencp_transport::*;
}

/// Re-export packet types.
pub mod packet {
    pub use gencp_packet::*;
}

/// Re-export gateway types.
pub mod gateway {
    pub use gencp_gateway::*;
}

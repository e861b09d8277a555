//! Request sequencing, the ASCII gateway and composed device workflows.
//!
//! This is the layer a host talks to:
//! - [`GatewaySession`] turns text commands such as `U32 0x208 ?` into
//!   GenCP requests and acknowledgements back into `R0x208=5 (0x00000005)`,
//!   delivering the text in whatever chunk sizes the caller asks for
//! - [`Gateway`] drives a session over a [`gencp_transport::Transport`]
//! - [`DeviceClient`] offers typed register access, on which the
//!   [`bootstrap`] and [`manifest`] workflows are built
//! - [`SimulatedDevice`] answers requests from an in-memory register map

pub mod bootstrap;
pub mod client;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod gateway;
pub mod manifest;
pub mod sequencer;
pub mod session;
#[cfg(test)]
mod testing;

pub use bootstrap::{read_identity, DeviceIdentity};
pub use client::DeviceClient;
pub use command::{parse, Command, ParseError, ValueKind, WriteValue};
pub use config::{ClientConfig, GatewayConfig};
pub use device::SimulatedDevice;
pub use error::{GatewayError, Result};
pub use gateway::Gateway;
pub use manifest::{read_manifest, retrieve_file, ManifestEntry, RetrievedFile, SchemaType};
pub use sequencer::RequestSequencer;
pub use session::{
    format_error, ExpectedResponse, GatewaySession, OutboundRequest, ReadOutcome, ResponseKind,
    Resync,
};

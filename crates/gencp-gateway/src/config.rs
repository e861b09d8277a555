use std::time::Duration;

use gencp_packet::{CodecConfig, StreamConfig};

/// Default acknowledgement timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Default bound on one formatted gateway response.
pub const DEFAULT_MAX_RESPONSE: usize = 128;

/// Default bound on a file retrieved through the manifest: 1 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Configuration for a [`crate::GatewaySession`] and [`crate::Gateway`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub codec: CodecConfig,
    /// How long a read waits for an acknowledgement. `None` blocks;
    /// `Some(Duration::ZERO)` polls.
    pub read_timeout: Option<Duration>,
    /// Longest formatted response, including the newline. Default: 128.
    pub max_response: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            codec: CodecConfig::default(),
            read_timeout: Some(DEFAULT_TIMEOUT),
            max_response: DEFAULT_MAX_RESPONSE,
        }
    }
}

impl GatewayConfig {
    pub(crate) fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            codec: self.codec.clone(),
            ..StreamConfig::default()
        }
    }
}

/// Configuration for a [`crate::DeviceClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub codec: CodecConfig,
    /// Per-request acknowledgement timeout. Default: 500 ms.
    pub timeout: Duration,
    /// Largest manifest file [`crate::retrieve_file`] will download.
    pub max_file_size: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            codec: CodecConfig::default(),
            timeout: DEFAULT_TIMEOUT,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl ClientConfig {
    pub(crate) fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            codec: self.codec.clone(),
            ..StreamConfig::default()
        }
    }
}

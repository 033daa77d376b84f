//! Device configuration parameters
//!
//! All tunable parameters for one device instance. Values can be overridden
//! by the application before `Registry::open`; the defaults match the
//! module families this driver is normally paired with.

use serde::{Deserialize, Serialize};

/// Per-device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    // --- Buffers ---
    /// Size of the main ring buffer that holds streamed bytes from the
    /// module. Should fit a few of the longest messages the module emits.
    pub ring_capacity: usize,
    /// Size of the secondary ring buffer absorbing bytes received on SPI
    /// while transmitting. Irrelevant for other transports.
    pub spi_ring_capacity: usize,
    /// Number of takeable read cursors on the main ring buffer.
    pub max_cursors: usize,

    // --- Timing ---
    /// Overall timeout for a response from the module (milliseconds).
    pub response_timeout_ms: u32,
    /// Guard timer for a single ring-buffer fill once data has begun
    /// arriving (milliseconds); caps slow-trickle inputs.
    pub max_fill_time_ms: u32,
    /// Default wait for the first byte of a fill when the caller is not
    /// just draining what is already there (milliseconds).
    pub min_fill_time_ms: u32,

    // --- Retries ---
    /// Times to re-send a request when no response arrived at all.
    /// A NACK is terminal and never retried.
    pub retries_on_no_response: u8,

    // --- SPI ---
    /// Byte transmitted as filler during SPI receive transactions, and the
    /// value the module clocks out when it has nothing to say.
    pub spi_fill_byte: u8,
    /// Number of consecutive fill bytes that constitute "no data" on SPI.
    pub spi_fill_threshold: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            // Buffers
            ring_capacity: 2048,
            spi_ring_capacity: 1024,
            max_cursors: 3,

            // Timing
            response_timeout_ms: 10_000,
            max_fill_time_ms: 2000,
            min_fill_time_ms: 100,

            // Retries
            retries_on_no_response: 1,

            // SPI
            spi_fill_byte: 0xFF,
            spi_fill_threshold: 48,
        }
    }
}

//! Streaming message pipeline for UBX/NMEA/RTCM positioning modules.
//!
//! The driver sits between a byte transport (UART, I2C, SPI or a virtual
//! serial tunnel) and application code that thinks in messages:
//!
//! - the [`pump`] moves raw bytes from the transport into a multi-cursor
//!   [`ring`] buffer under a time budget;
//! - the [`protocol`] layer recognises UBX, NMEA and RTCM v3 frames in
//!   the buffered stream, resynchronising after corruption;
//! - [`Device`] offers synchronous poll/response with retries and NACK
//!   detection, plus asynchronous delivery to registered reader callbacks
//!   from a background dispatcher thread;
//! - the [`Registry`] maps opaque handles to open instances for
//!   applications that do not want to own [`Device`] values directly.
//!
//! ```no_run
//! use gnsslink::{DeviceConfig, MessageId, Registry};
//! use gnsslink::transport::{NullTransport, TransportKind};
//!
//! # fn main() -> gnsslink::Result<()> {
//! let registry = Registry::new();
//! let h = registry.open(
//!     Box::new(NullTransport::new(TransportKind::Uart)),
//!     DeviceConfig::default(),
//! )?;
//! let reader = registry.register_reader(
//!     h,
//!     MessageId::nmea("G"),
//!     Box::new(|id, frame| println!("{id}: {} bytes", frame.len())),
//! )?;
//! registry.deregister_reader(h, reader)?;
//! registry.close(h)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod pump;
pub mod registry;
pub mod ring;
pub mod transport;

pub use config::DeviceConfig;
pub use device::{Device, KeepGoing};
pub use dispatch::{ReaderCallback, ReaderHandle};
pub use error::{Error, Result};
pub use protocol::scan::Scan;
pub use protocol::MessageId;
pub use registry::{Handle, Registry};
pub use ring::RingStore;
pub use transport::{Transport, TransportKind};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, continuing with the data if a panicking thread poisoned
/// it. The guarded structures stay internally consistent between lock
/// regions, so a poisoned guard is still safe to use.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

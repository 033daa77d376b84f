//! Transport abstraction — any byte-oriented channel to the module.
//!
//! Concrete implementations:
//! - UART serial
//! - I2C (register-windowed stream reads)
//! - SPI (full duplex; see `transact`)
//! - virtual serial, tunneled through an intermediate module
//!
//! The pipeline is generic over `Transport`, so adding a new transport
//! requires zero changes to the buffering and framing logic.

use crate::error::{Error, Result};

/// The stream flavour of a transport; decides how the pump reads from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Uart,
    I2c,
    Spi,
    VirtualSerial,
}

impl TransportKind {
    /// Whether reads must go through `transact` (no "bytes waiting" query,
    /// receiving requires transmitting).
    pub fn is_full_duplex(self) -> bool {
        matches!(self, Self::Spi)
    }
}

/// Byte-oriented transport channel.
pub trait Transport {
    /// The stream flavour of this transport.
    fn kind(&self) -> TransportKind;

    /// Write `data` to the transport.
    /// Returns the number of bytes actually written.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Read up to `buf.len()` bytes into `buf` without blocking.
    /// Returns the number of bytes actually read, 0 if nothing is pending.
    /// Not meaningful for full-duplex transports; use `transact` there.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Number of bytes waiting to be read, or `None` if the transport
    /// cannot tell (SPI can only discover data by clocking it out).
    fn bytes_waiting(&mut self) -> Option<usize> {
        None
    }

    /// Full-duplex read cycle: transmit `rx.len()` copies of `fill` while
    /// receiving into `rx`. Returns the number of bytes received.
    /// Only meaningful when `kind().is_full_duplex()`.
    fn transact(&mut self, _fill: u8, _rx: &mut [u8]) -> Result<usize> {
        Err(Error::InvalidParameter)
    }

    /// Write `data` while capturing whatever is clocked in at the same
    /// time into `rx` (which must be at least `data.len()` long).
    /// Half-duplex transports capture nothing. Returns the number of
    /// bytes captured.
    fn write_capture(&mut self, data: &[u8], _rx: &mut [u8]) -> Result<usize> {
        self.write(data)?;
        Ok(0)
    }
}

/// A null transport that discards all writes and never reads.
/// Useful as a default when no module is attached.
pub struct NullTransport {
    kind: TransportKind,
}

impl NullTransport {
    pub fn new(kind: TransportKind) -> Self {
        Self { kind }
    }
}

impl Transport for NullTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        Ok(data.len())
    }

    fn read_available(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Ok(0)
    }

    fn bytes_waiting(&mut self) -> Option<usize> {
        Some(0)
    }
}

/// Adapter exposing any `embedded-hal` SPI bus as a full-duplex transport.
pub struct SpiTransport<B> {
    bus: B,
}

impl<B> SpiTransport<B>
where
    B: embedded_hal::spi::SpiBus<u8>,
{
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    /// Consume the adapter, returning the underlying bus.
    pub fn release(self) -> B {
        self.bus
    }
}

impl<B> Transport for SpiTransport<B>
where
    B: embedded_hal::spi::SpiBus<u8>,
{
    fn kind(&self) -> TransportKind {
        TransportKind::Spi
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.bus.write(data).map_err(|_| Error::TransportIo)?;
        self.bus.flush().map_err(|_| Error::TransportIo)?;
        Ok(data.len())
    }

    fn read_available(&mut self, _buf: &mut [u8]) -> Result<usize> {
        // SPI has no half-duplex read; the pump uses transact instead.
        Err(Error::InvalidParameter)
    }

    fn transact(&mut self, fill: u8, rx: &mut [u8]) -> Result<usize> {
        rx.fill(fill);
        self.bus
            .transfer_in_place(rx)
            .map_err(|_| Error::TransportIo)?;
        self.bus.flush().map_err(|_| Error::TransportIo)?;
        Ok(rx.len())
    }

    fn write_capture(&mut self, data: &[u8], rx: &mut [u8]) -> Result<usize> {
        if rx.len() < data.len() {
            return Err(Error::BufferTooSmall);
        }
        let rx = &mut rx[..data.len()];
        rx.copy_from_slice(data);
        self.bus
            .transfer_in_place(rx)
            .map_err(|_| Error::TransportIo)?;
        self.bus.flush().map_err(|_| Error::TransportIo)?;
        Ok(rx.len())
    }
}

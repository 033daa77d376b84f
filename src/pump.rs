//! Transport-to-ring byte pump.
//!
//! One [`Pump`] per device instance moves raw bytes from the transport
//! into the main ring buffer under a time budget. Half-duplex transports
//! are simply drained; SPI needs two extra pieces of machinery:
//!
//! - the module clocks out a known fill byte when it has nothing to say,
//!   so an all-fill block of at least the configured threshold is noise
//!   and is dropped rather than buffered;
//! - bytes arrive during *our* transmissions too, so a secondary ring
//!   absorbs them until the main ring has room.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::config::DeviceConfig;
use crate::error::{Error, Result};
use crate::ring::RingStore;
use crate::transport::{Transport, TransportKind};

/// Chunk size for a single transport read or SPI transaction.
const CHUNK: usize = 64;
/// Poll interval while waiting for the first byte.
const POLL: Duration = Duration::from_millis(5);

pub struct Pump {
    /// Secondary buffer for bytes clocked in during SPI sends; `None` on
    /// half-duplex transports.
    spi_ring: Option<RingStore>,
    fill_byte: u8,
    fill_threshold: usize,
}

impl Pump {
    /// Build a pump for a transport of the given kind.
    ///
    /// Fails with [`Error::InvalidParameter`] when the SPI ring capacity
    /// in `cfg` is unusable for a full-duplex transport.
    pub fn new(cfg: &DeviceConfig, kind: TransportKind) -> Result<Self> {
        let spi_ring = if kind.is_full_duplex() {
            Some(
                RingStore::new_unhandled(cfg.spi_ring_capacity)
                    .ok_or(Error::InvalidParameter)?,
            )
        } else {
            None
        };
        Ok(Self {
            spi_ring,
            fill_byte: cfg.spi_fill_byte,
            fill_threshold: cfg.spi_fill_threshold,
        })
    }

    /// Change the number of consecutive fill bytes treated as "no data".
    /// Zero disables stripping entirely.
    pub fn set_fill_threshold(&mut self, threshold: usize) {
        self.fill_threshold = threshold;
    }

    /// Whether `block` is nothing but SPI line noise.
    fn is_all_fill(&self, block: &[u8]) -> bool {
        self.fill_threshold > 0
            && block.len() >= self.fill_threshold
            && block.iter().all(|&b| b == self.fill_byte)
    }

    /// Stash bytes that were clocked in while transmitting on SPI, then
    /// move as much as possible into the main ring.
    pub fn absorb_send_echo(&mut self, ring: &mut RingStore, block: &[u8]) {
        if self.is_all_fill(block) {
            return;
        }
        if let Some(spi_ring) = &mut self.spi_ring {
            if !spi_ring.force_add(block) {
                warn!("SPI echo block of {} bytes exceeds the side buffer", block.len());
            }
        }
        self.drain_spi_ring(ring);
    }

    fn drain_spi_ring(&mut self, ring: &mut RingStore) -> usize {
        let Some(spi_ring) = &mut self.spi_ring else {
            return 0;
        };
        let mut moved = 0;
        let mut chunk = [0u8; CHUNK];
        loop {
            let room = ring.available().min(CHUNK);
            if room == 0 {
                break;
            }
            let n = spi_ring.read(&mut chunk[..room]);
            if n == 0 {
                break;
            }
            // Space was checked above, so this cannot fail.
            ring.add_if_fits(&chunk[..n]);
            moved += n;
        }
        moved
    }

    /// One non-blocking pull from the transport into the ring, stopping at
    /// `deadline` if one is set. Returns the number of bytes added to the
    /// main ring.
    fn pull(
        &mut self,
        transport: &mut dyn Transport,
        ring: &mut RingStore,
        deadline: Option<Instant>,
    ) -> Result<usize> {
        if transport.kind().is_full_duplex() {
            self.pull_spi(transport, ring, deadline)
        } else {
            self.pull_stream(transport, ring, deadline)
        }
    }

    fn expired(deadline: Option<Instant>) -> bool {
        deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn pull_stream(
        &mut self,
        transport: &mut dyn Transport,
        ring: &mut RingStore,
        deadline: Option<Instant>,
    ) -> Result<usize> {
        let mut total = 0;
        let mut chunk = [0u8; CHUNK];
        loop {
            let room = ring.available().min(CHUNK);
            if room == 0 || Self::expired(deadline) {
                break;
            }
            let n = transport.read_available(&mut chunk[..room])?;
            if n == 0 {
                break;
            }
            ring.add_if_fits(&chunk[..n]);
            total += n;
        }
        Ok(total)
    }

    fn pull_spi(
        &mut self,
        transport: &mut dyn Transport,
        ring: &mut RingStore,
        deadline: Option<Instant>,
    ) -> Result<usize> {
        // First flush anything stashed during a previous send.
        let mut total = self.drain_spi_ring(ring);
        let mut chunk = [0u8; CHUNK];
        loop {
            let room = ring.available().min(CHUNK);
            if room == 0 || Self::expired(deadline) {
                break;
            }
            let n = transport.transact(self.fill_byte, &mut chunk[..room])?;
            if n == 0 || self.is_all_fill(&chunk[..n]) {
                break;
            }
            ring.add_if_fits(&chunk[..n]);
            total += n;
        }
        Ok(total)
    }

    /// Fill `ring` from `transport`.
    ///
    /// With `timeout_ms` of zero this is a single non-blocking drain of
    /// whatever is already pending. Otherwise the pump polls for up to
    /// `timeout_ms` for the first byte, then keeps reading until the
    /// transport runs dry, the ring is full, or `max_time_ms` (zero means
    /// unlimited) has elapsed since the fill began.
    ///
    /// Returns the number of bytes added to the main ring.
    pub fn fill(
        &mut self,
        transport: &mut dyn Transport,
        ring: &mut RingStore,
        timeout_ms: u32,
        max_time_ms: u32,
    ) -> Result<usize> {
        if timeout_ms == 0 {
            return self.pull(transport, ring, None);
        }
        let start = Instant::now();
        let first_byte_deadline = start + Duration::from_millis(u64::from(timeout_ms));
        let guard = (max_time_ms != 0)
            .then(|| start + Duration::from_millis(u64::from(max_time_ms)));
        let mut total = 0;
        loop {
            let n = self.pull(transport, ring, guard)?;
            total += n;
            if n == 0 {
                if total > 0 {
                    // The transport has gone quiet after delivering data.
                    break;
                }
                if Instant::now() >= first_byte_deadline {
                    break;
                }
                thread::sleep(POLL);
                continue;
            }
            if ring.available() == 0 {
                debug!("ring full after {total} bytes, ending fill");
                break;
            }
            if Self::expired(guard) {
                debug!("fill guard timer hit after {total} bytes");
                break;
            }
        }
        Ok(total)
    }
}

//! One attached module instance.
//!
//! A [`Device`] owns the transport, the pump, the main ring buffer and the
//! reader registry, and runs the synchronous poll/response protocol on top
//! of them. The background dispatcher (see [`crate::dispatch`]) is started
//! lazily when the first reader registers and stopped when the last one
//! goes away.
//!
//! Lock order, outermost first: ctl, readers, io, ring. The dispatcher
//! thread never takes ctl; callbacks run with no lock held but their own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::dispatch::{
    DispatchCtl, DispatchState, ReaderCallback, ReaderHandle, ReaderList, IDLE_SLEEP,
};
use crate::error::{Error, Result};
use crate::lock;
use crate::protocol::scan::{scan, Scan};
use crate::protocol::{ubx, MessageId};
use crate::pump::Pump;
use crate::ring::{CursorId, RingStore};
use crate::transport::Transport;

pub(crate) struct IoState {
    pub(crate) transport: Box<dyn Transport + Send>,
    pub(crate) pump: Pump,
}

pub(crate) struct Shared {
    pub(crate) cfg: DeviceConfig,
    pub(crate) io: Mutex<IoState>,
    pub(crate) ring: Mutex<RingStore>,
    pub(crate) readers: Mutex<ReaderList>,
}

/// A single attached module with its buffering and dispatch machinery.
pub struct Device {
    shared: Arc<Shared>,
    ctl: Mutex<DispatchCtl>,
}

/// Abort check polled while waiting for a response; return false to give
/// up early.
pub type KeepGoing<'a> = &'a (dyn Fn() -> bool + Sync);

impl Device {
    /// Bring up a device on `transport` with the given configuration.
    pub fn new(transport: Box<dyn Transport + Send>, cfg: DeviceConfig) -> Result<Self> {
        let ring = RingStore::new(cfg.ring_capacity, cfg.max_cursors)
            .ok_or(Error::InvalidParameter)?;
        let pump = Pump::new(&cfg, transport.kind())?;
        info!(
            "device up on {:?}, ring {} bytes, {} cursors",
            transport.kind(),
            cfg.ring_capacity,
            cfg.max_cursors
        );
        Ok(Self {
            shared: Arc::new(Shared {
                cfg,
                io: Mutex::new(IoState { transport, pump }),
                ring: Mutex::new(ring),
                readers: Mutex::new(ReaderList::new()),
            }),
            ctl: Mutex::new(DispatchCtl::new()),
        })
    }

    // --- raw stream access -------------------------------------------------

    /// Drain whatever the transport has pending into the ring, waiting up
    /// to `timeout_ms` for the first byte (zero: no waiting). Returns the
    /// number of bytes added.
    pub fn pump_once(&self, timeout_ms: u32) -> Result<usize> {
        let mut io = lock(&self.shared.io);
        let mut ring = lock(&self.shared.ring);
        let IoState { transport, pump } = &mut *io;
        pump.fill(
            transport.as_mut(),
            &mut ring,
            timeout_ms,
            self.shared.cfg.max_fill_time_ms,
        )
    }

    /// Read raw bytes off the unhandled stream path. Returns 0 when the
    /// ring is empty or handled-reads-only is set.
    pub fn read_stream(&self, buf: &mut [u8]) -> usize {
        lock(&self.shared.ring).read(buf)
    }

    /// Bytes pending on the unhandled stream path.
    pub fn stream_data_size(&self) -> usize {
        lock(&self.shared.ring).data_size()
    }

    /// When set, raw stream reads are disabled and buffered bytes are only
    /// accounted to read cursors, so a slow raw consumer cannot stall the
    /// pipeline.
    pub fn set_handled_reads_only(&self, on: bool) {
        lock(&self.shared.ring).set_handled_reads_only(on);
    }

    /// Change the SPI fill-byte threshold at runtime; zero disables
    /// fill stripping.
    pub fn set_spi_fill_threshold(&self, threshold: usize) {
        lock(&self.shared.io).pump.set_fill_threshold(threshold);
    }

    // --- sending -----------------------------------------------------------

    /// Encode and send one UBX message. Returns the wire size of the frame.
    pub fn send_ubx(&self, class: u8, id: u8, body: &[u8]) -> Result<usize> {
        let mut frame = vec![0u8; body.len() + ubx::FRAME_OVERHEAD];
        let n = ubx::encode(class, id, body, &mut frame)?;
        self.write_frame(&frame[..n])?;
        Ok(n)
    }

    /// Send pre-framed bytes as-is (RTCM corrections, NMEA queries).
    pub fn send_raw(&self, data: &[u8]) -> Result<usize> {
        self.write_frame(data)?;
        Ok(data.len())
    }

    fn write_frame(&self, frame: &[u8]) -> Result<()> {
        let mut io = lock(&self.shared.io);
        let IoState { transport, pump } = &mut *io;
        if transport.kind().is_full_duplex() {
            // Sending on SPI clocks bytes in at the same time; they must
            // not be lost.
            let mut echo = vec![0u8; frame.len()];
            let n = transport.write_capture(frame, &mut echo)?;
            let mut ring = lock(&self.shared.ring);
            pump.absorb_send_echo(&mut ring, &echo[..n]);
        } else {
            let mut sent = 0;
            while sent < frame.len() {
                let n = transport.write(&frame[sent..])?;
                if n == 0 {
                    return Err(Error::TransportIo);
                }
                sent += n;
            }
        }
        Ok(())
    }

    // --- synchronous receive ----------------------------------------------

    fn take_cursor(&self) -> Result<CursorId> {
        lock(&self.shared.ring)
            .take_cursor()
            .ok_or(Error::CursorUnavailable)
    }

    fn give_cursor(&self, cursor: CursorId) {
        lock(&self.shared.ring).give_cursor(cursor);
    }

    /// One fill-then-scan step on `cursor`.
    fn fill_and_scan(
        &self,
        cursor: CursorId,
        wanted: &MessageId,
        fill_timeout_ms: u32,
    ) -> Result<Scan> {
        {
            let mut io = lock(&self.shared.io);
            let mut ring = lock(&self.shared.ring);
            let IoState { transport, pump } = &mut *io;
            pump.fill(
                transport.as_mut(),
                &mut ring,
                fill_timeout_ms,
                self.shared.cfg.max_fill_time_ms,
            )?;
        }
        Ok(scan(&mut lock(&self.shared.ring), cursor, wanted))
    }

    /// Wait on `cursor` until a frame matching `wanted` arrives, the
    /// deadline passes, or `keep_going` (if any) returns false. On success
    /// the whole frame is read out into a fresh buffer.
    fn wait_for_frame(
        &self,
        cursor: CursorId,
        wanted: &MessageId,
        deadline: Instant,
        keep_going: Option<KeepGoing<'_>>,
    ) -> Result<(MessageId, Vec<u8>)> {
        loop {
            if keep_going.is_some_and(|kg| !kg()) {
                return Err(Error::Timeout);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }
            let remaining = deadline.duration_since(now).as_millis() as u32;
            let fill_timeout = self.shared.cfg.min_fill_time_ms.min(remaining.max(1));
            match self.fill_and_scan(cursor, wanted, fill_timeout)? {
                Scan::Found { id, len } => {
                    let mut frame = vec![0u8; len];
                    let got = lock(&self.shared.ring).read_handle(cursor, &mut frame);
                    debug_assert_eq!(got, len);
                    return Ok((id, frame));
                }
                Scan::Nacked { class, id } => {
                    debug!("module rejected {class:#04x}/{id:#04x}");
                    return Err(Error::Nack);
                }
                Scan::Incomplete | Scan::NotFound => {}
            }
        }
    }

    /// Wait for the next frame matching `wanted` and copy its whole wire
    /// image into `buf`. Returns the concrete identity and frame length.
    ///
    /// Only frames arriving after this call is made are considered.
    pub fn receive(
        &self,
        wanted: &MessageId,
        buf: &mut [u8],
        timeout_ms: u32,
        keep_going: Option<KeepGoing<'_>>,
    ) -> Result<(MessageId, usize)> {
        let cursor = self.take_cursor()?;
        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
        let result = self.wait_for_frame(cursor, wanted, deadline, keep_going);
        self.give_cursor(cursor);
        let (id, frame) = result?;
        if buf.len() < frame.len() {
            return Err(Error::BufferTooSmall);
        }
        buf[..frame.len()].copy_from_slice(&frame);
        Ok((id, frame.len()))
    }

    /// Send a UBX message and wait for the response carrying the same
    /// class and id, retrying on silence. A NACK addressed to the polled
    /// message is terminal and never retried. Returns the response payload.
    pub fn send_receive_ubx(
        &self,
        class: u8,
        id: u8,
        body: &[u8],
        keep_going: Option<KeepGoing<'_>>,
    ) -> Result<Vec<u8>> {
        let mut frame = vec![0u8; body.len() + ubx::FRAME_OVERHEAD];
        let n = ubx::encode(class, id, body, &mut frame)?;
        frame.truncate(n);
        let wanted = MessageId::Ubx { class, id };

        let cursor = self.take_cursor()?;
        let result = self.poll_with_retries(cursor, &frame, &wanted, keep_going);
        self.give_cursor(cursor);
        let (_, response) = result?;
        let len = response.len() - ubx::FRAME_OVERHEAD;
        Ok(response[ubx::PAYLOAD_OFFSET..ubx::PAYLOAD_OFFSET + len].to_vec())
    }

    /// Like [`send_receive_ubx`](Self::send_receive_ubx) but copies the
    /// payload into a caller-provided buffer, failing with
    /// [`Error::BufferTooSmall`] (after consuming the frame) when it does
    /// not fit.
    pub fn send_receive_ubx_into(
        &self,
        class: u8,
        id: u8,
        body: &[u8],
        response: &mut [u8],
        keep_going: Option<KeepGoing<'_>>,
    ) -> Result<usize> {
        let payload = self.send_receive_ubx(class, id, body, keep_going)?;
        if response.len() < payload.len() {
            return Err(Error::BufferTooSmall);
        }
        response[..payload.len()].copy_from_slice(&payload);
        Ok(payload.len())
    }

    fn poll_with_retries(
        &self,
        cursor: CursorId,
        frame: &[u8],
        wanted: &MessageId,
        keep_going: Option<KeepGoing<'_>>,
    ) -> Result<(MessageId, Vec<u8>)> {
        let attempts = 1 + u32::from(self.shared.cfg.retries_on_no_response);
        let mut last_err = Error::Timeout;
        for attempt in 0..attempts {
            if attempt > 0 {
                debug!("no response to {wanted}, retry {attempt}");
            }
            if let Err(err) = self.write_frame(frame) {
                last_err = err;
                continue;
            }
            let deadline = Instant::now()
                + Duration::from_millis(u64::from(self.shared.cfg.response_timeout_ms));
            match self.wait_for_frame(cursor, wanted, deadline, keep_going) {
                Ok(found) => return Ok(found),
                // A rejection will not change on a resend.
                Err(Error::Nack) => return Err(Error::Nack),
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }

    // --- reader registration / dispatcher lifecycle ------------------------

    /// Register a callback for every arriving frame matching `wanted`.
    /// Starts the dispatcher thread if it is not already running.
    pub fn register_reader(
        &self,
        wanted: MessageId,
        callback: ReaderCallback,
    ) -> Result<ReaderHandle> {
        let mut ctl = lock(&self.ctl);
        self.reap(&mut ctl);
        let handle = lock(&self.shared.readers).register(wanted, callback);
        if ctl.state != DispatchState::Running {
            if let Err(err) = self.start_dispatcher(&mut ctl) {
                lock(&self.shared.readers).deregister(handle);
                return Err(err);
            }
        }
        Ok(handle)
    }

    /// Remove a reader. When the last one goes, the dispatcher is stopped
    /// (deferred when called from inside a reader callback). Returns false
    /// for an unknown handle.
    pub fn deregister_reader(&self, handle: ReaderHandle) -> bool {
        let removed;
        let now_empty;
        {
            let mut readers = lock(&self.shared.readers);
            removed = readers.deregister(handle);
            now_empty = readers.is_empty();
        }
        if removed && now_empty {
            let mut ctl = lock(&self.ctl);
            // A reader may have been registered between the two locks.
            if lock(&self.shared.readers).is_empty() && ctl.state == DispatchState::Running {
                self.stop_dispatcher(&mut ctl);
            }
        }
        removed
    }

    fn start_dispatcher(&self, ctl: &mut DispatchCtl) -> Result<()> {
        let cursor = self.take_cursor()?;
        let stop = Arc::new(AtomicBool::new(false));
        let (exit_tx, exit_rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let thread_stop = Arc::clone(&stop);
        let join = thread::Builder::new()
            .name("msg-dispatch".into())
            .spawn(move || dispatcher_loop(&shared, cursor, thread_stop.as_ref(), &exit_tx))
            .map_err(|err| {
                warn!("failed to spawn dispatcher: {err}");
                self.give_cursor(cursor);
                Error::InvalidParameter
            })?;
        ctl.thread_id = Some(join.thread().id());
        ctl.stop = stop;
        ctl.exit_rx = Some(exit_rx);
        ctl.join = Some(join);
        ctl.state = DispatchState::Running;
        debug!("dispatcher started");
        Ok(())
    }

    fn stop_dispatcher(&self, ctl: &mut DispatchCtl) {
        // The thread returns its own cursor before acknowledging, so there
        // is nothing to reclaim here.
        ctl.request_stop();
    }

    /// Join a thread that stopped itself (last reader deregistered from
    /// inside a callback).
    fn reap(&self, ctl: &mut DispatchCtl) {
        if ctl.state == DispatchState::Stopping {
            self.stop_dispatcher(ctl);
        }
    }

    /// Stop the dispatcher and quiesce the instance. Idempotent; further
    /// sends and receives still work, but registered readers are gone.
    pub fn shutdown(&self) {
        let mut ctl = lock(&self.ctl);
        self.reap(&mut ctl);
        if ctl.state == DispatchState::Running {
            self.stop_dispatcher(&mut ctl);
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Body of the dispatcher thread: keep the ring topped up, pull out every
/// complete frame, hand each to the first matching reader.
fn dispatcher_loop(
    shared: &Arc<Shared>,
    cursor: CursorId,
    stop: &AtomicBool,
    exit_tx: &mpsc::Sender<()>,
) {
    let mut scratch: Vec<u8> = Vec::new();
    while !stop.load(Ordering::Acquire) {
        {
            let mut io = lock(&shared.io);
            let mut ring = lock(&shared.ring);
            let IoState { transport, pump } = &mut *io;
            if let Err(err) = pump.fill(transport.as_mut(), &mut ring, 0, 0) {
                warn!("dispatcher fill failed: {err}");
            }
        }
        loop {
            let found = {
                let mut ring = lock(&shared.ring);
                match scan(&mut ring, cursor, &MessageId::Any) {
                    Scan::Found { id, len } => {
                        scratch.resize(len, 0);
                        let got = ring.read_handle(cursor, &mut scratch[..len]);
                        debug_assert_eq!(got, len);
                        Some((id, len))
                    }
                    _ => None,
                }
            };
            let Some((id, len)) = found else { break };
            let callback = lock(&shared.readers).first_match(&id);
            if let Some(callback) = callback {
                // No driver lock is held here, so the callback can call
                // back into the device.
                let mut cb = lock(&callback);
                (*cb)(&id, &scratch[..len]);
            }
            if stop.load(Ordering::Acquire) {
                break;
            }
        }
        thread::sleep(IDLE_SLEEP);
    }
    // The cursor goes back before the exit ack: once the stop is
    // acknowledged (or this thread is otherwise observed gone), the slot
    // is free for a successor. A thread replaced while in the Stopping
    // state still returns its cursor this way.
    lock(&shared.ring).give_cursor(cursor);
    let _ = exit_tx.send(());
}

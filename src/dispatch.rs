//! Background message dispatcher.
//!
//! When at least one reader callback is registered, a dedicated thread
//! owns one read cursor on the main ring, keeps the ring topped up from
//! the transport, and hands each complete frame to the first registered
//! reader whose pattern matches it. A frame is delivered at most once;
//! frames no reader wants are dropped.
//!
//! Callbacks are invoked with no driver lock held except the callback's
//! own, so a callback may call back into the driver, including
//! deregistering itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;

use log::debug;

use crate::protocol::MessageId;

/// Delay between dispatcher passes when the stream is quiet.
pub(crate) const IDLE_SLEEP: Duration = Duration::from_millis(2);
/// How long a stop request waits for the thread to acknowledge before
/// detaching it.
pub(crate) const STOP_WAIT: Duration = Duration::from_secs(5);

/// Invoked once per matching frame with its identity and raw wire bytes
/// (including framing).
pub type ReaderCallback = Box<dyn FnMut(&MessageId, &[u8]) + Send>;

/// Identifies a registered reader for deregistration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderHandle(u32);

struct ReaderEntry {
    id: u32,
    wanted: MessageId,
    // Shared so the dispatcher can invoke the callback after releasing
    // the list lock.
    callback: Arc<Mutex<ReaderCallback>>,
}

/// Registered readers in registration order.
pub(crate) struct ReaderList {
    next_id: u32,
    entries: Vec<ReaderEntry>,
}

impl ReaderList {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }

    pub(crate) fn register(&mut self, wanted: MessageId, callback: ReaderCallback) -> ReaderHandle {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.entries.push(ReaderEntry {
            id,
            wanted,
            callback: Arc::new(Mutex::new(callback)),
        });
        ReaderHandle(id)
    }

    /// Remove a reader. Returns false if the handle is unknown (already
    /// deregistered).
    pub(crate) fn deregister(&mut self, handle: ReaderHandle) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != handle.0);
        self.entries.len() != before
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The callback of the first registered reader wanting `found`.
    pub(crate) fn first_match(&self, found: &MessageId) -> Option<Arc<Mutex<ReaderCallback>>> {
        self.entries
            .iter()
            .find(|e| e.wanted.wants(found))
            .map(|e| Arc::clone(&e.callback))
    }
}

/// Dispatcher lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchState {
    Stopped,
    Running,
    /// Stop requested from the dispatcher thread itself; the thread winds
    /// down on its own and the next lifecycle operation reaps it.
    Stopping,
}

/// Control block for the dispatcher thread. Guarded by the device's ctl
/// mutex, which is always taken before the io and ring mutexes.
///
/// The thread's read cursor is owned by the thread itself and given back
/// to the ring as its final act before acknowledging the stop, so the
/// control block never has to reclaim it, not even for a thread that
/// stopped itself and got replaced before being reaped.
pub(crate) struct DispatchCtl {
    pub(crate) state: DispatchState,
    pub(crate) stop: Arc<AtomicBool>,
    pub(crate) exit_rx: Option<mpsc::Receiver<()>>,
    pub(crate) join: Option<JoinHandle<()>>,
    pub(crate) thread_id: Option<ThreadId>,
}

impl DispatchCtl {
    pub(crate) fn new() -> Self {
        Self {
            state: DispatchState::Stopped,
            stop: Arc::new(AtomicBool::new(false)),
            exit_rx: None,
            join: None,
            thread_id: None,
        }
    }

    /// True when a stop must be requested without joining, because the
    /// caller *is* the dispatcher thread (a callback deregistering the
    /// last reader).
    pub(crate) fn on_dispatcher_thread(&self) -> bool {
        self.thread_id == Some(std::thread::current().id())
    }

    /// Ask the thread to stop and wait for it. Joins unless called from
    /// the dispatcher thread itself or the thread fails to acknowledge
    /// within [`STOP_WAIT`], in which case the handle is dropped and the
    /// thread left to exit on its own.
    pub(crate) fn request_stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if self.on_dispatcher_thread() {
            self.state = DispatchState::Stopping;
            return;
        }
        let acknowledged = match self.exit_rx.take() {
            Some(rx) => rx.recv_timeout(STOP_WAIT).is_ok(),
            None => false,
        };
        if let Some(handle) = self.join.take() {
            if acknowledged {
                let _ = handle.join();
            } else {
                log::warn!("dispatcher did not acknowledge stop, detaching");
            }
        }
        self.state = DispatchState::Stopped;
        self.thread_id = None;
        debug!("dispatcher stopped");
    }
}

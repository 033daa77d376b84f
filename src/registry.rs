//! Handle-based registry of open device instances.
//!
//! Applications that prefer opaque handles over owning [`Device`] values
//! open instances here and pass the [`Handle`] around. The registry map
//! is only locked long enough to look a handle up; all actual I/O runs on
//! a cloned `Arc`, so a slow operation on one instance never blocks
//! opening or closing another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use log::info;

use crate::config::DeviceConfig;
use crate::device::{Device, KeepGoing};
use crate::dispatch::{ReaderCallback, ReaderHandle};
use crate::error::{Error, Result};
use crate::lock;
use crate::protocol::MessageId;
use crate::transport::Transport;

/// Opaque identifier of an open instance. Stays invalid forever once the
/// instance is closed; handles are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

struct Inner {
    next: u64,
    map: HashMap<u64, Arc<Device>>,
}

/// Collection of open device instances.
pub struct Registry {
    inner: Mutex<Inner>,
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next: 1,
                map: HashMap::new(),
            }),
        }
    }

    /// The process-wide registry.
    pub fn global() -> &'static Registry {
        GLOBAL.get_or_init(Registry::new)
    }

    /// Bring up a device on `transport` and register it.
    pub fn open(
        &self,
        transport: Box<dyn Transport + Send>,
        cfg: DeviceConfig,
    ) -> Result<Handle> {
        let device = Arc::new(Device::new(transport, cfg)?);
        let mut inner = lock(&self.inner);
        let id = inner.next;
        inner.next += 1;
        inner.map.insert(id, device);
        info!("instance {id} opened ({} now open)", inner.map.len());
        Ok(Handle(id))
    }

    /// Shut an instance down and forget its handle.
    pub fn close(&self, handle: Handle) -> Result<()> {
        let device = lock(&self.inner)
            .map
            .remove(&handle.0)
            .ok_or(Error::NotInitialized)?;
        // Shutdown happens outside the map lock; a stuck dispatcher must
        // not block other instances.
        device.shutdown();
        info!("instance {} closed", handle.0);
        Ok(())
    }

    /// Look a handle up, for direct access to the full [`Device`] API.
    pub fn get(&self, handle: Handle) -> Result<Arc<Device>> {
        lock(&self.inner)
            .map
            .get(&handle.0)
            .cloned()
            .ok_or(Error::NotInitialized)
    }

    pub fn open_count(&self) -> usize {
        lock(&self.inner).map.len()
    }

    // --- handle-scoped conveniences ---------------------------------------

    pub fn send_ubx(&self, handle: Handle, class: u8, id: u8, body: &[u8]) -> Result<usize> {
        self.get(handle)?.send_ubx(class, id, body)
    }

    pub fn send_raw(&self, handle: Handle, data: &[u8]) -> Result<usize> {
        self.get(handle)?.send_raw(data)
    }

    pub fn send_receive_ubx(
        &self,
        handle: Handle,
        class: u8,
        id: u8,
        body: &[u8],
        keep_going: Option<KeepGoing<'_>>,
    ) -> Result<Vec<u8>> {
        self.get(handle)?.send_receive_ubx(class, id, body, keep_going)
    }

    pub fn send_receive_ubx_into(
        &self,
        handle: Handle,
        class: u8,
        id: u8,
        body: &[u8],
        response: &mut [u8],
        keep_going: Option<KeepGoing<'_>>,
    ) -> Result<usize> {
        self.get(handle)?
            .send_receive_ubx_into(class, id, body, response, keep_going)
    }

    pub fn receive(
        &self,
        handle: Handle,
        wanted: &MessageId,
        buf: &mut [u8],
        timeout_ms: u32,
        keep_going: Option<KeepGoing<'_>>,
    ) -> Result<(MessageId, usize)> {
        self.get(handle)?.receive(wanted, buf, timeout_ms, keep_going)
    }

    pub fn register_reader(
        &self,
        handle: Handle,
        wanted: MessageId,
        callback: ReaderCallback,
    ) -> Result<ReaderHandle> {
        self.get(handle)?.register_reader(wanted, callback)
    }

    pub fn deregister_reader(&self, handle: Handle, reader: ReaderHandle) -> Result<bool> {
        Ok(self.get(handle)?.deregister_reader(reader))
    }

    pub fn read_stream(&self, handle: Handle, buf: &mut [u8]) -> Result<usize> {
        Ok(self.get(handle)?.read_stream(buf))
    }

    pub fn set_handled_reads_only(&self, handle: Handle, on: bool) -> Result<()> {
        self.get(handle)?.set_handled_reads_only(on);
        Ok(())
    }

    pub fn set_spi_fill_threshold(&self, handle: Handle, threshold: usize) -> Result<()> {
        self.get(handle)?.set_spi_fill_threshold(threshold);
        Ok(())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

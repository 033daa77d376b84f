//! Multi-cursor ring buffer for streamed module data.
//!
//! One writer, a bounded set of independent read cursors. Slot 0 is the
//! "unhandled" read path used by plain `read`/`data_size`; slots 1.. are
//! takeable cursors, each advancing at its own pace. One byte of capacity
//! is always reserved to distinguish full from empty, so a store of
//! capacity C holds at most C−1 bytes.
//!
//! Offsets are monotonic u64 counters reduced modulo the capacity only when
//! indexing storage; this keeps the size arithmetic free of wrap special
//! cases. Cursors are referenced by table index, never by address.

use heapless::Vec as SlotVec;

/// Upper bound on takeable cursors; the per-store limit is configured at
/// creation and may be smaller.
pub const MAX_TAKEABLE_CURSORS: usize = 8;

const SLOT_TABLE_SIZE: usize = MAX_TAKEABLE_CURSORS + 1;

/// Identifier of a taken read cursor. Index into the slot table; slot 0 is
/// reserved for the unhandled path and never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorId(usize);

#[derive(Debug, Clone, Copy, Default)]
struct CursorSlot {
    /// Monotonic read offset.
    read: u64,
    /// Whether this slot is currently handed out (always true for slot 0).
    taken: bool,
}

/// Fixed-capacity circular byte buffer with independent read cursors.
pub struct RingStore {
    storage: Box<[u8]>,
    /// Monotonic write offset.
    write: u64,
    slots: SlotVec<CursorSlot, SLOT_TABLE_SIZE>,
    /// When true the unhandled path reports nothing and does not hold
    /// back `available`.
    handled_only: bool,
    /// Cleared by `delete`; every operation on a deleted store is a no-op.
    initialized: bool,
}

impl RingStore {
    /// Create a store of `capacity` bytes (`capacity - 1` usable) with
    /// `max_cursors` takeable read cursors.
    ///
    /// Returns `None` if `capacity` < 2 or `max_cursors` exceeds
    /// [`MAX_TAKEABLE_CURSORS`].
    pub fn new(capacity: usize, max_cursors: usize) -> Option<Self> {
        if capacity < 2 || max_cursors > MAX_TAKEABLE_CURSORS {
            return None;
        }
        let mut slots = SlotVec::new();
        // Slot 0: the unhandled path, active from the start.
        let _ = slots.push(CursorSlot {
            read: 0,
            taken: true,
        });
        for _ in 0..max_cursors {
            let _ = slots.push(CursorSlot::default());
        }
        Some(Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            write: 0,
            slots,
            handled_only: false,
            initialized: true,
        })
    }

    /// Create a store with no takeable cursors (plain single-reader ring).
    pub fn new_unhandled(capacity: usize) -> Option<Self> {
        Self::new(capacity, 0)
    }

    /// Usable capacity in bytes (one less than the raw storage size).
    pub fn usable_capacity(&self) -> usize {
        if !self.initialized {
            return 0;
        }
        self.storage.len() - 1
    }

    fn slot_is_active(&self, index: usize) -> bool {
        if index == 0 {
            return !self.handled_only;
        }
        self.slots[index].taken
    }

    /// Largest lag of any active cursor behind the write offset.
    fn max_lag(&self) -> u64 {
        let mut lag = 0;
        for i in 0..self.slots.len() {
            if self.slot_is_active(i) {
                lag = lag.max(self.write - self.slots[i].read);
            }
        }
        lag
    }

    /// Bytes that can be added without evicting anything.
    pub fn available(&self) -> usize {
        if !self.initialized {
            return 0;
        }
        self.usable_capacity() - self.max_lag() as usize
    }

    /// Bytes pending on the unhandled read path; 0 when reads require a
    /// cursor.
    pub fn data_size(&self) -> usize {
        if !self.initialized || self.handled_only {
            return 0;
        }
        (self.write - self.slots[0].read) as usize
    }

    /// Bytes pending for a taken cursor.
    pub fn data_size_handle(&self, cursor: CursorId) -> usize {
        if !self.valid_cursor(cursor) {
            return 0;
        }
        (self.write - self.slots[cursor.0].read) as usize
    }

    fn valid_cursor(&self, cursor: CursorId) -> bool {
        self.initialized
            && cursor.0 >= 1
            && cursor.0 < self.slots.len()
            && self.slots[cursor.0].taken
    }

    /// Add `data` only if it fits in the currently available space.
    /// Atomic: on failure nothing is written.
    pub fn add_if_fits(&mut self, data: &[u8]) -> bool {
        self.push(data, false)
    }

    /// Add `data`, evicting the minimum number of oldest unread bytes if
    /// needed. Every cursor that would fall behind the new write frontier
    /// is advanced so it never reads overwritten bytes. Fails only if
    /// `data` exceeds the usable capacity.
    pub fn force_add(&mut self, data: &[u8]) -> bool {
        self.push(data, true)
    }

    fn push(&mut self, data: &[u8], force: bool) -> bool {
        if !self.initialized {
            return false;
        }
        if data.is_empty() {
            return true;
        }
        let usable = self.usable_capacity() as u64;
        if force {
            if data.len() as u64 > usable {
                return false;
            }
            // Oldest-byte-first eviction: push lagging cursors forward.
            let new_write = self.write + data.len() as u64;
            for i in 0..self.slots.len() {
                if self.slot_is_active(i) && new_write - self.slots[i].read > usable {
                    self.slots[i].read = new_write - usable;
                }
            }
        } else if data.len() > self.available() {
            return false;
        }
        self.copy_in(data);
        self.write += data.len() as u64;
        if self.handled_only {
            // The unhandled path tracks the frontier so it neither reports
            // data nor holds back available space.
            self.slots[0].read = self.write;
        }
        true
    }

    fn copy_in(&mut self, data: &[u8]) {
        let cap = self.storage.len();
        let at = (self.write % cap as u64) as usize;
        let first = data.len().min(cap - at);
        self.storage[at..at + first].copy_from_slice(&data[..first]);
        if first < data.len() {
            let rest = data.len() - first;
            self.storage[..rest].copy_from_slice(&data[first..]);
        }
    }

    fn copy_out(&self, from: u64, buf: &mut [u8]) {
        let cap = self.storage.len();
        let at = (from % cap as u64) as usize;
        let first = buf.len().min(cap - at);
        buf[..first].copy_from_slice(&self.storage[at..at + first]);
        if first < buf.len() {
            let rest = buf.len() - first;
            buf[first..].copy_from_slice(&self.storage[..rest]);
        }
    }

    fn read_slot(&mut self, index: usize, buf: Option<&mut [u8]>, max_len: usize) -> usize {
        let pending = (self.write - self.slots[index].read) as usize;
        let n = pending.min(max_len);
        if n == 0 {
            return 0;
        }
        if let Some(buf) = buf {
            let from = self.slots[index].read;
            self.copy_out(from, &mut buf[..n]);
        }
        self.slots[index].read += n as u64;
        n
    }

    /// Unhandled read: consume up to `buf.len()` bytes. Returns 0 when
    /// empty or when handled reads are required; never blocks.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        if !self.initialized || self.handled_only {
            return 0;
        }
        let max = buf.len();
        self.read_slot(0, Some(buf), max)
    }

    /// Consume up to `buf.len()` bytes for a taken cursor.
    pub fn read_handle(&mut self, cursor: CursorId, buf: &mut [u8]) -> usize {
        if !self.valid_cursor(cursor) {
            return 0;
        }
        let max = buf.len();
        self.read_slot(cursor.0, Some(buf), max)
    }

    /// Advance a cursor by up to `n` bytes without copying them anywhere.
    pub fn discard_handle(&mut self, cursor: CursorId, n: usize) -> usize {
        if !self.valid_cursor(cursor) {
            return 0;
        }
        self.read_slot(cursor.0, None, n)
    }

    /// Non-consuming read: copy up to `buf.len()` bytes starting `offset`
    /// bytes into the cursor's unread data. The cursor does not move.
    pub fn peek_handle(&self, cursor: CursorId, buf: &mut [u8], offset: usize) -> usize {
        if !self.valid_cursor(cursor) {
            return 0;
        }
        let pending = (self.write - self.slots[cursor.0].read) as usize;
        if offset >= pending {
            return 0;
        }
        let n = (pending - offset).min(buf.len());
        self.copy_out(self.slots[cursor.0].read + offset as u64, &mut buf[..n]);
        n
    }

    /// Take a read cursor. The new cursor starts at the current write
    /// position, i.e. it observes only data added after this call.
    /// Fails fast (no blocking) when all cursors are outstanding.
    pub fn take_cursor(&mut self) -> Option<CursorId> {
        if !self.initialized {
            return None;
        }
        for i in 1..self.slots.len() {
            if !self.slots[i].taken {
                self.slots[i] = CursorSlot {
                    read: self.write,
                    taken: true,
                };
                return Some(CursorId(i));
            }
        }
        None
    }

    /// Return a cursor taken with [`take_cursor`](Self::take_cursor).
    pub fn give_cursor(&mut self, cursor: CursorId) {
        if self.valid_cursor(cursor) {
            self.slots[cursor.0].taken = false;
        }
    }

    /// When set, the unhandled path reports no data and plain `read`
    /// returns nothing; only taken cursors see the stream.
    pub fn set_handled_reads_only(&mut self, on: bool) {
        if !self.initialized {
            return;
        }
        self.handled_only = on;
        // Either way the unhandled path restarts at the frontier: it must
        // not suddenly claim bytes that accumulated while it was off.
        self.slots[0].read = self.write;
    }

    pub fn handled_reads_only(&self) -> bool {
        self.initialized && self.handled_only
    }

    /// Zero all offsets without reallocating. Taken cursors stay taken.
    pub fn reset(&mut self) {
        if !self.initialized {
            return;
        }
        self.write = 0;
        for slot in &mut self.slots {
            slot.read = 0;
        }
    }

    /// Tear the store down. Afterwards every operation returns 0/false and
    /// `take_cursor` fails.
    pub fn delete(&mut self) {
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAP: usize = 10; // 9 usable

    fn test_data(n: usize) -> Vec<u8> {
        (0..n).map(|x| x as u8).collect()
    }

    #[test]
    fn empty_store_reads_nothing() {
        let mut rb = RingStore::new(CAP, 2).unwrap();
        let mut out = [0x5Au8; CAP];
        assert_eq!(rb.data_size(), 0);
        assert_eq!(rb.available(), CAP - 1);
        assert_eq!(rb.read(&mut out), 0);
        assert_eq!(out[0], 0x5A);
        let h = rb.take_cursor().unwrap();
        assert_eq!(rb.data_size_handle(h), 0);
        assert_eq!(rb.read_handle(h, &mut out), 0);
        rb.give_cursor(h);
    }

    #[test]
    fn one_byte_add_and_both_read_paths() {
        let mut rb = RingStore::new(CAP, 2).unwrap();
        let h = rb.take_cursor().unwrap();
        let b = [0xA5u8];
        assert!(rb.add_if_fits(&b));
        assert_eq!(rb.data_size(), 1);
        assert_eq!(rb.available(), CAP - 1 - 1);

        // Normal (unhandled) read first.
        let mut out = [0x5Au8; CAP];
        assert_eq!(rb.read(&mut out), 1);
        assert_eq!(out[0], 0xA5);
        assert_eq!(out[1], 0x5A);
        assert_eq!(rb.data_size(), 0);
        // Available does not recover: the cursor has not consumed the byte.
        assert_eq!(rb.available(), CAP - 1 - 1);
        assert_eq!(rb.read(&mut out), 0);

        // Then the cursor.
        assert_eq!(rb.data_size_handle(h), 1);
        let mut out2 = [0x5Au8; CAP];
        assert_eq!(rb.read_handle(h, &mut out2), 1);
        assert_eq!(out2[0], 0xA5);
        assert_eq!(rb.data_size_handle(h), 0);
        assert_eq!(rb.available(), CAP - 1);
        rb.give_cursor(h);
    }

    #[test]
    fn fill_to_capacity_and_drain() {
        let mut rb = RingStore::new(CAP, 2).unwrap();
        let h = rb.take_cursor().unwrap();
        let input = test_data(CAP - 1);
        assert!(rb.add_if_fits(&input));
        assert_eq!(rb.data_size(), CAP - 1);
        assert_eq!(rb.available(), 0);

        let mut out = [0x5Au8; CAP];
        assert_eq!(rb.read(&mut out), CAP - 1);
        assert_eq!(&out[..CAP - 1], &input[..]);
        assert_eq!(out[CAP - 1], 0x5A);
        assert_eq!(rb.available(), 0, "cursor still lags");

        let mut out2 = [0x5Au8; CAP];
        assert_eq!(rb.read_handle(h, &mut out2), CAP - 1);
        assert_eq!(&out2[..CAP - 1], &input[..]);
        assert_eq!(rb.available(), CAP - 1);
        rb.give_cursor(h);
    }

    #[test]
    fn oversize_add_fails_atomically() {
        let mut rb = RingStore::new(CAP, 2).unwrap();
        let input = test_data(CAP);
        assert!(!rb.add_if_fits(&input));
        assert!(!rb.force_add(&input));
        assert_eq!(rb.data_size(), 0);
        assert_eq!(rb.available(), CAP - 1);
    }

    #[test]
    fn handled_reads_only_hides_unhandled_path() {
        let mut rb = RingStore::new(CAP, 2).unwrap();
        rb.set_handled_reads_only(true);
        assert!(rb.handled_reads_only());
        let h = rb.take_cursor().unwrap();
        let input = test_data(CAP - 1);
        assert!(rb.add_if_fits(&input));

        // The unhandled path reports nothing at all.
        assert_eq!(rb.data_size(), 0);
        assert_eq!(rb.available(), 0, "cursor holds the data");
        let mut out = [0x5Au8; CAP];
        assert_eq!(rb.read(&mut out), 0);
        assert_eq!(out[0], 0x5A);

        // The cursor still sees everything.
        assert_eq!(rb.data_size_handle(h), CAP - 1);
        assert_eq!(rb.read_handle(h, &mut out), CAP - 1);
        assert_eq!(&out[..CAP - 1], &input[..]);
        assert_eq!(rb.available(), CAP - 1);
        rb.give_cursor(h);
        rb.set_handled_reads_only(false);
        assert!(!rb.handled_reads_only());
    }

    #[test]
    fn two_cursors_read_independently() {
        let mut rb = RingStore::new(CAP, 2).unwrap();
        let h0 = rb.take_cursor().unwrap();
        let h1 = rb.take_cursor().unwrap();
        assert!(rb.take_cursor().is_none(), "only two cursors configured");

        let input = test_data(CAP - 2);
        assert!(rb.add_if_fits(&input));
        assert_eq!(rb.available(), 1);

        // Unhandled path drains byte by byte.
        let mut out = [0x5Au8; CAP];
        for z in 0..input.len() {
            assert_eq!(rb.read(&mut out[z..z + 1]), 1);
            assert_eq!(rb.data_size(), input.len() - z - 1);
        }
        assert_eq!(&out[..input.len()], &input[..]);
        assert_eq!(rb.available(), 1, "both cursors still lag");

        // First cursor drains; available still pinned by the second.
        let mut out0 = [0x5Au8; CAP];
        for z in 0..input.len() {
            assert_eq!(rb.read_handle(h0, &mut out0[z..z + 1]), 1);
            assert_eq!(rb.data_size_handle(h0), input.len() - z - 1);
        }
        assert_eq!(&out0[..input.len()], &input[..]);
        assert_eq!(rb.available(), 1);

        // Second cursor drains; available recovers step by step.
        let mut out1 = [0x5Au8; CAP];
        for z in 0..input.len() {
            assert_eq!(rb.read_handle(h1, &mut out1[z..z + 1]), 1);
            assert_eq!(rb.available(), 1 + z + 1);
        }
        assert_eq!(&out1[..input.len()], &input[..]);
        assert_eq!(rb.available(), CAP - 1);
        rb.give_cursor(h0);
        rb.give_cursor(h1);
    }

    #[test]
    fn force_add_advances_every_lagging_cursor() {
        let mut rb = RingStore::new(CAP, 2).unwrap();
        let h0 = rb.take_cursor().unwrap();
        let h1 = rb.take_cursor().unwrap();

        let input = test_data(CAP);
        assert!(rb.add_if_fits(&input[..CAP - 1]));
        assert_eq!(rb.available(), 0);

        // Force one more byte in: the oldest byte is pushed out at every
        // read pointer.
        assert!(rb.force_add(&input[CAP - 1..]));
        // Forcing in more than the capacity always fails.
        assert!(!rb.force_add(&input));

        let mut out = [0x5Au8; CAP];
        assert_eq!(rb.read(&mut out), CAP - 1);
        assert_eq!(&out[..CAP - 1], &input[1..]);

        let mut out0 = [0x5Au8; CAP];
        assert_eq!(rb.data_size_handle(h0), CAP - 1);
        assert_eq!(rb.read_handle(h0, &mut out0), CAP - 1);
        assert_eq!(&out0[..CAP - 1], &input[1..]);
        assert_eq!(rb.available(), 0, "second cursor still lags");

        let mut out1 = [0x5Au8; CAP];
        assert_eq!(rb.read_handle(h1, &mut out1), CAP - 1);
        assert_eq!(&out1[..CAP - 1], &input[1..]);
        assert_eq!(rb.available(), CAP - 1);
        rb.give_cursor(h0);
        rb.give_cursor(h1);
    }

    #[test]
    fn force_add_of_exactly_usable_capacity_succeeds() {
        let mut rb = RingStore::new(CAP, 1).unwrap();
        // Pre-load some bytes so eviction actually has to happen.
        assert!(rb.add_if_fits(&[9, 9, 9, 9]));
        let input = test_data(CAP - 1);
        assert!(rb.force_add(&input));
        let mut out = [0u8; CAP];
        assert_eq!(rb.read(&mut out), CAP - 1);
        assert_eq!(&out[..CAP - 1], &input[..]);
    }

    #[test]
    fn reset_zeroes_offsets() {
        let mut rb = RingStore::new(CAP, 2).unwrap();
        let h = rb.take_cursor().unwrap();
        assert!(rb.add_if_fits(&[1]));
        assert_eq!(rb.data_size(), 1);
        rb.reset();
        assert_eq!(rb.data_size(), 0);
        assert_eq!(rb.available(), CAP - 1);
        let mut out = [0x5Au8; CAP];
        assert_eq!(rb.read(&mut out), 0);
        assert_eq!(rb.data_size_handle(h), 0);
        assert_eq!(rb.read_handle(h, &mut out), 0);
        rb.give_cursor(h);
    }

    #[test]
    fn delete_makes_everything_a_no_op() {
        let mut rb = RingStore::new(CAP, 2).unwrap();
        let h = rb.take_cursor().unwrap();
        assert!(rb.add_if_fits(&[1, 2, 3]));
        rb.delete();
        let mut out = [0x5Au8; CAP];
        assert!(!rb.add_if_fits(&[4]));
        assert!(!rb.force_add(&[4]));
        assert_eq!(rb.data_size(), 0);
        assert_eq!(rb.available(), 0);
        assert_eq!(rb.read(&mut out), 0);
        assert_eq!(out[0], 0x5A);
        assert!(rb.take_cursor().is_none());
        assert_eq!(rb.data_size_handle(h), 0);
        assert_eq!(rb.read_handle(h, &mut out), 0);
    }

    #[test]
    fn cursor_taken_after_add_sees_only_new_data() {
        let mut rb = RingStore::new(CAP, 2).unwrap();
        assert!(rb.add_if_fits(&[1, 2, 3]));
        let h = rb.take_cursor().unwrap();
        assert_eq!(rb.data_size_handle(h), 0);
        assert!(rb.add_if_fits(&[4, 5]));
        let mut out = [0u8; 4];
        assert_eq!(rb.read_handle(h, &mut out), 2);
        assert_eq!(&out[..2], &[4, 5]);
        rb.give_cursor(h);
    }

    #[test]
    fn give_makes_cursor_takeable_again() {
        let mut rb = RingStore::new(CAP, 1).unwrap();
        let h = rb.take_cursor().unwrap();
        assert!(rb.take_cursor().is_none());
        rb.give_cursor(h);
        assert!(rb.take_cursor().is_some());
    }

    #[test]
    fn peek_does_not_consume() {
        let mut rb = RingStore::new(CAP, 1).unwrap();
        let h = rb.take_cursor().unwrap();
        assert!(rb.add_if_fits(&[10, 11, 12, 13]));
        let mut out = [0u8; 2];
        assert_eq!(rb.peek_handle(h, &mut out, 1), 2);
        assert_eq!(out, [11, 12]);
        assert_eq!(rb.data_size_handle(h), 4);
        assert_eq!(rb.peek_handle(h, &mut out, 4), 0);
        // Discard skips without copying.
        assert_eq!(rb.discard_handle(h, 3), 3);
        let mut rest = [0u8; 4];
        assert_eq!(rb.read_handle(h, &mut rest), 1);
        assert_eq!(rest[0], 13);
        rb.give_cursor(h);
    }

    #[test]
    fn wraparound_preserves_order() {
        let mut rb = RingStore::new(CAP, 1).unwrap();
        let h = rb.take_cursor().unwrap();
        // Advance the write offset near the end of storage, then wrap.
        assert!(rb.add_if_fits(&[0, 1, 2, 3, 4, 5, 6]));
        let mut sink = [0u8; CAP];
        assert_eq!(rb.read(&mut sink), 7);
        assert_eq!(rb.read_handle(h, &mut sink), 7);
        let wrapped = test_data(CAP - 1);
        assert!(rb.add_if_fits(&wrapped));
        let mut out = [0u8; CAP];
        assert_eq!(rb.read_handle(h, &mut out), CAP - 1);
        assert_eq!(&out[..CAP - 1], &wrapped[..]);
        rb.give_cursor(h);
    }

    #[test]
    fn invalid_creation_parameters() {
        assert!(RingStore::new(1, 2).is_none());
        assert!(RingStore::new(CAP, MAX_TAKEABLE_CURSORS + 1).is_none());
        assert!(RingStore::new_unhandled(CAP).is_some());
    }

    #[test]
    fn unhandled_only_store_has_no_cursors() {
        let mut rb = RingStore::new_unhandled(CAP).unwrap();
        assert!(rb.take_cursor().is_none());
        let input = test_data(CAP - 1);
        assert!(rb.add_if_fits(&input));
        let mut out = [0u8; CAP];
        assert_eq!(rb.read(&mut out), CAP - 1);
        assert_eq!(&out[..CAP - 1], &input[..]);
        // With no cursor lagging, the space recovers immediately.
        assert_eq!(rb.available(), CAP - 1);
    }
}

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// HEADER PROTOCOL & MEMORY ORDERING
// =============================================================================
//
// A `SharedBuf` is a fixed-capacity byte region shared between exactly two
// parties: a single writer (the instrumented client) and a single consumer
// (the native engine). The logical layout is:
//
//   bytes [0, 8)          unsigned 64-bit little-endian record count
//   bytes [8, capacity)   sequential records
//
// The count word doubles as the synchronization flag, so in this rendition it
// lives in a cache-padded `AtomicU64` rather than in the byte array itself.
// Byte offsets are absolute over the logical region: the writer's cursor
// starts at `HEADER_BYTES` and record offsets never dip below it.
//
// ## Protocol
//
// **Writer (append path):**
// 1. Load `count` with Acquire; a just-observed zero while the writer still
//    tracks pending records means the consumer drained asynchronously, and
//    the body region may be reused from offset `HEADER_BYTES`.
// 2. Write record bytes into the body (no ordering needed - the region is
//    owned by the writer until the count is published).
// 3. Store the new total with Release (publishes the record bytes).
//
// **Consumer (drain path):**
// 1. Load `count` with Acquire (synchronizes with the writer's Release).
// 2. Read exactly `count` records from the body.
// 3. Store zero with Release - the release signal. The consumer must be
//    fully done with the body before this store; afterwards the writer is
//    free to overwrite it.
//
// ## Single-Writer Invariants
//
// The body bytes are accessed via `UnsafeCell` without atomics because the
// protocol gives them exactly one owner at a time: the writer between a zero
// observation and its next count publish, the consumer between a nonzero
// Acquire load and its zero store. Draining concurrently with an in-flight
// append is outside the protocol; the count header is the hand-off point.
//
// =============================================================================

/// Size of the count header at the front of every shared region.
pub const HEADER_BYTES: usize = 8;

/// Fixed-capacity shared byte region with an atomic record-count header.
///
/// Created once per pipeline instance and reused for its entire lifetime;
/// a buffer is only ever logically reset (count back to zero), never
/// reallocated or grown.
pub struct SharedBuf {
    /// Record count, logical bytes [0, 8) of the region.
    count: CachePadded<AtomicU64>,
    /// The byte region. The first `HEADER_BYTES` bytes are reserved (the
    /// count lives in the atomic above) and stay zero.
    data: UnsafeCell<Box<[u8]>>,
    capacity: usize,
}

// Safety: body access follows the single-owner hand-off documented above;
// the count header is the only concurrently touched word and is atomic.
unsafe impl Send for SharedBuf {}
unsafe impl Sync for SharedBuf {}

impl SharedBuf {
    /// Creates a region of `capacity` total bytes (header included).
    ///
    /// # Panics
    ///
    /// Panics if `capacity` cannot hold the header and at least one byte of
    /// body. Sizing is a construction-time configuration concern.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity > HEADER_BYTES,
            "buffer capacity {capacity} cannot hold the {HEADER_BYTES}-byte header"
        );
        Self {
            count: CachePadded::new(AtomicU64::new(0)),
            data: UnsafeCell::new(vec![0u8; capacity].into_boxed_slice()),
            capacity,
        }
    }

    /// Total region size in bytes, header included.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current record count (Acquire).
    ///
    /// A nonzero value means work is pending; a just-observed zero means the
    /// consumer has drained and the body may be reused.
    #[inline]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Publishes a new record total (Release). Writer side.
    ///
    /// The Release store is what makes previously written record bytes
    /// visible to the consumer's Acquire load.
    #[inline]
    pub fn publish_count(&self, count: u64) {
        self.count.store(count, Ordering::Release);
    }

    /// Zeroes the count header (Release). Consumer side.
    ///
    /// This is the release signal: the consumer must be completely done
    /// reading the body before calling it.
    #[inline]
    pub fn reset(&self) {
        self.count.store(0, Ordering::Release);
    }

    /// Copies `src` into the body at absolute offset `offset`. Writer side.
    pub fn write_bytes(&self, offset: usize, src: &[u8]) {
        debug_assert!(
            offset >= HEADER_BYTES && offset + src.len() <= self.capacity,
            "write of {} bytes at offset {} outside body [{}, {})",
            src.len(),
            offset,
            HEADER_BYTES,
            self.capacity
        );
        // SAFETY: Body access is safe because:
        // 1. The range is within bounds (debug-asserted above, callers uphold
        //    the capacity precondition in release builds).
        // 2. Only the writer touches the body between a zero observation and
        //    its next `publish_count`; the consumer will not read these bytes
        //    until that Release store.
        unsafe {
            let data = &mut *self.data.get();
            data[offset..offset + src.len()].copy_from_slice(src);
        }
    }

    /// Returns `len` body bytes starting at absolute offset `offset`.
    /// Consumer side.
    pub fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        debug_assert!(
            offset >= HEADER_BYTES && offset + len <= self.capacity,
            "read of {len} bytes at offset {offset} outside body [{HEADER_BYTES}, {})",
            self.capacity
        );
        // SAFETY: Body access is safe because:
        // 1. The range is within bounds.
        // 2. Record bytes in [HEADER_BYTES, cursor) were published by the
        //    writer's Release store, which the caller's Acquire `count` load
        //    synchronizes with.
        // 3. The writer will not overwrite the body until it observes the
        //    consumer's zero store, which the caller performs only after it
        //    is done with this slice.
        unsafe {
            let data = &*self.data.get();
            &data[offset..offset + len]
        }
    }
}

impl std::fmt::Debug for SharedBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBuf")
            .field("capacity", &self.capacity)
            .field("count", &self.count())
            .finish()
    }
}

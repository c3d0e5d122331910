use crate::buffer::{SharedBuf, HEADER_BYTES};
use crate::invariants::{debug_assert_count_increment, debug_assert_cursor_in_bounds};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Wire width of an interned string id.
pub const STRING_ID_BYTES: usize = 4;

/// Error types for string interning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InternError {
    /// The table-insert record does not fit in the string-table buffer.
    /// The caller must flush and retry, or configure a larger buffer.
    #[error("string table overflow: entry needs {needed} bytes, {remaining} remaining")]
    TableOverflow { needed: usize, remaining: usize },
    /// Sequential id space is exhausted. Ids are u32, assigned monotonically
    /// from 0 with no recycling; `u32::MAX` is reserved so exhaustion is
    /// detectable rather than silently wrapping.
    #[error("string id space exhausted after {issued} ids")]
    IdSpaceExhausted { issued: u32 },
    /// The value contains an interior NUL, which the NUL-terminated wire
    /// format cannot carry.
    #[error("string contains an embedded NUL byte at offset {at}")]
    EmbeddedNul { at: usize },
}

/// Deduplicates strings into small sequential ids and emits one table-insert
/// record per new string on the string-table input buffer.
///
/// Wire format per entry: u32 id (little-endian), UTF-8 bytes, terminating
/// NUL. The consumer learns each (id, string) pair exactly once; records
/// referencing the id afterwards carry only the 4-byte id.
///
/// Eviction is a consumer-side operation: it frees consumer memory only and
/// never invalidates the client mapping kept here, nor any reference already
/// materialized on the consumer side.
pub struct StringInterner {
    table: HashMap<String, u32>,
    next_id: u32,
    buf: Arc<SharedBuf>,
    cursor: usize,
    tracked: u64,
}

impl StringInterner {
    pub fn new(buf: Arc<SharedBuf>) -> Self {
        Self {
            table: HashMap::new(),
            next_id: 0,
            buf,
            cursor: HEADER_BYTES,
            tracked: 0,
        }
    }

    /// The shared string-table input buffer.
    pub fn buffer(&self) -> &Arc<SharedBuf> {
        &self.buf
    }

    /// Number of distinct strings interned over this instance's lifetime.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Insert records emitted but not yet known to be consumed.
    pub fn tracked_count(&self) -> u64 {
        self.tracked
    }

    /// Samples the header; a zero while records are tracked means the
    /// consumer drained the buffer asynchronously, so the region is reusable
    /// from the start. Returns whether that drain was detected.
    pub fn reconcile(&mut self) -> bool {
        if self.tracked > 0 && self.buf.count() == 0 {
            self.cursor = HEADER_BYTES;
            self.tracked = 0;
            return true;
        }
        false
    }

    /// Returns the id for `value`, assigning the next sequential id and
    /// emitting a table-insert record on first occurrence.
    ///
    /// Repeated interning of the same string is an O(1) lookup with no
    /// emission and no allocation. The mapping is recorded only after a
    /// successful emission, so a failed insert never leaks an id the
    /// consumer would not learn.
    pub fn intern(&mut self, value: &str) -> Result<u32, InternError> {
        if let Some(&id) = self.table.get(value) {
            return Ok(id);
        }

        if let Some(at) = value.bytes().position(|b| b == 0) {
            return Err(InternError::EmbeddedNul { at });
        }
        if self.next_id == u32::MAX {
            return Err(InternError::IdSpaceExhausted {
                issued: self.next_id,
            });
        }

        self.reconcile();

        let needed = STRING_ID_BYTES + value.len() + 1;
        let remaining = self.buf.capacity() - self.cursor;
        if needed > remaining {
            return Err(InternError::TableOverflow { needed, remaining });
        }

        let id = self.next_id;
        let mut cursor = self.cursor;
        self.buf.write_bytes(cursor, &id.to_le_bytes());
        cursor += STRING_ID_BYTES;
        self.buf.write_bytes(cursor, value.as_bytes());
        cursor += value.len();
        self.buf.write_bytes(cursor, &[0]);
        cursor += 1;
        debug_assert_cursor_in_bounds!(cursor, self.buf.capacity());

        let published = self.tracked + 1;
        debug_assert_count_increment!(self.tracked, published);
        self.cursor = cursor;
        self.tracked = published;
        self.buf.publish_count(published);

        self.table.insert(value.to_owned(), id);
        self.next_id += 1;
        Ok(id)
    }

    /// Resets the emission bookkeeping after an explicit drain of the
    /// string-table buffer. The id mapping is untouched.
    pub fn clear_pending(&mut self) {
        self.cursor = HEADER_BYTES;
        self.tracked = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interner(capacity: usize) -> StringInterner {
        StringInterner::new(Arc::new(SharedBuf::new(capacity)))
    }

    #[test]
    fn test_intern_is_idempotent() {
        let mut interner = interner(256);

        let first = interner.intern("service.name").unwrap();
        let second = interner.intern("service.name").unwrap();

        assert_eq!(first, second);
        // Only the first occurrence emitted a table-insert record.
        assert_eq!(interner.buffer().count(), 1);
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn test_ids_are_sequential_from_zero() {
        let mut interner = interner(256);
        assert_eq!(interner.intern("a").unwrap(), 0);
        assert_eq!(interner.intern("b").unwrap(), 1);
        assert_eq!(interner.intern("a").unwrap(), 0);
        assert_eq!(interner.intern("c").unwrap(), 2);
    }

    #[test]
    fn test_insert_record_wire_format() {
        let mut interner = interner(256);
        interner.intern("ab").unwrap();

        let buf = interner.buffer();
        assert_eq!(buf.count(), 1);
        let record = buf.read_bytes(HEADER_BYTES, STRING_ID_BYTES + 3);
        assert_eq!(&record[..4], &0u32.to_le_bytes());
        assert_eq!(&record[4..], b"ab\0");
    }

    #[test]
    fn test_table_overflow_emits_nothing() {
        // Body holds 8 bytes: "abc" needs 4 + 3 + 1 = 8, "toolong" doesn't fit.
        let mut interner = interner(HEADER_BYTES + 8);
        interner.intern("abc").unwrap();

        let err = interner.intern("xy").unwrap_err();
        assert_eq!(
            err,
            InternError::TableOverflow {
                needed: 7,
                remaining: 0
            }
        );
        // Nothing was emitted or mapped for the failed string.
        assert_eq!(interner.buffer().count(), 1);
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn test_embedded_nul_rejected() {
        let mut interner = interner(256);
        assert_eq!(
            interner.intern("a\0b"),
            Err(InternError::EmbeddedNul { at: 1 })
        );
        assert_eq!(interner.buffer().count(), 0);
    }

    #[test]
    fn test_reconcile_after_consumer_drain() {
        let mut interner = interner(HEADER_BYTES + 16);
        interner.intern("abcdefghij").unwrap(); // 4 + 10 + 1 = 15 bytes

        // Consumer drains and zeroes the header.
        interner.buffer().reset();

        // The next miss reuses the region from the start.
        let id = interner.intern("kl").unwrap();
        assert_eq!(id, 1);
        assert_eq!(interner.buffer().count(), 1);
        assert_eq!(interner.tracked_count(), 1);
    }
}

use crate::buffer::{SharedBuf, HEADER_BYTES};
use crate::interner::{InternError, StringInterner};
use crate::invariants::{debug_assert_count_increment, debug_assert_cursor_in_bounds};
use crate::opcode::OpCode;
use crate::value::Value;
use std::sync::Arc;
use thiserror::Error;

/// Fixed record header: u64 op code + u64 span id.
pub const RECORD_HEADER_BYTES: usize = 16;

/// Records carry at most a key/value argument pair.
const MAX_ARGS: usize = 2;

/// Error types for record appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// The record does not fit in the remaining change-queue capacity.
    /// Fatal to this append only; the caller must flush and retry, or
    /// configure a larger buffer. No partial write occurs.
    #[error("change queue overflow: record needs {needed} bytes, {remaining} remaining")]
    Overflow { needed: usize, remaining: usize },
    /// A string argument could not be interned. The change queue is
    /// untouched when this surfaces.
    #[error(transparent)]
    Intern(#[from] InternError),
}

/// Single-writer encoder appending change records to the shared queue.
///
/// One writer exists per queue; the consumer on the other side of the
/// boundary drains records and zeroes the count header, which this writer
/// observes lazily (see [`reconcile`](Self::reconcile)).
///
/// The writer does not validate that an argument list matches the op's
/// schema; the typed span layer above owns that pairing.
pub struct ChangeWriter {
    buf: Arc<SharedBuf>,
    /// Next write offset, absolute over the region. Starts at, and resets
    /// to, `HEADER_BYTES`.
    cursor: usize,
    /// Records appended since the last observed drain. Mirrors the header
    /// except in the window where the consumer has zeroed it and this
    /// writer has not yet noticed.
    tracked: u64,
}

impl ChangeWriter {
    pub fn new(buf: Arc<SharedBuf>) -> Self {
        Self {
            buf,
            cursor: HEADER_BYTES,
            tracked: 0,
        }
    }

    /// The shared change-queue buffer.
    pub fn buffer(&self) -> &Arc<SharedBuf> {
        &self.buf
    }

    /// Records appended and not yet known to be consumed.
    pub fn tracked_count(&self) -> u64 {
        self.tracked
    }

    /// Next write offset.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Bytes still available for records.
    pub fn remaining(&self) -> usize {
        self.buf.capacity() - self.cursor
    }

    /// Samples the count header: a zero while this writer tracks pending
    /// records means the consumer drained and reset the queue on its own,
    /// so local bookkeeping snaps back to the empty state (cursor at
    /// `HEADER_BYTES`, count 0). Returns whether that drain was detected.
    ///
    /// This is an eventual-consistency correction, not a lock: a zero header
    /// cannot be told apart from a race with an in-flight drain, so the
    /// consumer must fully drain and zero the header before the writer is
    /// allowed to observe the zero (the zero-write is the release signal).
    pub fn reconcile(&mut self) -> bool {
        if self.tracked > 0 && self.buf.count() == 0 {
            self.cursor = HEADER_BYTES;
            self.tracked = 0;
            return true;
        }
        false
    }

    /// Appends one change record and publishes the new count.
    ///
    /// The capacity precondition is checked up front: if the encoded record
    /// (16-byte header plus payload) exceeds the remaining region, the
    /// append fails with [`EncodeError::Overflow`] and writes nothing.
    /// String arguments are interned before any record byte lands, so an
    /// interning failure also leaves the queue untouched.
    ///
    /// In steady state - all string ids cached - an append allocates
    /// nothing.
    ///
    /// Returns whether a consumer-side drain was detected (and absorbed)
    /// before this record was written.
    pub fn append(
        &mut self,
        interner: &mut StringInterner,
        op: OpCode,
        span_id: u64,
        args: &[Value<'_>],
    ) -> Result<bool, EncodeError> {
        debug_assert!(args.len() <= MAX_ARGS, "records carry at most {MAX_ARGS} args");

        let drained = self.reconcile();

        let payload: usize = args.iter().map(Value::wire_len).sum();
        let needed = RECORD_HEADER_BYTES + payload;
        let remaining = self.remaining();
        if needed > remaining {
            return Err(EncodeError::Overflow { needed, remaining });
        }

        // Resolve string ids before touching the queue: interning can fail,
        // and a failed append must leave the region byte-for-byte unchanged.
        let mut ids = [0u32; MAX_ARGS];
        for (slot, arg) in ids.iter_mut().zip(args) {
            if let Value::Str(s) = arg {
                *slot = interner.intern(s)?;
            }
        }

        let mut cursor = self.cursor;
        self.buf.write_bytes(cursor, &op.code().to_le_bytes());
        cursor += 8;
        self.buf.write_bytes(cursor, &span_id.to_le_bytes());
        cursor += 8;
        for (arg, id) in args.iter().zip(ids) {
            match arg {
                Value::Str(_) => self.buf.write_bytes(cursor, &id.to_le_bytes()),
                Value::U64(v) => self.buf.write_bytes(cursor, &v.to_le_bytes()),
                Value::I64(v) => self.buf.write_bytes(cursor, &v.to_le_bytes()),
                Value::I32(v) => self.buf.write_bytes(cursor, &v.to_le_bytes()),
                Value::F64(v) => self.buf.write_bytes(cursor, &v.to_le_bytes()),
                Value::U128(v) => self.buf.write_bytes(cursor, &v.to_le_bytes()),
            }
            cursor += arg.wire_len();
        }
        debug_assert_eq!(cursor, self.cursor + needed);
        debug_assert_cursor_in_bounds!(cursor, self.buf.capacity());

        // The header rewrite is the synchronization signal: the Release
        // store publishes the record bytes to the consumer.
        let published = self.tracked + 1;
        debug_assert_count_increment!(self.tracked, published);
        self.cursor = cursor;
        self.tracked = published;
        self.buf.publish_count(published);
        Ok(drained)
    }

    /// Resets local bookkeeping to the empty state after an explicit drain.
    /// The consumer zeroes the header itself as part of draining.
    pub fn clear(&mut self) {
        self.cursor = HEADER_BYTES;
        self.tracked = 0;
    }
}

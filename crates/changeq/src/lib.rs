//! changeq - Cross-Boundary Span Change Queue
//!
//! A binary change-queue protocol for recording trace-span mutations into a
//! fixed-capacity shared buffer that a separate native consumer drains. One
//! writer appends typed records; the consumer decodes, applies, and zeroes
//! the count header to hand the region back. No lock is involved - the
//! 8-byte count header at the front of each region is the sole coordination
//! primitive.
//!
//! # Key Features
//!
//! - Fixed wire layout: u64 op code + u64 span id + little-endian payload
//! - String interning (4-byte ids) keeps repeated keys allocation-free
//! - Overflow is an error with no partial write, never a reallocation
//! - Consumer drains are detected lazily from the zeroed header
//!
//! # Example
//!
//! ```
//! use changeq::{ChangeWriter, Cursor, OpCode, SharedBuf, StringInterner, Value, HEADER_BYTES};
//! use std::sync::Arc;
//!
//! let queue = Arc::new(SharedBuf::new(1024));
//! let table = Arc::new(SharedBuf::new(1024));
//! let mut writer = ChangeWriter::new(Arc::clone(&queue));
//! let mut interner = StringInterner::new(table);
//!
//! writer
//!     .append(&mut interner, OpCode::SetName, 7, &[Value::Str("web.request")])
//!     .unwrap();
//! assert_eq!(queue.count(), 1);
//!
//! // Consumer side: decode the record, then zero the header (release signal).
//! let mut cursor = Cursor::new(queue.read_bytes(HEADER_BYTES, 20));
//! assert_eq!(cursor.take_op().unwrap(), OpCode::SetName);
//! assert_eq!(cursor.take::<u64>().unwrap(), 7);
//! assert_eq!(cursor.take::<u32>().unwrap(), 0); // interned id of "web.request"
//! queue.reset();
//! ```

mod buffer;
mod decoder;
mod encoder;
mod interner;
mod invariants;
mod opcode;
mod value;

pub use buffer::{SharedBuf, HEADER_BYTES};
pub use decoder::{Cursor, DecodeError, FromWire};
pub use encoder::{ChangeWriter, EncodeError, RECORD_HEADER_BYTES};
pub use interner::{InternError, StringInterner, STRING_ID_BYTES};
pub use opcode::OpCode;
pub use value::Value;

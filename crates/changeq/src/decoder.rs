use crate::opcode::OpCode;
use thiserror::Error;

/// Error types for record decoding. Decoding happens on the consumer side of
/// the boundary; every failure is reported before the malformed bytes are
/// interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Fewer bytes remain than the next field needs.
    #[error("record truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    /// Op code outside the known set.
    #[error("unknown op code {0}")]
    UnknownOp(u64),
    /// A string-table entry with no terminating NUL before the region end.
    #[error("unterminated string at offset {at}")]
    UnterminatedString { at: usize },
    /// A string-table entry that is not valid UTF-8.
    #[error("invalid UTF-8 in string at offset {at}")]
    InvalidUtf8 { at: usize },
}

/// Fixed-width little-endian wire decoding.
pub trait FromWire: Sized {
    /// Encoded width in bytes.
    const WIRE_BYTES: usize;

    /// Decodes from the first `WIRE_BYTES` bytes of `bytes`.
    fn from_wire(bytes: &[u8]) -> Self;
}

macro_rules! impl_from_wire {
    ($($ty:ty => $len:expr),* $(,)?) => {$(
        impl FromWire for $ty {
            const WIRE_BYTES: usize = $len;

            // Always copies into an aligned temporary: record offsets in the
            // shared region are not aligned.
            fn from_wire(bytes: &[u8]) -> Self {
                let mut raw = [0u8; $len];
                raw.copy_from_slice(&bytes[..$len]);
                <$ty>::from_le_bytes(raw)
            }
        }
    )*};
}

impl_from_wire!(
    u128 => 16,
    u64 => 8,
    i64 => 8,
    f64 => 8,
    u32 => 4,
    i32 => 4,
);

/// Bounds-checked reader over a drained record region.
pub struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Offset of the next read.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Reads one fixed-width field.
    pub fn take<T: FromWire>(&mut self) -> Result<T, DecodeError> {
        if self.remaining() < T::WIRE_BYTES {
            return Err(DecodeError::Truncated {
                needed: T::WIRE_BYTES,
                remaining: self.remaining(),
            });
        }
        let value = T::from_wire(&self.bytes[self.pos..]);
        self.pos += T::WIRE_BYTES;
        Ok(value)
    }

    /// Reads one record op code.
    pub fn take_op(&mut self) -> Result<OpCode, DecodeError> {
        OpCode::from_code(self.take::<u64>()?)
    }

    /// Reads a NUL-terminated UTF-8 string (string-table entry payload),
    /// consuming the terminator.
    pub fn take_str(&mut self) -> Result<&'a str, DecodeError> {
        let rest = &self.bytes[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(DecodeError::UnterminatedString { at: self.pos })?;
        let value = std::str::from_utf8(&rest[..nul])
            .map_err(|_| DecodeError::InvalidUtf8 { at: self.pos })?;
        self.pos += nul + 1;
        Ok(value)
    }
}

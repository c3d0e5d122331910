/// A change-record argument, tagged with its wire kind at the call site.
///
/// The kind is explicit rather than inferred from the runtime value, so the
/// writer never inspects types to pick an encoding: instrumentation decides
/// whether a number travels as `U64`, `I64`, `I32` or `F64`, and strings
/// always travel as a 4-byte interned id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
    /// Encoded as a 4-byte interned string id.
    Str(&'a str),
    /// 8 bytes, little-endian.
    U64(u64),
    /// 8 bytes, little-endian.
    I64(i64),
    /// 4 bytes, little-endian.
    I32(i32),
    /// 8 bytes, IEEE 754, little-endian.
    F64(f64),
    /// 16 bytes, low u64 half first. Used for the 128-bit trace id.
    U128(u128),
}

impl Value<'_> {
    /// Wire width of a string reference (the interned id).
    pub const STRING_REF_BYTES: usize = 4;

    /// Encoded payload width in bytes.
    #[inline]
    pub const fn wire_len(&self) -> usize {
        match self {
            Value::Str(_) => Self::STRING_REF_BYTES,
            Value::U64(_) | Value::I64(_) | Value::F64(_) => 8,
            Value::I32(_) => 4,
            Value::U128(_) => 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_len_per_kind() {
        assert_eq!(Value::Str("anything").wire_len(), 4);
        assert_eq!(Value::U64(1).wire_len(), 8);
        assert_eq!(Value::I64(-1).wire_len(), 8);
        assert_eq!(Value::I32(-1).wire_len(), 4);
        assert_eq!(Value::F64(1.5).wire_len(), 8);
        assert_eq!(Value::U128(1).wire_len(), 16);
    }

    #[test]
    fn test_u128_low_half_first() {
        // The wire order for u128 is the two u64 halves, low half first,
        // which is exactly the little-endian byte order of the whole value.
        let value: u128 = (7u128 << 64) | 11;
        let bytes = value.to_le_bytes();
        assert_eq!(u64::from_le_bytes(bytes[..8].try_into().unwrap()), 11);
        assert_eq!(u64::from_le_bytes(bytes[8..].try_into().unwrap()), 7);
    }
}

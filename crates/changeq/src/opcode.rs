use crate::decoder::DecodeError;

/// Mutation kind of a change record. The discriminant is the u64 wire code.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Payload: u128 trace id + u64 parent id.
    Create = 0,
    /// Payload: string key + string value.
    SetMetaAttr = 1,
    /// Payload: string key + f64 value.
    SetMetricAttr = 2,
    /// Payload: string.
    SetServiceName = 3,
    /// Payload: string.
    SetResourceName = 4,
    /// Payload: i32.
    SetError = 5,
    /// Payload: i64 nanoseconds.
    SetStart = 6,
    /// Payload: i64 nanoseconds.
    SetDuration = 7,
    /// Payload: string.
    SetType = 8,
    /// Payload: string.
    SetName = 9,
    /// Payload: string key + string value, applied at trace scope.
    SetTraceMetaAttr = 10,
    /// Payload: string key + f64 value, applied at trace scope.
    SetTraceMetricAttr = 11,
    /// Payload: string, applied at trace scope.
    SetTraceOrigin = 12,
}

impl OpCode {
    /// The u64 wire code written into the record header.
    #[inline]
    pub const fn code(self) -> u64 {
        self as u64
    }

    /// Decodes a wire code, rejecting anything outside the known set before
    /// any payload byte is interpreted.
    pub fn from_code(code: u64) -> Result<Self, DecodeError> {
        match code {
            0 => Ok(OpCode::Create),
            1 => Ok(OpCode::SetMetaAttr),
            2 => Ok(OpCode::SetMetricAttr),
            3 => Ok(OpCode::SetServiceName),
            4 => Ok(OpCode::SetResourceName),
            5 => Ok(OpCode::SetError),
            6 => Ok(OpCode::SetStart),
            7 => Ok(OpCode::SetDuration),
            8 => Ok(OpCode::SetType),
            9 => Ok(OpCode::SetName),
            10 => Ok(OpCode::SetTraceMetaAttr),
            11 => Ok(OpCode::SetTraceMetricAttr),
            12 => Ok(OpCode::SetTraceOrigin),
            other => Err(DecodeError::UnknownOp(other)),
        }
    }
}

use crate::pipeline::PipelineInner;
use changeq::{EncodeError, OpCode, Value};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Open-ended attribute value, kind-tagged at the call site.
///
/// The tag - not the runtime type of anything - selects the op code: `Str`
/// records a meta attribute, `Metric` a metric attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue<'a> {
    Str(Cow<'a, str>),
    Metric(f64),
}

impl<'a> From<&'a str> for TagValue<'a> {
    fn from(value: &'a str) -> Self {
        TagValue::Str(Cow::Borrowed(value))
    }
}

impl From<f64> for TagValue<'static> {
    fn from(value: f64) -> Self {
        TagValue::Metric(value)
    }
}

/// High-entropy nonzero 64-bit span id. Collision avoidance over the life of
/// a trace rests entirely on this entropy.
pub fn random_span_id() -> u64 {
    loop {
        let id: u64 = rand::random();
        if id != 0 {
            return id;
        }
    }
}

/// High-entropy nonzero 128-bit trace id.
pub fn random_trace_id() -> u128 {
    loop {
        let id: u128 = rand::random();
        if id != 0 {
            return id;
        }
    }
}

/// Nanoseconds since the Unix epoch.
pub(crate) fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Per-span façade over the pipeline.
///
/// The handle is stateless beyond its identifiers (and the start instant
/// `finish` subtracts from): every setter enqueues a change record, and
/// every getter round-trips into the engine. Getters therefore reflect only
/// flushed state - a set followed by a get returns the *pre-flush* value
/// until the queue is drained. That asymmetry is part of the protocol.
#[derive(Clone)]
pub struct SpanHandle {
    inner: Arc<PipelineInner>,
    span_id: u64,
    trace_id: u128,
    parent_id: u64,
    start: i64,
}

impl SpanHandle {
    /// Enqueues Create and SetStart for a fresh span. Called by the
    /// pipeline's `create_span`.
    pub(crate) fn create(
        inner: Arc<PipelineInner>,
        trace_id: u128,
        parent_id: u64,
    ) -> Result<Self, EncodeError> {
        let span_id = random_span_id();
        let start = now_nanos();
        inner.coordinator.enqueue(
            OpCode::Create,
            span_id,
            &[Value::U128(trace_id), Value::U64(parent_id)],
        )?;
        inner
            .coordinator
            .enqueue(OpCode::SetStart, span_id, &[Value::I64(start)])?;
        Ok(Self {
            inner,
            span_id,
            trace_id,
            parent_id,
            start,
        })
    }

    pub fn span_id(&self) -> u64 {
        self.span_id
    }

    pub fn trace_id(&self) -> u128 {
        self.trace_id
    }

    /// 0 for root spans.
    pub fn parent_id(&self) -> u64 {
        self.parent_id
    }

    /// Creates a child span in this span's trace.
    pub fn child(&self) -> Result<SpanHandle, EncodeError> {
        SpanHandle::create(Arc::clone(&self.inner), self.trace_id, self.span_id)
    }

    // ---------------------------------------------------------------------
    // SETTERS - each enqueues one change record
    // ---------------------------------------------------------------------

    pub fn set_name(&self, value: &str) -> Result<(), EncodeError> {
        self.enqueue(OpCode::SetName, &[Value::Str(value)])
    }

    pub fn set_service(&self, value: &str) -> Result<(), EncodeError> {
        self.enqueue(OpCode::SetServiceName, &[Value::Str(value)])
    }

    pub fn set_resource(&self, value: &str) -> Result<(), EncodeError> {
        self.enqueue(OpCode::SetResourceName, &[Value::Str(value)])
    }

    pub fn set_span_type(&self, value: &str) -> Result<(), EncodeError> {
        self.enqueue(OpCode::SetType, &[Value::Str(value)])
    }

    pub fn set_error(&self, value: i32) -> Result<(), EncodeError> {
        self.enqueue(OpCode::SetError, &[Value::I32(value)])
    }

    /// Nanoseconds since the epoch.
    pub fn set_start(&self, nanos: i64) -> Result<(), EncodeError> {
        self.enqueue(OpCode::SetStart, &[Value::I64(nanos)])
    }

    /// Nanoseconds.
    pub fn set_duration(&self, nanos: i64) -> Result<(), EncodeError> {
        self.enqueue(OpCode::SetDuration, &[Value::I64(nanos)])
    }

    /// Records a span-scope attribute; the `TagValue` kind picks the op.
    pub fn set_tag(&self, key: &str, value: TagValue<'_>) -> Result<(), EncodeError> {
        match value {
            TagValue::Str(s) => {
                self.enqueue(OpCode::SetMetaAttr, &[Value::Str(key), Value::Str(s.as_ref())])
            }
            TagValue::Metric(m) => {
                self.enqueue(OpCode::SetMetricAttr, &[Value::Str(key), Value::F64(m)])
            }
        }
    }

    /// Records a trace-scope attribute shared by every span of this trace.
    pub fn set_trace_tag(&self, key: &str, value: TagValue<'_>) -> Result<(), EncodeError> {
        match value {
            TagValue::Str(s) => {
                self.enqueue(OpCode::SetTraceMetaAttr, &[Value::Str(key), Value::Str(s.as_ref())])
            }
            TagValue::Metric(m) => {
                self.enqueue(OpCode::SetTraceMetricAttr, &[Value::Str(key), Value::F64(m)])
            }
        }
    }

    pub fn set_trace_origin(&self, value: &str) -> Result<(), EncodeError> {
        self.enqueue(OpCode::SetTraceOrigin, &[Value::Str(value)])
    }

    /// Enqueues SetDuration with now − start. Does not flush.
    pub fn finish(&self) -> Result<(), EncodeError> {
        self.set_duration(now_nanos() - self.start)
    }

    // ---------------------------------------------------------------------
    // GETTERS - synchronous round trips into the engine
    // ---------------------------------------------------------------------
    //
    // All of these reflect drained state only; a write queued after the last
    // flush is not visible yet. None for a span the engine has not
    // materialized (or has already exported).

    pub fn name(&self) -> Option<String> {
        self.inner.engine.name(self.span_id)
    }

    pub fn service(&self) -> Option<String> {
        self.inner.engine.service(self.span_id)
    }

    pub fn resource(&self) -> Option<String> {
        self.inner.engine.resource(self.span_id)
    }

    pub fn span_type(&self) -> Option<String> {
        self.inner.engine.span_type(self.span_id)
    }

    pub fn error(&self) -> Option<i32> {
        self.inner.engine.error(self.span_id)
    }

    pub fn start(&self) -> Option<i64> {
        self.inner.engine.start(self.span_id)
    }

    pub fn duration(&self) -> Option<i64> {
        self.inner.engine.duration(self.span_id)
    }

    /// Span-scope attribute. Meta (string) values shadow metric values when
    /// both were recorded under one key.
    pub fn tag(&self, key: &str) -> Option<TagValue<'static>> {
        if let Some(value) = self.inner.engine.meta(self.span_id, key) {
            return Some(TagValue::Str(Cow::Owned(value)));
        }
        self.inner
            .engine
            .metric(self.span_id, key)
            .map(TagValue::Metric)
    }

    /// Trace-scope attribute, same shadowing rule as [`tag`](Self::tag).
    pub fn trace_tag(&self, key: &str) -> Option<TagValue<'static>> {
        if let Some(value) = self.inner.engine.trace_meta(self.span_id, key) {
            return Some(TagValue::Str(Cow::Owned(value)));
        }
        self.inner
            .engine
            .trace_metric(self.span_id, key)
            .map(TagValue::Metric)
    }

    pub fn trace_origin(&self) -> Option<String> {
        self.inner.engine.trace_origin(self.span_id)
    }

    fn enqueue(&self, op: OpCode, args: &[Value<'_>]) -> Result<(), EncodeError> {
        self.inner.coordinator.enqueue(op, self.span_id, args)
    }
}

impl std::fmt::Debug for SpanHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanHandle")
            .field("span_id", &self.span_id)
            .field("trace_id", &self.trace_id)
            .field("parent_id", &self.parent_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_ids_are_nonzero_and_distinct() {
        let a = random_span_id();
        let b = random_span_id();
        assert_ne!(a, 0);
        assert_ne!(b, 0);
        assert_ne!(a, b);

        let t1 = random_trace_id();
        let t2 = random_trace_id();
        assert_ne!(t1, 0);
        assert_ne!(t1, t2);
    }

    #[test]
    fn test_now_nanos_is_monotonic_enough() {
        let a = now_nanos();
        let b = now_nanos();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[test]
    fn test_tag_value_from_impls() {
        assert_eq!(TagValue::from("x"), TagValue::Str(Cow::Borrowed("x")));
        assert_eq!(TagValue::from(2.5), TagValue::Metric(2.5));
    }
}

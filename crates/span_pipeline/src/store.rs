use crate::engine::EngineError;
use changeq::{Cursor, OpCode};
use serde::Serialize;
use std::collections::HashMap;

/// Materialized state of one span. This is the authoritative copy: the
/// client-side handle holds nothing beyond identifiers.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SpanData {
    pub span_id: u64,
    pub trace_id: u128,
    /// 0 means root.
    pub parent_id: u64,
    pub name: String,
    pub service: String,
    pub resource: String,
    pub span_type: String,
    pub error: i32,
    /// Nanoseconds since the epoch.
    pub start: i64,
    /// Nanoseconds.
    pub duration: i64,
    pub meta: HashMap<String, String>,
    pub metrics: HashMap<String, f64>,
}

/// Trace-scoped state shared by every span of one trace.
#[derive(Debug, Default, Clone, Serialize)]
pub struct TraceState {
    pub meta: HashMap<String, String>,
    pub metrics: HashMap<String, f64>,
    pub origin: String,
}

/// A batch of spans handed to an exporter.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SpanBatch {
    pub spans: Vec<SpanData>,
}

impl SpanBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            spans: Vec::with_capacity(capacity),
        }
    }

    pub fn add(&mut self, span: SpanData) {
        self.spans.push(span);
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

/// Engine-side store: spans, per-trace state, and the learned string table.
///
/// Records decode against the string table, so table-insert records must be
/// applied before any change record that references their ids.
#[derive(Debug, Default)]
pub struct SpanStore {
    spans: HashMap<u64, SpanData>,
    traces: HashMap<u128, TraceState>,
    strings: HashMap<u32, String>,
}

impl SpanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Learns one (id, string) pair from the string-table input.
    pub fn insert_string(&mut self, id: u32, value: String) {
        self.strings.insert(id, value);
    }

    /// Frees the string slot. Ids are never reused by the client, and state
    /// already materialized from the id (span fields, tag values) stays
    /// intact - eviction reclaims table memory only.
    pub fn evict_string(&mut self, id: u32) {
        self.strings.remove(&id);
    }

    pub fn string_count(&self) -> usize {
        self.strings.len()
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    pub fn span(&self, span_id: u64) -> Option<&SpanData> {
        self.spans.get(&span_id)
    }

    /// Trace-scoped state of the trace `span_id` belongs to.
    pub fn trace_of(&self, span_id: u64) -> Option<&TraceState> {
        let trace_id = self.spans.get(&span_id)?.trace_id;
        self.traces.get(&trace_id)
    }

    pub fn remove_span(&mut self, span_id: u64) -> Option<SpanData> {
        self.spans.remove(&span_id)
    }

    /// Decodes and applies one change record at the cursor.
    pub fn apply(&mut self, cursor: &mut Cursor<'_>) -> Result<(), EngineError> {
        let op = cursor.take_op()?;
        let span_id = cursor.take::<u64>()?;
        match op {
            OpCode::Create => {
                let trace_id = cursor.take::<u128>()?;
                let parent_id = cursor.take::<u64>()?;
                self.spans.insert(
                    span_id,
                    SpanData {
                        span_id,
                        trace_id,
                        parent_id,
                        ..Default::default()
                    },
                );
            }
            OpCode::SetMetaAttr => {
                let key = self.string_arg(cursor)?;
                let value = self.string_arg(cursor)?;
                self.span_mut(span_id)?.meta.insert(key, value);
            }
            OpCode::SetMetricAttr => {
                let key = self.string_arg(cursor)?;
                let value = cursor.take::<f64>()?;
                self.span_mut(span_id)?.metrics.insert(key, value);
            }
            OpCode::SetServiceName => {
                let value = self.string_arg(cursor)?;
                self.span_mut(span_id)?.service = value;
            }
            OpCode::SetResourceName => {
                let value = self.string_arg(cursor)?;
                self.span_mut(span_id)?.resource = value;
            }
            OpCode::SetError => {
                let value = cursor.take::<i32>()?;
                self.span_mut(span_id)?.error = value;
            }
            OpCode::SetStart => {
                let value = cursor.take::<i64>()?;
                self.span_mut(span_id)?.start = value;
            }
            OpCode::SetDuration => {
                let value = cursor.take::<i64>()?;
                self.span_mut(span_id)?.duration = value;
            }
            OpCode::SetType => {
                let value = self.string_arg(cursor)?;
                self.span_mut(span_id)?.span_type = value;
            }
            OpCode::SetName => {
                let value = self.string_arg(cursor)?;
                self.span_mut(span_id)?.name = value;
            }
            OpCode::SetTraceMetaAttr => {
                let key = self.string_arg(cursor)?;
                let value = self.string_arg(cursor)?;
                self.trace_mut(span_id)?.meta.insert(key, value);
            }
            OpCode::SetTraceMetricAttr => {
                let key = self.string_arg(cursor)?;
                let value = cursor.take::<f64>()?;
                self.trace_mut(span_id)?.metrics.insert(key, value);
            }
            OpCode::SetTraceOrigin => {
                let value = self.string_arg(cursor)?;
                self.trace_mut(span_id)?.origin = value;
            }
        }
        Ok(())
    }

    fn string_arg(&self, cursor: &mut Cursor<'_>) -> Result<String, EngineError> {
        let id = cursor.take::<u32>()?;
        self.strings
            .get(&id)
            .cloned()
            .ok_or(EngineError::UnknownStringId { id })
    }

    fn span_mut(&mut self, span_id: u64) -> Result<&mut SpanData, EngineError> {
        self.spans
            .get_mut(&span_id)
            .ok_or(EngineError::UnknownSpan { span_id })
    }

    fn trace_mut(&mut self, span_id: u64) -> Result<&mut TraceState, EngineError> {
        let trace_id = self
            .spans
            .get(&span_id)
            .ok_or(EngineError::UnknownSpan { span_id })?
            .trace_id;
        Ok(self.traces.entry(trace_id).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use changeq::{ChangeWriter, SharedBuf, StringInterner, Value, HEADER_BYTES};
    use std::sync::Arc;

    /// Encodes records through the real writer and replays them into the
    /// store, the way the engine does.
    fn replay(store: &mut SpanStore, writer: &ChangeWriter, interner: &StringInterner) {
        // Strings land first so change records can resolve fresh ids.
        let table = interner.buffer();
        let inserts = table.count();
        let mut cursor = Cursor::new(table.read_bytes(HEADER_BYTES, table.capacity() - HEADER_BYTES));
        for _ in 0..inserts {
            let id = cursor.take::<u32>().unwrap();
            let value = cursor.take_str().unwrap().to_owned();
            store.insert_string(id, value);
        }

        let queue = writer.buffer();
        let records = queue.count();
        let mut cursor = Cursor::new(queue.read_bytes(HEADER_BYTES, queue.capacity() - HEADER_BYTES));
        for _ in 0..records {
            store.apply(&mut cursor).unwrap();
        }
    }

    fn setup() -> (ChangeWriter, StringInterner) {
        (
            ChangeWriter::new(Arc::new(SharedBuf::new(4096))),
            StringInterner::new(Arc::new(SharedBuf::new(4096))),
        )
    }

    #[test]
    fn test_apply_materializes_span_fields() {
        let (mut writer, mut interner) = setup();
        let span_id = 42;

        writer
            .append(&mut interner, OpCode::Create, span_id, &[Value::U128(7), Value::U64(0)])
            .unwrap();
        writer
            .append(&mut interner, OpCode::SetName, span_id, &[Value::Str("web.request")])
            .unwrap();
        writer
            .append(&mut interner, OpCode::SetError, span_id, &[Value::I32(1)])
            .unwrap();
        writer
            .append(&mut interner, OpCode::SetStart, span_id, &[Value::I64(1_000)])
            .unwrap();
        writer
            .append(
                &mut interner,
                OpCode::SetMetaAttr,
                span_id,
                &[Value::Str("http.method"), Value::Str("GET")],
            )
            .unwrap();
        writer
            .append(
                &mut interner,
                OpCode::SetMetricAttr,
                span_id,
                &[Value::Str("http.status"), Value::F64(200.0)],
            )
            .unwrap();

        let mut store = SpanStore::new();
        replay(&mut store, &writer, &interner);

        let span = store.span(span_id).unwrap();
        assert_eq!(span.trace_id, 7);
        assert_eq!(span.parent_id, 0);
        assert_eq!(span.name, "web.request");
        assert_eq!(span.error, 1);
        assert_eq!(span.start, 1_000);
        assert_eq!(span.meta.get("http.method").map(String::as_str), Some("GET"));
        assert_eq!(span.metrics.get("http.status"), Some(&200.0));
    }

    #[test]
    fn test_last_write_wins() {
        let (mut writer, mut interner) = setup();
        writer
            .append(&mut interner, OpCode::Create, 1, &[Value::U128(9), Value::U64(0)])
            .unwrap();
        writer
            .append(&mut interner, OpCode::SetName, 1, &[Value::Str("first")])
            .unwrap();
        writer
            .append(&mut interner, OpCode::SetName, 1, &[Value::Str("second")])
            .unwrap();

        let mut store = SpanStore::new();
        replay(&mut store, &writer, &interner);

        assert_eq!(store.span(1).unwrap().name, "second");
    }

    #[test]
    fn test_trace_scope_lands_on_the_trace() {
        let (mut writer, mut interner) = setup();
        let trace_id = 0xfeed;
        writer
            .append(&mut interner, OpCode::Create, 1, &[Value::U128(trace_id), Value::U64(0)])
            .unwrap();
        writer
            .append(&mut interner, OpCode::Create, 2, &[Value::U128(trace_id), Value::U64(1)])
            .unwrap();
        writer
            .append(
                &mut interner,
                OpCode::SetTraceMetaAttr,
                1,
                &[Value::Str("env"), Value::Str("prod")],
            )
            .unwrap();
        writer
            .append(
                &mut interner,
                OpCode::SetTraceMetricAttr,
                2,
                &[Value::Str("sample.rate"), Value::F64(0.5)],
            )
            .unwrap();
        writer
            .append(&mut interner, OpCode::SetTraceOrigin, 2, &[Value::Str("synthetics")])
            .unwrap();

        let mut store = SpanStore::new();
        replay(&mut store, &writer, &interner);

        // Both spans see the same trace state regardless of which span
        // carried the record.
        for span_id in [1, 2] {
            let trace = store.trace_of(span_id).unwrap();
            assert_eq!(trace.meta.get("env").map(String::as_str), Some("prod"));
            assert_eq!(trace.metrics.get("sample.rate"), Some(&0.5));
            assert_eq!(trace.origin, "synthetics");
        }
    }

    #[test]
    fn test_unknown_string_id_rejected() {
        let mut store = SpanStore::new();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&OpCode::SetName.code().to_le_bytes());
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(&77u32.to_le_bytes());

        let mut cursor = Cursor::new(&bytes);
        assert!(matches!(
            store.apply(&mut cursor),
            Err(EngineError::UnknownStringId { id: 77 })
        ));
    }

    #[test]
    fn test_mutating_unknown_span_rejected() {
        let mut store = SpanStore::new();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&OpCode::SetError.code().to_le_bytes());
        bytes.extend_from_slice(&5u64.to_le_bytes());
        bytes.extend_from_slice(&1i32.to_le_bytes());

        let mut cursor = Cursor::new(&bytes);
        assert!(matches!(
            store.apply(&mut cursor),
            Err(EngineError::UnknownSpan { span_id: 5 })
        ));
    }

    #[test]
    fn test_eviction_keeps_materialized_state() {
        let (mut writer, mut interner) = setup();
        writer
            .append(&mut interner, OpCode::Create, 1, &[Value::U128(3), Value::U64(0)])
            .unwrap();
        writer
            .append(
                &mut interner,
                OpCode::SetMetaAttr,
                1,
                &[Value::Str("key1"), Value::Str("val1")],
            )
            .unwrap();
        let key_id = interner.intern("key1").unwrap();

        let mut store = SpanStore::new();
        replay(&mut store, &writer, &interner);

        store.evict_string(key_id);

        // The tag value was materialized at apply time; eviction only frees
        // the table slot.
        assert_eq!(store.span(1).unwrap().meta.get("key1").map(String::as_str), Some("val1"));
        assert_eq!(store.string_count(), 1); // "val1" remains
    }
}

use crate::config::PipelineConfig;
use crate::exporter::{ExportError, SpanExporterBoxed};
use crate::metrics::EngineMetrics;
use crate::store::{SpanBatch, SpanStore};
use async_trait::async_trait;
use changeq::{Cursor, DecodeError, SharedBuf, HEADER_BYTES};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Error types for engine-side drains and reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A shared-buffer record could not be decoded.
    #[error("malformed record: {0}")]
    Decode(#[from] DecodeError),
    /// A record referenced a string id the engine never learned (or has
    /// already evicted).
    #[error("string id {id} is not in the native string table")]
    UnknownStringId { id: u32 },
    /// A mutation targeted a span the engine never materialized.
    #[error("span {span_id:#018x} is not materialized in the native store")]
    UnknownSpan { span_id: u64 },
}

/// The native-engine boundary.
///
/// The engine consumes the two shared buffers in their exact byte layout and
/// answers discrete drain/read/export calls. Getters reflect drained state
/// only - that is the protocol's read/write asymmetry, not a defect of any
/// particular implementation.
#[async_trait]
pub trait NativeEngine: Send + Sync {
    /// Applies all pending string-table input records, then zeroes that
    /// buffer's header (the release signal). Returns the records applied.
    fn drain_string_table(&self) -> Result<u64, EngineError>;

    /// Applies all pending change records (string inserts land first), then
    /// zeroes the change-queue header. Returns the records applied.
    fn drain_change_queue(&self) -> Result<u64, EngineError>;

    /// Frees one string-table slot. Never invalidates client-side ids or
    /// state already materialized from the id.
    fn evict_string(&self, id: u32);

    fn name(&self, span_id: u64) -> Option<String>;
    fn service(&self, span_id: u64) -> Option<String>;
    fn resource(&self, span_id: u64) -> Option<String>;
    fn span_type(&self, span_id: u64) -> Option<String>;
    fn error(&self, span_id: u64) -> Option<i32>;
    fn start(&self, span_id: u64) -> Option<i64>;
    fn duration(&self, span_id: u64) -> Option<i64>;
    fn meta(&self, span_id: u64, key: &str) -> Option<String>;
    fn metric(&self, span_id: u64, key: &str) -> Option<f64>;
    fn trace_meta(&self, span_id: u64, key: &str) -> Option<String>;
    fn trace_metric(&self, span_id: u64, key: &str) -> Option<f64>;
    fn trace_origin(&self, span_id: u64) -> Option<String>;

    /// Removes the `count` spans named in `chunk` (u64 ids, little-endian,
    /// submission order) from the store and hands them to the exporter.
    /// The one suspending operation at this boundary.
    async fn export_chunk(&self, count: u32, chunk: &[u8]) -> Result<(), ExportError>;
}

/// In-process reference engine.
///
/// Owns the consumer end of the shared buffers, materializes span state, and
/// exports finished spans through a pluggable exporter. Drains run on the
/// caller's thread; the cooperative discipline (drains never overlap an
/// in-flight append) is the same one the shared-buffer protocol assumes.
pub struct InProcessEngine {
    change_queue: Arc<SharedBuf>,
    string_table: Arc<SharedBuf>,
    store: Mutex<SpanStore>,
    exporter: Arc<dyn SpanExporterBoxed>,
    config: PipelineConfig,
    metrics: EngineMetrics,
}

impl InProcessEngine {
    pub fn new(
        config: PipelineConfig,
        change_queue: Arc<SharedBuf>,
        string_table: Arc<SharedBuf>,
        exporter: Arc<dyn SpanExporterBoxed>,
    ) -> Self {
        Self {
            change_queue,
            string_table,
            store: Mutex::new(SpanStore::new()),
            exporter,
            config,
            metrics: EngineMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Spans currently materialized (drained but not yet exported).
    pub fn span_count(&self) -> usize {
        self.store.lock().unwrap().span_count()
    }

    fn drain_strings_locked(&self, store: &mut SpanStore) -> Result<u64, EngineError> {
        let pending = self.string_table.count();
        if pending == 0 {
            return Ok(0);
        }

        let body = self
            .string_table
            .read_bytes(HEADER_BYTES, self.string_table.capacity() - HEADER_BYTES);
        let mut cursor = Cursor::new(body);
        for _ in 0..pending {
            let id = cursor.take::<u32>()?;
            let value = cursor.take_str()?.to_owned();
            store.insert_string(id, value);
        }

        self.string_table.reset();
        self.metrics.add_strings(pending);
        Ok(pending)
    }
}

#[async_trait]
impl NativeEngine for InProcessEngine {
    fn drain_string_table(&self) -> Result<u64, EngineError> {
        let mut store = self.store.lock().unwrap();
        self.drain_strings_locked(&mut store)
    }

    fn drain_change_queue(&self) -> Result<u64, EngineError> {
        let mut store = self.store.lock().unwrap();

        // String inserts land first so change records can resolve ids
        // interned in the same filling cycle.
        self.drain_strings_locked(&mut store)?;

        let pending = self.change_queue.count();
        if pending == 0 {
            return Ok(0);
        }

        let body = self
            .change_queue
            .read_bytes(HEADER_BYTES, self.change_queue.capacity() - HEADER_BYTES);
        let mut cursor = Cursor::new(body);
        for _ in 0..pending {
            // A decode failure aborts the drain with the header left nonzero:
            // nothing claims consumption of records that were not applied.
            store.apply(&mut cursor)?;
        }

        self.change_queue.reset();
        self.metrics.add_records(pending);
        Ok(pending)
    }

    fn evict_string(&self, id: u32) {
        self.store.lock().unwrap().evict_string(id);
    }

    fn name(&self, span_id: u64) -> Option<String> {
        self.store.lock().unwrap().span(span_id).map(|s| s.name.clone())
    }

    fn service(&self, span_id: u64) -> Option<String> {
        self.store.lock().unwrap().span(span_id).map(|s| s.service.clone())
    }

    fn resource(&self, span_id: u64) -> Option<String> {
        self.store.lock().unwrap().span(span_id).map(|s| s.resource.clone())
    }

    fn span_type(&self, span_id: u64) -> Option<String> {
        self.store.lock().unwrap().span(span_id).map(|s| s.span_type.clone())
    }

    fn error(&self, span_id: u64) -> Option<i32> {
        self.store.lock().unwrap().span(span_id).map(|s| s.error)
    }

    fn start(&self, span_id: u64) -> Option<i64> {
        self.store.lock().unwrap().span(span_id).map(|s| s.start)
    }

    fn duration(&self, span_id: u64) -> Option<i64> {
        self.store.lock().unwrap().span(span_id).map(|s| s.duration)
    }

    fn meta(&self, span_id: u64, key: &str) -> Option<String> {
        let store = self.store.lock().unwrap();
        store.span(span_id)?.meta.get(key).cloned()
    }

    fn metric(&self, span_id: u64, key: &str) -> Option<f64> {
        let store = self.store.lock().unwrap();
        store.span(span_id)?.metrics.get(key).copied()
    }

    fn trace_meta(&self, span_id: u64, key: &str) -> Option<String> {
        let store = self.store.lock().unwrap();
        store.trace_of(span_id)?.meta.get(key).cloned()
    }

    fn trace_metric(&self, span_id: u64, key: &str) -> Option<f64> {
        let store = self.store.lock().unwrap();
        store.trace_of(span_id)?.metrics.get(key).copied()
    }

    fn trace_origin(&self, span_id: u64) -> Option<String> {
        let store = self.store.lock().unwrap();
        let origin = &store.trace_of(span_id)?.origin;
        if origin.is_empty() {
            None
        } else {
            Some(origin.clone())
        }
    }

    async fn export_chunk(&self, count: u32, chunk: &[u8]) -> Result<(), ExportError> {
        let needed = count as usize * 8;
        if chunk.len() < needed {
            return Err(ExportError::MalformedChunk {
                count,
                needed,
                len: chunk.len(),
            });
        }

        let batch = {
            let mut store = self.store.lock().unwrap();

            // Validate the whole chunk before removing anything so a bad id
            // does not strand half the chunk outside the store.
            let mut ids = Vec::with_capacity(count as usize);
            let mut cursor = Cursor::new(&chunk[..needed]);
            for _ in 0..count {
                let span_id = cursor
                    .take::<u64>()
                    .map_err(|e| ExportError::Serialization(e.to_string()))?;
                if store.span(span_id).is_none() {
                    return Err(ExportError::UnknownSpan { span_id });
                }
                ids.push(span_id);
            }

            let mut batch = SpanBatch::with_capacity(ids.len());
            for span_id in ids {
                let mut span = store.remove_span(span_id).expect("validated above");
                if span.service.is_empty() {
                    span.service = self.config.default_service.clone();
                }
                batch.add(span);
            }
            batch
        };

        let exported = batch.len() as u64;
        self.exporter.export_boxed(batch).await?;
        self.metrics.add_spans_exported(exported);
        Ok(())
    }
}

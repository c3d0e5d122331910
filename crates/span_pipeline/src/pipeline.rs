use crate::config::PipelineConfig;
use crate::engine::{InProcessEngine, NativeEngine};
use crate::exporter::SpanExporterBoxed;
use crate::flush::{FlushCoordinator, FlushError, QueueState};
use crate::metrics::FlushMetrics;
use crate::span::{random_trace_id, SpanHandle};
use changeq::{ChangeWriter, EncodeError, SharedBuf, StringInterner};
use std::sync::Arc;

/// Everything one pipeline instance owns. Kept behind an `Arc` so span
/// handles can reach the coordinator and the engine without borrowing the
/// pipeline itself.
pub(crate) struct PipelineInner {
    pub(crate) config: PipelineConfig,
    pub(crate) coordinator: FlushCoordinator,
    pub(crate) engine: Arc<dyn NativeEngine>,
    pub(crate) change_queue: Arc<SharedBuf>,
    pub(crate) string_table: Arc<SharedBuf>,
    pub(crate) sampling: Arc<SharedBuf>,
}

/// One instrumented-process interface to the tracing engine.
///
/// All shared state - the change-queue, string-table and sampling buffers,
/// the interner, the flush coordinator - is owned by the instance and
/// created exactly once at construction. Independent instances share
/// nothing; never route two pipelines through one buffer set.
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    /// Builds a pipeline backed by the in-process reference engine and the
    /// given exporter.
    pub fn new(config: PipelineConfig, exporter: Arc<dyn SpanExporterBoxed>) -> Self {
        let change_queue = Arc::new(SharedBuf::new(config.change_queue_bytes));
        let string_table = Arc::new(SharedBuf::new(config.string_table_bytes));
        let engine: Arc<dyn NativeEngine> = Arc::new(InProcessEngine::new(
            config.clone(),
            Arc::clone(&change_queue),
            Arc::clone(&string_table),
            exporter,
        ));
        Self::with_engine(config, engine, change_queue, string_table)
    }

    /// Builds a pipeline over an externally constructed engine that already
    /// holds the consumer end of `change_queue` and `string_table`.
    pub fn with_engine(
        config: PipelineConfig,
        engine: Arc<dyn NativeEngine>,
        change_queue: Arc<SharedBuf>,
        string_table: Arc<SharedBuf>,
    ) -> Self {
        let sampling = Arc::new(SharedBuf::new(config.sampling_bytes));
        let coordinator = FlushCoordinator::new(
            ChangeWriter::new(Arc::clone(&change_queue)),
            StringInterner::new(Arc::clone(&string_table)),
            config.flush_bytes,
            Arc::clone(&engine),
        );
        Self {
            inner: Arc::new(PipelineInner {
                config,
                coordinator,
                engine,
                change_queue,
                string_table,
                sampling,
            }),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &FlushMetrics {
        self.inner.coordinator.metrics()
    }

    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        &self.inner.engine
    }

    /// The shared change-queue region.
    pub fn change_queue(&self) -> &Arc<SharedBuf> {
        &self.inner.change_queue
    }

    /// The shared string-table input region.
    pub fn string_table(&self) -> &Arc<SharedBuf> {
        &self.inner.string_table
    }

    /// The shared sampling region. Allocated with the rest of the boundary
    /// surface; its record protocol belongs to the engine's sampler.
    pub fn sampling_buffer(&self) -> &Arc<SharedBuf> {
        &self.inner.sampling
    }

    pub fn queue_state(&self) -> QueueState {
        self.inner.coordinator.queue_state()
    }

    /// Starts a span. A missing `trace_id` starts a new trace; a missing
    /// `parent_id` makes the span a root. A child must carry its ancestor's
    /// trace id alongside the ancestor's span id.
    pub fn create_span(
        &self,
        trace_id: Option<u128>,
        parent_id: Option<u64>,
    ) -> Result<SpanHandle, EncodeError> {
        SpanHandle::create(
            Arc::clone(&self.inner),
            trace_id.unwrap_or_else(random_trace_id),
            parent_id.unwrap_or(0),
        )
    }

    /// Makes the engine apply everything queued. Synchronous; see
    /// [`FlushCoordinator::flush_change_queue`].
    pub fn flush_change_queue(&self) -> Result<u64, FlushError> {
        self.inner.coordinator.flush_change_queue()
    }

    /// Flushes the queue and exports the given finished spans as one chunk.
    /// The only suspending operation on the pipeline.
    pub async fn flush_spans(&self, span_ids: &[u64]) -> Result<(), FlushError> {
        self.inner.coordinator.flush_chunk(span_ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::TestExporter;

    fn pipeline() -> (Pipeline, Arc<TestExporter>) {
        let exporter = Arc::new(TestExporter::new());
        (
            Pipeline::new(PipelineConfig::default(), exporter.clone()),
            exporter,
        )
    }

    #[test]
    fn test_buffers_match_configured_sizes() {
        let (pipeline, _) = pipeline();
        let config = PipelineConfig::default();
        assert_eq!(pipeline.change_queue().capacity(), config.change_queue_bytes);
        assert_eq!(pipeline.string_table().capacity(), config.string_table_bytes);
        assert_eq!(pipeline.sampling_buffer().capacity(), config.sampling_bytes);
    }

    #[test]
    fn test_create_span_enqueues_create_and_start() {
        let (pipeline, _) = pipeline();
        let span = pipeline.create_span(None, None).unwrap();

        assert_ne!(span.span_id(), 0);
        assert_ne!(span.trace_id(), 0);
        assert_eq!(span.parent_id(), 0);
        assert_eq!(pipeline.change_queue().count(), 2);
        assert_eq!(pipeline.metrics().records_enqueued(), 2);
        assert_eq!(pipeline.queue_state(), QueueState::Filling);
    }

    #[test]
    fn test_child_shares_trace_and_links_parent() {
        let (pipeline, _) = pipeline();
        let root = pipeline.create_span(None, None).unwrap();
        let child = root.child().unwrap();

        assert_eq!(child.trace_id(), root.trace_id());
        assert_eq!(child.parent_id(), root.span_id());
        assert_ne!(child.span_id(), root.span_id());
    }

    #[tokio::test]
    async fn test_flush_spans_exports() {
        let (pipeline, exporter) = pipeline();
        let span = pipeline.create_span(None, None).unwrap();
        span.set_name("op").unwrap();
        span.finish().unwrap();

        pipeline.flush_spans(&[span.span_id()]).await.unwrap();

        assert_eq!(exporter.exported_count(), 1);
        assert_eq!(pipeline.queue_state(), QueueState::Empty);
    }
}

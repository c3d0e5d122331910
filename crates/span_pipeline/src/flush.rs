use crate::engine::{EngineError, NativeEngine};
use crate::exporter::ExportError;
use crate::metrics::FlushMetrics;
use changeq::{ChangeWriter, EncodeError, OpCode, StringInterner, Value};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Error types for flush operations.
#[derive(Debug, Error)]
pub enum FlushError {
    /// The engine failed to drain/apply queued records.
    #[error("queue drain failed: {0}")]
    Engine(#[from] EngineError),
    /// The asynchronous export call failed. Surfaced as-is; this layer does
    /// not retry.
    #[error("export failed: {0}")]
    Export(#[from] ExportError),
    /// More span ids than the flush buffer can carry.
    #[error("flush chunk overflow: {count} span ids need {needed} bytes, buffer holds {capacity}")]
    ChunkOverflow {
        count: usize,
        needed: usize,
        capacity: usize,
    },
}

/// Observable state of the change queue.
///
/// The queue moves Empty → Filling on the first append and back to Empty on
/// an explicit flush or a detected engine-side drain. There are no other
/// states; overflow while Filling is an error, not a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Empty,
    Filling,
}

/// Client-side queue state: the writer and interner share one owner because
/// every append may touch both.
struct QueueClient {
    writer: ChangeWriter,
    interner: StringInterner,
}

/// Coordinates the hand-off between the client's queue and the engine.
///
/// Appends go through [`enqueue`](Self::enqueue), which lets the writer
/// absorb engine-side drains lazily. Explicit flushes push the other way:
/// [`flush_change_queue`](Self::flush_change_queue) makes the engine apply
/// everything queued, and [`flush_chunk`](Self::flush_chunk) additionally
/// exports a batch of finished spans.
///
/// The client mutex guards single-writer bookkeeping and is uncontended in
/// the one-client discipline; cross-boundary synchronization is the buffers'
/// count headers, not this lock. The chunk buffer has its own async mutex
/// because export is the one operation that suspends.
pub struct FlushCoordinator {
    client: Mutex<QueueClient>,
    chunk: tokio::sync::Mutex<Box<[u8]>>,
    engine: Arc<dyn NativeEngine>,
    metrics: FlushMetrics,
}

impl FlushCoordinator {
    pub fn new(
        writer: ChangeWriter,
        interner: StringInterner,
        flush_bytes: usize,
        engine: Arc<dyn NativeEngine>,
    ) -> Self {
        Self {
            client: Mutex::new(QueueClient { writer, interner }),
            chunk: tokio::sync::Mutex::new(vec![0u8; flush_bytes].into_boxed_slice()),
            engine,
            metrics: FlushMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &FlushMetrics {
        &self.metrics
    }

    /// Current queue state as tracked by the writer. A pending engine-side
    /// drain is absorbed first, so a queue the engine already emptied reads
    /// Empty here.
    pub fn queue_state(&self) -> QueueState {
        let mut client = self.client.lock().unwrap();
        if client.writer.reconcile() {
            self.metrics.record_drain_detected();
        }
        if client.writer.tracked_count() == 0 {
            QueueState::Empty
        } else {
            QueueState::Filling
        }
    }

    /// Appends one change record (interning string arguments as needed).
    pub fn enqueue(
        &self,
        op: OpCode,
        span_id: u64,
        args: &[Value<'_>],
    ) -> Result<(), EncodeError> {
        let mut client = self.client.lock().unwrap();
        let QueueClient { writer, interner } = &mut *client;
        let drain_detected = writer.append(interner, op, span_id, args)?;
        self.metrics.record_enqueue(drain_detected);
        Ok(())
    }

    /// Makes the engine drain and apply everything queued, then resets the
    /// client's bookkeeping to the empty state. Returns the records applied.
    pub fn flush_change_queue(&self) -> Result<u64, FlushError> {
        let applied = self.engine.drain_change_queue()?;
        let mut client = self.client.lock().unwrap();
        client.writer.clear();
        client.interner.clear_pending();
        self.metrics.record_queue_flush();
        Ok(applied)
    }

    /// Flushes the change queue, then exports the given spans as one chunk.
    ///
    /// The queue flush runs first so every queued attribute mutation is
    /// applied before the spans are read for export. Span ids are serialized
    /// into the reused flush buffer (8 bytes each, submission order); a
    /// chunk larger than the buffer fails with
    /// [`FlushError::ChunkOverflow`] before anything is flushed.
    pub async fn flush_chunk(&self, span_ids: &[u64]) -> Result<(), FlushError> {
        let mut chunk = self.chunk.lock().await;

        let needed = span_ids.len() * 8;
        if needed > chunk.len() {
            return Err(FlushError::ChunkOverflow {
                count: span_ids.len(),
                needed,
                capacity: chunk.len(),
            });
        }

        self.flush_change_queue()?;

        for (slot, span_id) in chunk.chunks_exact_mut(8).zip(span_ids) {
            slot.copy_from_slice(&span_id.to_le_bytes());
        }

        match self
            .engine
            .export_chunk(span_ids.len() as u32, &chunk[..needed])
            .await
        {
            Ok(()) => {
                self.metrics.record_chunk_export();
                Ok(())
            }
            Err(e) => {
                self.metrics.record_export_error();
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::engine::InProcessEngine;
    use crate::exporter::TestExporter;
    use changeq::SharedBuf;

    struct Fixture {
        coordinator: FlushCoordinator,
        engine: Arc<InProcessEngine>,
        exporter: Arc<TestExporter>,
    }

    fn fixture(queue_bytes: usize) -> Fixture {
        let change_queue = Arc::new(SharedBuf::new(queue_bytes));
        let string_table = Arc::new(SharedBuf::new(4096));
        let exporter = Arc::new(TestExporter::new());
        let engine = Arc::new(InProcessEngine::new(
            PipelineConfig::default(),
            Arc::clone(&change_queue),
            Arc::clone(&string_table),
            exporter.clone(),
        ));
        let coordinator = FlushCoordinator::new(
            ChangeWriter::new(change_queue),
            StringInterner::new(string_table),
            1024,
            engine.clone() as Arc<dyn NativeEngine>,
        );
        Fixture {
            coordinator,
            engine,
            exporter,
        }
    }

    fn create(f: &Fixture, span_id: u64) {
        f.coordinator
            .enqueue(OpCode::Create, span_id, &[Value::U128(9), Value::U64(0)])
            .unwrap();
    }

    #[test]
    fn test_state_machine_explicit_flush() {
        let f = fixture(4096);
        assert_eq!(f.coordinator.queue_state(), QueueState::Empty);

        create(&f, 1);
        assert_eq!(f.coordinator.queue_state(), QueueState::Filling);

        let applied = f.coordinator.flush_change_queue().unwrap();
        assert_eq!(applied, 1);
        assert_eq!(f.coordinator.queue_state(), QueueState::Empty);
        assert_eq!(f.coordinator.metrics().queue_flushes(), 1);
    }

    #[test]
    fn test_state_machine_engine_drain() {
        let f = fixture(4096);
        create(&f, 1);
        assert_eq!(f.coordinator.queue_state(), QueueState::Filling);

        // The engine drains on its own; the client notices lazily.
        f.engine.drain_change_queue().unwrap();
        assert_eq!(f.coordinator.queue_state(), QueueState::Empty);
        assert_eq!(f.coordinator.metrics().native_drains_detected(), 1);
    }

    #[test]
    fn test_overflow_is_an_error_not_a_transition() {
        // Body fits exactly one Create record (16 + 24 = 40 bytes).
        let f = fixture(changeq::HEADER_BYTES + 40);
        create(&f, 1);

        let err = f
            .coordinator
            .enqueue(OpCode::Create, 2, &[Value::U128(9), Value::U64(0)])
            .unwrap_err();
        assert!(matches!(err, EncodeError::Overflow { .. }));
        assert_eq!(f.coordinator.queue_state(), QueueState::Filling);

        // Flush-and-retry is the documented recovery.
        f.coordinator.flush_change_queue().unwrap();
        create(&f, 2);
        assert_eq!(f.engine.span_count(), 1);
    }

    #[tokio::test]
    async fn test_flush_chunk_applies_queue_first() {
        let f = fixture(4096);
        create(&f, 1);
        f.coordinator
            .enqueue(OpCode::SetName, 1, &[Value::Str("op")])
            .unwrap();

        f.coordinator.flush_chunk(&[1]).await.unwrap();

        // The rename queued before the flush made it into the export.
        let spans = f.exporter.all_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "op");
        assert_eq!(f.coordinator.queue_state(), QueueState::Empty);
        assert_eq!(f.coordinator.metrics().chunks_exported(), 1);
    }

    #[tokio::test]
    async fn test_flush_chunk_overflow() {
        let change_queue = Arc::new(SharedBuf::new(4096));
        let string_table = Arc::new(SharedBuf::new(4096));
        let engine = Arc::new(InProcessEngine::new(
            PipelineConfig::default(),
            Arc::clone(&change_queue),
            Arc::clone(&string_table),
            Arc::new(TestExporter::new()),
        ));
        // Chunk buffer fits two span ids.
        let coordinator = FlushCoordinator::new(
            ChangeWriter::new(change_queue),
            StringInterner::new(string_table),
            16,
            engine as Arc<dyn NativeEngine>,
        );

        let err = coordinator.flush_chunk(&[1, 2, 3]).await.unwrap_err();
        assert!(matches!(
            err,
            FlushError::ChunkOverflow {
                count: 3,
                needed: 24,
                capacity: 16
            }
        ));
    }
}

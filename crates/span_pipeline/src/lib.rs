//! Span Pipeline
//!
//! Client pipeline over the [`changeq`] cross-boundary protocol: span
//! mutations are recorded as binary change records in a shared buffer, a
//! native engine drains and materializes them, and finished spans are
//! batched into chunks for asynchronous export.
//!
//! The deliberate consistency trade-off to know about: setters enqueue,
//! getters round-trip into the engine, so a getter sees a written value only
//! after a flush (explicit or engine-initiated). Stale reads are documented
//! behavior, not an error.
//!
//! # Example
//!
//! ```ignore
//! use span_pipeline::{Pipeline, PipelineConfig, StdoutExporter, TagValue};
//! use std::sync::Arc;
//!
//! let pipeline = Pipeline::new(PipelineConfig::default(), Arc::new(StdoutExporter::new(true)));
//!
//! let root = pipeline.create_span(None, None)?;
//! root.set_name("web.request")?;
//! root.set_tag("http.method", TagValue::from("GET"))?;
//!
//! let child = root.child()?;
//! child.set_name("db.query")?;
//!
//! child.finish()?;
//! root.finish()?;
//! pipeline.flush_spans(&[root.span_id(), child.span_id()]).await?;
//! ```

pub mod config;
pub mod engine;
pub mod exporter;
pub mod flush;
pub mod metrics;
pub mod pipeline;
pub mod span;
pub mod store;

// Re-export main types
pub use config::PipelineConfig;
pub use engine::{EngineError, InProcessEngine, NativeEngine};
pub use exporter::{
    ExportError, JsonFileExporter, NullExporter, SpanExporter, SpanExporterBoxed, StdoutExporter,
};
pub use flush::{FlushCoordinator, FlushError, QueueState};
pub use metrics::{EngineMetrics, FlushMetrics};
pub use pipeline::Pipeline;
pub use span::{random_span_id, random_trace_id, SpanHandle, TagValue};
pub use store::{SpanBatch, SpanData, SpanStore, TraceState};

use crate::store::SpanBatch;
use std::future::Future;
use thiserror::Error;

/// Error types for chunk export operations.
#[derive(Debug, Error, Clone)]
pub enum ExportError {
    /// Transport-layer error (network, engine boundary).
    #[error("transport error: {0}")]
    Transport(String),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The flush chunk is shorter than its declared span-id count.
    #[error("flush chunk malformed: {count} span ids need {needed} bytes, chunk holds {len}")]
    MalformedChunk {
        count: u32,
        needed: usize,
        len: usize,
    },
    /// A chunk named a span the engine never materialized (or already
    /// exported).
    #[error("span {span_id:#018x} is not materialized in the native store")]
    UnknownSpan { span_id: u64 },
}

/// Trait for exporting span batches to a backend.
///
/// Uses native async fn in traits; for dynamic dispatch use
/// [`SpanExporterBoxed`]. Export is best-effort at this layer - a failed
/// result surfaces to the flusher and no retry is attempted here.
pub trait SpanExporter: Send + Sync {
    /// Exports a batch of finished spans.
    fn export(&self, batch: SpanBatch) -> impl Future<Output = Result<(), ExportError>> + Send;

    /// Returns the exporter name for debugging.
    fn name(&self) -> &str;
}

/// Object-safe version of [`SpanExporter`] for dynamic dispatch.
pub trait SpanExporterBoxed: Send + Sync {
    /// Exports a batch of finished spans (boxed future for object safety).
    fn export_boxed(
        &self,
        batch: SpanBatch,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + '_>>;

    /// Returns the exporter name for debugging.
    fn name(&self) -> &str;
}

/// Blanket implementation: any `SpanExporter` can be used boxed.
impl<T: SpanExporter> SpanExporterBoxed for T {
    fn export_boxed(
        &self,
        batch: SpanBatch,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + '_>> {
        Box::pin(self.export(batch))
    }

    fn name(&self) -> &str {
        SpanExporter::name(self)
    }
}

/// Stdout exporter for testing and debugging.
pub struct StdoutExporter {
    verbose: bool,
}

impl StdoutExporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl SpanExporter for StdoutExporter {
    async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        if self.verbose {
            println!("=== Exporting {} spans ===", batch.spans.len());
            for span in &batch.spans {
                println!(
                    "Span: trace_id={:032x} span_id={:016x} parent_id={:016x} name={} service={} duration={}ns",
                    span.trace_id, span.span_id, span.parent_id, span.name, span.service, span.duration
                );
            }
            println!("=== Export complete ===\n");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

/// JSON file exporter for local development.
pub struct JsonFileExporter {
    file_path: String,
}

impl JsonFileExporter {
    pub fn new(file_path: String) -> Self {
        Self { file_path }
    }
}

impl SpanExporter for JsonFileExporter {
    async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        let json = serde_json::to_string_pretty(&batch.spans)
            .map_err(|e| ExportError::Serialization(e.to_string()))?;

        tokio::fs::write(&self.file_path, json)
            .await
            .map_err(|e| ExportError::Transport(e.to_string()))?;

        Ok(())
    }

    fn name(&self) -> &str {
        "json_file"
    }
}

/// Null exporter that discards all spans (for benchmarking).
pub struct NullExporter;

impl NullExporter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl SpanExporter for NullExporter {
    async fn export(&self, _batch: SpanBatch) -> Result<(), ExportError> {
        // Discard all spans
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Test exporter that records all exported spans for verification.
#[cfg(test)]
pub struct TestExporter {
    spans: std::sync::Mutex<Vec<crate::store::SpanData>>,
}

#[cfg(test)]
impl TestExporter {
    pub fn new() -> Self {
        Self {
            spans: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn exported_count(&self) -> usize {
        self.spans.lock().unwrap().len()
    }

    pub fn all_spans(&self) -> Vec<crate::store::SpanData> {
        self.spans.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl SpanExporter for TestExporter {
    async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        self.spans.lock().unwrap().extend(batch.spans);
        Ok(())
    }

    fn name(&self) -> &str {
        "test"
    }
}

/// Failing exporter for error-path testing.
#[cfg(test)]
pub struct FailingExporter;

#[cfg(test)]
impl SpanExporter for FailingExporter {
    async fn export(&self, _batch: SpanBatch) -> Result<(), ExportError> {
        Err(ExportError::Transport("connection refused".to_string()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

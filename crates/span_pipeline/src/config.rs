/// Construction-time configuration for a pipeline instance.
///
/// Every field is fixed for the instance's lifetime. Buffer sizes are a
/// deployment-time concern handed to the engine at construction; they are
/// never renegotiated or grown at runtime.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Agent endpoint the engine's exporter ultimately talks to.
    pub agent_url: String,
    /// Version reported for this tracer.
    pub tracer_version: String,
    /// Instrumented language name.
    pub language: String,
    /// Instrumented language version.
    pub language_version: String,
    /// Instrumented language interpreter/runtime.
    pub language_interpreter: String,
    /// Process id of the instrumented process.
    pub process_id: u32,
    /// Service name applied at export to spans that never set one.
    pub default_service: String,
    /// Change-queue region size in bytes, 8-byte count header included.
    pub change_queue_bytes: usize,
    /// String-table input region size in bytes, header included.
    pub string_table_bytes: usize,
    /// Sampling region size in bytes. The region is allocated and shared
    /// like the others; its record protocol belongs to the engine's sampler.
    pub sampling_bytes: usize,
    /// Flush-chunk buffer size in bytes (8 bytes per exported span id).
    pub flush_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            agent_url: "http://127.0.0.1:8126".to_string(),
            tracer_version: env!("CARGO_PKG_VERSION").to_string(),
            language: "rust".to_string(),
            language_version: String::new(),
            language_interpreter: "native".to_string(),
            process_id: std::process::id(),
            default_service: "unnamed-service".to_string(),
            change_queue_bytes: 10 * 1024,
            string_table_bytes: 10 * 1024,
            sampling_bytes: 10 * 1024,
            flush_bytes: 10 * 1024,
        }
    }
}

impl PipelineConfig {
    /// Maximum number of span ids one flush chunk can carry.
    #[inline]
    pub const fn max_chunk_spans(&self) -> usize {
        self.flush_bytes / 8
    }
}

//! Client-side tuning knobs for the encoder and drain scheduler.

/// Configuration for one client instance.
///
/// All values have conservative defaults; the named presets trade latency
/// against round trips the same way on every platform.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Hard ceiling for one batch buffer in bytes. An operation whose
    /// worst-case encoding exceeds this fails with a size error.
    pub buffer_ceiling: usize,
    /// Strings and json payloads longer than this are snap-compressed.
    pub compression_threshold: usize,
    /// Equality sets up to this many values encode inline; larger sets are
    /// batch-encoded as a sorted run.
    pub inline_set_threshold: usize,
    /// How long the drain worker waits before flushing an accumulating
    /// batch on its own, in milliseconds.
    pub drain_interval_ms: u64,
    /// Active locale for `text` property writes.
    pub locale: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            buffer_ceiling: 2 * 1024 * 1024,
            compression_threshold: 160,
            inline_set_threshold: 16,
            drain_interval_ms: 2,
            locale: "en".to_owned(),
        }
    }
}

impl ClientConfig {
    /// Smallest buffers and immediate drains; favors latency over batching.
    pub fn low_latency() -> Self {
        Self {
            buffer_ceiling: 256 * 1024,
            drain_interval_ms: 0,
            ..Self::default()
        }
    }

    /// Large buffers and a relaxed drain timer for bulk ingestion.
    pub fn bulk_load() -> Self {
        Self {
            buffer_ceiling: 16 * 1024 * 1024,
            drain_interval_ms: 25,
            ..Self::default()
        }
    }

    /// Returns a copy with a different active locale.
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }
}

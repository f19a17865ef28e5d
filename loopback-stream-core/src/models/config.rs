/// Configuration for the streaming pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfiguration {
    /// Keep one frame out of every `downsample_factor` (default: 4).
    pub downsample_factor: u32,

    /// Messages buffered per subscriber before frames are dropped for it
    /// (default: 64).
    pub subscriber_queue_depth: usize,
}

impl StreamConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        if self.downsample_factor == 0 {
            return Err("downsample factor must be at least 1".into());
        }
        if self.subscriber_queue_depth == 0 {
            return Err("subscriber queue depth must be at least 1".into());
        }
        Ok(())
    }
}

impl Default for StreamConfiguration {
    fn default() -> Self {
        Self {
            downsample_factor: 4,
            subscriber_queue_depth: 64,
        }
    }
}

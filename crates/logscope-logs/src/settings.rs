use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sampler::DEFAULT_SAMPLE_SIZE;

/// Tuning knobs for the ingestion engine
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Queue a scroll-to-end every this many appended records while following
    pub scroll_batch: usize,

    /// Upper bound between redraws during a long resweep
    pub redraw_interval_ms: u64,

    /// How long the refilter loop waits at the live end before rechecking
    pub park_interval_ms: u64,

    /// Number of most recent matches fed to the schema sampler
    pub sample_size: usize,

    /// Start in follow mode
    pub follow: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            scroll_batch: 10,
            redraw_interval_ms: 500,
            park_interval_ms: 100,
            sample_size: DEFAULT_SAMPLE_SIZE,
            follow: true,
        }
    }
}

impl EngineSettings {
    pub fn redraw_interval(&self) -> Duration {
        Duration::from_millis(self.redraw_interval_ms)
    }

    pub fn park_interval(&self) -> Duration {
        Duration::from_millis(self.park_interval_ms.max(1))
    }

    pub(crate) fn scroll_batch(&self) -> usize {
        self.scroll_batch.max(1)
    }
}

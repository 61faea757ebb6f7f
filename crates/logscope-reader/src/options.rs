use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of lines buffered between the sources and the consumer
pub const DEFAULT_CAPACITY: usize = 256;

/// Default interval between file size checks once a tail reaches EOF
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// Tunables shared by every reader variant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    /// Bounded queue size; a slow consumer stalls the producers
    pub capacity: usize,

    /// Byte offset to start from (single-file mode only)
    pub offset: u64,

    /// Poll interval for followed files, in milliseconds
    pub poll_interval_ms: u64,

    /// Prefix multi-file lines with `[file name] `
    pub with_origin: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            offset: 0,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            with_origin: false,
        }
    }
}

impl ReaderOptions {
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_origin(mut self, enabled: bool) -> Self {
        self.with_origin = enabled;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Queue capacity, never zero (tokio rejects empty channels)
    pub(crate) fn queue_capacity(&self) -> usize {
        self.capacity.max(1)
    }
}

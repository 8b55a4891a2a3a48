//! Engine configuration (§6): the root directory plus the two tunables
//! that affect segment rotation and generation rollover.

use std::path::{Path, PathBuf};

/// Default segment size cap, in MiB, before `current_partition` rotates to
/// a new segment.
pub const DEFAULT_PARTITION_SIZE_MIB: u64 = 500;
const MIN_PARTITION_SIZE_MIB: u64 = 1;
const MAX_PARTITION_SIZE_MIB: u64 = 2000;

/// Default generation capacity: the largest sequence number a generation
/// may hold before a rollover is triggered. `i32::MAX` in the distilled
/// spec; kept as `i64` here so tests can clamp it down to something small
/// without risking a cast.
pub const DEFAULT_LABEL_SIZE: i64 = i32::MAX as i64;
const MIN_LABEL_SIZE: i64 = 10;
const MAX_LABEL_SIZE: i64 = i32::MAX as i64;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory; one subdirectory per topic lives here.
    pub folder: PathBuf,
    /// Segment rotation threshold, in MiB. Clamped to `[1, 2000]`.
    partition_size_mib: u64,
    /// Generation capacity, in messages. Clamped to `[10, 2^31-1]`.
    /// Test-only: production deployments should leave this at the default.
    label_size: i64,
}

impl EngineConfig {
    pub fn new(folder: impl AsRef<Path>) -> Self {
        Self {
            folder: folder.as_ref().to_path_buf(),
            partition_size_mib: DEFAULT_PARTITION_SIZE_MIB,
            label_size: DEFAULT_LABEL_SIZE,
        }
    }

    pub fn partition_size_mib(mut self, value: u64) -> Self {
        self.partition_size_mib = value.clamp(MIN_PARTITION_SIZE_MIB, MAX_PARTITION_SIZE_MIB);
        self
    }

    /// Test-only: shrink the generation capacity so rollover can be
    /// exercised without writing billions of records.
    pub fn label_size(mut self, value: i64) -> Self {
        self.label_size = value.clamp(MIN_LABEL_SIZE, MAX_LABEL_SIZE);
        self
    }

    pub fn partition_size_bytes(&self) -> u64 {
        self.partition_size_mib * 1024 * 1024
    }

    pub fn label_size_value(&self) -> i64 {
        self.label_size
    }
}

use sdcard::VolumeStats;

use crate::config::{FILE_NAME_MAX, MAX_LISTED_FILES};

pub const BYTES_PER_MIB: u64 = 1024 * 1024;

pub type FileName = heapless::String<FILE_NAME_MAX>;
pub type FileList = heapless::Vec<FileName, MAX_LISTED_FILES>;

/// Capacity snapshot of the mounted card plus its root listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CardDetails {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub files: FileList,
    /// Entries in the root, counting those that did not fit in `files`.
    pub file_count: usize,
}

impl CardDetails {
    pub fn new(stats: VolumeStats, files: FileList, file_count: usize) -> Self {
        let total_bytes = stats.total_bytes();
        let free_bytes = stats.free_bytes();
        Self {
            total_bytes,
            used_bytes: total_bytes - free_bytes,
            free_bytes,
            files,
            file_count,
        }
    }

    pub fn total_mib(&self) -> f32 {
        to_mib(self.total_bytes)
    }

    pub fn used_mib(&self) -> f32 {
        to_mib(self.used_bytes)
    }

    pub fn free_mib(&self) -> f32 {
        to_mib(self.free_bytes)
    }
}

fn to_mib(bytes: u64) -> f32 {
    bytes as f32 / BYTES_PER_MIB as f32
}

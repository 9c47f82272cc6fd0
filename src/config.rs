/// Where the card appears to callers. Names may be given bare or under it.
pub const MOUNT_POINT: &str = "/sd";

/// Most names a single listing returns.
pub const MAX_LISTED_FILES: usize = 32;

pub const FILE_NAME_MAX: usize = sdcard::FAT_NAME_MAX;

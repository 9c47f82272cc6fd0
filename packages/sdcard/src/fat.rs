use crate::block::{BlockDevice, BLOCK_SIZE};

mod cluster;
mod dir_ops;
mod dir_scan;
mod mount;
mod mutate;
mod names;
mod read_write;
mod stats;
#[cfg(test)]
mod tests;

pub use stats::VolumeStats;

use names::{build_display_name, consume_lfn_entry, parse_path};

const SECTOR_SIZE: usize = BLOCK_SIZE;
const DIR_ENTRY_SIZE: usize = 32;
const DIR_ENTRIES_PER_SECTOR: usize = SECTOR_SIZE / DIR_ENTRY_SIZE;
const FAT32_EOC: u32 = 0x0FFF_FFF8;
const FAT32_EOC_WRITE: u32 = 0x0FFF_FFFF;
const FAT32_ENTRY_MASK: u32 = 0x0FFF_FFFF;
const MAX_PATH_SEGMENTS: usize = 8;
pub const FAT_NAME_MAX: usize = 96;
const MAX_LFN_SLOTS: usize = 20;
const ATTR_LONG_NAME: u8 = 0x0F;
const ATTR_DIRECTORY: u8 = 0x10;
const ATTR_VOLUME: u8 = 0x08;
const ATTR_ARCHIVE: u8 = 0x20;
const DOT_NAME: [u8; 11] = *b".          ";
const DOTDOT_NAME: [u8; 11] = *b"..         ";

#[derive(Clone, Copy)]
struct PathSegment {
    name: [u8; FAT_NAME_MAX],
    len: u8,
}

impl PathSegment {
    const EMPTY: Self = Self {
        name: [0; FAT_NAME_MAX],
        len: 0,
    };

    fn as_bytes(&self) -> &[u8] {
        &self.name[..self.len as usize]
    }
}

/// A parsed path: the parent directory segments plus the final name.
struct ParsedPath {
    segments: [PathSegment; MAX_PATH_SEGMENTS],
    count: usize,
}

impl ParsedPath {
    fn parse<E>(path: &str) -> Result<Self, FatError<E>> {
        let mut segments = [PathSegment::EMPTY; MAX_PATH_SEGMENTS];
        let count = parse_path(path, &mut segments)?;
        Ok(Self { segments, count })
    }

    /// Splits off the last segment; the root itself has no leaf.
    fn split_leaf<E>(&self) -> Result<(&[PathSegment], &PathSegment), FatError<E>> {
        match self.segments[..self.count].split_last() {
            Some((leaf, parents)) => Ok((parents, leaf)),
            None => Err(FatError::InvalidPath),
        }
    }

    fn dirs(&self) -> &[PathSegment] {
        &self.segments[..self.count]
    }
}

#[derive(Debug)]
pub enum FatError<E> {
    Device(E),
    UnsupportedFatType,
    InvalidBootSector,
    UnsupportedSectorSize(u16),
    UnsupportedSectorsPerCluster(u8),
    InvalidPath,
    PathTooDeep,
    InvalidShortName,
    InvalidLongName,
    NameTooLong,
    NotFound,
    NotDirectory,
    IsDirectory,
    NotEmpty,
    AlreadyExists,
    CrossDirectoryRenameUnsupported,
    DirFull,
    BufferTooSmall { needed: usize },
    FileTooLarge,
    NoFreeCluster,
    BadCluster(u32),
    ClusterChainTooLong,
}

#[derive(Clone, Copy)]
pub struct FatDirEntry {
    pub name: [u8; FAT_NAME_MAX],
    pub name_len: u8,
    pub is_dir: bool,
    pub size: u32,
}

impl FatDirEntry {
    pub const EMPTY: Self = Self {
        name: [0; FAT_NAME_MAX],
        name_len: 0,
        is_dir: false,
        size: 0,
    };

    pub fn name_bytes(&self) -> &[u8] {
        &self.name[..(self.name_len as usize).min(FAT_NAME_MAX)]
    }

    pub fn name(&self) -> Option<&str> {
        core::str::from_utf8(self.name_bytes()).ok()
    }

    fn is_dot_entry(&self) -> bool {
        matches!(self.name_bytes(), b"." | b"..")
    }
}

/// Geometry read from the boot sector at mount time.
#[derive(Clone, Copy, Debug)]
struct VolumeLayout {
    fat_start_lba: u32,
    fat_size_sectors: u32,
    fats: u8,
    data_start_lba: u32,
    sectors_per_cluster: u8,
    root_cluster: u32,
    total_clusters: u32,
}

impl VolumeLayout {
    fn cluster_size(&self) -> usize {
        SECTOR_SIZE * self.sectors_per_cluster as usize
    }

    fn max_cluster(&self) -> u32 {
        self.total_clusters.saturating_add(1)
    }

    /// Upper bound for any chain walk; longer chains are corrupt.
    fn chain_limit(&self) -> u32 {
        self.total_clusters.saturating_add(2)
    }
}

#[derive(Clone, Copy)]
struct DirRecord {
    short_name: [u8; 11],
    display_name: [u8; FAT_NAME_MAX],
    display_name_len: u8,
    attr: u8,
    first_cluster: u32,
    size: u32,
}

impl DirRecord {
    fn is_dir(&self) -> bool {
        (self.attr & ATTR_DIRECTORY) != 0
    }

    fn to_entry(&self) -> FatDirEntry {
        FatDirEntry {
            name: self.display_name,
            name_len: self.display_name_len,
            is_dir: self.is_dir(),
            size: self.size,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct DirLocation {
    lba: u32,
    slot: u8,
}

impl DirLocation {
    const ZERO: Self = Self { lba: 0, slot: 0 };
}

#[derive(Clone, Copy)]
struct DirFound {
    short_location: DirLocation,
    lfn_locations: [DirLocation; MAX_LFN_SLOTS],
    lfn_count: u8,
    record: DirRecord,
}

type FreeSlots = [DirLocation; MAX_LFN_SLOTS + 1];

#[derive(Clone, Copy)]
struct DirLookup {
    found: Option<DirFound>,
    free: Option<FreeSlots>,
}

#[derive(Clone, Copy)]
struct LfnState {
    expected_slots: u8,
    checksum: u8,
    seen_mask: u32,
    utf16_parts: [[u16; 13]; MAX_LFN_SLOTS],
    lfn_locations: [DirLocation; MAX_LFN_SLOTS],
}

impl LfnState {
    fn new() -> Self {
        Self {
            expected_slots: 0,
            checksum: 0,
            seen_mask: 0,
            utf16_parts: [[0xFFFF; 13]; MAX_LFN_SLOTS],
            lfn_locations: [DirLocation::ZERO; MAX_LFN_SLOTS],
        }
    }

    fn clear(&mut self) {
        *self = Self::new();
    }
}

/// A mounted FAT32 volume.
///
/// Owns the block device for as long as the volume is mounted; dropping the
/// volume or calling [`FatVolume::into_device`] is the unmount. Every
/// operation runs to completion against the device before returning.
pub struct FatVolume<D> {
    device: D,
    layout: VolumeLayout,
    next_free_hint: Option<u32>,
}

impl<D: BlockDevice> FatVolume<D> {
    pub fn into_device(self) -> D {
        self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn cluster_size(&self) -> usize {
        self.layout.cluster_size()
    }

    fn read_sector(
        &mut self,
        lba: u32,
        out: &mut [u8; SECTOR_SIZE],
    ) -> Result<(), FatError<D::Error>> {
        self.device.read_block(lba, out).map_err(FatError::Device)
    }

    fn write_sector(&mut self, lba: u32, data: &[u8; SECTOR_SIZE]) -> Result<(), FatError<D::Error>> {
        self.device.write_block(lba, data).map_err(FatError::Device)
    }

    fn next_free_hint(&self) -> Option<u32> {
        self.next_free_hint
    }

    fn set_next_free_hint(&mut self, cluster: u32) {
        self.next_free_hint = Some(cluster);
    }

    fn lower_next_free_hint(&mut self, cluster: u32) {
        if cluster < 2 {
            return;
        }
        if let Some(current) = self.next_free_hint {
            if current <= cluster {
                return;
            }
        }
        self.next_free_hint = Some(cluster);
    }
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

//! In-memory block device with a FAT32 formatter.
//!
//! Sectors are stored sparsely; unwritten sectors read back as zeros. A
//! [`RamDiskHandle`] stays with the caller after the disk is moved into a
//! volume so faults can be injected and block traffic observed.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::block::{BlockDevice, BLOCK_SIZE};

const RESERVED_SECTORS: u32 = 32;
const FAT_COUNT: u32 = 2;
const FSINFO_SECTOR: u32 = 1;
const BACKUP_BOOT_SECTOR: u32 = 6;
const ROOT_CLUSTER: u32 = 2;
const PARTITION_TYPE_FAT32_LBA: u8 = 0x0C;

/// Smallest data area the formatter accepts; FAT32 needs 65 525 clusters.
pub const MIN_FAT32_SECTORS: u32 = 66_600;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RamDiskError {
    NotInitialized,
    InitFailed,
    OutOfRange(u32),
    ReadFault(u32),
    WriteFault(u32),
    TooSmall,
}

#[derive(Default)]
struct Shared {
    accesses: AtomicUsize,
    fail_init: AtomicBool,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

/// Caller-side view of a [`RamDisk`] that outlives moving the disk away.
#[derive(Clone)]
pub struct RamDiskHandle {
    shared: Arc<Shared>,
}

impl RamDiskHandle {
    /// Number of block reads and writes issued so far.
    pub fn accesses(&self) -> usize {
        self.shared.accesses.load(Ordering::Relaxed)
    }

    pub fn fail_init(&self, fail: bool) {
        self.shared.fail_init.store(fail, Ordering::Relaxed);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.shared.fail_reads.store(fail, Ordering::Relaxed);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::Relaxed);
    }
}

pub struct RamDisk {
    sectors: BTreeMap<u32, Box<[u8; BLOCK_SIZE]>>,
    block_count: u32,
    initialized: bool,
    shared: Arc<Shared>,
}

impl RamDisk {
    /// A blank, zero-filled disk of `block_count` sectors.
    pub fn new(block_count: u32) -> Self {
        Self {
            sectors: BTreeMap::new(),
            block_count,
            initialized: false,
            shared: Arc::new(Shared::default()),
        }
    }

    /// A disk holding one freshly formatted, partitionless FAT32 volume.
    pub fn fat32(block_count: u32) -> Result<Self, RamDiskError> {
        let mut disk = Self::new(block_count);
        disk.format_fat32(0)?;
        Ok(disk)
    }

    /// Like [`RamDisk::fat32`] but behind an MBR whose single partition
    /// starts at `partition_start`.
    pub fn partitioned_fat32(block_count: u32, partition_start: u32) -> Result<Self, RamDiskError> {
        let mut disk = Self::new(block_count);
        disk.format_fat32(partition_start)?;
        Ok(disk)
    }

    pub fn handle(&self) -> RamDiskHandle {
        RamDiskHandle {
            shared: self.shared.clone(),
        }
    }

    /// Lays out a FAT32 volume with one sector per cluster starting at
    /// `partition_start`; a non-zero start also writes an MBR at sector 0.
    pub fn format_fat32(&mut self, partition_start: u32) -> Result<(), RamDiskError> {
        let total_sectors = self
            .block_count
            .checked_sub(partition_start)
            .filter(|sectors| *sectors >= MIN_FAT32_SECTORS)
            .ok_or(RamDiskError::TooSmall)?;

        let fat_size = fat_size_for(total_sectors);
        self.sectors.clear();

        if partition_start != 0 {
            let mut mbr = [0u8; BLOCK_SIZE];
            mbr[446 + 4] = PARTITION_TYPE_FAT32_LBA;
            mbr[446 + 8..446 + 12].copy_from_slice(&partition_start.to_le_bytes());
            mbr[446 + 12..446 + 16].copy_from_slice(&total_sectors.to_le_bytes());
            mbr[510] = 0x55;
            mbr[511] = 0xAA;
            self.store(0, &mbr);
        }

        let boot = boot_sector(partition_start, total_sectors, fat_size);
        self.store(partition_start, &boot);
        self.store(partition_start + BACKUP_BOOT_SECTOR, &boot);
        self.store(partition_start + FSINFO_SECTOR, &fsinfo_sector());

        let mut fat = [0u8; BLOCK_SIZE];
        fat[0..4].copy_from_slice(&0x0FFF_FFF8u32.to_le_bytes());
        fat[4..8].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
        // Root directory: a single cluster, end of chain.
        fat[8..12].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
        for copy in 0..FAT_COUNT {
            self.store(partition_start + RESERVED_SECTORS + copy * fat_size, &fat);
        }
        Ok(())
    }

    fn store(&mut self, lba: u32, data: &[u8; BLOCK_SIZE]) {
        if data.iter().all(|b| *b == 0) {
            self.sectors.remove(&lba);
        } else {
            self.sectors.insert(lba, Box::new(*data));
        }
    }

    fn check_access(&self, lba: u32) -> Result<(), RamDiskError> {
        self.shared.accesses.fetch_add(1, Ordering::Relaxed);
        if !self.initialized {
            return Err(RamDiskError::NotInitialized);
        }
        if lba >= self.block_count {
            return Err(RamDiskError::OutOfRange(lba));
        }
        Ok(())
    }
}

impl BlockDevice for RamDisk {
    type Error = RamDiskError;

    fn init(&mut self) -> Result<(), Self::Error> {
        if self.shared.fail_init.load(Ordering::Relaxed) {
            self.initialized = false;
            return Err(RamDiskError::InitFailed);
        }
        self.initialized = true;
        Ok(())
    }

    fn read_block(&mut self, lba: u32, out: &mut [u8; BLOCK_SIZE]) -> Result<(), Self::Error> {
        self.check_access(lba)?;
        if self.shared.fail_reads.load(Ordering::Relaxed) {
            return Err(RamDiskError::ReadFault(lba));
        }
        match self.sectors.get(&lba) {
            Some(sector) => out.copy_from_slice(sector.as_slice()),
            None => out.fill(0),
        }
        Ok(())
    }

    fn write_block(&mut self, lba: u32, data: &[u8; BLOCK_SIZE]) -> Result<(), Self::Error> {
        self.check_access(lba)?;
        if self.shared.fail_writes.load(Ordering::Relaxed) {
            return Err(RamDiskError::WriteFault(lba));
        }
        self.store(lba, data);
        Ok(())
    }

    fn block_count(&mut self) -> Result<u32, Self::Error> {
        Ok(self.block_count)
    }
}

/// Smallest FAT (in sectors) that covers every cluster left after the
/// reserved area and both FAT copies.
fn fat_size_for(total_sectors: u32) -> u32 {
    let entries_per_sector = (BLOCK_SIZE / 4) as u32;
    let mut fat_size = 1u32;
    loop {
        let clusters = total_sectors - RESERVED_SECTORS - FAT_COUNT * fat_size;
        let needed = (clusters + 2).div_ceil(entries_per_sector);
        if needed <= fat_size {
            return fat_size;
        }
        fat_size = needed;
    }
}

fn boot_sector(hidden_sectors: u32, total_sectors: u32, fat_size: u32) -> [u8; BLOCK_SIZE] {
    let mut boot = [0u8; BLOCK_SIZE];
    boot[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
    boot[3..11].copy_from_slice(b"SDMANAGR");
    boot[11..13].copy_from_slice(&(BLOCK_SIZE as u16).to_le_bytes());
    boot[13] = 1;
    boot[14..16].copy_from_slice(&(RESERVED_SECTORS as u16).to_le_bytes());
    boot[16] = FAT_COUNT as u8;
    boot[21] = 0xF8;
    boot[24..26].copy_from_slice(&32u16.to_le_bytes());
    boot[26..28].copy_from_slice(&64u16.to_le_bytes());
    boot[28..32].copy_from_slice(&hidden_sectors.to_le_bytes());
    boot[32..36].copy_from_slice(&total_sectors.to_le_bytes());
    boot[36..40].copy_from_slice(&fat_size.to_le_bytes());
    boot[44..48].copy_from_slice(&ROOT_CLUSTER.to_le_bytes());
    boot[48..50].copy_from_slice(&(FSINFO_SECTOR as u16).to_le_bytes());
    boot[50..52].copy_from_slice(&(BACKUP_BOOT_SECTOR as u16).to_le_bytes());
    boot[64] = 0x80;
    boot[66] = 0x29;
    boot[67..71].copy_from_slice(&0x5D0C_A2D5u32.to_le_bytes());
    boot[71..82].copy_from_slice(b"NO NAME    ");
    boot[82..90].copy_from_slice(b"FAT32   ");
    boot[510] = 0x55;
    boot[511] = 0xAA;
    boot
}

fn fsinfo_sector() -> [u8; BLOCK_SIZE] {
    let mut info = [0u8; BLOCK_SIZE];
    info[0..4].copy_from_slice(&0x4161_5252u32.to_le_bytes());
    info[484..488].copy_from_slice(&0x6141_7272u32.to_le_bytes());
    // Free count and next-free are unknown.
    info[488..492].copy_from_slice(&u32::MAX.to_le_bytes());
    info[492..496].copy_from_slice(&u32::MAX.to_le_bytes());
    info[510] = 0x55;
    info[511] = 0xAA;
    info
}

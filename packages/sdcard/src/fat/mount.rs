use super::*;

const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];
const MIN_FAT32_CLUSTERS: u32 = 65_525;

impl<D: BlockDevice> FatVolume<D> {
    /// Mounts the first FAT32 volume on `device`.
    ///
    /// Sector 0 is tried as an MBR first; if no FAT partition is listed (or
    /// the listed one does not parse), sector 0 is taken as the boot sector
    /// of a partitionless card.
    pub fn mount(mut device: D) -> Result<Self, FatError<D::Error>> {
        let mut sector0 = [0u8; SECTOR_SIZE];
        device
            .read_block(0, &mut sector0)
            .map_err(FatError::Device)?;

        let partitioned = match first_fat_partition_lba(&sector0) {
            Some(start) => match parse_boot_sector(&mut device, start) {
                Ok(layout) => Some(layout),
                Err(FatError::Device(err)) => return Err(FatError::Device(err)),
                Err(_) => None,
            },
            None => None,
        };
        let layout = match partitioned {
            Some(layout) => layout,
            None => parse_boot_sector(&mut device, 0)?,
        };

        log::debug!(
            "sdfat: mount_ok clusters={} cluster_bytes={} fats={}",
            layout.total_clusters,
            layout.cluster_size(),
            layout.fats
        );
        Ok(Self {
            device,
            layout,
            next_free_hint: None,
        })
    }
}

fn parse_boot_sector<D: BlockDevice>(
    device: &mut D,
    partition_start_lba: u32,
) -> Result<VolumeLayout, FatError<D::Error>> {
    let mut boot = [0u8; SECTOR_SIZE];
    device
        .read_block(partition_start_lba, &mut boot)
        .map_err(FatError::Device)?;

    if boot[510..512] != BOOT_SIGNATURE {
        return Err(FatError::InvalidBootSector);
    }

    let bytes_per_sector = read_u16(&boot, 11);
    if bytes_per_sector as usize != SECTOR_SIZE {
        return Err(FatError::UnsupportedSectorSize(bytes_per_sector));
    }

    let sectors_per_cluster = boot[13];
    if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
        return Err(FatError::UnsupportedSectorsPerCluster(sectors_per_cluster));
    }

    let reserved_sectors = read_u16(&boot, 14) as u32;
    let fats = boot[16];
    if fats == 0 {
        return Err(FatError::InvalidBootSector);
    }

    // FAT12/16 carry a 16-bit FAT size; FAT32 leaves it zero.
    let fat_size_16 = read_u16(&boot, 22) as u32;
    let fat_size_32 = read_u32(&boot, 36);
    if fat_size_16 != 0 || fat_size_32 == 0 {
        return Err(FatError::UnsupportedFatType);
    }

    let total_16 = read_u16(&boot, 19) as u32;
    let total_32 = read_u32(&boot, 32);
    let total_sectors = if total_16 != 0 { total_16 } else { total_32 };
    if total_sectors == 0 {
        return Err(FatError::InvalidBootSector);
    }

    let root_cluster = read_u32(&boot, 44);
    if root_cluster < 2 {
        return Err(FatError::InvalidBootSector);
    }

    let fat_start_lba = partition_start_lba.saturating_add(reserved_sectors);
    let fat_sectors = fat_size_32.saturating_mul(fats as u32);
    let data_start_lba = fat_start_lba.saturating_add(fat_sectors);
    let used_sectors = reserved_sectors.saturating_add(fat_sectors);
    if total_sectors <= used_sectors {
        return Err(FatError::InvalidBootSector);
    }
    let total_clusters = (total_sectors - used_sectors) / sectors_per_cluster as u32;
    if total_clusters < MIN_FAT32_CLUSTERS {
        return Err(FatError::UnsupportedFatType);
    }
    // The FAT must be able to describe every data cluster.
    let fat_entries = fat_size_32 as u64 * (SECTOR_SIZE as u64 / 4);
    if fat_entries < total_clusters as u64 + 2 || root_cluster > total_clusters + 1 {
        return Err(FatError::InvalidBootSector);
    }

    Ok(VolumeLayout {
        fat_start_lba,
        fat_size_sectors: fat_size_32,
        fats,
        data_start_lba,
        sectors_per_cluster,
        root_cluster,
        total_clusters,
    })
}

fn first_fat_partition_lba(sector0: &[u8; SECTOR_SIZE]) -> Option<u32> {
    if sector0[510..512] != BOOT_SIGNATURE {
        return None;
    }
    (0..4)
        .map(|idx| 446 + idx * 16)
        .filter(|base| matches!(sector0[base + 4], 0x0B | 0x0C | 0x0E | 0x06 | 0x04))
        .map(|base| read_u32(sector0, base + 8))
        .find(|start| *start != 0)
}

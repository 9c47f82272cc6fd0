use super::*;

/// Volume capacity in allocation units (clusters).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VolumeStats {
    /// Bytes per allocation unit.
    pub block_size: u32,
    pub block_count: u32,
    pub free_blocks: u32,
}

impl VolumeStats {
    pub fn total_bytes(&self) -> u64 {
        self.block_count as u64 * self.block_size as u64
    }

    pub fn free_bytes(&self) -> u64 {
        self.free_blocks as u64 * self.block_size as u64
    }

    pub fn used_bytes(&self) -> u64 {
        self.total_bytes() - self.free_bytes()
    }
}

impl<D: BlockDevice> FatVolume<D> {
    /// Counts free clusters by scanning the first FAT.
    pub fn stats(&mut self) -> Result<VolumeStats, FatError<D::Error>> {
        let max_cluster = self.layout.max_cluster();
        let entries_per_sector = (SECTOR_SIZE / 4) as u32;
        let last_sector = max_cluster / entries_per_sector;

        let mut free_blocks = 0u32;
        let mut lowest_free = None;
        for sector_offset in 0..=last_sector {
            let mut sector = [0u8; SECTOR_SIZE];
            self.read_sector(self.layout.fat_start_lba + sector_offset, &mut sector)?;
            let first_entry = sector_offset * entries_per_sector;
            for (idx, raw) in sector.chunks_exact(4).enumerate() {
                let cluster = first_entry + idx as u32;
                if cluster < 2 || cluster > max_cluster {
                    continue;
                }
                if read_u32(raw, 0) & FAT32_ENTRY_MASK == 0 {
                    free_blocks += 1;
                    lowest_free.get_or_insert(cluster);
                }
            }
        }

        if let Some(cluster) = lowest_free {
            self.lower_next_free_hint(cluster);
        }
        log::debug!(
            "sdfat: stats clusters={} free={}",
            self.layout.total_clusters,
            free_blocks
        );

        Ok(VolumeStats {
            block_size: self.cluster_size() as u32,
            block_count: self.layout.total_clusters,
            free_blocks,
        })
    }
}

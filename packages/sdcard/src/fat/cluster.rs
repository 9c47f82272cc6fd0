use super::*;

pub(super) fn clusters_for_size(size: usize, cluster_size: usize) -> usize {
    size.div_ceil(cluster_size)
}

impl<D: BlockDevice> FatVolume<D> {
    pub(super) fn cluster_to_lba(&self, cluster: u32) -> Result<u32, FatError<D::Error>> {
        if cluster < 2 || cluster > self.layout.max_cluster() {
            return Err(FatError::BadCluster(cluster));
        }
        Ok(self.layout.data_start_lba.saturating_add(
            (cluster - 2).saturating_mul(self.layout.sectors_per_cluster as u32),
        ))
    }

    /// Locates the FAT entry of `cluster`: sector offset within one FAT and
    /// byte index within that sector.
    fn fat_entry_position(&self, cluster: u32) -> Result<(u32, usize), FatError<D::Error>> {
        let byte_offset = cluster as u64 * 4;
        let sector_offset = (byte_offset / SECTOR_SIZE as u64) as u32;
        let index = (byte_offset % SECTOR_SIZE as u64) as usize;
        if sector_offset >= self.layout.fat_size_sectors {
            return Err(FatError::BadCluster(cluster));
        }
        Ok((sector_offset, index))
    }

    pub(super) fn read_fat_entry(&mut self, cluster: u32) -> Result<u32, FatError<D::Error>> {
        let (sector_offset, index) = self.fat_entry_position(cluster)?;
        let lba = self.layout.fat_start_lba.saturating_add(sector_offset);
        let mut sector = [0u8; SECTOR_SIZE];
        self.read_sector(lba, &mut sector)?;
        Ok(read_u32(&sector, index) & FAT32_ENTRY_MASK)
    }

    /// Writes `value` into every FAT copy, keeping the reserved top bits.
    pub(super) fn set_fat_entry(&mut self, cluster: u32, value: u32) -> Result<(), FatError<D::Error>> {
        let (sector_offset, index) = self.fat_entry_position(cluster)?;
        for fat_idx in 0..self.layout.fats as u32 {
            let fat_base = self
                .layout
                .fat_start_lba
                .saturating_add(fat_idx.saturating_mul(self.layout.fat_size_sectors));
            let lba = fat_base.saturating_add(sector_offset);
            let mut sector = [0u8; SECTOR_SIZE];
            self.read_sector(lba, &mut sector)?;
            let old = read_u32(&sector, index);
            let new = (old & !FAT32_ENTRY_MASK) | (value & FAT32_ENTRY_MASK);
            sector[index..index + 4].copy_from_slice(&new.to_le_bytes());
            self.write_sector(lba, &sector)?;
        }
        Ok(())
    }

    pub(super) fn next_cluster(&mut self, cluster: u32) -> Result<Option<u32>, FatError<D::Error>> {
        let value = self.read_fat_entry(cluster)?;
        if value >= FAT32_EOC {
            return Ok(None);
        }
        if value < 2 || value > self.layout.max_cluster() {
            return Err(FatError::BadCluster(value));
        }
        Ok(Some(value))
    }

    /// Follows the chain from `first_cluster` for `index` links.
    pub(super) fn cluster_at_index(
        &mut self,
        first_cluster: u32,
        index: usize,
    ) -> Result<u32, FatError<D::Error>> {
        if first_cluster < 2 {
            return Err(FatError::BadCluster(first_cluster));
        }
        let mut cluster = first_cluster;
        for _ in 0..index {
            cluster = self
                .next_cluster(cluster)?
                .ok_or(FatError::ClusterChainTooLong)?;
        }
        Ok(cluster)
    }

    /// Last cluster of the chain starting at `first_cluster`.
    pub(super) fn chain_tail(&mut self, first_cluster: u32) -> Result<u32, FatError<D::Error>> {
        let mut tail = first_cluster;
        let mut visited = 0u32;
        while let Some(next) = self.next_cluster(tail)? {
            visited = visited.saturating_add(1);
            if visited > self.layout.chain_limit() {
                return Err(FatError::ClusterChainTooLong);
            }
            tail = next;
        }
        Ok(tail)
    }

    fn find_free_cluster(&mut self, start_cluster: u32) -> Result<u32, FatError<D::Error>> {
        let max_cluster = self.layout.max_cluster();
        let start = start_cluster.clamp(2, max_cluster);

        for cluster in (start..=max_cluster).chain(2..start) {
            if self.read_fat_entry(cluster)? == 0 {
                return Ok(cluster);
            }
        }
        Err(FatError::NoFreeCluster)
    }

    /// Allocates and links `count` free clusters, returning the first.
    ///
    /// Nothing stays allocated when this fails part way through.
    pub(super) fn allocate_chain(&mut self, count: u32) -> Result<u32, FatError<D::Error>> {
        let mut first = 0u32;
        let mut prev = 0u32;
        let mut search_from = self.next_free_hint().unwrap_or(2);

        for _ in 0..count {
            let cluster = match self.claim_free_cluster(search_from, prev) {
                Ok(cluster) => cluster,
                Err(err) if first != 0 => return Err(self.abandon_chain(first, err)),
                Err(err) => return Err(err),
            };
            if first == 0 {
                first = cluster;
            }
            prev = cluster;
            search_from = cluster.saturating_add(1);
        }

        if prev != 0 {
            self.set_next_free_hint(search_from);
        }
        Ok(first)
    }

    /// Marks the next free cluster at or after `search_from` as end of chain
    /// and links it behind `prev` when that is non-zero.
    fn claim_free_cluster(&mut self, search_from: u32, prev: u32) -> Result<u32, FatError<D::Error>> {
        let cluster = self.find_free_cluster(search_from)?;
        self.set_fat_entry(cluster, FAT32_EOC_WRITE)?;
        if prev != 0 {
            if let Err(err) = self.set_fat_entry(prev, cluster) {
                return Err(self.abandon_chain(cluster, err));
            }
        }
        Ok(cluster)
    }

    /// Frees a chain left behind by a failed operation and hands back `err`.
    pub(super) fn abandon_chain(&mut self, first_cluster: u32, err: FatError<D::Error>) -> FatError<D::Error> {
        if let Err(free_err) = self.free_chain(first_cluster) {
            log::warn!(
                "sdfat: abandon_error cluster={} err={:?}",
                first_cluster,
                free_err
            );
        }
        err
    }

    pub(super) fn free_chain(&mut self, start_cluster: u32) -> Result<(), FatError<D::Error>> {
        if start_cluster < 2 {
            return Ok(());
        }

        let max_cluster = self.layout.max_cluster();
        let mut cluster = start_cluster;
        let mut visited = 0u32;

        loop {
            if visited > self.layout.chain_limit() {
                return Err(FatError::ClusterChainTooLong);
            }
            visited = visited.saturating_add(1);

            let entry = self.read_fat_entry(cluster)?;
            self.set_fat_entry(cluster, 0)?;
            self.lower_next_free_hint(cluster);

            if entry >= FAT32_EOC || entry < 2 || entry > max_cluster {
                break;
            }
            cluster = entry;
        }

        Ok(())
    }

    /// Zeroes every sector of `cluster`.
    pub(super) fn zero_cluster(&mut self, cluster: u32) -> Result<(), FatError<D::Error>> {
        let first_lba = self.cluster_to_lba(cluster)?;
        let zero = [0u8; SECTOR_SIZE];
        for offset in 0..self.layout.sectors_per_cluster as u32 {
            self.write_sector(first_lba + offset, &zero)?;
        }
        Ok(())
    }
}

use super::*;
use cluster::clusters_for_size;

impl<D: BlockDevice> FatVolume<D> {
    /// Appends `data` to the file at `path`, creating it when missing.
    ///
    /// Clusters added for the new data are released again when the append
    /// fails, leaving the file as it was.
    pub fn append_file(&mut self, path: &str, data: &[u8]) -> Result<(), FatError<D::Error>> {
        let parsed = ParsedPath::parse(path)?;
        let (parents, leaf) = parsed.split_leaf()?;
        let parent_cluster = self.resolve_dir_cluster(parents)?;
        let Some(found) = self.scan_directory(parent_cluster, Some(leaf), 0)?.found else {
            let size = u32::try_from(data.len()).map_err(|_| FatError::FileTooLarge)?;
            let first_cluster = self.allocate_with_data(data)?;
            return self
                .create_entry(parent_cluster, leaf, ATTR_ARCHIVE, first_cluster, size)
                .map_err(|err| self.abandon_chain(first_cluster, err));
        };
        if found.record.is_dir() {
            return Err(FatError::IsDirectory);
        }
        if data.is_empty() {
            return Ok(());
        }

        let old_size = found.record.size as usize;
        let new_size = old_size
            .checked_add(data.len())
            .filter(|size| *size <= u32::MAX as usize)
            .ok_or(FatError::FileTooLarge)?;
        let cluster_size = self.cluster_size();
        let old_clusters = clusters_for_size(old_size, cluster_size);
        let new_clusters = clusters_for_size(new_size, cluster_size);

        let mut first_cluster = found.record.first_cluster;
        let mut extension = None;
        if old_clusters == 0 {
            first_cluster = self.allocate_chain(new_clusters as u32)?;
            extension = Some((None, first_cluster));
        } else if new_clusters > old_clusters {
            let tail = self.cluster_at_index(first_cluster, old_clusters - 1)?;
            let extra = self.allocate_chain((new_clusters - old_clusters) as u32)?;
            if let Err(err) = self.set_fat_entry(tail, extra) {
                return Err(self.abandon_chain(extra, err));
            }
            extension = Some((Some(tail), extra));
        }

        let mut record = found.record;
        record.first_cluster = first_cluster;
        record.size = new_size as u32;
        let appended = self
            .write_data_at(first_cluster, old_size, data)
            .and_then(|()| self.write_directory_entry(&found.short_location, &record));
        match (appended, extension) {
            (Err(err), Some((tail, extra))) => Err(self.truncate_extension(tail, extra, err)),
            (result, _) => result,
        }
    }

    /// Cuts a chain extension off at `tail` and frees it, handing back `err`.
    fn truncate_extension(
        &mut self,
        tail: Option<u32>,
        extra: u32,
        err: FatError<D::Error>,
    ) -> FatError<D::Error> {
        if let Some(tail) = tail {
            if let Err(unlink_err) = self.set_fat_entry(tail, FAT32_EOC_WRITE) {
                log::warn!("sdfat: unlink_error cluster={} err={:?}", tail, unlink_err);
                return err;
            }
        }
        self.abandon_chain(extra, err)
    }

    pub fn create_dir(&mut self, path: &str) -> Result<(), FatError<D::Error>> {
        let parsed = ParsedPath::parse(path)?;
        let (parents, leaf) = parsed.split_leaf()?;
        let parent_cluster = self.resolve_dir_cluster(parents)?;
        if self.scan_directory(parent_cluster, Some(leaf), 0)?.found.is_some() {
            return Err(FatError::AlreadyExists);
        }

        let dir_cluster = self.allocate_chain(1)?;
        self.initialize_directory_cluster(dir_cluster, parent_cluster)
            .and_then(|()| self.create_entry(parent_cluster, leaf, ATTR_DIRECTORY, dir_cluster, 0))
            .map_err(|err| self.abandon_chain(dir_cluster, err))
    }

    /// Removes a file or an empty directory.
    pub fn remove(&mut self, path: &str) -> Result<(), FatError<D::Error>> {
        let parsed = ParsedPath::parse(path)?;
        let (parents, leaf) = parsed.split_leaf()?;
        let parent_cluster = self.resolve_dir_cluster(parents)?;
        let found = self.find_entry(parent_cluster, leaf)?;

        if found.record.is_dir() && !self.is_directory_empty(found.record.first_cluster)? {
            return Err(FatError::NotEmpty);
        }
        if found.record.first_cluster >= 2 {
            self.free_chain(found.record.first_cluster)?;
        }
        self.mark_found_deleted(&found)
    }

    /// Moves the entry at `src` to `dst`. The destination must not exist;
    /// directories can only be renamed within their parent.
    pub fn rename(&mut self, src: &str, dst: &str) -> Result<(), FatError<D::Error>> {
        let src_path = ParsedPath::parse(src)?;
        let dst_path = ParsedPath::parse(dst)?;
        let (src_parents, src_leaf) = src_path.split_leaf()?;
        let (dst_parents, dst_leaf) = dst_path.split_leaf()?;

        let src_parent = self.resolve_dir_cluster(src_parents)?;
        let dst_parent = self.resolve_dir_cluster(dst_parents)?;
        let src_found = self.find_entry(src_parent, src_leaf)?;
        if src_found.record.is_dir() && src_parent != dst_parent {
            return Err(FatError::CrossDirectoryRenameUnsupported);
        }
        // A destination matching the source itself is a change of case only.
        if let Some(existing) = self.scan_directory(dst_parent, Some(dst_leaf), 0)?.found {
            if existing.short_location != src_found.short_location {
                return Err(FatError::AlreadyExists);
            }
        }

        let record = src_found.record;
        self.create_entry(dst_parent, dst_leaf, record.attr, record.first_cluster, record.size)?;
        self.mark_found_deleted(&src_found)
    }

    /// Writes `data` sector by sector along the chain at `first_cluster`.
    pub(super) fn write_chain_data(&mut self, first_cluster: u32, data: &[u8]) -> Result<(), FatError<D::Error>> {
        let mut cluster = first_cluster;
        let mut offset = 0usize;
        let mut visited = 0u32;

        while offset < data.len() {
            if visited > self.layout.chain_limit() {
                return Err(FatError::ClusterChainTooLong);
            }
            visited = visited.saturating_add(1);

            let first_lba = self.cluster_to_lba(cluster)?;
            for sector_offset in 0..self.layout.sectors_per_cluster as u32 {
                if offset >= data.len() {
                    break;
                }
                let mut sector = [0u8; SECTOR_SIZE];
                let chunk = (data.len() - offset).min(SECTOR_SIZE);
                sector[..chunk].copy_from_slice(&data[offset..offset + chunk]);
                self.write_sector(first_lba + sector_offset, &sector)?;
                offset += chunk;
            }

            if offset >= data.len() {
                break;
            }
            cluster = self
                .next_cluster(cluster)?
                .ok_or(FatError::ClusterChainTooLong)?;
        }

        Ok(())
    }

    /// Writes `data` at byte `start_offset` of the chain, merging partial
    /// sectors with what is already on disk.
    fn write_data_at(
        &mut self,
        first_cluster: u32,
        start_offset: usize,
        data: &[u8],
    ) -> Result<(), FatError<D::Error>> {
        let cluster_size = self.cluster_size();
        let mut cluster = self.cluster_at_index(first_cluster, start_offset / cluster_size)?;
        let mut cluster_offset = start_offset % cluster_size;
        let mut data_idx = 0usize;

        while data_idx < data.len() {
            let first_lba = self.cluster_to_lba(cluster)?;
            let mut byte_in_sector = cluster_offset % SECTOR_SIZE;

            for sector_off in cluster_offset / SECTOR_SIZE..self.layout.sectors_per_cluster as usize {
                if data_idx >= data.len() {
                    break;
                }
                let lba = first_lba + sector_off as u32;
                let write_len = (data.len() - data_idx).min(SECTOR_SIZE - byte_in_sector);
                let mut sector = [0u8; SECTOR_SIZE];
                if byte_in_sector != 0 || write_len < SECTOR_SIZE {
                    self.read_sector(lba, &mut sector)?;
                }
                sector[byte_in_sector..byte_in_sector + write_len]
                    .copy_from_slice(&data[data_idx..data_idx + write_len]);
                self.write_sector(lba, &sector)?;
                data_idx += write_len;
                byte_in_sector = 0;
            }

            cluster_offset = 0;
            if data_idx < data.len() {
                cluster = self
                    .next_cluster(cluster)?
                    .ok_or(FatError::ClusterChainTooLong)?;
            }
        }

        Ok(())
    }
}

use super::*;
use cluster::clusters_for_size;

impl<D: BlockDevice> FatVolume<D> {
    /// Fills `out` with the entries of the directory at `path` and returns
    /// how many the directory holds. `.` and `..` are skipped. A count above
    /// `out.len()` means the listing did not fit and only the first
    /// `out.len()` entries were stored.
    pub fn list_dir(&mut self, path: &str, out: &mut [FatDirEntry]) -> Result<usize, FatError<D::Error>> {
        let parsed = ParsedPath::parse(path)?;
        let dir_cluster = self.resolve_dir_cluster(parsed.dirs())?;

        let mut entries_found = 0usize;
        let mut cluster = dir_cluster;
        let mut visited = 0u32;
        let mut lfn = LfnState::new();

        loop {
            if visited > self.layout.chain_limit() {
                return Err(FatError::ClusterChainTooLong);
            }
            visited = visited.saturating_add(1);

            let first_lba = self.cluster_to_lba(cluster)?;
            for sector_offset in 0..self.layout.sectors_per_cluster as u32 {
                let lba = first_lba + sector_offset;
                let mut sector = [0u8; SECTOR_SIZE];
                self.read_sector(lba, &mut sector)?;

                for slot in 0..DIR_ENTRIES_PER_SECTOR {
                    let base = slot * DIR_ENTRY_SIZE;
                    match sector[base] {
                        0x00 => return Ok(entries_found),
                        0xE5 => {
                            lfn.clear();
                            continue;
                        }
                        _ => {}
                    }

                    let attr = sector[base + 11];
                    if attr == ATTR_LONG_NAME {
                        let location = DirLocation {
                            lba,
                            slot: slot as u8,
                        };
                        consume_lfn_entry(&mut lfn, location, &sector[base..base + DIR_ENTRY_SIZE]);
                        continue;
                    }
                    if (attr & ATTR_VOLUME) != 0 {
                        lfn.clear();
                        continue;
                    }

                    let entry = names::parse_record(&sector, base, &lfn).to_entry();
                    lfn.clear();
                    if entry.is_dot_entry() {
                        continue;
                    }
                    if let Some(slot) = out.get_mut(entries_found) {
                        *slot = entry;
                    }
                    entries_found += 1;
                }
            }

            match self.next_cluster(cluster)? {
                Some(next) => cluster = next,
                None => return Ok(entries_found),
            }
        }
    }

    /// Reads the whole file at `path` into the front of `out`.
    pub fn read_file(&mut self, path: &str, out: &mut [u8]) -> Result<usize, FatError<D::Error>> {
        let parsed = ParsedPath::parse(path)?;
        let (parents, leaf) = parsed.split_leaf()?;
        let parent_cluster = self.resolve_dir_cluster(parents)?;
        let record = self.find_entry(parent_cluster, leaf)?.record;
        if record.is_dir() {
            return Err(FatError::IsDirectory);
        }

        let file_size = record.size as usize;
        if out.len() < file_size {
            return Err(FatError::BufferTooSmall { needed: file_size });
        }
        if file_size == 0 {
            return Ok(0);
        }

        let mut written = 0usize;
        let mut cluster = self.cluster_at_index(record.first_cluster, 0)?;
        let mut visited = 0u32;

        loop {
            if visited > self.layout.chain_limit() {
                return Err(FatError::ClusterChainTooLong);
            }
            visited = visited.saturating_add(1);

            let first_lba = self.cluster_to_lba(cluster)?;
            for sector_offset in 0..self.layout.sectors_per_cluster as u32 {
                let mut sector = [0u8; SECTOR_SIZE];
                self.read_sector(first_lba + sector_offset, &mut sector)?;

                let chunk = (file_size - written).min(SECTOR_SIZE);
                out[written..written + chunk].copy_from_slice(&sector[..chunk]);
                written += chunk;
                if written == file_size {
                    return Ok(written);
                }
            }

            cluster = self
                .next_cluster(cluster)?
                .ok_or(FatError::ClusterChainTooLong)?;
        }
    }

    /// Creates or replaces the file at `path` with `data`.
    ///
    /// The parent directory must exist. A replaced file keeps its old content
    /// until the new chain is written and its entry updated, so a failed
    /// write changes nothing; the old chain is released last.
    pub fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), FatError<D::Error>> {
        let size = u32::try_from(data.len()).map_err(|_| FatError::FileTooLarge)?;
        let parsed = ParsedPath::parse(path)?;
        let (parents, leaf) = parsed.split_leaf()?;
        let parent_cluster = self.resolve_dir_cluster(parents)?;
        let existing = self.scan_directory(parent_cluster, Some(leaf), 0)?.found;
        if existing.is_some_and(|found| found.record.is_dir()) {
            return Err(FatError::IsDirectory);
        }

        let first_cluster = self.allocate_with_data(data)?;
        let stored = match &existing {
            Some(found) => {
                let mut record = found.record;
                record.first_cluster = first_cluster;
                record.size = size;
                self.write_directory_entry(&found.short_location, &record)
            }
            None => self.create_entry(parent_cluster, leaf, ATTR_ARCHIVE, first_cluster, size),
        };
        if let Err(err) = stored {
            return Err(self.abandon_chain(first_cluster, err));
        }

        match existing {
            Some(found) if found.record.first_cluster >= 2 => self.free_chain(found.record.first_cluster),
            _ => Ok(()),
        }
    }

    /// Allocates a fresh chain holding `data`; cluster 0 for empty data.
    pub(super) fn allocate_with_data(&mut self, data: &[u8]) -> Result<u32, FatError<D::Error>> {
        let clusters_needed = clusters_for_size(data.len(), self.cluster_size());
        if clusters_needed == 0 {
            return Ok(0);
        }
        let first = self.allocate_chain(clusters_needed as u32)?;
        if let Err(err) = self.write_chain_data(first, data) {
            return Err(self.abandon_chain(first, err));
        }
        Ok(first)
    }

    /// Looks up a single entry. The root reports itself as the directory `/`.
    pub fn stat(&mut self, path: &str) -> Result<FatDirEntry, FatError<D::Error>> {
        let parsed = ParsedPath::parse(path)?;
        let Ok((parents, leaf)) = parsed.split_leaf::<D::Error>() else {
            let mut root = FatDirEntry::EMPTY;
            root.name[0] = b'/';
            root.name_len = 1;
            root.is_dir = true;
            return Ok(root);
        };
        let parent_cluster = self.resolve_dir_cluster(parents)?;
        Ok(self.find_entry(parent_cluster, leaf)?.record.to_entry())
    }
}

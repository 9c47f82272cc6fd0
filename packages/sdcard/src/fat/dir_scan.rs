use super::*;
use names::{parse_record, segment_matches_record};

/// What a directory slot's first byte says about it.
fn classify_directory_slot(first: u8, reached_directory_end: bool) -> (bool, bool) {
    if reached_directory_end {
        return (true, true);
    }
    match first {
        // 0x00 marks this entry free and all following entries free.
        0x00 => (true, true),
        0xE5 => (true, false),
        _ => (false, false),
    }
}

/// Extends the current run of free slots and captures the first run long
/// enough for `needed_free_slots` entries.
fn record_free_slot(
    free_run: &mut FreeSlots,
    free_run_len: &mut usize,
    needed_free_slots: usize,
    free_slots: &mut Option<FreeSlots>,
    location: DirLocation,
) {
    if *free_run_len < free_run.len() {
        free_run[*free_run_len] = location;
        *free_run_len += 1;
    } else {
        free_run.copy_within(1.., 0);
        free_run[free_run.len() - 1] = location;
    }

    if free_slots.is_none() && *free_run_len >= needed_free_slots {
        let start = *free_run_len - needed_free_slots;
        let mut selected = [DirLocation::ZERO; MAX_LFN_SLOTS + 1];
        selected[..needed_free_slots].copy_from_slice(&free_run[start..start + needed_free_slots]);
        *free_slots = Some(selected);
    }
}

impl<D: BlockDevice> FatVolume<D> {
    /// Walks the directory at `dir_cluster` looking for `target_name` and, if
    /// `needed_free_slots > 0`, for a run of that many free slots.
    pub(super) fn scan_directory(
        &mut self,
        dir_cluster: u32,
        target_name: Option<&PathSegment>,
        needed_free_slots: usize,
    ) -> Result<DirLookup, FatError<D::Error>> {
        let mut cluster = dir_cluster;
        let mut free_slots = None;
        let mut free_run = [DirLocation::ZERO; MAX_LFN_SLOTS + 1];
        let mut free_run_len = 0usize;
        let mut reached_directory_end = false;
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
                    let location = DirLocation {
                        lba,
                        slot: slot as u8,
                    };
                    let (is_free_slot, end) =
                        classify_directory_slot(sector[base], reached_directory_end);
                    reached_directory_end = end;
                    if is_free_slot {
                        lfn.clear();
                        if needed_free_slots > 0 {
                            record_free_slot(
                                &mut free_run,
                                &mut free_run_len,
                                needed_free_slots,
                                &mut free_slots,
                                location,
                            );
                        }
                        // Nothing past the end marker can match a name.
                        let done_searching = target_name.is_none() || reached_directory_end;
                        let done_reserving = needed_free_slots == 0 || free_slots.is_some();
                        if done_searching && done_reserving {
                            return Ok(DirLookup {
                                found: None,
                                free: free_slots,
                            });
                        }
                        continue;
                    }

                    let attr = sector[base + 11];
                    if attr == ATTR_LONG_NAME {
                        consume_lfn_entry(&mut lfn, location, &sector[base..base + DIR_ENTRY_SIZE]);
                        free_run_len = 0;
                        continue;
                    }
                    if (attr & ATTR_VOLUME) != 0 {
                        lfn.clear();
                        free_run_len = 0;
                        continue;
                    }

                    if let Some(target) = target_name {
                        let record = parse_record(&sector, base, &lfn);
                        if segment_matches_record(target, &record) {
                            let mut lfn_locations = [DirLocation::ZERO; MAX_LFN_SLOTS];
                            let (_, _, lfn_count) = build_display_name(&lfn, &record.short_name);
                            lfn_locations[..lfn_count].copy_from_slice(&lfn.lfn_locations[..lfn_count]);
                            return Ok(DirLookup {
                                found: Some(DirFound {
                                    short_location: location,
                                    lfn_locations,
                                    lfn_count: lfn_count as u8,
                                    record,
                                }),
                                free: free_slots,
                            });
                        }
                    }
                    lfn.clear();
                    free_run_len = 0;
                }
            }

            match self.next_cluster(cluster)? {
                Some(next) => cluster = next,
                None => {
                    return Ok(DirLookup {
                        found: None,
                        free: free_slots,
                    });
                }
            }
        }
    }

    pub(super) fn find_entry(
        &mut self,
        dir_cluster: u32,
        name: &PathSegment,
    ) -> Result<DirFound, FatError<D::Error>> {
        self.scan_directory(dir_cluster, Some(name), 0)?
            .found
            .ok_or(FatError::NotFound)
    }

    /// Finds `needed_slots` consecutive free slots, growing the directory
    /// by one zeroed cluster at a time when it is full.
    pub(super) fn reserve_directory_slots(
        &mut self,
        dir_cluster: u32,
        needed_slots: usize,
    ) -> Result<FreeSlots, FatError<D::Error>> {
        loop {
            if let Some(free) = self.scan_directory(dir_cluster, None, needed_slots)?.free {
                return Ok(free);
            }
            self.extend_directory_chain(dir_cluster)?;
        }
    }

    fn extend_directory_chain(&mut self, dir_cluster: u32) -> Result<(), FatError<D::Error>> {
        let tail = self.chain_tail(dir_cluster)?;
        let new_cluster = self.allocate_chain(1)?;
        self.zero_cluster(new_cluster)?;
        self.set_fat_entry(tail, new_cluster)
    }

    /// Resolves directory segments from the root to a directory cluster.
    pub(super) fn resolve_dir_cluster(
        &mut self,
        path: &[PathSegment],
    ) -> Result<u32, FatError<D::Error>> {
        let mut cluster = self.layout.root_cluster;
        for segment in path {
            let record = self.find_entry(cluster, segment)?.record;
            if !record.is_dir() {
                return Err(FatError::NotDirectory);
            }
            // ".." entries pointing at the root store cluster 0.
            cluster = if record.first_cluster >= 2 {
                record.first_cluster
            } else {
                self.layout.root_cluster
            };
        }
        Ok(cluster)
    }

    pub(super) fn is_directory_empty(&mut self, dir_cluster: u32) -> Result<bool, FatError<D::Error>> {
        self.any_short_entry(dir_cluster, |short| short != &DOT_NAME && short != &DOTDOT_NAME)
            .map(|found| !found)
    }

    pub(super) fn short_name_exists(
        &mut self,
        dir_cluster: u32,
        short_name: &[u8; 11],
    ) -> Result<bool, FatError<D::Error>> {
        self.any_short_entry(dir_cluster, |short| short == short_name)
    }

    /// True when some live short entry in the directory satisfies `pred`.
    fn any_short_entry<F>(&mut self, dir_cluster: u32, pred: F) -> Result<bool, FatError<D::Error>>
    where
        F: Fn(&[u8; 11]) -> bool,
    {
        let mut cluster = dir_cluster;
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
                for entry in sector.chunks_exact(DIR_ENTRY_SIZE) {
                    match entry[0] {
                        0x00 => return Ok(false),
                        0xE5 => continue,
                        _ => {}
                    }
                    let attr = entry[11];
                    if attr == ATTR_LONG_NAME || (attr & ATTR_VOLUME) != 0 {
                        continue;
                    }
                    let mut short = [0u8; 11];
                    short.copy_from_slice(&entry[..11]);
                    if pred(&short) {
                        return Ok(true);
                    }
                }
            }
            match self.next_cluster(cluster)? {
                Some(next) => cluster = next,
                None => return Ok(false),
            }
        }
    }
}

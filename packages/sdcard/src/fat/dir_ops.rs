use super::*;
use names::{encode_long_name, encode_short_name, lfn_entry, make_short_alias, short_name_checksum};

const MAX_ALIAS_ATTEMPTS: u32 = 10_000;

/// The on-disk name chosen for a new entry.
struct NewEntryName {
    short_name: [u8; 11],
    lfn: heapless::Vec<u16, { MAX_LFN_SLOTS * 13 }>,
}

impl NewEntryName {
    fn slots(&self) -> usize {
        if self.lfn.is_empty() {
            1
        } else {
            self.lfn.len().div_ceil(13) + 1
        }
    }
}

impl<D: BlockDevice> FatVolume<D> {
    fn write_dir_slot(
        &mut self,
        location: &DirLocation,
        entry: &[u8; DIR_ENTRY_SIZE],
    ) -> Result<(), FatError<D::Error>> {
        let mut sector = [0u8; SECTOR_SIZE];
        self.read_sector(location.lba, &mut sector)?;
        let base = location.slot as usize * DIR_ENTRY_SIZE;
        sector[base..base + DIR_ENTRY_SIZE].copy_from_slice(entry);
        self.write_sector(location.lba, &sector)
    }

    /// Rewrites the short entry at `location` from `record`.
    pub(super) fn write_directory_entry(
        &mut self,
        location: &DirLocation,
        record: &DirRecord,
    ) -> Result<(), FatError<D::Error>> {
        self.write_dir_slot(location, &short_entry(record))
    }

    /// Creates a directory entry named `name` in `parent_cluster`.
    pub(super) fn create_entry(
        &mut self,
        parent_cluster: u32,
        name: &PathSegment,
        attr: u8,
        first_cluster: u32,
        size: u32,
    ) -> Result<(), FatError<D::Error>> {
        let entry_name = self.select_new_entry_name(parent_cluster, name.as_bytes())?;
        let needed_slots = entry_name.slots();
        let free_slots = self.reserve_directory_slots(parent_cluster, needed_slots)?;
        let record = DirRecord {
            short_name: entry_name.short_name,
            display_name: name.name,
            display_name_len: name.len,
            attr,
            first_cluster,
            size,
        };
        self.write_new_entry(&free_slots[..needed_slots], &record, &entry_name.lfn)
    }

    /// Writes the LFN chain (highest sequence first) and then the short entry.
    fn write_new_entry(
        &mut self,
        slots: &[DirLocation],
        record: &DirRecord,
        lfn_utf16: &[u16],
    ) -> Result<(), FatError<D::Error>> {
        let lfn_slots = slots.len().saturating_sub(1);
        let checksum = short_name_checksum(&record.short_name);

        for (idx, location) in slots[..lfn_slots].iter().enumerate() {
            let seq = (lfn_slots - idx) as u8;
            let entry = lfn_entry(seq, idx == 0, checksum, lfn_utf16);
            self.write_dir_slot(location, &entry)?;
        }

        self.write_directory_entry(&slots[lfn_slots], record)
    }

    pub(super) fn mark_found_deleted(&mut self, found: &DirFound) -> Result<(), FatError<D::Error>> {
        for location in &found.lfn_locations[..found.lfn_count as usize] {
            self.mark_slot_deleted(location)?;
        }
        self.mark_slot_deleted(&found.short_location)
    }

    fn mark_slot_deleted(&mut self, location: &DirLocation) -> Result<(), FatError<D::Error>> {
        let mut sector = [0u8; SECTOR_SIZE];
        self.read_sector(location.lba, &mut sector)?;
        sector[location.slot as usize * DIR_ENTRY_SIZE] = 0xE5;
        self.write_sector(location.lba, &sector)
    }

    /// Zeroes a fresh directory cluster and writes its `.` and `..` entries.
    pub(super) fn initialize_directory_cluster(
        &mut self,
        dir_cluster: u32,
        parent_cluster: u32,
    ) -> Result<(), FatError<D::Error>> {
        self.zero_cluster(dir_cluster)?;

        // ".." uses cluster 0 when the parent is the root directory.
        let parent = if parent_cluster == self.layout.root_cluster {
            0
        } else {
            parent_cluster
        };
        let dot = DirRecord {
            short_name: DOT_NAME,
            display_name: [0; FAT_NAME_MAX],
            display_name_len: 0,
            attr: ATTR_DIRECTORY,
            first_cluster: dir_cluster,
            size: 0,
        };
        let dotdot = DirRecord {
            short_name: DOTDOT_NAME,
            first_cluster: parent,
            ..dot
        };

        let first_lba = self.cluster_to_lba(dir_cluster)?;
        let mut sector = [0u8; SECTOR_SIZE];
        sector[..DIR_ENTRY_SIZE].copy_from_slice(&short_entry(&dot));
        sector[DIR_ENTRY_SIZE..DIR_ENTRY_SIZE * 2].copy_from_slice(&short_entry(&dotdot));
        self.write_sector(first_lba, &sector)
    }

    /// Plain 8.3 when `desired` fits and is unused, else LFN plus `~N` alias.
    fn select_new_entry_name(
        &mut self,
        parent_cluster: u32,
        desired: &[u8],
    ) -> Result<NewEntryName, FatError<D::Error>> {
        if let Ok(short_name) = encode_short_name::<D::Error>(desired) {
            if !self.short_name_exists(parent_cluster, &short_name)? {
                return Ok(NewEntryName {
                    short_name,
                    lfn: heapless::Vec::new(),
                });
            }
        }

        let lfn = encode_long_name(desired)?;
        for attempt in 1..MAX_ALIAS_ATTEMPTS {
            let short_name = make_short_alias(desired, attempt);
            if !self.short_name_exists(parent_cluster, &short_name)? {
                return Ok(NewEntryName { short_name, lfn });
            }
        }

        Err(FatError::DirFull)
    }
}

fn short_entry(record: &DirRecord) -> [u8; DIR_ENTRY_SIZE] {
    let mut entry = [0u8; DIR_ENTRY_SIZE];
    entry[..11].copy_from_slice(&record.short_name);
    entry[11] = record.attr;
    entry[20..22].copy_from_slice(&((record.first_cluster >> 16) as u16).to_le_bytes());
    entry[26..28].copy_from_slice(&(record.first_cluster as u16).to_le_bytes());
    entry[28..32].copy_from_slice(&record.size.to_le_bytes());
    entry
}

use super::cluster::clusters_for_size;
use super::names::{
    encode_short_name, lfn_entry, make_short_alias, segment_matches_record, short_name_checksum,
};
use super::*;
use crate::ram::{RamDisk, RamDiskError, MIN_FAT32_SECTORS};

fn make_lfn_entry(seq: u8, is_last: bool, checksum: u8, chars: &[u16]) -> [u8; DIR_ENTRY_SIZE] {
    let mut entry = [0xFFu8; DIR_ENTRY_SIZE];
    entry[0] = seq | if is_last { 0x40 } else { 0 };
    entry[11] = ATTR_LONG_NAME;
    entry[12] = 0;
    entry[13] = checksum;
    entry[26] = 0;
    entry[27] = 0;
    let offsets = [1usize, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];
    for (idx, off) in offsets.iter().enumerate() {
        let value = if idx < chars.len() {
            chars[idx]
        } else if idx == chars.len() {
            0x0000
        } else {
            0xFFFF
        };
        let b = value.to_le_bytes();
        entry[*off] = b[0];
        entry[*off + 1] = b[1];
    }
    entry
}

fn mounted() -> FatVolume<RamDisk> {
    let mut disk = RamDisk::fat32(MIN_FAT32_SECTORS).unwrap();
    disk.init().unwrap();
    FatVolume::mount(disk).unwrap()
}

fn names(volume: &mut FatVolume<RamDisk>, path: &str) -> Vec<String> {
    let mut entries = [FatDirEntry::EMPTY; 64];
    let count = volume.list_dir(path, &mut entries).unwrap();
    assert!(count <= entries.len());
    entries[..count]
        .iter()
        .map(|entry| entry.name().unwrap().to_string())
        .collect()
}

fn read_to_vec(volume: &mut FatVolume<RamDisk>, path: &str) -> Vec<u8> {
    let mut buf = vec![0u8; 8192];
    let len = volume.read_file(path, &mut buf).unwrap();
    buf.truncate(len);
    buf
}

#[test]
fn parse_path_accepts_long_utf8_segments() {
    let mut segments = [PathSegment::EMPTY; MAX_PATH_SEGMENTS];
    let count = parse_path::<()>("/Long Folder/ßeta.txt", &mut segments).unwrap();
    assert_eq!(count, 2);
    assert_eq!(segments[0].as_bytes(), b"Long Folder");
    assert_eq!(segments[1].as_bytes(), "ßeta.txt".as_bytes());
}

#[test]
fn parse_path_bounds_depth_and_segment_length() {
    let mut segments = [PathSegment::EMPTY; MAX_PATH_SEGMENTS];
    assert!(matches!(
        parse_path::<()>("a/b/c/d/e/f/g/h/i", &mut segments),
        Err(FatError::PathTooDeep)
    ));
    let long = "x".repeat(FAT_NAME_MAX + 1);
    assert!(matches!(
        parse_path::<()>(&long, &mut segments),
        Err(FatError::NameTooLong)
    ));
    assert_eq!(parse_path::<()>("//", &mut segments).unwrap(), 0);
}

#[test]
fn build_display_name_from_lfn_sequence() {
    let short = *b"LONGNA~1TXT";
    let checksum = short_name_checksum(&short);
    let long = "LongFileNameData.txt";
    let utf16: Vec<u16> = long.encode_utf16().collect();
    let slots = utf16.len().div_ceil(13);

    let mut lfn = LfnState::new();
    for seq in (1..=slots).rev() {
        let start = (seq - 1) * 13;
        let end = (start + 13).min(utf16.len());
        let entry = make_lfn_entry(seq as u8, seq == slots, checksum, &utf16[start..end]);
        consume_lfn_entry(
            &mut lfn,
            DirLocation {
                lba: 1,
                slot: seq as u8,
            },
            &entry,
        );
    }

    let (name, len, lfn_count) = build_display_name(&lfn, &short);
    assert_eq!(lfn_count, slots);
    assert_eq!(&name[..len], long.as_bytes());
}

#[test]
fn lfn_checksum_mismatch_falls_back_to_short_name() {
    let short = *b"LONGNA~1TXT";
    let utf16: Vec<u16> = "longname.txt".encode_utf16().collect();
    let entry = make_lfn_entry(1, true, short_name_checksum(&short).wrapping_add(1), &utf16);
    let mut lfn = LfnState::new();
    consume_lfn_entry(&mut lfn, DirLocation::ZERO, &entry);

    let (name, len, lfn_count) = build_display_name(&lfn, &short);
    assert_eq!(lfn_count, 0);
    assert_eq!(&name[..len], b"LONGNA~1.TXT");
}

#[test]
fn lfn_entry_places_units_and_terminator() {
    let utf16: Vec<u16> = "Quarterly Report.txt".encode_utf16().collect();
    let checksum = 0x5A;
    assert_eq!(
        lfn_entry(2, true, checksum, &utf16),
        make_lfn_entry(2, true, checksum, &utf16[13..])
    );
    assert_eq!(
        lfn_entry(1, false, checksum, &utf16),
        make_lfn_entry(1, false, checksum, &utf16[..13])
    );
}

#[test]
fn segment_matches_lfn_case_insensitive_ascii() {
    let mut record = DirRecord {
        short_name: *b"LONGNA~1TXT",
        display_name: [0; FAT_NAME_MAX],
        display_name_len: 0,
        attr: ATTR_ARCHIVE,
        first_cluster: 2,
        size: 0,
    };
    let display = b"LongReport.txt";
    record.display_name[..display.len()].copy_from_slice(display);
    record.display_name_len = display.len() as u8;

    let mut seg_name = [0u8; FAT_NAME_MAX];
    seg_name[..display.len()].copy_from_slice(b"longreport.TXT");
    let segment = PathSegment {
        name: seg_name,
        len: display.len() as u8,
    };
    assert!(segment_matches_record(&segment, &record));
}

#[test]
fn short_names_keep_lowercase_out_of_8_3() {
    assert_eq!(encode_short_name::<()>(b"README.TXT").unwrap(), *b"README  TXT");
    assert_eq!(encode_short_name::<()>(b"LOG").unwrap(), *b"LOG        ");
    assert!(encode_short_name::<()>(b"a.txt").is_err());
    assert!(encode_short_name::<()>(b"TOOLONGNAME.TXT").is_err());
    assert!(encode_short_name::<()>(b"A.B.C").is_err());
    assert!(encode_short_name::<()>(b"..").is_err());
}

#[test]
fn short_alias_truncates_and_numbers() {
    assert_eq!(make_short_alias(b"My Long Name.text", 1), *b"MY_LON~1TEX");
    assert_eq!(make_short_alias(b"a.txt", 12), *b"A~12    TXT");
    assert_eq!(make_short_alias(b".hidden", 3), *b"_HIDDE~3   ");
}

#[test]
fn clusters_for_size_rounds_up() {
    assert_eq!(clusters_for_size(0, 1024), 0);
    assert_eq!(clusters_for_size(1, 1024), 1);
    assert_eq!(clusters_for_size(1024, 1024), 1);
    assert_eq!(clusters_for_size(1025, 1024), 2);
}

#[test]
fn fresh_volume_has_empty_root_and_one_used_cluster() {
    let mut volume = mounted();
    assert!(names(&mut volume, "/").is_empty());

    let stats = volume.stats().unwrap();
    assert_eq!(stats.block_size, 512);
    assert_eq!(stats.free_blocks, stats.block_count - 1);
    assert_eq!(stats.total_bytes(), stats.used_bytes() + stats.free_bytes());
}

#[test]
fn written_file_reads_back_under_its_own_case() {
    let mut volume = mounted();
    volume.write_file("a.txt", b"hello").unwrap();

    assert_eq!(names(&mut volume, "/"), ["a.txt"]);
    assert_eq!(read_to_vec(&mut volume, "/a.txt"), b"hello");
    assert_eq!(read_to_vec(&mut volume, "A.TXT"), b"hello");

    let entry = volume.stat("a.txt").unwrap();
    assert_eq!(entry.size, 5);
    assert!(!entry.is_dir);
}

#[test]
fn overwrite_truncates_and_frees_old_clusters() {
    let mut volume = mounted();
    volume.write_file("DATA.BIN", &[7u8; 1536]).unwrap();
    let free_before = volume.stats().unwrap().free_blocks;

    volume.write_file("DATA.BIN", b"x").unwrap();
    assert_eq!(volume.stats().unwrap().free_blocks, free_before + 2);
    assert_eq!(read_to_vec(&mut volume, "DATA.BIN"), b"x");
    assert_eq!(names(&mut volume, "/"), ["DATA.BIN"]);
}

#[test]
fn empty_file_holds_no_cluster() {
    let mut volume = mounted();
    let free_before = volume.stats().unwrap().free_blocks;
    volume.write_file("EMPTY.TXT", b"").unwrap();

    assert_eq!(volume.stats().unwrap().free_blocks, free_before);
    assert!(read_to_vec(&mut volume, "EMPTY.TXT").is_empty());
}

#[test]
fn append_extends_across_cluster_boundary() {
    let mut volume = mounted();
    let first: Vec<u8> = (0..500u32).map(|i| i as u8).collect();
    let second: Vec<u8> = (0..100u32).map(|i| (i * 3) as u8).collect();
    volume.write_file("log.txt", &first).unwrap();
    volume.append_file("log.txt", &second).unwrap();

    let mut expected = first.clone();
    expected.extend_from_slice(&second);
    assert_eq!(read_to_vec(&mut volume, "log.txt"), expected);
    assert_eq!(volume.stat("log.txt").unwrap().size, 600);
}

#[test]
fn append_creates_missing_file() {
    let mut volume = mounted();
    volume.append_file("new.log", b"first line\n").unwrap();
    volume.append_file("new.log", b"second line\n").unwrap();
    assert_eq!(read_to_vec(&mut volume, "new.log"), b"first line\nsecond line\n");
}

#[test]
fn long_names_round_trip_through_lfn_chain() {
    let mut volume = mounted();
    let name = "a rather long file name that spans several lfn slots.txt";
    volume.write_file(name, b"long").unwrap();
    volume.write_file("a rather long file name too.txt", b"other").unwrap();

    let mut listed = names(&mut volume, "/");
    listed.sort();
    assert_eq!(listed, ["a rather long file name that spans several lfn slots.txt", "a rather long file name too.txt"]);
    assert_eq!(read_to_vec(&mut volume, name), b"long");
    assert_eq!(read_to_vec(&mut volume, "A RATHER LONG FILE NAME TOO.TXT"), b"other");
}

#[test]
fn full_root_directory_grows_a_new_cluster() {
    let mut volume = mounted();
    for idx in 0..40 {
        volume.write_file(&format!("log file {idx:02}.txt"), &[idx as u8]).unwrap();
    }

    let listed = names(&mut volume, "/");
    assert_eq!(listed.len(), 40);
    assert!(listed.contains(&"log file 39.txt".to_string()));
    assert_eq!(read_to_vec(&mut volume, "log file 17.txt"), [17u8]);
}

#[test]
fn directories_nest_and_refuse_removal_while_populated() {
    let mut volume = mounted();
    volume.create_dir("notes").unwrap();
    volume.write_file("notes/today.txt", b"buy milk").unwrap();

    assert!(volume.stat("notes").unwrap().is_dir);
    assert_eq!(names(&mut volume, "notes"), ["today.txt"]);
    assert!(matches!(volume.create_dir("NOTES"), Err(FatError::AlreadyExists)));
    assert!(matches!(volume.remove("notes"), Err(FatError::NotEmpty)));
    assert!(matches!(volume.read_file("notes", &mut [0u8; 8]), Err(FatError::IsDirectory)));

    volume.remove("notes/today.txt").unwrap();
    volume.remove("notes").unwrap();
    assert!(names(&mut volume, "/").is_empty());
    assert_eq!(volume.stats().unwrap().free_blocks, volume.stats().unwrap().block_count - 1);
}

#[test]
fn rename_moves_entry_and_keeps_content() {
    let mut volume = mounted();
    volume.write_file("a.txt", b"payload").unwrap();
    volume.write_file("b.txt", b"other").unwrap();
    volume.create_dir("archive").unwrap();

    assert!(matches!(volume.rename("a.txt", "b.txt"), Err(FatError::AlreadyExists)));
    assert!(matches!(volume.rename("missing.txt", "c.txt"), Err(FatError::NotFound)));

    volume.rename("a.txt", "c.txt").unwrap();
    let mut listed = names(&mut volume, "/");
    listed.sort();
    assert_eq!(listed, ["archive", "b.txt", "c.txt"]);
    assert_eq!(read_to_vec(&mut volume, "c.txt"), b"payload");

    volume.rename("c.txt", "archive/c.txt").unwrap();
    assert_eq!(names(&mut volume, "archive"), ["c.txt"]);
    assert_eq!(read_to_vec(&mut volume, "archive/c.txt"), b"payload");

    volume.create_dir("archive/old").unwrap();
    assert!(matches!(
        volume.rename("archive/old", "old"),
        Err(FatError::CrossDirectoryRenameUnsupported)
    ));
}

#[test]
fn rename_changing_only_case_keeps_the_file() {
    let mut volume = mounted();
    volume.write_file("notes.txt", b"kept").unwrap();

    volume.rename("notes.txt", "NOTES.TXT").unwrap();
    assert_eq!(names(&mut volume, "/"), ["NOTES.TXT"]);
    volume.rename("NOTES.TXT", "Notes.txt").unwrap();
    assert_eq!(names(&mut volume, "/"), ["Notes.txt"]);
    assert_eq!(read_to_vec(&mut volume, "notes.txt"), b"kept");
}

#[test]
fn listing_reports_entries_beyond_the_buffer() {
    let mut volume = mounted();
    for idx in 0..5 {
        volume.write_file(&format!("f{idx}.txt"), b"x").unwrap();
    }

    let mut entries = [FatDirEntry::EMPTY; 3];
    assert_eq!(volume.list_dir("/", &mut entries).unwrap(), 5);
    assert_eq!(entries[0].name(), Some("f0.txt"));
    assert_eq!(entries[2].name(), Some("f2.txt"));
}

/// Fills the volume with `big.bin` until `spare` clusters remain free.
fn fill_leaving(volume: &mut FatVolume<RamDisk>, spare: u32) {
    let free = volume.stats().unwrap().free_blocks;
    let big = vec![0xABu8; ((free - spare) as usize) * SECTOR_SIZE];
    volume.write_file("big.bin", &big).unwrap();
    assert_eq!(volume.stats().unwrap().free_blocks, spare);
}

#[test]
fn full_volume_rejects_writes_without_losing_space() {
    let mut volume = mounted();
    volume.write_file("keep.txt", b"original").unwrap();
    let free_before_fill = volume.stats().unwrap().free_blocks;
    fill_leaving(&mut volume, 1);
    let full = volume.stats().unwrap();

    // Needs two clusters; the first is claimed before the volume runs out.
    assert!(matches!(
        volume.write_file("new.txt", &[1u8; 2 * SECTOR_SIZE]),
        Err(FatError::NoFreeCluster)
    ));
    assert_eq!(volume.stats().unwrap(), full);
    assert!(matches!(volume.stat("new.txt"), Err(FatError::NotFound)));

    assert!(matches!(
        volume.write_file("keep.txt", &[2u8; 2 * SECTOR_SIZE]),
        Err(FatError::NoFreeCluster)
    ));
    assert!(matches!(
        volume.append_file("keep.txt", &[3u8; 2 * SECTOR_SIZE]),
        Err(FatError::NoFreeCluster)
    ));
    assert_eq!(volume.stats().unwrap(), full);
    assert_eq!(read_to_vec(&mut volume, "keep.txt"), b"original");

    volume.remove("big.bin").unwrap();
    assert_eq!(volume.stats().unwrap().free_blocks, free_before_fill);
}

#[test]
fn overwrite_on_a_full_volume_keeps_old_content_readable() {
    let mut volume = mounted();
    volume.write_file("log.txt", &[7u8; SECTOR_SIZE]).unwrap();
    fill_leaving(&mut volume, 0);

    assert!(matches!(
        volume.write_file("log.txt", &[8u8; 10]),
        Err(FatError::NoFreeCluster)
    ));
    assert_eq!(read_to_vec(&mut volume, "log.txt"), [7u8; SECTOR_SIZE]);

    // Space freed elsewhere lets the overwrite through and releases the old chain.
    volume.remove("big.bin").unwrap();
    let free = volume.stats().unwrap().free_blocks;
    volume.write_file("log.txt", &[8u8; 10]).unwrap();
    assert_eq!(read_to_vec(&mut volume, "log.txt"), [8u8; 10]);
    assert_eq!(volume.stats().unwrap().free_blocks, free);
}

#[test]
fn missing_targets_report_not_found() {
    let mut volume = mounted();
    assert!(matches!(volume.remove("ghost.txt"), Err(FatError::NotFound)));
    assert!(matches!(volume.stat("ghost.txt"), Err(FatError::NotFound)));
    assert!(matches!(volume.write_file("nodir/a.txt", b"x"), Err(FatError::NotFound)));
    assert!(matches!(volume.list_dir("nodir", &mut []), Err(FatError::NotFound)));
}

#[test]
fn short_read_buffer_reports_needed_size() {
    let mut volume = mounted();
    volume.write_file("BIG.TXT", &[1u8; 700]).unwrap();
    assert!(matches!(
        volume.read_file("BIG.TXT", &mut [0u8; 100]),
        Err(FatError::BufferTooSmall { needed: 700 })
    ));
}

#[test]
fn root_stats_as_directory() {
    let mut volume = mounted();
    let root = volume.stat("/").unwrap();
    assert!(root.is_dir);
    assert_eq!(root.name(), Some("/"));
}

#[test]
fn partitioned_card_mounts_and_keeps_data_across_remount() {
    let mut disk = RamDisk::partitioned_fat32(MIN_FAT32_SECTORS + 2048, 2048).unwrap();
    disk.init().unwrap();
    let mut volume = FatVolume::mount(disk).unwrap();
    volume.write_file("boot.cfg", b"mode=1").unwrap();

    let disk = volume.into_device();
    let mut volume = FatVolume::mount(disk).unwrap();
    assert_eq!(read_to_vec(&mut volume, "boot.cfg"), b"mode=1");
}

#[test]
fn blank_card_is_not_a_fat_volume() {
    let mut disk = RamDisk::new(MIN_FAT32_SECTORS);
    disk.init().unwrap();
    assert!(matches!(FatVolume::mount(disk), Err(FatError::InvalidBootSector)));
}

#[test]
fn device_faults_surface_as_device_errors() {
    let mut volume = mounted();
    let handle = volume.device_mut().handle();

    handle.fail_reads(true);
    assert!(matches!(
        volume.list_dir("/", &mut []),
        Err(FatError::Device(RamDiskError::ReadFault(_)))
    ));

    handle.fail_reads(false);
    handle.fail_writes(true);
    assert!(matches!(
        volume.write_file("a.txt", b"x"),
        Err(FatError::Device(RamDiskError::WriteFault(_)))
    ));
}

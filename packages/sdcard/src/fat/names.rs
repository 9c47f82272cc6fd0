use super::*;

/// Byte offsets of the 13 UTF-16 units inside an LFN directory entry.
pub(super) const LFN_UNIT_OFFSETS: [usize; 13] = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];

pub(super) fn parse_path<E>(
    path: &str,
    out: &mut [PathSegment; MAX_PATH_SEGMENTS],
) -> Result<usize, FatError<E>> {
    let mut count = 0usize;
    for seg in path.split('/').filter(|seg| !seg.is_empty()) {
        if count >= MAX_PATH_SEGMENTS {
            return Err(FatError::PathTooDeep);
        }
        let seg = seg.as_bytes();
        if seg.len() > FAT_NAME_MAX {
            return Err(FatError::NameTooLong);
        }
        let mut name = [0u8; FAT_NAME_MAX];
        name[..seg.len()].copy_from_slice(seg);
        out[count] = PathSegment {
            name,
            len: seg.len() as u8,
        };
        count += 1;
    }
    Ok(count)
}

pub(super) fn encode_short_name<E>(segment: &[u8]) -> Result<[u8; 11], FatError<E>> {
    if segment == b"." || segment == b".." {
        return Err(FatError::InvalidShortName);
    }

    let mut out = [b' '; 11];
    let (name, ext) = match segment.iter().position(|&b| b == b'.') {
        Some(dot_idx) => {
            let after = &segment[dot_idx + 1..];
            if after.contains(&b'.') {
                return Err(FatError::InvalidShortName);
            }
            (&segment[..dot_idx], after)
        }
        None => (segment, &[][..]),
    };

    if name.is_empty() || name.len() > 8 || ext.len() > 3 {
        return Err(FatError::InvalidShortName);
    }
    // Lowercase needs an LFN to survive a round trip.
    if segment.iter().any(u8::is_ascii_lowercase) {
        return Err(FatError::InvalidShortName);
    }

    for (slot, b) in out.iter_mut().zip(name) {
        *slot = short_char(*b).ok_or(FatError::InvalidShortName)?;
    }
    for (slot, b) in out[8..].iter_mut().zip(ext) {
        *slot = short_char(*b).ok_or(FatError::InvalidShortName)?;
    }
    Ok(out)
}

fn short_char(byte: u8) -> Option<u8> {
    let up = byte.to_ascii_uppercase();
    if up.is_ascii_alphanumeric() || matches!(up, b'_' | b'-' | b'$' | b'~') {
        Some(up)
    } else {
        None
    }
}

pub(super) fn short_name_to_text(raw: &[u8; 11], out: &mut [u8]) -> usize {
    let base = raw[..8].iter().take_while(|&&b| b != b' ');
    let ext = raw[8..].iter().take_while(|&&b| b != b' ');
    let has_ext = raw[8] != b' ';

    let mut len = 0usize;
    let dot = if has_ext { Some(&b'.') } else { None };
    for &b in base.chain(dot).chain(ext) {
        if len >= out.len() {
            break;
        }
        out[len] = b;
        len += 1;
    }
    len
}

pub(super) fn parse_record(sector: &[u8; SECTOR_SIZE], base: usize, lfn: &LfnState) -> DirRecord {
    let mut short_name = [0u8; 11];
    short_name.copy_from_slice(&sector[base..base + 11]);
    let cluster_hi = read_u16(sector, base + 20) as u32;
    let cluster_lo = read_u16(sector, base + 26) as u32;
    let (display_name, display_name_len, _) = build_display_name(lfn, &short_name);
    DirRecord {
        short_name,
        display_name,
        display_name_len: display_name_len as u8,
        attr: sector[base + 11],
        first_cluster: (cluster_hi << 16) | cluster_lo,
        size: read_u32(sector, base + 28),
    }
}

pub(super) fn segment_matches_record(segment: &PathSegment, record: &DirRecord) -> bool {
    let seg = segment.as_bytes();
    if seg.eq_ignore_ascii_case(&record.display_name[..record.display_name_len as usize]) {
        return true;
    }
    let mut short_text = [0u8; 12];
    let short_len = short_name_to_text(&record.short_name, &mut short_text);
    seg.eq_ignore_ascii_case(&short_text[..short_len])
}

pub(super) fn short_name_checksum(short: &[u8; 11]) -> u8 {
    short
        .iter()
        .fold(0u8, |sum, byte| ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(*byte))
}

fn lfn_expected_mask(slots: u8) -> u32 {
    (1u32 << slots) - 1
}

pub(super) fn build_display_name(
    lfn: &LfnState,
    short_name: &[u8; 11],
) -> ([u8; FAT_NAME_MAX], usize, usize) {
    let mut out = [0u8; FAT_NAME_MAX];

    let complete = lfn.expected_slots > 0
        && lfn.expected_slots as usize <= MAX_LFN_SLOTS
        && lfn.seen_mask == lfn_expected_mask(lfn.expected_slots)
        && lfn.checksum == short_name_checksum(short_name);
    if complete {
        let units = lfn.utf16_parts[..lfn.expected_slots as usize]
            .iter()
            .flatten()
            .copied()
            .take_while(|unit| *unit != 0x0000 && *unit != 0xFFFF);
        let mut len = 0usize;
        for ch in char::decode_utf16(units) {
            let ch = ch.unwrap_or(char::REPLACEMENT_CHARACTER);
            let mut tmp = [0u8; 4];
            let encoded = ch.encode_utf8(&mut tmp).as_bytes();
            if len + encoded.len() > out.len() {
                break;
            }
            out[len..len + encoded.len()].copy_from_slice(encoded);
            len += encoded.len();
        }
        if len > 0 {
            return (out, len, lfn.expected_slots as usize);
        }
    }

    let short_len = short_name_to_text(short_name, &mut out);
    (out, short_len, 0)
}

pub(super) fn consume_lfn_entry(state: &mut LfnState, location: DirLocation, entry: &[u8]) {
    if entry.len() < DIR_ENTRY_SIZE {
        state.clear();
        return;
    }
    let order = entry[0];
    let seq = order & 0x1F;
    if seq == 0 || seq as usize > MAX_LFN_SLOTS {
        state.clear();
        return;
    }

    let checksum = entry[13];
    if (order & 0x40) != 0 {
        state.clear();
        state.expected_slots = seq;
        state.checksum = checksum;
    }
    if state.expected_slots == 0 || seq > state.expected_slots || checksum != state.checksum {
        state.clear();
        return;
    }

    let part_idx = (seq - 1) as usize;
    for (unit, offset) in state.utf16_parts[part_idx].iter_mut().zip(LFN_UNIT_OFFSETS) {
        *unit = read_u16(entry, offset);
    }
    state.lfn_locations[part_idx] = location;
    state.seen_mask |= 1 << part_idx;
}

/// Builds one LFN directory entry carrying units `[(seq-1)*13, seq*13)`.
pub(super) fn lfn_entry(seq: u8, is_last: bool, checksum: u8, name: &[u16]) -> [u8; DIR_ENTRY_SIZE] {
    let mut entry = [0xFFu8; DIR_ENTRY_SIZE];
    entry[0] = seq | if is_last { 0x40 } else { 0 };
    entry[11] = ATTR_LONG_NAME;
    entry[12] = 0;
    entry[13] = checksum;
    entry[26] = 0;
    entry[27] = 0;

    let start = (seq as usize - 1) * 13;
    for (part_idx, offset) in LFN_UNIT_OFFSETS.iter().enumerate() {
        let pos = start + part_idx;
        let value = match pos.cmp(&name.len()) {
            core::cmp::Ordering::Less => name[pos],
            core::cmp::Ordering::Equal => 0x0000,
            core::cmp::Ordering::Greater => 0xFFFF,
        };
        entry[*offset..*offset + 2].copy_from_slice(&value.to_le_bytes());
    }
    entry
}

/// `BASE~N.EXT` alias for a name that cannot be stored as plain 8.3.
pub(super) fn make_short_alias(name: &[u8], attempt: u32) -> [u8; 11] {
    let mut out = [b' '; 11];
    let (base, ext) = match name.iter().rposition(|&b| b == b'.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx + 1..]),
        _ => (name, &[][..]),
    };

    let mut ext_len = 0usize;
    for byte in ext.iter().map(|b| short_char(*b).unwrap_or(b'_')).take(3) {
        out[8 + ext_len] = byte;
        ext_len += 1;
    }

    let mut digits_buf = [0u8; 10];
    let mut digits_len = 0usize;
    let mut n = attempt.max(1);
    while n > 0 {
        digits_buf[digits_len] = b'0' + (n % 10) as u8;
        digits_len += 1;
        n /= 10;
    }
    let max_base = 8usize.saturating_sub(1 + digits_len);

    let mut base_len = 0usize;
    for byte in base.iter().map(|b| short_char(*b).unwrap_or(b'_')).take(max_base) {
        out[base_len] = byte;
        base_len += 1;
    }
    if base_len == 0 {
        for (slot, byte) in out.iter_mut().zip(b"FILE".iter().take(max_base)) {
            *slot = *byte;
            base_len += 1;
        }
    }

    out[base_len] = b'~';
    base_len += 1;
    for idx in (0..digits_len).rev() {
        if base_len >= 8 {
            break;
        }
        out[base_len] = digits_buf[idx];
        base_len += 1;
    }
    out
}

/// UTF-16 form of a long name, bounded by what an LFN chain can hold.
pub(super) fn encode_long_name<E>(
    desired: &[u8],
) -> Result<heapless::Vec<u16, { MAX_LFN_SLOTS * 13 }>, FatError<E>> {
    let text = core::str::from_utf8(desired).map_err(|_| FatError::InvalidLongName)?;
    if text.contains(['\\', ':', '*', '?', '"', '<', '>', '|']) || text.chars().any(char::is_control) {
        return Err(FatError::InvalidLongName);
    }
    let mut utf16 = heapless::Vec::new();
    for unit in text.encode_utf16() {
        utf16.push(unit).map_err(|_| FatError::NameTooLong)?;
    }
    if utf16.is_empty() || text == "." || text == ".." {
        return Err(FatError::InvalidPath);
    }
    Ok(utf16)
}

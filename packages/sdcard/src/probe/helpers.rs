pub(super) fn decode_capacity_bytes(csd: &[u8; 16]) -> Option<u64> {
    match csd_get_bits(csd, 127, 126) {
        0 => {
            // CSD v1.0 (SDSC)
            let c_size = csd_get_bits(csd, 73, 62) as u64;
            let c_size_mult = csd_get_bits(csd, 49, 47);
            let read_bl_len = csd_get_bits(csd, 83, 80);

            let block_len = 1u64.checked_shl(read_bl_len)?;
            let mult = 1u64.checked_shl(c_size_mult + 2)?;
            (c_size + 1).checked_mul(mult)?.checked_mul(block_len)
        }
        1 => {
            // CSD v2.0 (SDHC/SDXC)
            let c_size = csd_get_bits(csd, 69, 48) as u64;
            (c_size + 1).checked_mul(512 * 1024)
        }
        _ => None,
    }
}

pub(super) fn csd_get_bits(csd: &[u8; 16], msb: u8, lsb: u8) -> u32 {
    (lsb..=msb).rev().fold(0u32, |value, bit| {
        let byte = csd[((127 - bit) / 8) as usize];
        (value << 1) | ((byte >> (bit % 8)) & 1) as u32
    })
}

/// Command frame: start bits, command index, big-endian argument, CRC7 byte.
pub(super) fn command_frame(cmd: u8, arg: u32, crc: u8) -> [u8; 6] {
    let arg = arg.to_be_bytes();
    [0x40 | cmd, arg[0], arg[1], arg[2], arg[3], crc]
}

pub(super) fn block_address(lba: u32, high_capacity: bool) -> u32 {
    if high_capacity {
        lba
    } else {
        lba.saturating_mul(super::SD_SECTOR_SIZE as u32)
    }
}

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;

use embedded_hal::{delay::DelayNs, digital, spi};

use super::helpers::{csd_get_bits, decode_capacity_bytes};
use super::*;

/// Byte-level model of a card answering in SPI mode.
struct FakeCard {
    present: bool,
    high_capacity: bool,
    csd: [u8; 16],
    acmd41_busy_polls: u32,
    app_cmd: bool,
    frame: Vec<u8>,
    replies: VecDeque<u8>,
    write: Option<PendingWrite>,
    sectors: HashMap<u32, [u8; SD_SECTOR_SIZE]>,
    clocks_khz: Vec<u32>,
    commands: Vec<(u8, u32)>,
}

struct PendingWrite {
    address: u32,
    started: bool,
    data: Vec<u8>,
}

impl FakeCard {
    fn sdhc(c_size: u32) -> Self {
        let mut csd = [0u8; 16];
        csd[0] = 0x40;
        csd[7] = ((c_size >> 16) & 0x3F) as u8;
        csd[8] = (c_size >> 8) as u8;
        csd[9] = c_size as u8;
        Self {
            present: true,
            high_capacity: true,
            csd,
            acmd41_busy_polls: 3,
            app_cmd: false,
            frame: Vec::new(),
            replies: VecDeque::new(),
            write: None,
            sectors: HashMap::new(),
            clocks_khz: Vec::new(),
            commands: Vec::new(),
        }
    }

    fn absent() -> Self {
        Self {
            present: false,
            ..Self::sdhc(1)
        }
    }

    fn exchange(&mut self, byte: u8) -> u8 {
        if !self.present {
            return 0xFF;
        }
        if let Some(reply) = self.replies.pop_front() {
            return reply;
        }
        if let Some(write) = self.write.as_mut() {
            if !write.started {
                if byte == 0xFE {
                    write.started = true;
                }
                return 0xFF;
            }
            write.data.push(byte);
            // 512 data bytes plus two CRC bytes.
            if write.data.len() == SD_SECTOR_SIZE + 2 {
                let mut sector = [0u8; SD_SECTOR_SIZE];
                sector.copy_from_slice(&write.data[..SD_SECTOR_SIZE]);
                let lba = if self.high_capacity {
                    write.address
                } else {
                    write.address / SD_SECTOR_SIZE as u32
                };
                self.sectors.insert(lba, sector);
                self.write = None;
                self.replies.push_back(0xE5);
            }
            return 0xFF;
        }
        if self.frame.is_empty() && (byte & 0xC0) != 0x40 {
            return 0xFF;
        }
        self.frame.push(byte);
        if self.frame.len() == 6 {
            let cmd = self.frame[0] & 0x3F;
            let arg = u32::from_be_bytes([self.frame[1], self.frame[2], self.frame[3], self.frame[4]]);
            self.frame.clear();
            self.answer(cmd, arg);
        }
        0xFF
    }

    fn answer(&mut self, cmd: u8, arg: u32) {
        self.commands.push((cmd, arg));
        let app_cmd = core::mem::take(&mut self.app_cmd);
        match cmd {
            0 => self.replies.push_back(0x01),
            8 => self.replies.extend([0x01, 0x00, 0x00, 0x01, 0xAA]),
            55 => {
                self.app_cmd = true;
                self.replies.push_back(0x01);
            }
            41 if app_cmd => {
                if self.acmd41_busy_polls == 0 {
                    self.replies.push_back(0x00);
                } else {
                    self.acmd41_busy_polls -= 1;
                    self.replies.push_back(0x01);
                }
            }
            58 => {
                let ocr0 = if self.high_capacity { 0xC0 } else { 0x80 };
                self.replies.extend([0x00, ocr0, 0xFF, 0x80, 0x00]);
            }
            9 => {
                self.replies.extend([0x00, 0xFE]);
                let csd = self.csd;
                self.replies.extend(csd);
                self.replies.extend([0xFF, 0xFF]);
            }
            17 => {
                let sector = self
                    .sectors
                    .get(&arg)
                    .copied()
                    .unwrap_or([0u8; SD_SECTOR_SIZE]);
                self.replies.extend([0x00, 0xFF, 0xFE]);
                self.replies.extend(sector);
                self.replies.extend([0xFF, 0xFF]);
            }
            24 => {
                self.replies.push_back(0x00);
                self.write = Some(PendingWrite {
                    address: arg,
                    started: false,
                    data: Vec::new(),
                });
            }
            _ => self.replies.push_back(0x04),
        }
    }
}

impl spi::ErrorType for FakeCard {
    type Error = Infallible;
}

impl spi::SpiBus<u8> for FakeCard {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        for word in words {
            *word = self.exchange(0xFF);
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        for &word in words {
            self.exchange(word);
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        for (idx, slot) in read.iter_mut().enumerate() {
            *slot = self.exchange(write.get(idx).copied().unwrap_or(0xFF));
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        for word in words {
            *word = self.exchange(*word);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl SpiClock for FakeCard {
    type Error = Infallible;

    fn set_clock_khz(&mut self, khz: u32) -> Result<(), Self::Error> {
        self.clocks_khz.push(khz);
        Ok(())
    }
}

struct FakeCs;

impl digital::ErrorType for FakeCs {
    type Error = Infallible;
}

impl digital::OutputPin for FakeCs {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

fn card(fake: FakeCard) -> SdCard<FakeCard, FakeCs, NoDelay> {
    SdCard::new(fake, FakeCs, NoDelay)
}

#[test]
fn init_reads_high_capacity_geometry() {
    let mut sd = card(FakeCard::sdhc(1));
    let status = sd.init().unwrap();
    assert_eq!(status.version, SdCardVersion::V2);
    assert!(status.high_capacity);
    assert_eq!(status.capacity_bytes, 2 * 512 * 1024);
    assert_eq!(status.block_count(), 2048);
    assert_eq!(BlockDevice::block_count(&mut sd).unwrap(), 2048);

    let (spi, _, _) = sd.release();
    assert_eq!(spi.clocks_khz, vec![SD_INIT_SPI_RATE_KHZ, SD_DATA_SPI_RATE_KHZ]);
    assert_eq!(spi.commands.iter().filter(|(cmd, _)| *cmd == 41).count(), 4);
}

#[test]
fn absent_card_reports_no_response() {
    let mut sd = card(FakeCard::absent());
    assert_eq!(sd.init(), Err(SdProbeError::NoResponse(0)));
    assert!(!sd.is_initialized());
}

#[test]
fn acmd41_gives_up_after_bounded_polls() {
    let mut fake = FakeCard::sdhc(1);
    fake.acmd41_busy_polls = u32::MAX;
    let mut sd = card(fake);
    assert_eq!(sd.init(), Err(SdProbeError::Acmd41Timeout(0x01)));
}

#[test]
fn sector_io_requires_init() {
    let mut sd = card(FakeCard::sdhc(1));
    let mut sector = [0u8; SD_SECTOR_SIZE];
    assert_eq!(sd.read_sector(3, &mut sector), Err(SdProbeError::NotInitialized));
    assert_eq!(sd.write_sector(3, &sector), Err(SdProbeError::NotInitialized));
}

#[test]
fn written_sector_reads_back_from_card() {
    let mut sd = card(FakeCard::sdhc(1));
    sd.init().unwrap();

    let mut data = [0u8; SD_SECTOR_SIZE];
    for (idx, byte) in data.iter_mut().enumerate() {
        *byte = (idx % 251) as u8;
    }
    sd.write_sector(7, &data).unwrap();

    // Drop the cached copy so the read goes over the bus.
    sd.cached_sector_lba = None;
    let mut back = [0u8; SD_SECTOR_SIZE];
    sd.read_sector(7, &mut back).unwrap();
    assert_eq!(back, data);

    let (spi, _, _) = sd.release();
    assert_eq!(spi.sectors.get(&7), Some(&data));
    assert!(spi.commands.contains(&(17, 7)));
}

#[test]
fn repeated_read_of_same_sector_is_served_from_cache() {
    let mut sd = card(FakeCard::sdhc(1));
    sd.init().unwrap();
    let mut sector = [0u8; SD_SECTOR_SIZE];
    sd.read_sector(9, &mut sector).unwrap();
    sd.read_sector(9, &mut sector).unwrap();

    let (spi, _, _) = sd.release();
    assert_eq!(spi.commands.iter().filter(|(cmd, _)| *cmd == 17).count(), 1);
}

#[test]
fn csd_v1_capacity_decodes() {
    // READ_BL_LEN = 9, C_SIZE = 4095, C_SIZE_MULT = 7 -> 1 GiB.
    let mut csd = [0u8; 16];
    csd[5] = 0x09;
    csd[6] = 0x03;
    csd[7] = 0xFF;
    csd[8] = 0xC0;
    csd[9] = 0x03;
    csd[10] = 0x80;
    assert_eq!(csd_get_bits(&csd, 127, 126), 0);
    assert_eq!(csd_get_bits(&csd, 83, 80), 9);
    assert_eq!(csd_get_bits(&csd, 73, 62), 4095);
    assert_eq!(csd_get_bits(&csd, 49, 47), 7);
    assert_eq!(decode_capacity_bytes(&csd), Some(4096 * 512 * 512));
}

#[test]
fn reserved_csd_structure_is_rejected() {
    let mut csd = [0u8; 16];
    csd[0] = 0xC0;
    assert_eq!(decode_capacity_bytes(&csd), None);
}

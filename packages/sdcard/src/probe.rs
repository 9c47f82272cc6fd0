use embedded_hal::{
    delay::DelayNs,
    digital::{self, OutputPin},
    spi::{self, SpiBus},
};

use crate::block::{BlockDevice, BLOCK_SIZE};

mod helpers;
mod init;
mod io;
#[cfg(test)]
mod tests;

const SD_CMD0: u8 = 0;
const SD_CMD8: u8 = 8;
const SD_CMD9: u8 = 9;
const SD_CMD16: u8 = 16;
const SD_CMD17: u8 = 17;
const SD_CMD24: u8 = 24;
const SD_CMD55: u8 = 55;
const SD_ACMD41: u8 = 41;
const SD_CMD58: u8 = 58;
pub const SD_INIT_SPI_RATE_KHZ: u32 = 400;
pub const SD_DATA_SPI_RATE_KHZ: u32 = 24_000;
pub const SD_SECTOR_SIZE: usize = BLOCK_SIZE;

/// Bus clock control, which `embedded-hal` leaves to the HAL.
///
/// Cards must be brought up below 400 kHz and may then be clocked much
/// faster; the driver switches rates through this trait.
pub trait SpiClock {
    type Error: core::fmt::Debug;

    fn set_clock_khz(&mut self, khz: u32) -> Result<(), Self::Error>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdCardVersion {
    V1,
    V2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SdCardStatus {
    pub version: SdCardVersion,
    pub high_capacity: bool,
    pub capacity_bytes: u64,
}

impl SdCardStatus {
    pub fn block_count(&self) -> u32 {
        (self.capacity_bytes / SD_SECTOR_SIZE as u64).min(u32::MAX as u64) as u32
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdProbeError {
    Bus(spi::ErrorKind),
    ChipSelect(digital::ErrorKind),
    BusConfig,
    Cmd0Failed(u8),
    Cmd8Unexpected(u8),
    Cmd8EchoMismatch([u8; 4]),
    Acmd41Timeout(u8),
    Cmd58Unexpected(u8),
    Cmd9Unexpected(u8),
    Cmd16Unexpected(u8),
    Cmd17Unexpected(u8),
    Cmd24Unexpected(u8),
    NoResponse(u8),
    DataTokenTimeout(u8),
    DataTokenUnexpected(u8, u8),
    WriteDataRejected(u8),
    WriteBusyTimeout,
    NotInitialized,
    CapacityDecodeFailed,
}

/// An SD card driven in SPI mode.
///
/// Owns the bus, the chip-select line and a delay source. Blocks are always
/// 512 bytes; standard-capacity cards are addressed in bytes internally.
pub struct SdCard<SPI, CS, DELAY> {
    spi: SPI,
    cs: CS,
    delay: DELAY,
    status: Option<SdCardStatus>,
    cached_sector_lba: Option<u32>,
    cached_sector: [u8; SD_SECTOR_SIZE],
}

impl<SPI, CS, DELAY> SdCard<SPI, CS, DELAY>
where
    SPI: SpiBus<u8> + SpiClock,
    CS: OutputPin,
    DELAY: DelayNs,
{
    pub fn new(spi: SPI, mut cs: CS, delay: DELAY) -> Self {
        let _ = cs.set_high();
        Self {
            spi,
            cs,
            delay,
            status: None,
            cached_sector_lba: None,
            cached_sector: [0; SD_SECTOR_SIZE],
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.status.is_some()
    }

    pub fn status(&self) -> Option<SdCardStatus> {
        self.status
    }

    pub fn invalidate(&mut self) {
        self.status = None;
        self.cached_sector_lba = None;
    }

    pub fn release(self) -> (SPI, CS, DELAY) {
        (self.spi, self.cs, self.delay)
    }
}

impl<SPI, CS, DELAY> BlockDevice for SdCard<SPI, CS, DELAY>
where
    SPI: SpiBus<u8> + SpiClock,
    CS: OutputPin,
    DELAY: DelayNs,
{
    type Error = SdProbeError;

    fn init(&mut self) -> Result<(), Self::Error> {
        SdCard::init(self).map(|_| ())
    }

    fn read_block(&mut self, lba: u32, out: &mut [u8; BLOCK_SIZE]) -> Result<(), Self::Error> {
        self.read_sector(lba, out)
    }

    fn write_block(&mut self, lba: u32, data: &[u8; BLOCK_SIZE]) -> Result<(), Self::Error> {
        self.write_sector(lba, data)
    }

    fn block_count(&mut self) -> Result<u32, Self::Error> {
        self.status
            .map(|status| status.block_count())
            .ok_or(SdProbeError::NotInitialized)
    }
}

#[cfg(feature = "esp32")]
impl SpiClock for esp_hal::spi::master::Spi<'_, esp_hal::Blocking> {
    type Error = esp_hal::spi::master::ConfigError;

    fn set_clock_khz(&mut self, khz: u32) -> Result<(), Self::Error> {
        let config = esp_hal::spi::master::Config::default()
            .with_mode(esp_hal::spi::Mode::_0)
            .with_frequency(esp_hal::time::Rate::from_khz(khz));
        self.apply_config(&config)
    }
}

//! ESP32 wiring: SD card on an SPI master plus the esp-println logger.

use esp_hal::{
    delay::Delay,
    gpio::{
        interconnect::{PeripheralInput, PeripheralOutput},
        Level, Output, OutputConfig, OutputPin,
    },
    peripherals::{GPIO12, GPIO13, GPIO14, GPIO15, SPI2},
    spi::{
        master::{Config as SpiConfig, Instance, Spi},
        Mode as SpiMode,
    },
    time::Rate,
    Blocking,
};
use sdcard::{probe::SD_INIT_SPI_RATE_KHZ, SdCard, SdProbeError};

use crate::StorageManager;

pub type BoardSdCard<'d> = SdCard<Spi<'d, Blocking>, Output<'d>, Delay>;

/// Routes `log` output to the UART console.
pub fn init_logging(level: log::LevelFilter) {
    esp_println::logger::init_logger(level);
}

/// Mounts a card on the given SPI peripheral and pins.
pub fn mount_spi_sd<'d>(
    spi: impl Instance + 'd,
    sck: impl PeripheralOutput<'d>,
    mosi: impl PeripheralOutput<'d>,
    miso: impl PeripheralInput<'d>,
    cs: impl OutputPin + 'd,
) -> StorageManager<BoardSdCard<'d>> {
    StorageManager::mount_with(|| {
        let config = SpiConfig::default()
            .with_frequency(Rate::from_khz(SD_INIT_SPI_RATE_KHZ))
            .with_mode(SpiMode::_0);
        let spi = Spi::new(spi, config)
            .map_err(|_| SdProbeError::BusConfig)?
            .with_sck(sck)
            .with_mosi(mosi)
            .with_miso(miso);
        let cs = Output::new(cs, Level::High, OutputConfig::default());
        Ok(SdCard::new(spi, cs, Delay::new()))
    })
}

/// Inkplate SD slot: SPI2 with SCK 14, MOSI 13, MISO 12 and CS 15.
pub fn mount_default<'d>(
    spi: SPI2<'d>,
    sck: GPIO14<'d>,
    mosi: GPIO13<'d>,
    miso: GPIO12<'d>,
    cs: GPIO15<'d>,
) -> StorageManager<BoardSdCard<'d>> {
    mount_spi_sd(spi, sck, mosi, miso, cs)
}

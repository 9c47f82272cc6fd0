use embedded_hal::{delay::DelayNs, digital::OutputPin, spi::SpiBus};

use super::{
    helpers::decode_capacity_bytes, SdCard, SdCardStatus, SdCardVersion, SdProbeError, SpiClock,
    SD_ACMD41, SD_CMD0, SD_CMD16, SD_CMD55, SD_CMD58, SD_CMD8, SD_CMD9, SD_DATA_SPI_RATE_KHZ,
    SD_INIT_SPI_RATE_KHZ, SD_SECTOR_SIZE,
};

const CMD0_ATTEMPTS: usize = 16;
const ACMD41_ATTEMPTS: usize = 200;
const ACMD41_RETRY_MS: u32 = 1;

impl<SPI, CS, DELAY> SdCard<SPI, CS, DELAY>
where
    SPI: SpiBus<u8> + SpiClock,
    CS: OutputPin,
    DELAY: DelayNs,
{
    /// Run the SPI-mode power-up sequence and read the card geometry.
    pub fn init(&mut self) -> Result<SdCardStatus, SdProbeError> {
        self.status = None;
        self.cached_sector_lba = None;

        self.apply_clock(SD_INIT_SPI_RATE_KHZ)?;
        let _ = self.cs.set_high();
        self.send_dummy_clocks(10)?;

        let mut cmd0_r1 = 0xFFu8;
        for _ in 0..CMD0_ATTEMPTS {
            cmd0_r1 = self.send_command(SD_CMD0, 0, 0x95, &mut [])?;
            if cmd0_r1 == 0x01 {
                break;
            }
        }
        if cmd0_r1 != 0x01 {
            return Err(SdProbeError::Cmd0Failed(cmd0_r1));
        }

        let mut r7 = [0u8; 4];
        let cmd8_r1 = self.send_command(SD_CMD8, 0x0000_01AA, 0x87, &mut r7)?;
        let version = if cmd8_r1 == 0x01 {
            if r7[2] != 0x01 || r7[3] != 0xAA {
                return Err(SdProbeError::Cmd8EchoMismatch(r7));
            }
            SdCardVersion::V2
        } else if (cmd8_r1 & 0x04) != 0 {
            SdCardVersion::V1
        } else {
            return Err(SdProbeError::Cmd8Unexpected(cmd8_r1));
        };

        let acmd41_arg = match version {
            SdCardVersion::V2 => 0x4000_0000,
            SdCardVersion::V1 => 0,
        };
        let mut acmd41_r1 = 0xFFu8;
        let mut ready = false;
        for _ in 0..ACMD41_ATTEMPTS {
            self.send_command(SD_CMD55, 0, 0x65, &mut [])?;
            acmd41_r1 = self.send_command(SD_ACMD41, acmd41_arg, 0x77, &mut [])?;
            if acmd41_r1 == 0x00 {
                ready = true;
                break;
            }
            self.delay.delay_ms(ACMD41_RETRY_MS);
        }
        if !ready {
            return Err(SdProbeError::Acmd41Timeout(acmd41_r1));
        }

        if version == SdCardVersion::V1 {
            let cmd16_r1 = self.send_command(SD_CMD16, SD_SECTOR_SIZE as u32, 0xFF, &mut [])?;
            if cmd16_r1 != 0x00 {
                return Err(SdProbeError::Cmd16Unexpected(cmd16_r1));
            }
        }

        self.apply_clock(SD_DATA_SPI_RATE_KHZ)?;

        let mut ocr = [0u8; 4];
        let cmd58_r1 = self.send_command(SD_CMD58, 0, 0xFD, &mut ocr)?;
        if cmd58_r1 != 0x00 {
            return Err(SdProbeError::Cmd58Unexpected(cmd58_r1));
        }

        let cmd9_r1 = self.send_command_hold_cs(SD_CMD9, 0, 0xAF, &mut [])?;
        if cmd9_r1 != 0x00 {
            self.end_transaction();
            return Err(SdProbeError::Cmd9Unexpected(cmd9_r1));
        }
        let mut csd = [0u8; 16];
        let read = self.read_data_block(SD_CMD9, &mut csd);
        self.end_transaction();
        read?;

        let capacity_bytes =
            decode_capacity_bytes(&csd).ok_or(SdProbeError::CapacityDecodeFailed)?;
        let status = SdCardStatus {
            version,
            high_capacity: (ocr[0] & 0x40) != 0,
            capacity_bytes,
        };
        log::debug!(
            "sdcard: init_ok version={:?} high_capacity={} bytes={}",
            status.version,
            status.high_capacity,
            status.capacity_bytes
        );
        self.status = Some(status);
        Ok(status)
    }

    fn apply_clock(&mut self, khz: u32) -> Result<(), SdProbeError> {
        self.spi
            .set_clock_khz(khz)
            .map_err(|_| SdProbeError::BusConfig)
    }
}

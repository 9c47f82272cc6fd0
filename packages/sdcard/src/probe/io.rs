use embedded_hal::{
    delay::DelayNs,
    digital::{Error as _, OutputPin},
    spi::{Error as _, SpiBus},
};

use super::{
    helpers::{block_address, command_frame},
    SdCard, SdProbeError, SpiClock, SD_CMD17, SD_CMD24, SD_SECTOR_SIZE,
};

const R1_POLL_BYTES: usize = 16;
const DATA_TOKEN_POLL_BYTES: usize = 50_000;
const WRITE_BUSY_POLL_BYTES: usize = 200_000;
const DATA_START_TOKEN: u8 = 0xFE;
const DATA_ACCEPTED: u8 = 0x05;

impl<SPI, CS, DELAY> SdCard<SPI, CS, DELAY>
where
    SPI: SpiBus<u8> + SpiClock,
    CS: OutputPin,
    DELAY: DelayNs,
{
    pub fn read_sector(
        &mut self,
        lba: u32,
        out: &mut [u8; SD_SECTOR_SIZE],
    ) -> Result<(), SdProbeError> {
        if self.cached_sector_lba == Some(lba) {
            out.copy_from_slice(&self.cached_sector);
            return Ok(());
        }
        let high_capacity = self
            .status
            .ok_or(SdProbeError::NotInitialized)?
            .high_capacity;

        let cmd17_r1 =
            self.send_command_hold_cs(SD_CMD17, block_address(lba, high_capacity), 0xFF, &mut [])?;
        if cmd17_r1 != 0x00 {
            self.end_transaction();
            return Err(SdProbeError::Cmd17Unexpected(cmd17_r1));
        }
        let read = self.read_data_block(SD_CMD17, out);
        self.end_transaction();
        read?;

        self.cached_sector.copy_from_slice(out);
        self.cached_sector_lba = Some(lba);
        Ok(())
    }

    pub fn write_sector(
        &mut self,
        lba: u32,
        data: &[u8; SD_SECTOR_SIZE],
    ) -> Result<(), SdProbeError> {
        let high_capacity = self
            .status
            .ok_or(SdProbeError::NotInitialized)?
            .high_capacity;
        // A failed write leaves the card contents unknown.
        self.cached_sector_lba = None;

        let cmd24_r1 =
            self.send_command_hold_cs(SD_CMD24, block_address(lba, high_capacity), 0xFF, &mut [])?;
        if cmd24_r1 != 0x00 {
            self.end_transaction();
            return Err(SdProbeError::Cmd24Unexpected(cmd24_r1));
        }

        let written = self.write_data_block(data);
        self.end_transaction();
        written?;

        self.cached_sector.copy_from_slice(data);
        self.cached_sector_lba = Some(lba);
        Ok(())
    }

    fn write_data_block(&mut self, data: &[u8; SD_SECTOR_SIZE]) -> Result<(), SdProbeError> {
        self.transfer_byte(0xFF)?;
        self.transfer_byte(DATA_START_TOKEN)?;
        for &byte in data {
            self.transfer_byte(byte)?;
        }
        // Data CRC16 is ignored in SPI mode unless CRC is explicitly enabled.
        self.transfer_byte(0xFF)?;
        self.transfer_byte(0xFF)?;

        let response = self.transfer_byte(0xFF)? & 0x1F;
        if response != DATA_ACCEPTED {
            return Err(SdProbeError::WriteDataRejected(response));
        }

        for _ in 0..WRITE_BUSY_POLL_BYTES {
            if self.transfer_byte(0xFF)? == 0xFF {
                return Ok(());
            }
        }
        Err(SdProbeError::WriteBusyTimeout)
    }

    pub(super) fn send_command(
        &mut self,
        cmd: u8,
        arg: u32,
        crc: u8,
        extra_response: &mut [u8],
    ) -> Result<u8, SdProbeError> {
        let r1 = self.send_command_hold_cs(cmd, arg, crc, extra_response)?;
        self.end_transaction();
        Ok(r1)
    }

    /// Sends a command and leaves chip select asserted for a data phase.
    pub(super) fn send_command_hold_cs(
        &mut self,
        cmd: u8,
        arg: u32,
        crc: u8,
        extra_response: &mut [u8],
    ) -> Result<u8, SdProbeError> {
        self.cs
            .set_low()
            .map_err(|err| SdProbeError::ChipSelect(err.kind()))?;

        let response = self.exchange_command(cmd, arg, crc, extra_response);
        if response.is_err() {
            self.end_transaction();
        }
        response
    }

    fn exchange_command(
        &mut self,
        cmd: u8,
        arg: u32,
        crc: u8,
        extra_response: &mut [u8],
    ) -> Result<u8, SdProbeError> {
        for byte in command_frame(cmd, arg, crc) {
            self.transfer_byte(byte)?;
        }

        let mut r1 = None;
        for _ in 0..R1_POLL_BYTES {
            let byte = self.transfer_byte(0xFF)?;
            if (byte & 0x80) == 0 {
                r1 = Some(byte);
                break;
            }
        }
        let r1 = r1.ok_or(SdProbeError::NoResponse(cmd))?;

        for slot in extra_response {
            *slot = self.transfer_byte(0xFF)?;
        }
        Ok(r1)
    }

    pub(super) fn send_dummy_clocks(&mut self, bytes: usize) -> Result<(), SdProbeError> {
        for _ in 0..bytes {
            self.transfer_byte(0xFF)?;
        }
        Ok(())
    }

    fn transfer_byte(&mut self, byte: u8) -> Result<u8, SdProbeError> {
        let mut frame = [byte];
        self.spi
            .transfer_in_place(&mut frame)
            .map_err(|err| SdProbeError::Bus(err.kind()))?;
        Ok(frame[0])
    }

    /// Waits for the start token, then fills `out` and discards the CRC16.
    pub(super) fn read_data_block(&mut self, cmd: u8, out: &mut [u8]) -> Result<(), SdProbeError> {
        let mut token = None;
        for _ in 0..DATA_TOKEN_POLL_BYTES {
            let byte = self.transfer_byte(0xFF)?;
            if byte != 0xFF {
                token = Some(byte);
                break;
            }
        }
        match token {
            None => return Err(SdProbeError::DataTokenTimeout(cmd)),
            Some(DATA_START_TOKEN) => {}
            Some(other) => return Err(SdProbeError::DataTokenUnexpected(cmd, other)),
        }

        for slot in out {
            *slot = self.transfer_byte(0xFF)?;
        }
        self.transfer_byte(0xFF)?;
        self.transfer_byte(0xFF)?;
        Ok(())
    }

    pub(super) fn end_transaction(&mut self) {
        let _ = self.cs.set_high();
        let _ = self.transfer_byte(0xFF);
    }
}

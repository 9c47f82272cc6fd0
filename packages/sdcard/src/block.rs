use core::fmt::Debug;

pub const BLOCK_SIZE: usize = 512;

/// Fixed-size block storage underneath a filesystem.
pub trait BlockDevice {
    type Error: Debug;

    /// Bring the device to a state where blocks can be transferred.
    fn init(&mut self) -> Result<(), Self::Error>;

    fn read_block(&mut self, lba: u32, out: &mut [u8; BLOCK_SIZE]) -> Result<(), Self::Error>;

    fn write_block(&mut self, lba: u32, data: &[u8; BLOCK_SIZE]) -> Result<(), Self::Error>;

    fn block_count(&mut self) -> Result<u32, Self::Error>;
}

impl<T: BlockDevice + ?Sized> BlockDevice for &mut T {
    type Error = T::Error;

    fn init(&mut self) -> Result<(), Self::Error> {
        T::init(self)
    }

    fn read_block(&mut self, lba: u32, out: &mut [u8; BLOCK_SIZE]) -> Result<(), Self::Error> {
        T::read_block(self, lba, out)
    }

    fn write_block(&mut self, lba: u32, data: &[u8; BLOCK_SIZE]) -> Result<(), Self::Error> {
        T::write_block(self, lba, data)
    }

    fn block_count(&mut self) -> Result<u32, Self::Error> {
        T::block_count(self)
    }
}

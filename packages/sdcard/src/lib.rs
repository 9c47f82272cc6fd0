#![cfg_attr(not(test), no_std)]

#[cfg(any(test, feature = "ram-disk"))]
extern crate alloc;

pub mod block;
pub mod fat;
pub mod probe;
#[cfg(any(test, feature = "ram-disk"))]
pub mod ram;

pub use block::{BlockDevice, BLOCK_SIZE};
pub use fat::{FatDirEntry, FatError, FatVolume, VolumeStats, FAT_NAME_MAX};
pub use probe::{SdCard, SdCardStatus, SdCardVersion, SdProbeError, SpiClock};

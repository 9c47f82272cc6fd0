#![cfg_attr(not(test), no_std)]

#[cfg(feature = "esp32")]
pub mod board;
pub mod config;
mod details;
mod error;
mod manager;

pub use details::{CardDetails, FileList, FileName, BYTES_PER_MIB};
pub use error::{ErrorKind, StorageError};
pub use manager::StorageManager;
pub use sdcard;

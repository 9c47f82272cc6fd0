use core::fmt;

use sdcard::FatError;

#[derive(Debug)]
pub enum StorageError<E> {
    /// The card was never mounted, or mounting failed.
    NotMounted,
    /// The bus or the card itself failed.
    Device(E),
    Filesystem(FatError<E>),
    /// The file exists but its content is not UTF-8.
    NotText,
}

/// Coarse failure class, for callers that only need to branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotMounted,
    Device,
    Filesystem,
}

impl<E> StorageError<E> {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotMounted => ErrorKind::NotMounted,
            Self::Device(_) => ErrorKind::Device,
            Self::Filesystem(_) | Self::NotText => ErrorKind::Filesystem,
        }
    }
}

impl<E> From<FatError<E>> for StorageError<E> {
    fn from(value: FatError<E>) -> Self {
        match value {
            FatError::Device(err) => Self::Device(err),
            other => Self::Filesystem(other),
        }
    }
}

impl<E: fmt::Debug> fmt::Display for StorageError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotMounted => f.write_str("not_mounted"),
            Self::Device(err) => write!(f, "device({:?})", err),
            Self::Filesystem(err) => write!(f, "fs({:?})", err),
            Self::NotText => f.write_str("not_text"),
        }
    }
}

use core::fmt;

use sdcard::{BlockDevice, FatDirEntry, FatVolume};

use crate::{
    config::{MAX_LISTED_FILES, MOUNT_POINT},
    details::{CardDetails, FileList, FileName},
    error::StorageError,
};

mod lenient;

/// One mounted FAT32 volume on a block device, addressed under `/sd`.
///
/// Every operation exists twice: `try_*` methods return a typed
/// [`StorageError`], while the plain-named methods log failures and hand back
/// an empty value instead. An unmounted manager answers every call with
/// [`StorageError::NotMounted`] without touching the device.
pub struct StorageManager<D: BlockDevice> {
    volume: Option<FatVolume<D>>,
}

impl<D: BlockDevice> StorageManager<D> {
    /// Opens the bus and device through `open`, then initializes the card and
    /// mounts it. Any failure is logged and leaves the manager unmounted.
    pub fn mount_with<F>(open: F) -> Self
    where
        F: FnOnce() -> Result<D, D::Error>,
    {
        match open() {
            Ok(device) => Self::new(device),
            Err(err) => {
                log::warn!("sd: bus_error err={:?}", err);
                Self::unmounted()
            }
        }
    }

    /// Initializes `device` and mounts the volume on it, logging on failure.
    pub fn new(device: D) -> Self {
        match Self::try_new(device) {
            Ok(manager) => manager,
            Err(err) => {
                log::warn!("sd: mount_error at={} err={}", MOUNT_POINT, err);
                Self::unmounted()
            }
        }
    }

    pub fn try_new(mut device: D) -> Result<Self, StorageError<D::Error>> {
        device.init().map_err(StorageError::Device)?;
        let volume = FatVolume::mount(device)?;
        log::info!("sd: mounted at={}", MOUNT_POINT);
        Ok(Self {
            volume: Some(volume),
        })
    }

    pub fn unmounted() -> Self {
        Self { volume: None }
    }

    pub fn is_mounted(&self) -> bool {
        self.volume.is_some()
    }

    /// Releases the volume and hands back the device it was mounted on.
    pub fn unmount(self) -> Option<D> {
        let device = self.volume.map(FatVolume::into_device);
        if device.is_some() {
            log::info!("sd: unmounted at={}", MOUNT_POINT);
        }
        device
    }

    fn volume(&mut self) -> Result<&mut FatVolume<D>, StorageError<D::Error>> {
        self.volume.as_mut().ok_or(StorageError::NotMounted)
    }

    /// Names in the root of the card, without `.` and `..`. Only the first
    /// [`MAX_LISTED_FILES`] are returned; a longer root is logged as
    /// `list_truncated`.
    pub fn try_list_files(&mut self) -> Result<FileList, StorageError<D::Error>> {
        self.list_root().map(|(files, _)| files)
    }

    /// Root listing plus the number of entries the root really holds.
    fn list_root(&mut self) -> Result<(FileList, usize), StorageError<D::Error>> {
        let volume = self.volume()?;
        let mut entries = [FatDirEntry::EMPTY; MAX_LISTED_FILES];
        let total = volume.list_dir("/", &mut entries)?;
        let shown = total.min(entries.len());
        if total > shown {
            log::warn!(
                "sd: list_truncated path={} shown={} total={}",
                MOUNT_POINT,
                shown,
                total
            );
        }

        let mut files = FileList::new();
        for entry in &entries[..shown] {
            let Some(name) = entry.name().and_then(|name| FileName::try_from(name).ok()) else {
                log::debug!("sd: list_skip name_bytes={:02x?}", entry.name_bytes());
                continue;
            };
            if files.push(name).is_err() {
                break;
            }
        }
        log::debug!("sd: list_ok path={} count={}", MOUNT_POINT, files.len());
        Ok((files, total))
    }

    /// Creates `name` or replaces its content.
    pub fn try_write_file(&mut self, name: &str, content: &str) -> Result<(), StorageError<D::Error>> {
        self.volume()?.write_file(volume_path(name), content.as_bytes())?;
        log::debug!("sd: write_ok path={} bytes={}", MountPath(name), content.len());
        Ok(())
    }

    pub fn try_append_file(&mut self, name: &str, content: &str) -> Result<(), StorageError<D::Error>> {
        self.volume()?.append_file(volume_path(name), content.as_bytes())?;
        log::debug!("sd: append_ok path={} bytes={}", MountPath(name), content.len());
        Ok(())
    }

    /// Reads all of `name` into `buf` and returns it as text.
    pub fn try_read_file<'b>(
        &mut self,
        name: &str,
        buf: &'b mut [u8],
    ) -> Result<&'b str, StorageError<D::Error>> {
        let len = self.volume()?.read_file(volume_path(name), buf)?;
        let buf: &'b [u8] = buf;
        let text = core::str::from_utf8(&buf[..len]).map_err(|_| StorageError::NotText)?;
        log::debug!("sd: read_ok path={} bytes={}", MountPath(name), len);
        Ok(text)
    }

    pub fn try_rename_file(&mut self, old_name: &str, new_name: &str) -> Result<(), StorageError<D::Error>> {
        self.volume()?
            .rename(volume_path(old_name), volume_path(new_name))?;
        log::debug!(
            "sd: rename_ok src={} dst={}",
            MountPath(old_name),
            MountPath(new_name)
        );
        Ok(())
    }

    pub fn try_delete_file(&mut self, name: &str) -> Result<(), StorageError<D::Error>> {
        self.volume()?.remove(volume_path(name))?;
        log::debug!("sd: delete_ok path={}", MountPath(name));
        Ok(())
    }

    pub fn try_create_dir(&mut self, name: &str) -> Result<(), StorageError<D::Error>> {
        self.volume()?.create_dir(volume_path(name))?;
        log::debug!("sd: mkdir_ok path={}", MountPath(name));
        Ok(())
    }

    pub fn try_file_size(&mut self, name: &str) -> Result<u32, StorageError<D::Error>> {
        Ok(self.volume()?.stat(volume_path(name))?.size)
    }

    pub fn try_card_details(&mut self) -> Result<CardDetails, StorageError<D::Error>> {
        let stats = self.volume()?.stats()?;
        let (files, file_count) = self.list_root()?;
        Ok(CardDetails::new(stats, files, file_count))
    }
}

/// Strips the mount point from `name`; `/sdcard.txt` is not under `/sd`.
fn volume_path(name: &str) -> &str {
    match name.strip_prefix(MOUNT_POINT) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => name,
    }
}

/// Formats a caller-supplied name as its full path under the mount point.
struct MountPath<'a>(&'a str);

impl fmt::Display for MountPath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = volume_path(self.0).trim_start_matches('/');
        write!(f, "{}/{}", MOUNT_POINT, path)
    }
}

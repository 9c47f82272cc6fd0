//! Log-and-suppress wrappers over the typed operations.
//!
//! Failures never reach the caller here: reads come back empty or `None`,
//! writes return nothing, and the reason goes to the log.

use sdcard::BlockDevice;

use super::{MountPath, StorageManager};
use crate::{config::MOUNT_POINT, details::CardDetails, details::FileList};

impl<D: BlockDevice> StorageManager<D> {
    /// Root listing; empty when unmounted or when listing fails.
    pub fn list_files(&mut self) -> FileList {
        self.try_list_files().unwrap_or_else(|err| {
            log::warn!("sd: list_error path={} err={}", MOUNT_POINT, err);
            FileList::new()
        })
    }

    pub fn write_file(&mut self, name: &str, content: &str) {
        if let Err(err) = self.try_write_file(name, content) {
            log::warn!("sd: write_error path={} err={}", MountPath(name), err);
        }
    }

    pub fn append_file(&mut self, name: &str, content: &str) {
        if let Err(err) = self.try_append_file(name, content) {
            log::warn!("sd: append_error path={} err={}", MountPath(name), err);
        }
    }

    /// File content as text, or `None` when it cannot be read. An empty file
    /// is `Some("")`.
    pub fn read_file<'b>(&mut self, name: &str, buf: &'b mut [u8]) -> Option<&'b str> {
        match self.try_read_file(name, buf) {
            Ok(text) => Some(text),
            Err(err) => {
                log::warn!("sd: read_error path={} err={}", MountPath(name), err);
                None
            }
        }
    }

    pub fn rename_file(&mut self, old_name: &str, new_name: &str) {
        if let Err(err) = self.try_rename_file(old_name, new_name) {
            log::warn!(
                "sd: rename_error src={} dst={} err={}",
                MountPath(old_name),
                MountPath(new_name),
                err
            );
        }
    }

    pub fn delete_file(&mut self, name: &str) {
        if let Err(err) = self.try_delete_file(name) {
            log::warn!("sd: delete_error path={} err={}", MountPath(name), err);
        }
    }

    pub fn create_dir(&mut self, name: &str) {
        if let Err(err) = self.try_create_dir(name) {
            log::warn!("sd: mkdir_error path={} err={}", MountPath(name), err);
        }
    }

    /// Capacity summary, also written to the log line by line.
    pub fn card_details(&mut self) -> Option<CardDetails> {
        let details = match self.try_card_details() {
            Ok(details) => details,
            Err(err) => {
                log::warn!("sd: details_error err={}", err);
                return None;
            }
        };

        log::info!("sd: details mount={}", MOUNT_POINT);
        log::info!("sd:   total_mib={:.2}", details.total_mib());
        log::info!("sd:   used_mib={:.2}", details.used_mib());
        log::info!("sd:   free_mib={:.2}", details.free_mib());
        log::info!("sd:   files={}", details.file_count);
        for name in &details.files {
            log::info!("sd:   - {}", name);
        }
        if details.file_count > details.files.len() {
            log::info!("sd:   - ({} more)", details.file_count - details.files.len());
        }
        Some(details)
    }
}

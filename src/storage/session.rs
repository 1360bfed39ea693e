//! Per-session page map files.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use super::channel_pool::FileChannelPool;
use super::paths::page_map_file_name;
use super::window::PageWindowManager;
use crate::models::{PageWindow, SerializedPage};

/// One page map of a session and the file its pages live in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageMapEntry {
    pub page_map_name: String,
    pub file_name: PathBuf,
    pub manager: PageWindowManager,
}

/// Size limits applied when saving pages.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SizeLimits {
    pub max_size_per_page_map: u64,
    pub max_size_per_session: u64,
}

/// Stored pages of one session.
///
/// The page map list is kept in access order: the page map saved to most
/// recently is last, and the first one is evicted when the session grows
/// over its size limit.
pub(crate) struct SessionEntry {
    session_id: String,
    folder: PathBuf,
    limits: SizeLimits,
    channels: Arc<FileChannelPool>,
    page_maps: Mutex<Vec<PageMapEntry>>,
}

impl SessionEntry {
    pub fn new(
        session_id: String,
        folder: PathBuf,
        limits: SizeLimits,
        channels: Arc<FileChannelPool>,
    ) -> Self {
        Self::with_page_maps(session_id, folder, limits, channels, Vec::new())
    }

    /// Recreates an entry from a persisted index.
    pub fn with_page_maps(
        session_id: String,
        folder: PathBuf,
        limits: SizeLimits,
        channels: Arc<FileChannelPool>,
        page_maps: Vec<PageMapEntry>,
    ) -> Self {
        Self {
            session_id,
            folder,
            limits,
            channels,
            page_maps: Mutex::new(page_maps),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Summed window sizes of all page maps.
    pub async fn total_size(&self) -> u64 {
        total_size(&self.page_maps.lock().await)
    }

    /// Copy of the page map list, for persisting the index.
    pub async fn page_maps(&self) -> Vec<PageMapEntry> {
        self.page_maps.lock().await.clone()
    }

    /// Writes a page into its page map file. Pages without data are skipped.
    pub async fn save_page(&self, page: &SerializedPage) {
        let data = match page.data() {
            Some(data) => data,
            None => return,
        };

        let mut page_maps = self.page_maps.lock().await;

        let position = match page_maps
            .iter()
            .position(|entry| entry.page_map_name == page.page_map_name())
        {
            Some(position) => position,
            None => {
                if let Err(e) = fs::create_dir_all(&self.folder).await {
                    error!(
                        "Failed to create session folder {:?}: {}",
                        self.folder, e
                    );
                    return;
                }
                page_maps.push(PageMapEntry {
                    page_map_name: page.page_map_name().to_string(),
                    file_name: self.folder.join(page_map_file_name(page.page_map_name())),
                    manager: PageWindowManager::new(self.limits.max_size_per_page_map),
                });
                page_maps.len() - 1
            }
        };

        // move to the end to mark it as most recently used
        let mut entry = page_maps.remove(position);
        let window = entry.manager.create_page_window(
            page.page_id(),
            page.version_number(),
            page.ajax_version_number(),
            data.len() as u64,
        );
        let file_name = entry.file_name.clone();
        page_maps.push(entry);

        while total_size(&page_maps) > self.limits.max_size_per_session && page_maps.len() > 1 {
            let evicted = page_maps.remove(0);
            debug!(
                "Session {} over size limit, evicting page map '{}'",
                self.session_id, evicted.page_map_name
            );
            self.delete_page_map_file(&evicted).await;
        }

        self.write_window(&file_name, &window, data).await;
    }

    async fn write_window(&self, file_name: &Path, window: &PageWindow, data: &Bytes) {
        match self.channels.get_file_channel(file_name, true).await {
            Ok(Some(mut channel)) => {
                if let Err(e) = channel.write_at(window.file_part_offset, data).await {
                    error!("Error writing page to {:?}: {}", file_name, e);
                }
            }
            Ok(None) => {}
            Err(e) => error!("Error opening {:?} for writing: {}", file_name, e),
        }
    }

    async fn delete_page_map_file(&self, entry: &PageMapEntry) {
        if let Err(e) = self.channels.close_and_delete(&entry.file_name).await {
            warn!("Failed to delete page map file {:?}: {}", entry.file_name, e);
        }
    }

    /// Removes every version of a page from its page map.
    pub async fn remove_page(&self, page_map_name: &str, page_id: i32) {
        let mut page_maps = self.page_maps.lock().await;
        if let Some(entry) = page_maps
            .iter_mut()
            .find(|entry| entry.page_map_name == page_map_name)
        {
            entry.manager.remove_page(page_id);
        }
    }

    /// Removes a page map and deletes its file.
    pub async fn remove_page_map(&self, page_map_name: &str) {
        let mut page_maps = self.page_maps.lock().await;
        if let Some(position) = page_maps
            .iter()
            .position(|entry| entry.page_map_name == page_map_name)
        {
            let entry = page_maps.remove(position);
            self.delete_page_map_file(&entry).await;
        }
    }

    /// Reads a stored page version. `-1` selects the most recent version.
    pub async fn load_page(
        &self,
        page_map_name: &str,
        page_id: i32,
        version_number: i32,
        ajax_version_number: i32,
    ) -> Option<Bytes> {
        let mut page_maps = self.page_maps.lock().await;
        let entry = page_maps
            .iter_mut()
            .find(|entry| entry.page_map_name == page_map_name)?;
        let window = entry
            .manager
            .get_page_window(page_id, version_number, ajax_version_number)?;

        match self.channels.get_file_channel(&entry.file_name, false).await {
            Ok(Some(mut channel)) => {
                match channel
                    .read_at(window.file_part_offset, window.file_part_size)
                    .await
                {
                    Ok(data) => Some(data),
                    Err(e) => {
                        error!("Error reading page from {:?}: {}", entry.file_name, e);
                        None
                    }
                }
            }
            Ok(None) => {
                warn!("Page map file {:?} is missing", entry.file_name);
                None
            }
            Err(e) => {
                error!("Error opening {:?} for reading: {}", entry.file_name, e);
                None
            }
        }
    }

    /// Returns true if any ajax version of the page version is stored.
    pub async fn exists(&self, page_map_name: &str, page_id: i32, version_number: i32) -> bool {
        let mut page_maps = self.page_maps.lock().await;
        page_maps
            .iter_mut()
            .find(|entry| entry.page_map_name == page_map_name)
            .and_then(|entry| entry.manager.get_page_window(page_id, version_number, -1))
            .is_some()
    }

    /// Deletes all files of this session.
    pub async fn unbind(&self) {
        let mut page_maps = self.page_maps.lock().await;
        while let Some(entry) = page_maps.pop() {
            self.delete_page_map_file(&entry).await;
        }

        match fs::remove_dir_all(&self.folder).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete session folder {:?}: {}", self.folder, e),
        }
    }
}

fn total_size(page_maps: &[PageMapEntry]) -> u64 {
    page_maps.iter().map(|entry| entry.manager.total_size()).sum()
}

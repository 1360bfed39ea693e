//! Persisted index of sessions and their page maps.
//!
//! The index is written when the store shuts down cleanly and read (then
//! deleted) when the next store starts, so page maps written by a previous
//! run stay reachable. A run that does not shut down cleanly leaves no
//! index behind and its pages are lost.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info};

use super::session::PageMapEntry;
use crate::error::PageStoreResult;

/// Name of the index file inside the store folder.
pub const INDEX_FILE_NAME: &str = "DiskPageStoreIndex";

/// Sessions known to a disk page store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreIndex {
    pub written_at: DateTime<Utc>,
    pub sessions: BTreeMap<String, Vec<PageMapEntry>>,
}

impl StoreIndex {
    pub fn new(sessions: BTreeMap<String, Vec<PageMapEntry>>) -> Self {
        Self {
            written_at: Utc::now(),
            sessions,
        }
    }

    /// Summed size of all page map files.
    pub fn total_size(&self) -> u64 {
        self.sessions
            .values()
            .flatten()
            .map(|entry| entry.manager.total_size())
            .sum()
    }
}

pub fn index_path(store_folder: &Path) -> PathBuf {
    store_folder.join(INDEX_FILE_NAME)
}

/// Reads the index without deleting it. `None` if there is none.
pub async fn read_index(store_folder: &Path) -> PageStoreResult<Option<StoreIndex>> {
    let data = match fs::read(index_path(store_folder)).await {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if data.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(&data)?))
}

/// Reads and deletes the index. Errors are logged and yield no index.
pub(crate) async fn load_index(store_folder: &Path) -> Option<StoreIndex> {
    let path = index_path(store_folder);
    let index = match read_index(store_folder).await {
        Ok(index) => index,
        Err(e) => {
            error!("Couldn't load page store index from {:?}: {}", path, e);
            None
        }
    };

    if let Err(e) = fs::remove_file(&path).await {
        if e.kind() != io::ErrorKind::NotFound {
            error!("Couldn't delete page store index {:?}: {}", path, e);
        }
    }

    if let Some(index) = &index {
        info!(
            "Loaded page store index with {} sessions written at {}",
            index.sessions.len(),
            index.written_at
        );
    }
    index
}

/// Writes the index. Errors are logged.
pub(crate) async fn save_index(store_folder: &Path, index: &StoreIndex) {
    let path = index_path(store_folder);
    if fs::metadata(store_folder).await.is_err() {
        debug!("Store folder {:?} is gone, not writing index", store_folder);
        return;
    }

    let result = async {
        let data = serde_json::to_vec(index)?;
        fs::write(&path, data).await?;
        PageStoreResult::Ok(())
    }
    .await;

    match result {
        Ok(()) => debug!(
            "Wrote page store index with {} sessions to {:?}",
            index.sessions.len(),
            path
        ),
        Err(e) => error!("Couldn't write page store index to {:?}: {}", path, e),
    }
}

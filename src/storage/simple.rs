//! Simple one-file-per-page-version store.
//!
//! Every page version goes into its own file named
//! `<app>-pm-<page map>-p-<id>-v-<version>-a-<ajax>` inside the session
//! folder. Writes happen on the calling task, nothing is cached. Looking up
//! the most recent version scans the session folder and goes by file
//! modification time, which is only as reliable as the file system clock.

use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, error, warn};

use super::paths::encode_file_name;
use super::store::PageStore;
use crate::config::Config;
use crate::error::{ErrorCode, PageStoreError, PageStoreResult};
use crate::models::{PageKey, SharedPage};
use crate::serialization::{PageDecoder, PageSerializer, PageSource};

#[derive(Debug)]
struct StoredFile {
    path: PathBuf,
    page_id: i32,
    version_number: i32,
    ajax_version_number: i32,
    modified: SystemTime,
}

impl StoredFile {
    fn recency(&self) -> (SystemTime, i32, i32) {
        (self.modified, self.version_number, self.ajax_version_number)
    }
}

/// Baseline page store without windows, queues or caching.
pub struct SimpleFilePageStore {
    app_name: String,
    folder: PathBuf,
    serializer: PageSerializer,
    file_pattern: Regex,
}

impl SimpleFilePageStore {
    pub async fn new(config: &Config, decoder: Arc<dyn PageDecoder>) -> PageStoreResult<Self> {
        config.validate()?;

        let folder = config.simple_store_folder();
        fs::create_dir_all(&folder).await.map_err(|e| {
            PageStoreError::with_message(
                ErrorCode::Io,
                format!("Failed to create store folder {:?}: {}", folder, e),
            )
        })?;

        let file_pattern = Regex::new(&format!(
            r"^{}-pm-(.*)-p-(-?\d+)-v-(-?\d+)-a-(-?\d+)$",
            regex::escape(&config.app_name)
        ))
        .map_err(|e| PageStoreError::with_message(ErrorCode::InternalError, e.to_string()))?;

        Ok(Self {
            app_name: config.app_name.clone(),
            folder,
            serializer: PageSerializer::new(decoder),
            file_pattern,
        })
    }

    fn session_folder(&self, session_id: &str) -> PathBuf {
        self.folder.join(encode_file_name(session_id))
    }

    fn page_file_name(
        &self,
        page_map_name: &str,
        page_id: i32,
        version_number: i32,
        ajax_version_number: i32,
    ) -> String {
        format!(
            "{}-pm-{}-p-{}-v-{}-a-{}",
            self.app_name,
            encode_file_name(page_map_name),
            page_id,
            version_number,
            ajax_version_number
        )
    }

    fn parse_file_name(&self, name: &str) -> Option<(String, i32, i32, i32)> {
        let captures = self.file_pattern.captures(name)?;
        Some((
            captures[1].to_string(),
            captures[2].parse().ok()?,
            captures[3].parse().ok()?,
            captures[4].parse().ok()?,
        ))
    }

    /// Lists the page files of one page map of a session.
    async fn stored_files(&self, session_id: &str, page_map_name: &str) -> Vec<StoredFile> {
        let folder = self.session_folder(session_id);
        let page_map = encode_file_name(page_map_name);

        let mut dir = match fs::read_dir(&folder).await {
            Ok(dir) => dir,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to list {:?}: {}", folder, e);
                }
                return Vec::new();
            }
        };

        let mut files = Vec::new();
        loop {
            let item = match dir.next_entry().await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to list {:?}: {}", folder, e);
                    break;
                }
            };

            let name = item.file_name().to_string_lossy().into_owned();
            let (file_page_map, page_id, version_number, ajax_version_number) =
                match self.parse_file_name(&name) {
                    Some(parsed) => parsed,
                    None => continue,
                };
            if file_page_map != page_map {
                continue;
            }

            let modified = match item.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(_) => SystemTime::UNIX_EPOCH,
            };
            files.push(StoredFile {
                path: item.path(),
                page_id,
                version_number,
                ajax_version_number,
                modified,
            });
        }
        files
    }

    /// Finds the file of a page version. `-1` selects the most recent.
    async fn find_page_file(
        &self,
        session_id: &str,
        page_map_name: &str,
        page_id: i32,
        version_number: i32,
        ajax_version_number: i32,
    ) -> Option<PathBuf> {
        if version_number != -1 && ajax_version_number != -1 {
            let path = self.session_folder(session_id).join(self.page_file_name(
                page_map_name,
                page_id,
                version_number,
                ajax_version_number,
            ));
            return match fs::metadata(&path).await {
                Ok(_) => Some(path),
                Err(_) => None,
            };
        }

        let candidates = self
            .stored_files(session_id, page_map_name)
            .await
            .into_iter()
            .filter(|file| {
                file.page_id == page_id
                    && (version_number == -1 || file.version_number == version_number)
                    && (ajax_version_number == -1
                        || file.ajax_version_number == ajax_version_number)
            });

        let found = if version_number == -1 {
            candidates.max_by_key(StoredFile::recency)
        } else {
            candidates.max_by_key(|file| file.ajax_version_number)
        };
        found.map(|file| file.path)
    }

    async fn load_page_data(
        &self,
        session_id: &str,
        page_map_name: &str,
        page_id: i32,
        version_number: i32,
        ajax_version_number: i32,
    ) -> Option<Bytes> {
        let path = self
            .find_page_file(
                session_id,
                page_map_name,
                page_id,
                version_number,
                ajax_version_number,
            )
            .await?;
        match fs::read(&path).await {
            Ok(data) => Some(Bytes::from(data)),
            Err(e) => {
                error!("Error reading page file {:?}: {}", path, e);
                None
            }
        }
    }
}

struct SimpleSessionPages<'a> {
    store: &'a SimpleFilePageStore,
    session_id: &'a str,
}

#[async_trait]
impl PageSource for SimpleSessionPages<'_> {
    async fn load_page_data(&self, key: &PageKey) -> Option<Bytes> {
        self.store
            .load_page_data(self.session_id, &key.page_map_name, key.page_id, -1, -1)
            .await
    }
}

#[async_trait]
impl PageStore for SimpleFilePageStore {
    async fn store_page(&self, session_id: &str, page: &SharedPage) -> PageStoreResult<()> {
        let pages = self.serializer.serialize_page(page)?;

        let folder = self.session_folder(session_id);
        if let Err(e) = fs::create_dir_all(&folder).await {
            error!("Failed to create session folder {:?}: {}", folder, e);
            return Ok(());
        }

        for serialized in &pages {
            let data = match serialized.data() {
                Some(data) => data,
                None => continue,
            };
            let path = folder.join(self.page_file_name(
                serialized.page_map_name(),
                serialized.page_id(),
                serialized.version_number(),
                serialized.ajax_version_number(),
            ));
            if let Err(e) = fs::write(&path, data).await {
                error!("Error writing page file {:?}: {}", path, e);
            }
        }
        Ok(())
    }

    async fn get_page(
        &self,
        session_id: &str,
        page_map_name: &str,
        page_id: i32,
        version_number: i32,
        ajax_version_number: i32,
    ) -> Option<SharedPage> {
        let data = self
            .load_page_data(
                session_id,
                page_map_name,
                page_id,
                version_number,
                ajax_version_number,
            )
            .await?;

        let source = SimpleSessionPages {
            store: self,
            session_id,
        };
        match self
            .serializer
            .deserialize_page(&data, version_number, &source)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                error!(
                    "Failed to restore page {}:{} of session {}: {}",
                    page_map_name, page_id, session_id, e
                );
                None
            }
        }
    }

    async fn remove_page(&self, session_id: &str, page_map_name: &str, page_id: i32) {
        for file in self.stored_files(session_id, page_map_name).await {
            if page_id != -1 && file.page_id != page_id {
                continue;
            }
            if let Err(e) = fs::remove_file(&file.path).await {
                warn!("Failed to delete page file {:?}: {}", file.path, e);
            }
        }
    }

    async fn unbind(&self, session_id: &str) {
        let folder = self.session_folder(session_id);
        match fs::remove_dir_all(&folder).await {
            Ok(()) => debug!("Unbound session {}", session_id),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete session folder {:?}: {}", folder, e),
        }
    }

    async fn contains_page(
        &self,
        session_id: &str,
        page_map_name: &str,
        page_id: i32,
        page_version: i32,
    ) -> bool {
        self.stored_files(session_id, page_map_name)
            .await
            .iter()
            .any(|file| {
                file.page_id == page_id
                    && (page_version == -1 || file.version_number == page_version)
            })
    }

    async fn destroy(&self) {
        debug!("Simple file page store at {:?} destroyed", self.folder);
    }
}

//! Disk page store.
//!
//! Pages of a session are grouped by page map into one file per page map:
//!
//! ```text
//! <location>/<app>-filestore/<session>/pm-<page map>
//! <location>/<app>-filestore/DiskPageStoreIndex
//! ```
//!
//! Each file is bounded by the page map size limit; old page versions are
//! overwritten once it is reached. A session is bounded by the session size
//! limit; the least recently saved to page map is deleted once it is
//! exceeded, unless it is the only one left.
//!
//! In asynchronous mode pages are queued per session and written by a
//! background task. Every read, removal, existence check and unbind first
//! writes out the session's queue while holding it, so it always sees the
//! pages stored before it.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use super::cache::SerializedPagesCache;
use super::channel_pool::FileChannelPool;
use super::index::{load_index, save_index, StoreIndex};
use super::paths::encode_file_name;
use super::session::{SessionEntry, SizeLimits};
use super::store::{PageStore, SerializationAwarePageStore, SessionValue};
use super::writer::{PageSavingTask, PendingPages, WriterCommand};
use crate::config::Config;
use crate::error::{ErrorCode, PageStoreError, PageStoreResult};
use crate::models::{PageKey, SerializedPage, SerializedPageWithSession, SharedPage};
use crate::serialization::{PageDecoder, PageSerializer, PageSource};

/// Pages of a session waiting for the background writer.
#[derive(Default)]
struct PendingList {
    pages: Arc<Mutex<Vec<SerializedPage>>>,
    /// Set while a flush of this list is queued for the writer.
    scheduled: AtomicBool,
}

/// Snapshot of store usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub sessions: usize,
    pub total_bytes: u64,
    pub pending_pages: usize,
}

struct DiskStoreInner {
    config: Config,
    store_folder: PathBuf,
    serializer: PageSerializer,
    cache: SerializedPagesCache,
    channels: Arc<FileChannelPool>,
    sessions: DashMap<String, Arc<SessionEntry>>,
    pending: DashMap<String, Arc<PendingList>>,
}

impl DiskStoreInner {
    fn limits(&self) -> SizeLimits {
        SizeLimits {
            max_size_per_page_map: self.config.max_size_per_page_map,
            max_size_per_session: self.config.max_size_per_session,
        }
    }

    fn session_folder(&self, session_id: &str) -> PathBuf {
        self.store_folder.join(encode_file_name(session_id))
    }

    fn session_entry(&self, session_id: &str, create: bool) -> Option<Arc<SessionEntry>> {
        if let Some(entry) = self.sessions.get(session_id) {
            return Some(entry.value().clone());
        }
        if !create {
            return None;
        }

        let entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!("Creating session entry for {}", session_id);
                Arc::new(SessionEntry::new(
                    session_id.to_string(),
                    self.session_folder(session_id),
                    self.limits(),
                    self.channels.clone(),
                ))
            })
            .value()
            .clone();
        Some(entry)
    }

    fn pending_list(&self, session_id: &str) -> Arc<PendingList> {
        if let Some(list) = self.pending.get(session_id) {
            return list.value().clone();
        }
        self.pending
            .entry(session_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    async fn flush_list(&self, entry: &SessionEntry, pages: &mut Vec<SerializedPage>) {
        for page in pages.drain(..) {
            entry.save_page(&page).await;
        }
    }

    /// Writes out the session's queued pages and keeps the queue locked
    /// until the returned guard is dropped. `None` in synchronous mode.
    async fn flush_pending_of(
        &self,
        entry: &SessionEntry,
    ) -> Option<OwnedMutexGuard<Vec<SerializedPage>>> {
        if self.config.synchronous {
            return None;
        }
        let list = self.pending.get(entry.session_id())?.value().clone();
        let mut pages = list.pages.clone().lock_owned().await;
        self.flush_list(entry, &mut pages).await;
        Some(pages)
    }

    async fn schedule_pages_save(&self, session_id: &str, pages: Vec<SerializedPage>) -> bool {
        let list = self.pending_list(session_id);
        let mut queued = list.pages.lock().await;
        queued.extend(pages);
        !queued.is_empty() && !list.scheduled.swap(true, Ordering::AcqRel)
    }

    /// Stores serialized pages right away in synchronous mode. In
    /// asynchronous mode queues them and returns true if the writer has to
    /// be notified.
    async fn store_serialized_pages(&self, session_id: &str, pages: Vec<SerializedPage>) -> bool {
        if self.config.synchronous {
            if let Some(entry) = self.session_entry(session_id, true) {
                for page in &pages {
                    entry.save_page(page).await;
                }
            }
            false
        } else {
            // reads look up the entry before flushing the queue
            self.session_entry(session_id, true);
            self.schedule_pages_save(session_id, pages).await
        }
    }

    async fn load_page_data(
        &self,
        session_id: &str,
        page_map_name: &str,
        page_id: i32,
        version_number: i32,
        ajax_version_number: i32,
    ) -> Option<Bytes> {
        let entry = self.session_entry(session_id, false)?;
        let _pending = self.flush_pending_of(&entry).await;
        entry
            .load_page(page_map_name, page_id, version_number, ajax_version_number)
            .await
    }

    async fn flush_all(&self) {
        let lists: Vec<(String, Arc<PendingList>)> = self
            .pending
            .iter()
            .map(|item| (item.key().clone(), item.value().clone()))
            .collect();

        for (session_id, list) in lists {
            let mut pages = list.pages.lock().await;
            if pages.is_empty() {
                continue;
            }
            if let Some(entry) = self.session_entry(&session_id, true) {
                self.flush_list(&entry, &mut pages).await;
            }
        }
    }

    async fn index(&self) -> StoreIndex {
        let entries: Vec<Arc<SessionEntry>> = self
            .sessions
            .iter()
            .map(|item| item.value().clone())
            .collect();

        let mut sessions = BTreeMap::new();
        for entry in entries {
            let page_maps = entry.page_maps().await;
            if !page_maps.is_empty() {
                sessions.insert(entry.session_id().to_string(), page_maps);
            }
        }
        StoreIndex::new(sessions)
    }
}

#[async_trait]
impl PendingPages for DiskStoreInner {
    async fn flush_pending(&self, session_id: &str) {
        let list = match self.pending.get(session_id) {
            Some(list) => list.value().clone(),
            // unbound meanwhile
            None => return,
        };

        let mut pages = list.pages.lock().await;
        list.scheduled.store(false, Ordering::Release);
        if pages.is_empty() {
            return;
        }
        match self.session_entry(session_id, true) {
            Some(entry) => self.flush_list(&entry, &mut pages).await,
            None => error!("No session entry to flush pages of session {}", session_id),
        }
    }
}

/// Resolves links of a restored page from the same session.
struct SessionPages<'a> {
    inner: &'a DiskStoreInner,
    session_id: &'a str,
}

#[async_trait]
impl PageSource for SessionPages<'_> {
    async fn load_page_data(&self, key: &PageKey) -> Option<Bytes> {
        self.inner
            .load_page_data(self.session_id, &key.page_map_name, key.page_id, -1, -1)
            .await
    }
}

/// Page store keeping the pages of each session in per-page-map files.
pub struct DiskPageStore {
    inner: Arc<DiskStoreInner>,
    commands: Option<mpsc::UnboundedSender<WriterCommand>>,
    writer: parking_lot::Mutex<Option<PageSavingTask>>,
    destroyed: AtomicBool,
}

impl DiskPageStore {
    /// Creates a store, picking up the index left by a previous run.
    ///
    /// Fails if the configuration is invalid. In asynchronous mode the
    /// background writer is spawned on the current tokio runtime.
    pub async fn new(config: Config, decoder: Arc<dyn PageDecoder>) -> PageStoreResult<Self> {
        config.validate()?;

        let store_folder = config.store_folder();
        fs::create_dir_all(&store_folder).await.map_err(|e| {
            PageStoreError::with_message(
                ErrorCode::Io,
                format!("Failed to create store folder {:?}: {}", store_folder, e),
            )
        })?;

        let channels = Arc::new(FileChannelPool::new(config.file_channel_pool_capacity));
        let inner = Arc::new(DiskStoreInner {
            serializer: PageSerializer::new(decoder),
            cache: SerializedPagesCache::new(config.serialized_pages_cache_size),
            channels,
            sessions: DashMap::new(),
            pending: DashMap::new(),
            store_folder,
            config,
        });

        if let Some(index) = load_index(&inner.store_folder).await {
            for (session_id, page_maps) in index.sessions {
                let entry = SessionEntry::with_page_maps(
                    session_id.clone(),
                    inner.session_folder(&session_id),
                    inner.limits(),
                    inner.channels.clone(),
                    page_maps,
                );
                inner.sessions.insert(session_id, Arc::new(entry));
            }
        }

        let (commands, writer) = if inner.config.synchronous {
            (None, None)
        } else {
            let (tx, rx) = mpsc::unbounded_channel();
            let task = PageSavingTask::spawn(inner.clone(), rx);
            (Some(tx), Some(task))
        };

        info!(
            "Disk page store at {:?} ({} mode)",
            inner.store_folder,
            if inner.config.synchronous { "synchronous" } else { "asynchronous" }
        );

        Ok(Self {
            inner,
            commands,
            writer: parking_lot::Mutex::new(writer),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The recently serialized pages cache.
    pub fn cache(&self) -> &SerializedPagesCache {
        &self.inner.cache
    }

    fn notify_writer(&self, session_id: &str) {
        if let Some(commands) = &self.commands {
            if commands.send(WriterCommand::Flush(session_id.to_string())).is_err() {
                warn!("Page saving task is gone, pages of {} stay queued", session_id);
            }
        }
    }

    /// Stores already serialized pages of a session.
    pub async fn store_serialized_pages(&self, session_id: &str, pages: Vec<SerializedPage>) {
        if self.inner.store_serialized_pages(session_id, pages).await {
            self.notify_writer(session_id);
        }
    }

    /// Reads the stored data of a page version.
    pub async fn get_page_data(
        &self,
        session_id: &str,
        page_map_name: &str,
        page_id: i32,
        version_number: i32,
        ajax_version_number: i32,
    ) -> Option<Bytes> {
        self.inner
            .load_page_data(session_id, page_map_name, page_id, version_number, ajax_version_number)
            .await
    }

    /// Fills in the data dropped by [`SerializedPageWithSession::strip`]
    /// from the page map files.
    async fn restore_stripped(&self, entry: &SerializedPageWithSession) -> SerializedPageWithSession {
        let mut pages = Vec::with_capacity(entry.pages.len());
        for page in &entry.pages {
            let data = self
                .get_page_data(
                    &entry.session_id,
                    page.page_map_name(),
                    page.page_id(),
                    page.version_number(),
                    page.ajax_version_number(),
                )
                .await;
            if data.is_none() {
                debug!(
                    "Page {}:{} of session {} is no longer stored",
                    page.page_map_name(),
                    page.page_id(),
                    entry.session_id
                );
            }
            pages.push(page.with_data(data));
        }
        entry.with_pages(pages)
    }

    /// Current usage of the store.
    pub async fn stats(&self) -> StoreStats {
        let entries: Vec<Arc<SessionEntry>> = self
            .inner
            .sessions
            .iter()
            .map(|item| item.value().clone())
            .collect();
        let lists: Vec<Arc<PendingList>> = self
            .inner
            .pending
            .iter()
            .map(|item| item.value().clone())
            .collect();

        let mut stats = StoreStats {
            sessions: entries.len(),
            ..StoreStats::default()
        };
        for entry in entries {
            stats.total_bytes += entry.total_size().await;
        }
        for list in lists {
            stats.pending_pages += list.pages.lock().await.len();
        }
        stats
    }

    /// Size of all page map files of a session.
    pub async fn session_size(&self, session_id: &str) -> u64 {
        match self.inner.session_entry(session_id, false) {
            Some(entry) => entry.total_size().await,
            None => 0,
        }
    }

    /// Folder holding the page map files of a session.
    pub fn session_folder(&self, session_id: &str) -> PathBuf {
        self.inner.session_folder(session_id)
    }
}

#[async_trait]
impl PageStore for DiskPageStore {
    async fn store_page(&self, session_id: &str, page: &SharedPage) -> PageStoreResult<()> {
        let pages = self.inner.serializer.serialize_page(page)?;
        self.inner.cache.store_page(session_id, page, pages.clone());
        self.store_serialized_pages(session_id, pages).await;
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
            .get_page_data(session_id, page_map_name, page_id, version_number, ajax_version_number)
            .await?;

        let source = SessionPages {
            inner: &self.inner,
            session_id,
        };
        match self
            .inner
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
        let entry = match self.inner.session_entry(session_id, false) {
            Some(entry) => entry,
            None => return,
        };
        let _pending = self.inner.flush_pending_of(&entry).await;
        if page_id == -1 {
            entry.remove_page_map(page_map_name).await;
        } else {
            entry.remove_page(page_map_name, page_id).await;
        }
    }

    async fn unbind(&self, session_id: &str) {
        if let Some(entry) = self.inner.session_entry(session_id, false) {
            {
                let _pending = self.inner.flush_pending_of(&entry).await;
                self.inner.sessions.remove(session_id);
                entry.unbind().await;
            }
            self.inner.pending.remove(session_id);
            debug!("Unbound session {}", session_id);
        }
        self.inner.cache.remove_session(session_id);
    }

    async fn contains_page(
        &self,
        session_id: &str,
        page_map_name: &str,
        page_id: i32,
        page_version: i32,
    ) -> bool {
        let entry = match self.inner.session_entry(session_id, false) {
            Some(entry) => entry,
            None => return false,
        };
        let _pending = self.inner.flush_pending_of(&entry).await;
        entry.exists(page_map_name, page_id, page_version).await
    }

    async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        if !self.inner.config.synchronous {
            self.inner.flush_all().await;
        }

        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            if let Some(commands) = &self.commands {
                let _ = commands.send(WriterCommand::Shutdown);
            }
            writer.join().await;
        }

        let index = self.inner.index().await;
        save_index(&self.inner.store_folder, &index).await;

        self.inner.channels.destroy();
        info!("Disk page store at {:?} destroyed", self.inner.store_folder);
    }
}

#[async_trait]
impl SerializationAwarePageStore for DiskPageStore {
    async fn prepare_for_serialization(
        &self,
        session_id: &str,
        value: SessionValue,
    ) -> PageStoreResult<SessionValue> {
        match value {
            SessionValue::Page(page) => {
                let entry = match self.inner.cache.get_page(&page) {
                    Some(entry) => entry,
                    None => {
                        let pages = self.inner.serializer.serialize_page(&page)?;
                        match self.inner.cache.store_page(session_id, &page, pages.clone()) {
                            Some(entry) => entry,
                            None => Arc::new(SerializedPageWithSession::new(session_id, &page, pages)),
                        }
                    }
                };
                Ok(SessionValue::Serialized(entry))
            }
            SessionValue::Serialized(entry) if entry.is_stripped() => Ok(SessionValue::Serialized(
                Arc::new(self.restore_stripped(&entry).await),
            )),
            other => Ok(other),
        }
    }

    async fn restore_after_serialization(
        &self,
        value: SessionValue,
    ) -> PageStoreResult<SessionValue> {
        if !self.inner.config.store_after_session_replication {
            return Ok(value);
        }
        match value {
            page @ SessionValue::Page(_) => Ok(page),
            SessionValue::Serialized(entry) if entry.is_stripped() => {
                Ok(SessionValue::Serialized(entry))
            }
            SessionValue::Serialized(entry) => {
                self.store_serialized_pages(&entry.session_id, entry.pages.clone())
                    .await;
                Ok(SessionValue::Serialized(Arc::new(entry.strip())))
            }
            SessionValue::Opaque { type_name, .. } => Err(unexpected_object_type(&type_name)),
        }
    }

    async fn convert_to_page(&self, value: SessionValue) -> PageStoreResult<Option<SharedPage>> {
        match value {
            SessionValue::Page(page) => Ok(Some(page)),
            SessionValue::Serialized(entry) => {
                if !entry.is_stripped() {
                    self.store_serialized_pages(&entry.session_id, entry.pages.clone())
                        .await;
                }
                Ok(self
                    .get_page(
                        &entry.session_id,
                        &entry.page_map_name,
                        entry.page_id,
                        entry.version_number,
                        entry.ajax_version_number,
                    )
                    .await)
            }
            SessionValue::Opaque { type_name, .. } => Err(unexpected_object_type(&type_name)),
        }
    }
}

fn unexpected_object_type(type_name: &str) -> PageStoreError {
    PageStoreError::with_message(
        ErrorCode::UnexpectedObjectType,
        format!("Unknown object type {}", type_name),
    )
}

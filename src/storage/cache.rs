//! Cache of recently serialized pages.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::trace;

use crate::models::{SerializedPage, SerializedPageWithSession, SharedPage};

/// Bounded cache of serialized pages, looked up by live page identity.
///
/// Entries only hold a weak reference to the page they were built from, so
/// the cache never keeps a page alive. Entries whose page is gone are
/// purged on the next store. A capacity of 0 disables the cache.
pub struct SerializedPagesCache {
    capacity: usize,
    entries: Mutex<VecDeque<Arc<SerializedPageWithSession>>>,
}

impl SerializedPagesCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the entry built from this page instance. A hit moves the
    /// entry to the most recently used end.
    pub fn get_page(&self, page: &SharedPage) -> Option<Arc<SerializedPageWithSession>> {
        if self.capacity == 0 {
            return None;
        }

        let mut entries = self.entries.lock();
        let position = entries.iter().position(|entry| entry.is_for(page))?;
        let entry = entries.remove(position)?;
        entries.push_back(entry.clone());
        Some(entry)
    }

    /// Returns the entry for a page version, for callers that no longer
    /// have the live page.
    pub fn get_page_by_key(
        &self,
        session_id: &str,
        page_id: i32,
        page_map_name: &str,
        version_number: i32,
        ajax_version_number: i32,
    ) -> Option<Arc<SerializedPageWithSession>> {
        if self.capacity == 0 {
            return None;
        }

        self.entries
            .lock()
            .iter()
            .find(|entry| {
                entry.matches(
                    session_id,
                    page_id,
                    page_map_name,
                    version_number,
                    ajax_version_number,
                )
            })
            .cloned()
    }

    /// Caches the serialized form of a page, replacing any entry for the
    /// same instance and evicting the oldest entry when full.
    pub fn store_page(
        &self,
        session_id: &str,
        page: &SharedPage,
        pages: Vec<SerializedPage>,
    ) -> Option<Arc<SerializedPageWithSession>> {
        if self.capacity == 0 {
            return None;
        }

        let entry = Arc::new(SerializedPageWithSession::new(session_id, page, pages));

        let mut entries = self.entries.lock();
        entries.retain(|existing| !existing.is_orphaned() && !existing.is_for(page));
        entries.push_back(entry.clone());
        while entries.len() > self.capacity {
            if let Some(evicted) = entries.pop_front() {
                trace!(
                    "Evicted page {}:{} of session {} from the serialization cache",
                    evicted.page_map_name,
                    evicted.page_id,
                    evicted.session_id
                );
            }
        }

        Some(entry)
    }

    /// Drops the oldest entries until at most `len` remain. Meant to be
    /// called by the host when memory gets tight.
    pub fn shrink_to(&self, len: usize) {
        let mut entries = self.entries.lock();
        while entries.len() > len {
            entries.pop_front();
        }
    }

    /// Drops every entry of a session.
    pub fn remove_session(&self, session_id: &str) {
        self.entries
            .lock()
            .retain(|entry| entry.session_id != session_id);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

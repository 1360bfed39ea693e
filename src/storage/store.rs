//! Page store contracts.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

use crate::error::PageStoreResult;
use crate::models::{SerializedPageWithSession, SharedPage};

/// Persists the pages of web sessions.
#[async_trait]
pub trait PageStore: Send + Sync {
    /// Serializes and stores the current version of a page.
    ///
    /// Failing to serialize the page is reported to the caller. Failing to
    /// write it is logged and the page is simply not available later.
    async fn store_page(&self, session_id: &str, page: &SharedPage) -> PageStoreResult<()>;

    /// Loads a page version. `version_number` and `ajax_version_number`
    /// accept -1 for "most recent".
    async fn get_page(
        &self,
        session_id: &str,
        page_map_name: &str,
        page_id: i32,
        version_number: i32,
        ajax_version_number: i32,
    ) -> Option<SharedPage>;

    /// Removes every version of a page, or the whole page map when
    /// `page_id` is -1.
    async fn remove_page(&self, session_id: &str, page_map_name: &str, page_id: i32);

    /// Called when a page is accessed. Nothing is tracked currently.
    async fn page_accessed(&self, _session_id: &str, _page: &SharedPage) {}

    /// Deletes everything stored for a session.
    async fn unbind(&self, session_id: &str);

    /// Returns true if the page version is stored. `page_version` accepts
    /// -1 for "any version".
    async fn contains_page(
        &self,
        session_id: &str,
        page_map_name: &str,
        page_id: i32,
        page_version: i32,
    ) -> bool;

    /// Flushes pending work and releases all resources.
    async fn destroy(&self);
}

/// Value held in a session attribute while the session itself is
/// serialized, e.g. for replication to another node.
#[derive(Clone)]
pub enum SessionValue {
    /// A live page.
    Page(SharedPage),
    /// Serialized form of a page. Stripped when its data is on disk.
    Serialized(Arc<SerializedPageWithSession>),
    /// Anything else the session holds.
    Opaque { type_name: String, value: Bytes },
}

impl SessionValue {
    pub fn type_name(&self) -> &str {
        match self {
            SessionValue::Page(_) => "page",
            SessionValue::Serialized(_) => "serialized page",
            SessionValue::Opaque { type_name, .. } => type_name,
        }
    }
}

impl fmt::Debug for SessionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionValue::Page(page) => f.debug_tuple("Page").field(page).finish(),
            SessionValue::Serialized(entry) => f.debug_tuple("Serialized").field(entry).finish(),
            SessionValue::Opaque { type_name, value } => f
                .debug_struct("Opaque")
                .field("type_name", type_name)
                .field("len", &value.len())
                .finish(),
        }
    }
}

/// A page store that takes part when the session holding its pages is
/// serialized.
#[async_trait]
pub trait SerializationAwarePageStore: PageStore {
    /// Replaces a page by its serialized form before the session is
    /// serialized. Other values pass through unchanged.
    async fn prepare_for_serialization(
        &self,
        session_id: &str,
        value: SessionValue,
    ) -> PageStoreResult<SessionValue>;

    /// Counterpart of [`prepare_for_serialization`] once the session was
    /// deserialized on the receiving side.
    ///
    /// [`prepare_for_serialization`]: SerializationAwarePageStore::prepare_for_serialization
    async fn restore_after_serialization(&self, value: SessionValue)
        -> PageStoreResult<SessionValue>;

    /// Turns a restored session value back into a live page.
    async fn convert_to_page(&self, value: SessionValue) -> PageStoreResult<Option<SharedPage>>;
}

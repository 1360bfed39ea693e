//! Serialized page carriers.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use super::page::{Page, SharedPage};

/// One independently storable page blob.
///
/// Equality and hashing only look at the identity tuple
/// `(page_id, page_map_name, version_number, ajax_version_number)`.
#[derive(Clone, Serialize, Deserialize)]
pub struct SerializedPage {
    page_id: i32,
    page_map_name: String,
    version_number: i32,
    ajax_version_number: i32,
    data: Option<Bytes>,
}

impl SerializedPage {
    pub fn new(
        page_id: i32,
        page_map_name: impl Into<String>,
        version_number: i32,
        ajax_version_number: i32,
        data: Option<Bytes>,
    ) -> Self {
        Self {
            page_id,
            page_map_name: page_map_name.into(),
            version_number,
            ajax_version_number,
            data,
        }
    }

    pub fn page_id(&self) -> i32 {
        self.page_id
    }

    pub fn page_map_name(&self) -> &str {
        &self.page_map_name
    }

    pub fn version_number(&self) -> i32 {
        self.version_number
    }

    pub fn ajax_version_number(&self) -> i32 {
        self.ajax_version_number
    }

    /// Serialized bytes, `None` when stripped.
    pub fn data(&self) -> Option<&Bytes> {
        self.data.as_ref()
    }

    pub fn is_stripped(&self) -> bool {
        self.data.is_none()
    }

    /// Returns a copy without the data.
    pub fn stripped(&self) -> Self {
        Self {
            data: None,
            ..self.clone()
        }
    }

    /// Returns a copy carrying the given data.
    pub fn with_data(&self, data: Option<Bytes>) -> Self {
        Self {
            data,
            ..self.clone()
        }
    }
}

impl PartialEq for SerializedPage {
    fn eq(&self, other: &Self) -> bool {
        self.page_id == other.page_id
            && self.page_map_name == other.page_map_name
            && self.version_number == other.version_number
            && self.ajax_version_number == other.ajax_version_number
    }
}

impl Eq for SerializedPage {}

impl Hash for SerializedPage {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.page_id.hash(state);
        self.page_map_name.hash(state);
        self.version_number.hash(state);
        self.ajax_version_number.hash(state);
    }
}

impl fmt::Debug for SerializedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializedPage")
            .field("page_id", &self.page_id)
            .field("page_map_name", &self.page_map_name)
            .field("version_number", &self.version_number)
            .field("ajax_version_number", &self.ajax_version_number)
            .field("size", &self.data.as_ref().map(|d| d.len()))
            .finish()
    }
}

/// Serialized form of a page together with the session it belongs to.
///
/// This is what travels with a replicated session. The live page is only
/// referenced weakly so the cache can look entries up by page identity
/// without keeping the page alive. After the value has crossed a
/// serialization boundary there is no live page at all.
#[derive(Clone, Serialize, Deserialize)]
pub struct SerializedPageWithSession {
    pub session_id: String,
    pub page_id: i32,
    pub page_map_name: String,
    pub version_number: i32,
    pub ajax_version_number: i32,
    pub pages: Vec<SerializedPage>,
    /// Set when the page data was dropped because it is already on disk.
    stripped: bool,
    #[serde(skip)]
    page: Option<Weak<dyn Page>>,
}

impl SerializedPageWithSession {
    /// Creates an entry for a live page.
    pub fn new(session_id: impl Into<String>, page: &SharedPage, pages: Vec<SerializedPage>) -> Self {
        Self {
            session_id: session_id.into(),
            page_id: page.numeric_id(),
            page_map_name: page.page_map_name().to_string(),
            version_number: page.current_version_number(),
            ajax_version_number: page.ajax_version_number(),
            pages,
            stripped: false,
            page: Some(Arc::downgrade(page)),
        }
    }

    /// Returns a copy whose blobs carry no data.
    pub fn strip(&self) -> Self {
        Self {
            pages: self.pages.iter().map(SerializedPage::stripped).collect(),
            stripped: true,
            page: None,
            ..self.clone()
        }
    }

    /// Returns a copy with the given blobs and no stripped marker.
    pub fn with_pages(&self, pages: Vec<SerializedPage>) -> Self {
        Self {
            pages,
            stripped: false,
            page: None,
            ..self.clone()
        }
    }

    pub fn is_stripped(&self) -> bool {
        self.stripped
    }

    /// Returns true if this entry was built from the given page instance
    /// and that instance is still alive.
    pub fn is_for(&self, page: &SharedPage) -> bool {
        match &self.page {
            Some(weak) => {
                weak.strong_count() > 0 && std::ptr::addr_eq(weak.as_ptr(), Arc::as_ptr(page))
            }
            None => false,
        }
    }

    /// Returns true if the live page this entry was built from is gone.
    pub fn is_orphaned(&self) -> bool {
        self.page
            .as_ref()
            .map(|weak| weak.strong_count() == 0)
            .unwrap_or(false)
    }

    /// Returns true if the entry identifies the given page version.
    pub fn matches(
        &self,
        session_id: &str,
        page_id: i32,
        page_map_name: &str,
        version_number: i32,
        ajax_version_number: i32,
    ) -> bool {
        self.session_id == session_id
            && self.page_id == page_id
            && self.page_map_name == page_map_name
            && self.version_number == version_number
            && self.ajax_version_number == ajax_version_number
    }
}

impl fmt::Debug for SerializedPageWithSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializedPageWithSession")
            .field("session_id", &self.session_id)
            .field("page_id", &self.page_id)
            .field("page_map_name", &self.page_map_name)
            .field("version_number", &self.version_number)
            .field("ajax_version_number", &self.ajax_version_number)
            .field("pages", &self.pages)
            .field("stripped", &self.stripped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_ignores_data() {
        let a = SerializedPage::new(1, "main", 2, 0, Some(Bytes::from_static(b"abc")));
        let b = a.stripped();
        assert_eq!(a, b);
        assert!(b.is_stripped());
        assert_ne!(a, SerializedPage::new(1, "main", 2, 1, None));
    }

    #[test]
    fn test_replication_payload_roundtrip() {
        let entry = SerializedPageWithSession {
            session_id: "s1".to_string(),
            page_id: 3,
            page_map_name: "main".to_string(),
            version_number: 1,
            ajax_version_number: 0,
            pages: vec![SerializedPage::new(3, "main", 1, 0, Some(Bytes::from_static(b"xyz")))],
            stripped: false,
            page: None,
        };
        let json = serde_json::to_string(&entry.strip()).unwrap();
        let restored: SerializedPageWithSession = serde_json::from_str(&json).unwrap();
        assert!(restored.is_stripped());
        assert!(restored.pages[0].is_stripped());
        assert!(!restored.is_orphaned());
    }
}

//! Page abstraction consumed by the page stores.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

use crate::error::PageStoreResult;
use crate::serialization::PageOutput;

/// Shared handle to a live page. Identity is pointer identity.
pub type SharedPage = Arc<dyn Page>;

/// A unit of UI state that can be persisted by a page store.
///
/// Implementations write their own fields through [`PageOutput`]. A field
/// that refers to another page must be written with
/// [`PageOutput::write_link`] so the referenced page is stored as its own
/// blob instead of being inlined.
pub trait Page: Send + Sync + fmt::Debug {
    /// Numeric page id, unique within the page map.
    fn numeric_id(&self) -> i32;

    /// Name of the page map the page belongs to.
    fn page_map_name(&self) -> &str;

    /// Current full-page version.
    fn current_version_number(&self) -> i32;

    /// Current ajax version of the current full-page version.
    fn ajax_version_number(&self) -> i32;

    /// Type tag written into the blob header, used to pick a decoder.
    fn kind(&self) -> &str;

    /// Writes the page state.
    fn write_state(&self, out: &mut PageOutput<'_>) -> PageStoreResult<()>;

    /// Returns an older version of this page, if the page keeps one.
    fn version(&self, _version_number: i32) -> Option<SharedPage> {
        None
    }
}

/// Identifies a page within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageKey {
    pub page_map_name: String,
    pub page_id: i32,
}

impl PageKey {
    pub fn new(page_map_name: impl Into<String>, page_id: i32) -> Self {
        Self {
            page_map_name: page_map_name.into(),
            page_id,
        }
    }

    /// Key of a live page.
    pub fn of(page: &dyn Page) -> Self {
        Self::new(page.page_map_name(), page.numeric_id())
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page_map_name, self.page_id)
    }
}

/// Reference from one page to another.
///
/// Clones share the same target, so a link resolved while restoring a page
/// is visible through every copy of it.
#[derive(Clone)]
pub struct PageLink {
    key: PageKey,
    target: Arc<RwLock<Option<SharedPage>>>,
}

impl PageLink {
    /// Creates a link to a live page.
    pub fn to(page: &SharedPage) -> Self {
        Self {
            key: PageKey::of(page.as_ref()),
            target: Arc::new(RwLock::new(Some(page.clone()))),
        }
    }

    /// Creates a link that only knows the key of its target.
    pub fn unresolved(key: PageKey) -> Self {
        Self {
            key,
            target: Arc::new(RwLock::new(None)),
        }
    }

    pub fn key(&self) -> &PageKey {
        &self.key
    }

    /// Returns the target page, if it is resolved.
    pub fn get(&self) -> Option<SharedPage> {
        self.target.read().clone()
    }

    pub fn is_resolved(&self) -> bool {
        self.target.read().is_some()
    }

    /// Drops the target. Pages that link to each other keep each other
    /// alive until one side is detached.
    pub fn detach(&self) {
        self.target.write().take();
    }

    pub(crate) fn resolve(&self, page: SharedPage) {
        *self.target.write() = Some(page);
    }
}

impl fmt::Debug for PageLink {
    // Only the key: linked pages may point back at the page being printed.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageLink")
            .field("key", &self.key)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Returns true if both handles point at the same page instance.
pub fn same_page(a: &SharedPage, b: &SharedPage) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

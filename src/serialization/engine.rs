//! Page graph serialization.
//!
//! A page may reference other live pages. Those are never inlined into the
//! referencing blob: each distinct page reachable from the root becomes a
//! [`SerializedPage`] of its own and the reference is written as a
//! placeholder holding only the target's [`PageKey`]. Restoring reverses
//! this with a memo table so pages that reference each other resolve to a
//! single instance each.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace};

use super::codec::{PageHeader, PageInput, PageOutput};
use crate::error::{ErrorCode, PageStoreError, PageStoreResult};
use crate::models::{Page, PageKey, PageLink, SerializedPage, SharedPage};

/// Rebuilds concrete pages from their blobs. Supplied by the application.
pub trait PageDecoder: Send + Sync {
    /// Decodes the body of a blob whose header has already been read.
    fn decode(&self, header: &PageHeader, input: &mut PageInput<'_>) -> PageStoreResult<SharedPage>;
}

/// Where placeholders are resolved from while restoring a page graph.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Returns a page that is already live in the session, if any.
    async fn live_page(&self, _key: &PageKey) -> Option<SharedPage> {
        None
    }

    /// Returns the blob of the most recently stored version of a page.
    async fn load_page_data(&self, key: &PageKey) -> Option<Bytes>;
}

/// Source that resolves nothing. Links of restored pages stay unresolved.
pub struct NoLinkedPages;

#[async_trait]
impl PageSource for NoLinkedPages {
    async fn load_page_data(&self, _key: &PageKey) -> Option<Bytes> {
        None
    }
}

/// Source backed by a set of serialized pages, e.g. a replication payload.
///
/// When several versions of the same page are present, the last one wins.
#[derive(Default)]
pub struct MemoryPageSource {
    blobs: HashMap<PageKey, Bytes>,
}

impl MemoryPageSource {
    pub fn from_pages(pages: &[SerializedPage]) -> Self {
        let blobs = pages
            .iter()
            .filter_map(|page| {
                page.data().map(|data| {
                    (
                        PageKey::new(page.page_map_name(), page.page_id()),
                        data.clone(),
                    )
                })
            })
            .collect();
        Self { blobs }
    }
}

#[async_trait]
impl PageSource for MemoryPageSource {
    async fn load_page_data(&self, key: &PageKey) -> Option<Bytes> {
        self.blobs.get(key).cloned()
    }
}

/// State of one serialization pass.
#[derive(Default)]
pub(crate) struct SerializationContext {
    visited: HashSet<PageKey>,
    /// Linked live pages waiting to be encoded, in discovery order.
    queue: VecDeque<SharedPage>,
}

impl SerializationContext {
    fn encode(&mut self, page: &dyn Page) -> PageStoreResult<SerializedPage> {
        let key = PageKey::of(page);
        self.visited.insert(key);

        let mut serialized = SerializedPage::new(
            page.numeric_id(),
            page.page_map_name(),
            page.current_version_number(),
            page.ajax_version_number(),
            None,
        );

        let mut out = PageOutput::new(self, page);
        page.write_state(&mut out)?;
        let data = out.finish();

        trace!(
            "Serialized page {}:{} ({} bytes)",
            page.page_map_name(),
            page.numeric_id(),
            data.len()
        );
        serialized = serialized.with_data(Some(data));
        Ok(serialized)
    }

    /// Called for every link written. Queues live targets not seen yet.
    pub(crate) fn visit_link(&mut self, link: &PageLink) {
        if self.visited.contains(link.key()) {
            return;
        }
        if let Some(target) = link.get() {
            self.visited.insert(link.key().clone());
            self.queue.push_back(target);
        }
    }
}

/// State of one restore pass.
#[derive(Default)]
struct DeserializationContext {
    restored: HashMap<PageKey, SharedPage>,
    pending: Vec<PageLink>,
}

impl DeserializationContext {
    fn materialize(&mut self, decoder: &dyn PageDecoder, data: &[u8]) -> PageStoreResult<SharedPage> {
        let (header, mut input) = PageInput::open(data, &mut self.pending)?;
        let page = decoder.decode(&header, &mut input)?;
        self.restored.insert(header.key(), page.clone());
        Ok(page)
    }

    async fn resolve_links(
        &mut self,
        decoder: &dyn PageDecoder,
        source: &dyn PageSource,
    ) -> PageStoreResult<()> {
        while let Some(link) = self.pending.pop() {
            if let Some(page) = self.restored.get(link.key()) {
                link.resolve(page.clone());
                continue;
            }

            if let Some(page) = source.live_page(link.key()).await {
                self.restored.insert(link.key().clone(), page.clone());
                link.resolve(page);
                continue;
            }

            match source.load_page_data(link.key()).await {
                Some(data) => {
                    let page = self.materialize(decoder, &data)?;
                    // Also remember it under the key it was linked by.
                    self.restored
                        .entry(link.key().clone())
                        .or_insert_with(|| page.clone());
                    link.resolve(page);
                }
                None => {
                    debug!("Linked page {} is not available", link.key());
                }
            }
        }
        Ok(())
    }
}

/// Turns pages into storable blobs and back.
#[derive(Clone)]
pub struct PageSerializer {
    decoder: Arc<dyn PageDecoder>,
}

impl PageSerializer {
    pub fn new(decoder: Arc<dyn PageDecoder>) -> Self {
        Self { decoder }
    }

    /// Serializes a page and every live page reachable from it.
    ///
    /// The root page comes first. Each other page appears once, no matter
    /// how many times or through which cycles it is referenced.
    pub fn serialize_page(&self, page: &SharedPage) -> PageStoreResult<Vec<SerializedPage>> {
        let mut ctx = SerializationContext::default();
        let mut pages = vec![ctx.encode(page.as_ref())?];

        // linked pages are encoded one after another, never nested
        while let Some(linked) = ctx.queue.pop_front() {
            pages.push(ctx.encode(linked.as_ref())?);
        }
        Ok(pages)
    }

    /// Restores a page from its blob.
    ///
    /// With `version_number == -1` the page is returned as stored. Otherwise
    /// the requested version is taken from the page's own version history,
    /// and `None` is returned if the page does not have it.
    pub async fn deserialize_page(
        &self,
        data: &[u8],
        version_number: i32,
        source: &dyn PageSource,
    ) -> PageStoreResult<Option<SharedPage>> {
        let mut ctx = DeserializationContext::default();
        let page = ctx.materialize(self.decoder.as_ref(), data)?;
        ctx.resolve_links(self.decoder.as_ref(), source).await?;

        if version_number == -1 || page.current_version_number() == version_number {
            return Ok(Some(page));
        }
        Ok(page.version(version_number))
    }
}

/// Error for a page kind the decoder does not know.
pub fn unknown_page_kind(kind: &str) -> PageStoreError {
    PageStoreError::with_message(
        ErrorCode::UnknownPageKind,
        format!("No decoder for page kind '{}'", kind),
    )
}

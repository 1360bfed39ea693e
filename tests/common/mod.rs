//! Common test utilities.

#![allow(dead_code)]

use parking_lot::Mutex;
use rand::Rng;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use pagestore_rs::serialization::unknown_page_kind;
use pagestore_rs::{
    same_page, Config, DiskPageStore, ErrorCode, Page, PageDecoder, PageHeader, PageInput,
    PageLink, PageOutput, PageSerializer, PageStoreError, PageStoreResult, SharedPage,
    SimpleFilePageStore,
};

pub const FORM_KIND: &str = "form";
pub const BROKEN_KIND: &str = "broken";

/// Test page with a title, an opaque payload, older versions and links to
/// other pages.
#[derive(Debug)]
pub struct FormPage {
    pub id: i32,
    pub page_map: String,
    pub version: i32,
    pub ajax_version: i32,
    pub title: String,
    pub payload: Vec<u8>,
    /// Older versions as (version number, title).
    pub history: Vec<(i32, String)>,
    pub links: Mutex<Vec<PageLink>>,
}

impl FormPage {
    pub fn new(id: i32, page_map: &str, title: &str) -> Self {
        Self {
            id,
            page_map: page_map.to_string(),
            version: 0,
            ajax_version: 0,
            title: title.to_string(),
            payload: Vec::new(),
            history: Vec::new(),
            links: Mutex::new(Vec::new()),
        }
    }

    pub fn at_version(mut self, version: i32, ajax_version: i32) -> Self {
        self.version = version;
        self.ajax_version = ajax_version;
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_random_payload(self, len: usize) -> Self {
        let mut rng = rand::thread_rng();
        let payload = (0..len).map(|_| rng.gen()).collect();
        self.with_payload(payload)
    }

    pub fn with_history(mut self, history: &[(i32, &str)]) -> Self {
        self.history = history
            .iter()
            .map(|(version, title)| (*version, title.to_string()))
            .collect();
        self
    }

    pub fn link_to(&self, target: &SharedPage) {
        self.links.lock().push(PageLink::to(target));
    }

    pub fn links(&self) -> Vec<PageLink> {
        self.links.lock().clone()
    }

    /// Breaks links so pages that point at each other can be freed.
    pub fn detach_links(&self) {
        for link in self.links.lock().iter() {
            link.detach();
        }
    }
}

impl Page for FormPage {
    fn numeric_id(&self) -> i32 {
        self.id
    }

    fn page_map_name(&self) -> &str {
        &self.page_map
    }

    fn current_version_number(&self) -> i32 {
        self.version
    }

    fn ajax_version_number(&self) -> i32 {
        self.ajax_version
    }

    fn kind(&self) -> &str {
        FORM_KIND
    }

    fn write_state(&self, out: &mut PageOutput<'_>) -> PageStoreResult<()> {
        out.write_str(&self.title);
        out.write_bytes(&self.payload);
        out.write_len(self.history.len());
        for (version, title) in &self.history {
            out.write_i32(*version);
            out.write_str(title);
        }
        let links = self.links();
        out.write_len(links.len());
        for link in &links {
            out.write_link(link)?;
        }
        Ok(())
    }

    fn version(&self, version_number: i32) -> Option<SharedPage> {
        let (version, title) = self
            .history
            .iter()
            .find(|(version, _)| *version == version_number)?;
        let older = FormPage::new(self.id, &self.page_map, title).at_version(*version, 0);
        Some(Arc::new(older))
    }
}

/// Page whose state cannot be written.
#[derive(Debug)]
pub struct BrokenPage {
    pub id: i32,
}

impl Page for BrokenPage {
    fn numeric_id(&self) -> i32 {
        self.id
    }

    fn page_map_name(&self) -> &str {
        "main"
    }

    fn current_version_number(&self) -> i32 {
        0
    }

    fn ajax_version_number(&self) -> i32 {
        0
    }

    fn kind(&self) -> &str {
        BROKEN_KIND
    }

    fn write_state(&self, _out: &mut PageOutput<'_>) -> PageStoreResult<()> {
        Err(PageStoreError::with_message(
            ErrorCode::NotSerializable,
            "socket handle cannot be serialized",
        ))
    }
}

/// Decoder for [`FormPage`]. Remembers what it decoded so tests can get at
/// the concrete pages behind restored handles.
#[derive(Default)]
pub struct FormDecoder {
    decoded: Mutex<Vec<Arc<FormPage>>>,
}

impl FormDecoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the concrete page behind a handle returned by a store.
    pub fn form(&self, page: &SharedPage) -> Arc<FormPage> {
        self.decoded
            .lock()
            .iter()
            .find(|form| {
                let shared: SharedPage = (*form).clone();
                same_page(&shared, page)
            })
            .cloned()
            .unwrap_or_else(|| panic!("{:?} was not decoded by this decoder", page))
    }

    pub fn decoded_count(&self) -> usize {
        self.decoded.lock().len()
    }
}

impl PageDecoder for FormDecoder {
    fn decode(&self, header: &PageHeader, input: &mut PageInput<'_>) -> PageStoreResult<SharedPage> {
        if header.kind != FORM_KIND {
            return Err(unknown_page_kind(&header.kind));
        }

        let title = input.read_str()?;
        let payload = input.read_bytes()?;
        let mut history = Vec::new();
        for _ in 0..input.read_len()? {
            let version = input.read_i32()?;
            history.push((version, input.read_str()?));
        }
        let mut links = Vec::new();
        for _ in 0..input.read_len()? {
            links.push(input.read_link()?);
        }

        let page = Arc::new(FormPage {
            id: header.page_id,
            page_map: header.page_map_name.clone(),
            version: header.version_number,
            ajax_version: header.ajax_version_number,
            title,
            payload,
            history,
            links: Mutex::new(links),
        });
        self.decoded.lock().push(page.clone());
        Ok(page)
    }
}

pub fn shared(page: &Arc<FormPage>) -> SharedPage {
    page.clone()
}

/// Builds a page whose serialized blob is exactly `size` bytes.
pub fn page_of_size(id: i32, page_map: &str, size: usize) -> Arc<FormPage> {
    let serializer = PageSerializer::new(FormDecoder::new());
    let empty: SharedPage = Arc::new(FormPage::new(id, page_map, ""));
    let overhead = serializer.serialize_page(&empty).unwrap()[0]
        .data()
        .unwrap()
        .len();
    assert!(size >= overhead, "page blobs are at least {} bytes", overhead);
    Arc::new(FormPage::new(id, page_map, "").with_payload(vec![7; size - overhead]))
}

pub fn session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn test_config(dir: &Path) -> Config {
    Config {
        location: dir.to_path_buf(),
        app_name: "test".to_string(),
        ..Config::default()
    }
}

pub fn sync_config(dir: &Path) -> Config {
    Config {
        synchronous: true,
        ..test_config(dir)
    }
}

/// Disk store in a temporary folder.
pub struct TestStore {
    pub dir: TempDir,
    pub decoder: Arc<FormDecoder>,
    pub store: DiskPageStore,
}

impl TestStore {
    pub async fn start(configure: impl FnOnce(&Path) -> Config) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let decoder = FormDecoder::new();
        let store = DiskPageStore::new(configure(dir.path()), decoder.clone())
            .await
            .unwrap();
        Self {
            dir,
            decoder,
            store,
        }
    }

    pub async fn synchronous() -> Self {
        Self::start(sync_config).await
    }

    pub async fn asynchronous() -> Self {
        Self::start(test_config).await
    }

    /// Starts another store on the same folder and configuration.
    pub async fn reopen(&self) -> DiskPageStore {
        DiskPageStore::new(self.store.config().clone(), self.decoder.clone())
            .await
            .unwrap()
    }
}

pub async fn simple_store(dir: &Path, decoder: Arc<FormDecoder>) -> SimpleFilePageStore {
    SimpleFilePageStore::new(&test_config(dir), decoder).await.unwrap()
}

//! pagestore-rs: disk-backed page storage for stateful web sessions.
//!
//! Pages are serialized into self-contained blobs, one per page reachable
//! from the stored page, and kept in size-bounded per-page-map files. A
//! background task does the writing; reads always see earlier writes of
//! their session.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pagestore_rs::{Config, DiskPageStore, PageDecoder, PageStore};
//!
//! async fn run(decoder: Arc<dyn PageDecoder>) -> pagestore_rs::PageStoreResult<()> {
//!     let store = DiskPageStore::new(Config::default(), decoder).await?;
//!     // store.store_page("session", &page).await?;
//!     store.destroy().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod serialization;
pub mod storage;

// Re-exports for convenience
pub use config::{
    Args, Command, Config, DEFAULT_APP_NAME, DEFAULT_FILE_CHANNEL_POOL_CAPACITY,
    DEFAULT_MAX_SIZE_PER_PAGE_MAP, DEFAULT_MAX_SIZE_PER_SESSION,
    DEFAULT_SERIALIZED_PAGES_CACHE_SIZE,
};
pub use error::{ErrorCode, PageStoreError, PageStoreResult};
pub use models::{
    same_page, Page, PageKey, PageLink, PageWindow, SerializedPage, SerializedPageWithSession,
    SharedPage, WindowKey,
};
pub use serialization::{
    MemoryPageSource, NoLinkedPages, PageDecoder, PageHeader, PageInput, PageOutput,
    PageSerializer, PageSource,
};
pub use storage::{
    DiskPageStore, PageStore, SerializationAwarePageStore, SerializedPagesCache, SessionValue,
    SimpleFilePageStore, StoreStats,
};

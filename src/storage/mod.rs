//! Storage layer for persistence.

mod cache;
mod channel_pool;
mod disk;
mod index;
mod paths;
mod session;
mod simple;
mod store;
mod window;
mod writer;

pub use cache::*;
pub use channel_pool::*;
pub use disk::*;
pub use index::{index_path, read_index, StoreIndex, INDEX_FILE_NAME};
pub use paths::*;
pub use session::PageMapEntry;
pub use simple::*;
pub use store::*;
pub use window::*;

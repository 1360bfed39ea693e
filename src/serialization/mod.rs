//! Page serialization: blob layout and page graph handling.

mod codec;
mod engine;

pub use codec::{PageHeader, PageInput, PageOutput};
pub use engine::{
    unknown_page_kind, MemoryPageSource, NoLinkedPages, PageDecoder, PageSerializer, PageSource,
};

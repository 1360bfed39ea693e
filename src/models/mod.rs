//! Data models for the page stores.

mod page;
mod serialized;
mod window;

pub use page::*;
pub use serialized::*;
pub use window::*;

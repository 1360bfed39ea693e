//! Page window data models.

use serde::{Deserialize, Serialize};

/// Identity of a stored page version inside a page map file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowKey {
    pub page_id: i32,
    pub version_number: i32,
    pub ajax_version_number: i32,
}

impl WindowKey {
    pub fn new(page_id: i32, version_number: i32, ajax_version_number: i32) -> Self {
        Self {
            page_id,
            version_number,
            ajax_version_number,
        }
    }
}

/// Byte range of the page map file holding one serialized page version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageWindow {
    pub page_id: i32,
    pub version_number: i32,
    pub ajax_version_number: i32,
    /// Offset in the page map file where the data starts.
    pub file_part_offset: u64,
    /// Size of the serialized page data.
    pub file_part_size: u64,
}

impl PageWindow {
    /// Offset one past the last byte of the window.
    pub fn end(&self) -> u64 {
        self.file_part_offset + self.file_part_size
    }
}

//! File name encoding for session folders and page map files.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::borrow::Cow;

/// Everything but `[A-Za-z0-9._-]` is escaped.
const FILE_NAME: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

/// Turns an arbitrary session id or page map name into a safe file name.
pub fn encode_file_name(name: &str) -> String {
    let encoded: Cow<'_, str> = utf8_percent_encode(name, FILE_NAME).into();
    match encoded.as_ref() {
        // would resolve to the folder itself or its parent
        "." | ".." => encoded.replace('.', "%2E"),
        _ => encoded.into_owned(),
    }
}

/// Reverses [`encode_file_name`].
pub fn decode_file_name(name: &str) -> String {
    percent_decode_str(name).decode_utf8_lossy().into_owned()
}

/// File name of a page map within its session folder.
pub fn page_map_file_name(page_map_name: &str) -> String {
    format!("pm-{}", encode_file_name(page_map_name))
}

//! Binary layout of a page blob.
//!
//! ```text
//! magic   "WPG1"
//! header  kind:str page_id:i32 page_map:str version:i32 ajax:i32
//! body    tagged values written by Page::write_state
//! ```
//!
//! Strings and byte arrays are prefixed with a u32 length. Integers are
//! big-endian. Every body value starts with a one byte tag so a reader that
//! gets out of step with the writer fails instead of misinterpreting data.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::engine::SerializationContext;
use crate::error::{PageStoreError, PageStoreResult};
use crate::models::{Page, PageKey, PageLink};

const MAGIC: &[u8; 4] = b"WPG1";

const TAG_I32: u8 = 1;
const TAG_I64: u8 = 2;
const TAG_BOOL: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_LEN: u8 = 6;
const TAG_LINK: u8 = 7;

fn tag_name(tag: u8) -> &'static str {
    match tag {
        TAG_I32 => "i32",
        TAG_I64 => "i64",
        TAG_BOOL => "bool",
        TAG_STR => "str",
        TAG_BYTES => "bytes",
        TAG_LEN => "len",
        TAG_LINK => "link",
        _ => "unknown",
    }
}

/// Identity of a page as recorded at the start of its blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageHeader {
    pub kind: String,
    pub page_id: i32,
    pub page_map_name: String,
    pub version_number: i32,
    pub ajax_version_number: i32,
}

impl PageHeader {
    fn of(page: &dyn Page) -> Self {
        Self {
            kind: page.kind().to_string(),
            page_id: page.numeric_id(),
            page_map_name: page.page_map_name().to_string(),
            version_number: page.current_version_number(),
            ajax_version_number: page.ajax_version_number(),
        }
    }

    pub fn key(&self) -> PageKey {
        PageKey::new(self.page_map_name.clone(), self.page_id)
    }

    /// Reads only the header of a blob.
    pub fn parse(data: &[u8]) -> PageStoreResult<Self> {
        let mut buf = data;
        Self::read(&mut buf)
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_slice(MAGIC);
        put_raw_str(buf, &self.kind);
        buf.put_i32(self.page_id);
        put_raw_str(buf, &self.page_map_name);
        buf.put_i32(self.version_number);
        buf.put_i32(self.ajax_version_number);
    }

    fn read(buf: &mut &[u8]) -> PageStoreResult<Self> {
        need(buf, MAGIC.len())?;
        if &buf[..MAGIC.len()] != MAGIC {
            return Err(PageStoreError::corrupted("Bad page blob magic"));
        }
        buf.advance(MAGIC.len());

        let kind = get_raw_str(buf)?;
        need(buf, 4)?;
        let page_id = buf.get_i32();
        let page_map_name = get_raw_str(buf)?;
        need(buf, 8)?;
        let version_number = buf.get_i32();
        let ajax_version_number = buf.get_i32();

        Ok(Self {
            kind,
            page_id,
            page_map_name,
            version_number,
            ajax_version_number,
        })
    }
}

fn put_raw_str(buf: &mut BytesMut, value: &str) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

fn need(buf: &&[u8], count: usize) -> PageStoreResult<()> {
    if buf.remaining() < count {
        return Err(PageStoreError::corrupted(format!(
            "Page blob truncated: needed {} more bytes, {} left",
            count,
            buf.remaining()
        )));
    }
    Ok(())
}

fn get_raw_bytes<'b>(buf: &mut &'b [u8]) -> PageStoreResult<&'b [u8]> {
    need(buf, 4)?;
    let len = buf.get_u32() as usize;
    need(buf, len)?;
    let slice: &'b [u8] = *buf;
    let (value, rest) = slice.split_at(len);
    *buf = rest;
    Ok(value)
}

fn get_raw_str(buf: &mut &[u8]) -> PageStoreResult<String> {
    let raw = get_raw_bytes(buf)?;
    String::from_utf8(raw.to_vec())
        .map_err(|_| PageStoreError::corrupted("Page blob contains invalid UTF-8"))
}

/// Sink for the state of one page.
pub struct PageOutput<'a> {
    buf: BytesMut,
    ctx: &'a mut SerializationContext,
}

impl<'a> PageOutput<'a> {
    pub(crate) fn new(ctx: &'a mut SerializationContext, page: &dyn Page) -> Self {
        let mut buf = BytesMut::with_capacity(256);
        PageHeader::of(page).write(&mut buf);
        Self { buf, ctx }
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_u8(TAG_I32);
        self.buf.put_i32(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_u8(TAG_I64);
        self.buf.put_i64(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(TAG_BOOL);
        self.buf.put_u8(value as u8);
    }

    pub fn write_str(&mut self, value: &str) {
        self.buf.put_u8(TAG_STR);
        put_raw_str(&mut self.buf, value);
    }

    pub fn write_bytes(&mut self, value: &[u8]) {
        self.buf.put_u8(TAG_BYTES);
        self.buf.put_u32(value.len() as u32);
        self.buf.put_slice(value);
    }

    /// Writes the length of a collection that follows.
    pub fn write_len(&mut self, len: usize) {
        self.buf.put_u8(TAG_LEN);
        self.buf.put_u32(len as u32);
    }

    /// Writes a reference to another page.
    ///
    /// Only a placeholder with the target's key lands in this blob. If the
    /// target is live and was not serialized yet in this pass, it is queued
    /// to get a blob of its own after this page is done.
    pub fn write_link(&mut self, link: &PageLink) -> PageStoreResult<()> {
        self.ctx.visit_link(link);
        self.buf.put_u8(TAG_LINK);
        self.buf.put_i32(link.key().page_id);
        put_raw_str(&mut self.buf, &link.key().page_map_name);
        Ok(())
    }

    pub(crate) fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Source for the state of one page.
pub struct PageInput<'a> {
    buf: &'a [u8],
    links: &'a mut Vec<PageLink>,
}

impl<'a> PageInput<'a> {
    /// Splits a blob into its header and an input positioned at the body.
    pub(crate) fn open(
        data: &'a [u8],
        links: &'a mut Vec<PageLink>,
    ) -> PageStoreResult<(PageHeader, Self)> {
        let mut buf = data;
        let header = PageHeader::read(&mut buf)?;
        Ok((header, Self { buf, links }))
    }

    fn expect_tag(&mut self, expected: u8) -> PageStoreResult<()> {
        need(&self.buf, 1)?;
        let tag = self.buf.get_u8();
        if tag != expected {
            return Err(PageStoreError::corrupted(format!(
                "Expected {} value, found {}",
                tag_name(expected),
                tag_name(tag)
            )));
        }
        Ok(())
    }

    pub fn read_i32(&mut self) -> PageStoreResult<i32> {
        self.expect_tag(TAG_I32)?;
        need(&self.buf, 4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_i64(&mut self) -> PageStoreResult<i64> {
        self.expect_tag(TAG_I64)?;
        need(&self.buf, 8)?;
        Ok(self.buf.get_i64())
    }

    pub fn read_bool(&mut self) -> PageStoreResult<bool> {
        self.expect_tag(TAG_BOOL)?;
        need(&self.buf, 1)?;
        Ok(self.buf.get_u8() != 0)
    }

    pub fn read_str(&mut self) -> PageStoreResult<String> {
        self.expect_tag(TAG_STR)?;
        get_raw_str(&mut self.buf)
    }

    pub fn read_bytes(&mut self) -> PageStoreResult<Vec<u8>> {
        self.expect_tag(TAG_BYTES)?;
        Ok(get_raw_bytes(&mut self.buf)?.to_vec())
    }

    pub fn read_len(&mut self) -> PageStoreResult<usize> {
        self.expect_tag(TAG_LEN)?;
        need(&self.buf, 4)?;
        Ok(self.buf.get_u32() as usize)
    }

    /// Reads a page reference. The returned link is unresolved until the
    /// whole page graph has been restored.
    pub fn read_link(&mut self) -> PageStoreResult<PageLink> {
        self.expect_tag(TAG_LINK)?;
        need(&self.buf, 4)?;
        let page_id = self.buf.get_i32();
        let page_map_name = get_raw_str(&mut self.buf)?;
        let link = PageLink::unresolved(PageKey::new(page_map_name, page_id));
        self.links.push(link.clone());
        Ok(link)
    }

    /// Returns true once the whole body has been consumed.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[derive(Debug)]
    struct Blank;

    impl Page for Blank {
        fn numeric_id(&self) -> i32 {
            7
        }
        fn page_map_name(&self) -> &str {
            "main"
        }
        fn current_version_number(&self) -> i32 {
            2
        }
        fn ajax_version_number(&self) -> i32 {
            1
        }
        fn kind(&self) -> &str {
            "blank"
        }
        fn write_state(&self, _out: &mut PageOutput<'_>) -> PageStoreResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_values_read_back_in_order() {
        let mut ctx = SerializationContext::default();
        let mut out = PageOutput::new(&mut ctx, &Blank);
        out.write_i32(-5);
        out.write_str("title");
        out.write_bool(true);
        out.write_len(2);
        out.write_bytes(&[1, 2, 3]);
        out.write_i64(1 << 40);
        out.write_link(&PageLink::unresolved(PageKey::new("other", 9)))
            .unwrap();
        let data = out.finish();

        let mut links = Vec::new();
        let (header, mut input) = PageInput::open(&data, &mut links).unwrap();
        assert_eq!(header.kind, "blank");
        assert_eq!(header.key(), PageKey::new("main", 7));
        assert_eq!(header.version_number, 2);
        assert_eq!(header.ajax_version_number, 1);

        assert_eq!(input.read_i32().unwrap(), -5);
        assert_eq!(input.read_str().unwrap(), "title");
        assert!(input.read_bool().unwrap());
        assert_eq!(input.read_len().unwrap(), 2);
        assert_eq!(input.read_bytes().unwrap(), vec![1, 2, 3]);
        assert_eq!(input.read_i64().unwrap(), 1 << 40);
        let link = input.read_link().unwrap();
        assert!(input.is_empty());

        assert_eq!(link.key(), &PageKey::new("other", 9));
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn test_tag_mismatch_is_corruption() {
        let mut ctx = SerializationContext::default();
        let mut out = PageOutput::new(&mut ctx, &Blank);
        out.write_str("not a number");
        let data = out.finish();

        let mut links = Vec::new();
        let (_, mut input) = PageInput::open(&data, &mut links).unwrap();
        let err = input.read_i32().unwrap_err();
        assert_eq!(err.code, ErrorCode::CorruptedPageData);
    }

    #[test]
    fn test_truncated_and_foreign_blobs() {
        let mut ctx = SerializationContext::default();
        let mut out = PageOutput::new(&mut ctx, &Blank);
        out.write_i64(42);
        let data = out.finish();

        let truncated = &data[..data.len() - 3];
        let mut links = Vec::new();
        let (_, mut input) = PageInput::open(truncated, &mut links).unwrap();
        assert!(input.read_i64().is_err());

        assert!(PageHeader::parse(b"JUNKJUNK").is_err());
        assert!(PageHeader::parse(b"").is_err());
    }
}

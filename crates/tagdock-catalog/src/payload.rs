//! Payload file parsing.
//!
//! Three on-disk forms are accepted, distinguished by content rather
//! than extension:
//!
//! * a 540-byte binary, the full tag image;
//! * a 504-byte binary, the user region only, with the capability
//!   container synthesized;
//! * a Flipper-style text dump with one `Page N: ..` line per page,
//!   all 135 of them.

use std::path::Path;

use tagdock_core::constants::{PAGE_SIZE, TAG_PAGES, TAG_SIZE, USER_DATA_SIZE};
use tagdock_core::TagImage;

use crate::error::{CatalogError, CatalogResult};

const PAGE_LINE_PREFIX: &str = "Page ";

/// Parse the contents of a payload file into a [`TagImage`].
pub fn parse_payload(path: &Path, contents: &[u8]) -> CatalogResult<TagImage> {
    match contents.len() {
        TAG_SIZE => TagImage::from_full(contents)
            .map_err(|e| CatalogError::malformed(path, e.to_string())),
        USER_DATA_SIZE => TagImage::from_user_region(contents)
            .map_err(|e| CatalogError::malformed(path, e.to_string())),
        _ => match std::str::from_utf8(contents) {
            Ok(text) => parse_text_dump(path, text),
            Err(_) => Err(CatalogError::malformed(
                path,
                format!(
                    "binary payload must be {TAG_SIZE} or {USER_DATA_SIZE} bytes, got {}",
                    contents.len()
                ),
            )),
        },
    }
}

/// Parse a Flipper-style text dump. Header lines are ignored; every
/// page from 0 to 134 must appear exactly once.
fn parse_text_dump(path: &Path, text: &str) -> CatalogResult<TagImage> {
    let mut pages: Vec<Option<[u8; PAGE_SIZE]>> = vec![None; TAG_PAGES];
    let mut seen = 0usize;

    for line in text.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix(PAGE_LINE_PREFIX) else {
            continue;
        };
        let (number, hex) = rest.split_once(':').ok_or_else(|| {
            CatalogError::malformed(path, format!("page line without colon: {line:?}"))
        })?;
        let page: usize = number.trim().parse().map_err(|_| {
            CatalogError::malformed(path, format!("bad page number: {number:?}"))
        })?;
        if page >= TAG_PAGES {
            return Err(CatalogError::malformed(
                path,
                format!("page {page} out of range"),
            ));
        }
        if pages[page].is_some() {
            return Err(CatalogError::malformed(
                path,
                format!("duplicate page {page}"),
            ));
        }
        pages[page] = Some(parse_page_bytes(path, hex)?);
        seen += 1;
    }

    if seen != TAG_PAGES {
        return Err(CatalogError::malformed(
            path,
            format!("expected {TAG_PAGES} page lines, found {seen}"),
        ));
    }

    let mut bytes = Vec::with_capacity(TAG_SIZE);
    for page in pages {
        // Every slot is filled once seen == TAG_PAGES.
        bytes.extend_from_slice(&page.unwrap_or([0u8; PAGE_SIZE]));
    }
    TagImage::from_full(&bytes).map_err(|e| CatalogError::malformed(path, e.to_string()))
}

fn parse_page_bytes(path: &Path, hex: &str) -> CatalogResult<[u8; PAGE_SIZE]> {
    let mut out = [0u8; PAGE_SIZE];
    let mut count = 0usize;
    for token in hex.split_whitespace() {
        if count == PAGE_SIZE {
            return Err(CatalogError::malformed(
                path,
                format!("more than {PAGE_SIZE} bytes on a page line"),
            ));
        }
        out[count] = u8::from_str_radix(token, 16).map_err(|_| {
            CatalogError::malformed(path, format!("bad hex byte: {token:?}"))
        })?;
        count += 1;
    }
    if count != PAGE_SIZE {
        return Err(CatalogError::malformed(
            path,
            format!("expected {PAGE_SIZE} bytes on a page line, got {count}"),
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use tagdock_core::constants::{CC_PAGE, NTAG215_CC};

    fn path() -> PathBuf {
        PathBuf::from("test.nfc")
    }

    fn text_dump() -> String {
        let mut dump = String::from(
            "Filetype: Flipper NFC device\nVersion: 2\nDevice type: NTAG215\n",
        );
        for page in 0..TAG_PAGES {
            dump.push_str(&format!(
                "Page {}: {:02X} {:02X} 00 00\n",
                page,
                page as u8,
                page as u8
            ));
        }
        dump
    }

    #[test]
    fn full_binary_parses() {
        let mut contents = vec![0u8; TAG_SIZE];
        contents[0] = 0x04;
        let image = parse_payload(&path(), &contents).unwrap();
        assert_eq!(image.as_bytes()[0], 0x04);
    }

    #[test]
    fn user_region_binary_gets_a_capability_container() {
        let contents = vec![0xAB; USER_DATA_SIZE];
        let image = parse_payload(&path(), &contents).unwrap();
        assert_eq!(image.page(CC_PAGE).unwrap(), NTAG215_CC);
        assert_eq!(image.page(4).unwrap(), [0xAB; 4]);
    }

    #[test]
    fn odd_binary_size_is_malformed() {
        let err = parse_payload(&path(), &vec![0u8; 100]).unwrap_err();
        assert!(matches!(err, CatalogError::MalformedPayload { .. }));
    }

    #[test]
    fn text_dump_parses_all_pages() {
        let image = parse_payload(&path(), text_dump().as_bytes()).unwrap();
        assert_eq!(image.page(0).unwrap(), [0x00, 0x00, 0x00, 0x00]);
        assert_eq!(image.page(134).unwrap(), [0x86, 0x86, 0x00, 0x00]);
    }

    #[test]
    fn text_dump_missing_page_is_malformed() {
        let dump = text_dump();
        let truncated: String = dump
            .lines()
            .filter(|line| !line.starts_with("Page 7:"))
            .map(|line| format!("{line}\n"))
            .collect();
        let err = parse_payload(&path(), truncated.as_bytes()).unwrap_err();
        assert!(matches!(err, CatalogError::MalformedPayload { .. }));
    }

    #[test]
    fn text_dump_duplicate_page_is_malformed() {
        let mut dump = text_dump();
        dump.push_str("Page 3: 00 00 00 00\n");
        let err = parse_payload(&path(), dump.as_bytes()).unwrap_err();
        assert!(matches!(err, CatalogError::MalformedPayload { .. }));
    }

    #[test]
    fn text_dump_bad_hex_is_malformed() {
        let mut dump = text_dump();
        dump = dump.replace("Page 5: 05 05 00 00", "Page 5: ZZ 05 00 00");
        let err = parse_payload(&path(), dump.as_bytes()).unwrap_err();
        assert!(matches!(err, CatalogError::MalformedPayload { .. }));
    }
}

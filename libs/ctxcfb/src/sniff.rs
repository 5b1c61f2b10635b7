//! Input format classification
//!
//! Callers that receive "an Office file" need to know which parser to pick before
//! committing to one: a Compound File, an OOXML package (a ZIP archive), a flat XML
//! document, or something else entirely
use std::fmt;

/// The magic signature of a Compound File
pub const CFB_MAGIC: [u8; 8] = [0xd0, 0xcf, 0x11, 0xe0, 0xa1, 0xb1, 0x1a, 0xe1];
const ZIP_MAGIC: [u8; 4] = [b'P', b'K', 0x03, 0x04];
const ZIP_EMPTY_MAGIC: [u8; 4] = [b'P', b'K', 0x05, 0x06];

/// The broad format of an input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    /// Compound File Binary (OLE2)
    Cfb,
    /// ZIP archive, typically an unencrypted OOXML package
    Ooxml,
    /// Raw XML (e.g. Office 2003 XML or a flat ODF document)
    Xml,
    /// Empty, truncated or unrecognized content
    Unknown,
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(
            f,
            "{}",
            match self {
                Self::Cfb => "a compound file",
                Self::Ooxml => "an OOXML/ZIP package",
                Self::Xml => "an XML document",
                Self::Unknown => "unknown or corrupt data",
            }
        )
    }
}

/// Classifies the leading bytes of an input
///
/// Only the first few hundred bytes are inspected
///
/// # Examples
/// ```
/// use ctxcfb::{sniff, FormatKind};
///
/// assert_eq!(sniff(b"PK\x03\x04rest of the archive"), FormatKind::Ooxml);
/// assert_eq!(sniff(b"<?xml version=\"1.0\"?><a/>"), FormatKind::Xml);
/// assert_eq!(sniff(b"GIF89a"), FormatKind::Unknown);
/// ```
pub fn sniff(bytes: &[u8]) -> FormatKind {
    if bytes.starts_with(&CFB_MAGIC) {
        return FormatKind::Cfb;
    }
    if bytes.starts_with(&ZIP_MAGIC) || bytes.starts_with(&ZIP_EMPTY_MAGIC) {
        return FormatKind::Ooxml;
    }
    if looks_like_xml(bytes) {
        return FormatKind::Xml;
    }
    FormatKind::Unknown
}

fn looks_like_xml(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(256)];
    if let Some(rest) = head.strip_prefix(&[0xef, 0xbb, 0xbf]) {
        // UTF-8 BOM
        return first_non_blank(rest) == Some(b'<');
    }
    if head.starts_with(&[0xff, 0xfe]) || head.starts_with(&[0xfe, 0xff]) {
        // UTF-16 BOM: look at the low (or high) bytes only
        let odd = head.starts_with(&[0xfe, 0xff]);
        let narrow: Vec<u8> = head[2..]
            .chunks_exact(2)
            .map(|pair| if odd { pair[1] } else { pair[0] })
            .collect();
        return first_non_blank(&narrow) == Some(b'<');
    }
    first_non_blank(head) == Some(b'<')
}

fn first_non_blank(bytes: &[u8]) -> Option<u8> {
    bytes.iter().copied().find(|c| !c.is_ascii_whitespace())
}

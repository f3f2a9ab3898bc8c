//! Byte-to-text decoding with an ordered fallback chain.

/// Encoding that produced the decoded text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Latin1,
    /// UTF-8 with invalid sequences replaced
    Lossy,
}

impl TextEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Utf16Le => "utf-16le",
            TextEncoding::Utf16Be => "utf-16be",
            TextEncoding::Latin1 => "latin-1",
            TextEncoding::Lossy => "utf-8-lossy",
        }
    }
}

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Decode file bytes: UTF-8 (BOM stripped), UTF-16 when a BOM says so,
/// Latin-1 for text without NULs or C1 controls, lossy UTF-8 otherwise.
pub fn decode_bytes(bytes: &[u8]) -> (String, TextEncoding) {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    if let Ok(text) = std::str::from_utf8(body) {
        return (text.to_string(), TextEncoding::Utf8);
    }

    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        if let Some(text) = decode_utf16(rest, u16::from_le_bytes) {
            return (text, TextEncoding::Utf16Le);
        }
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        if let Some(text) = decode_utf16(rest, u16::from_be_bytes) {
            return (text, TextEncoding::Utf16Be);
        }
    }

    if looks_like_latin1(bytes) {
        return (bytes.iter().map(|&b| b as char).collect(), TextEncoding::Latin1);
    }

    (
        String::from_utf8_lossy(bytes).into_owned(),
        TextEncoding::Lossy,
    )
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units = bytes.chunks_exact(2).map(|pair| unit([pair[0], pair[1]]));
    char::decode_utf16(units).collect::<Result<String, _>>().ok()
}

fn looks_like_latin1(bytes: &[u8]) -> bool {
    !bytes.iter().any(|&b| b == 0 || (0x80..0xA0).contains(&b))
}

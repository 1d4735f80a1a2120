//! Lenient UTF-16LE to UTF-8 conversion for NTFS names.
//!
//! NTFS names are stored as UTF-16LE code units. Unpaired surrogates do
//! occur in corrupted or adversarial images; the specification asks for a
//! "lenient" conversion rather than a hard failure, so unpaired surrogates
//! are replaced with `U+FFFD` instead of aborting decode.

/// Decodes `bytes` (an even-length run of UTF-16LE code units) leniently.
pub fn decode_lossy(bytes: &[u8]) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]));
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Replaces ASCII control characters (the C0 set and DEL) with `'^'`, as
/// both drivers do when surfacing names and symlink targets to the caller.
pub fn clean_control_chars(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_control() { '^' } else { c })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decodes_ascii_range() {
        let name: Vec<u16> = "secret.txt".encode_utf16().collect();
        let bytes: Vec<u8> = name.iter().flat_map(|u| u.to_le_bytes()).collect();
        assert_eq!(decode_lossy(&bytes), "secret.txt");
    }

    #[test]
    fn unpaired_surrogate_becomes_replacement_char() {
        let bytes = 0xD800u16.to_le_bytes();
        assert_eq!(decode_lossy(&bytes), "\u{FFFD}");
    }

    #[test]
    fn control_chars_are_caretted() {
        assert_eq!(clean_control_chars("a\u{7}b\u{0}"), "a^b^");
    }
}

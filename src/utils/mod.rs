pub mod base91;
pub mod retry;

pub use retry::RetryPolicy;

/// Strip a UTF-8 byte order mark and decode the rest.
pub fn decode_utf8_text(bytes: Vec<u8>) -> Result<String, std::string::FromUtf8Error> {
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        String::from_utf8(bytes[3..].to_vec())
    } else {
        String::from_utf8(bytes)
    }
}

/// Split `text` into pieces of at most `max_bytes` bytes without cutting a
/// UTF-8 character. Always returns at least one piece.
pub fn split_on_char_boundaries(text: &str, max_bytes: usize) -> Vec<&str> {
    let max_bytes = max_bytes.max(4);
    let mut pieces = Vec::new();
    let mut rest = text;
    while rest.len() > max_bytes {
        let mut cut = max_bytes;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (head, tail) = rest.split_at(cut);
        pieces.push(head);
        rest = tail;
    }
    pieces.push(rest);
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bom_is_stripped() {
        let text = decode_utf8_text(vec![0xEF, 0xBB, 0xBF, b'h', b'i']).unwrap();
        assert_eq!(text, "hi");
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        let text = "密文密文ab";
        let pieces = split_on_char_boundaries(text, 4);
        assert_eq!(pieces, vec!["密", "文", "密", "文a", "b"]);
        assert_eq!(pieces.concat(), text);
    }

    #[test]
    fn test_split_short_text_is_one_piece() {
        assert_eq!(split_on_char_boundaries("abc", 1024), vec!["abc"]);
        assert_eq!(split_on_char_boundaries("", 1024), vec![""]);
    }
}

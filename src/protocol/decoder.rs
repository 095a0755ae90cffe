//! # Line Decoder
//!
//! Splits radio notifications into text lines and validates checksum suffixes.

use super::checksum::checksum;
use super::{CHECKSUM_DIGITS, CHECKSUM_SEPARATOR};

/// Split a notification buffer into trimmed, non-empty lines
///
/// A single notification may carry several newline-terminated lines, and
/// the firmware terminates them with either `\n` or `\r\n`. Invalid UTF-8
/// is replaced rather than rejected.
///
/// # Examples
///
/// ```
/// use soil_link::protocol::decoder::decode_lines;
///
/// let lines = decode_lines(b"OK r:5*00\r\n\r\nhello\n");
/// assert_eq!(lines, vec!["OK r:5*00".to_string(), "hello".to_string()]);
/// ```
pub fn decode_lines(buffer: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(buffer)
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Verify the `*HH` checksum suffix of a line
///
/// # Arguments
///
/// * `line` - One decoded line
///
/// # Returns
///
/// * `(&str, bool)` - Payload and whether the checksum matched
///
/// Lines without a separator, or whose suffix is not exactly two characters,
/// are returned whole with `true`: the firmware emits both styles.
pub fn verify_checksum(line: &str) -> (&str, bool) {
    let Some(index) = line.rfind(CHECKSUM_SEPARATOR) else {
        return (line, true);
    };

    let payload = &line[..index];
    let suffix = line[index + CHECKSUM_SEPARATOR.len_utf8()..].trim();

    if suffix.len() != CHECKSUM_DIGITS {
        return (line, true);
    }

    let expected = checksum(payload.as_bytes());
    (payload, suffix.eq_ignore_ascii_case(&expected))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_single_line() {
        assert_eq!(decode_lines(b"hello\r\n"), vec!["hello"]);
    }

    #[test]
    fn test_decode_multiple_lines_in_order() {
        let lines = decode_lines(b"one\ntwo\r\nthree\n");
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_decode_discards_empty_pieces() {
        assert!(decode_lines(b"").is_empty());
        assert!(decode_lines(b"\n\r\n  \n").is_empty());
        assert_eq!(decode_lines(b"\n\na\n\n"), vec!["a"]);
    }

    #[test]
    fn test_decode_unterminated_tail_kept() {
        assert_eq!(decode_lines(b"first\npartial"), vec!["first", "partial"]);
    }

    #[test]
    fn test_decode_k_lines() {
        for k in 0..20 {
            let buffer: String = (0..k).map(|i| format!("line {}\r\n", i)).collect();
            let lines = decode_lines(buffer.as_bytes());
            assert_eq!(lines.len(), k);
            for (i, line) in lines.iter().enumerate() {
                assert_eq!(line, &format!("line {}", i));
            }
        }
    }

    #[test]
    fn test_decode_invalid_utf8_replaced() {
        let lines = decode_lines(&[b'a', 0xFF, b'b', b'\n']);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with('a'));
        assert!(lines[0].ends_with('b'));
    }

    #[test]
    fn test_verify_valid_checksum() {
        let (payload, ok) = verify_checksum("GET*56");
        assert_eq!(payload, "GET");
        assert!(ok);
    }

    #[test]
    fn test_verify_lowercase_checksum() {
        let payload = "OK r:5";
        let line = format!("{}*{}", payload, checksum(payload.as_bytes()).to_lowercase());
        assert_eq!(verify_checksum(&line), (payload, true));
    }

    #[test]
    fn test_verify_mismatch() {
        let (payload, ok) = verify_checksum("GET*57");
        assert_eq!(payload, "GET");
        assert!(!ok);
    }

    #[test]
    fn test_verify_without_checksum() {
        assert_eq!(verify_checksum("plain diagnostic"), ("plain diagnostic", true));
    }

    #[test]
    fn test_verify_malformed_suffix_is_unchecked() {
        assert_eq!(verify_checksum("GET*5"), ("GET*5", true));
        assert_eq!(verify_checksum("GET*567"), ("GET*567", true));
        assert_eq!(verify_checksum("GET*"), ("GET*", true));
    }

    #[test]
    fn test_verify_uses_last_separator() {
        let payload = "2*3";
        let line = format!("{}*{}", payload, checksum(payload.as_bytes()));
        assert_eq!(verify_checksum(&line), (payload, true));
    }

    #[test]
    fn test_verify_self_inverse() {
        let payloads = [
            "",
            "START",
            "RATE 3600",
            r#"{"s":1,"t":-3.25,"m":512}"#,
            "OK s:9 t:20.1 m:700 r:5",
        ];
        for payload in payloads {
            let line = format!("{}*{}", payload, checksum(payload.as_bytes()));
            assert_eq!(verify_checksum(&line), (payload, true), "payload {:?}", payload);
        }
    }
}

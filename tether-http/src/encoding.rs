//! Content-Type parsing and text encoding detection.

use std::collections::HashMap;

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8, UTF_16BE, UTF_16LE};
use http::HeaderMap;

/// Parse a Content-Type like header value (e.g. `text/html; charset=UTF-8`).
///
/// Returns the media type and the parameters, with parameter names
/// lower-cased and quotes stripped from the values.
pub fn parse_content_type(value: &str) -> (String, HashMap<String, String>) {
    let mut parts = value.split(';');
    let media_type = parts.next().unwrap_or_default().trim().to_string();

    let mut parameters = HashMap::new();
    for part in parts {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        parameters.insert(key.to_lowercase(), value.to_string());
    }

    (media_type, parameters)
}

/// Look up an encoding by its IANA label.
pub fn encoding_for_label(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}

/// Determine the text encoding of a response body.
///
/// In order: a recognised `charset` parameter, ISO-8859-1 for `text`
/// content without one (RFC 2616, 3.7.1), then a statistical guess from
/// the bytes. `None` means the caller should fall back to UTF-8.
pub fn detect_text_encoding(headers: Option<&HeaderMap>, body: &[u8]) -> Option<&'static Encoding> {
    let content_type = headers
        .and_then(|h| h.get(http::header::CONTENT_TYPE))
        .and_then(|v| v.to_str().ok());

    if let Some(content_type) = content_type {
        let (_, parameters) = parse_content_type(content_type);
        if let Some(encoding) = parameters.get("charset").and_then(|c| encoding_for_label(c)) {
            return Some(encoding);
        }
        if content_type.contains("text") {
            // encoding_rs resolves the ISO-8859-1 label to its windows-1252 superset
            return encoding_for_label("iso-8859-1");
        }
    }

    if body.is_empty() {
        return None;
    }
    let mut detector = EncodingDetector::new();
    detector.feed(body, true);
    Some(detector.guess(None, true))
}

/// Decode bytes strictly; malformed input yields `None`.
pub fn decode(bytes: &[u8], encoding: &'static Encoding) -> Option<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
}

/// Encode text strictly; unmappable characters yield `None`.
pub fn encode(text: &str, encoding: &'static Encoding) -> Option<Vec<u8>> {
    if encoding == UTF_16LE {
        return Some(text.encode_utf16().flat_map(u16::to_le_bytes).collect());
    }
    if encoding == UTF_16BE {
        return Some(text.encode_utf16().flat_map(u16::to_be_bytes).collect());
    }

    let (bytes, used, had_errors) = encoding.encode(text);
    if had_errors || (used != encoding && encoding != UTF_8) {
        return None;
    }
    Some(bytes.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(content_type: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        headers
    }

    #[test]
    fn test_parse_content_type() {
        let (media_type, parameters) = parse_content_type(" text/html ; Charset=\"UTF-8\"; =x; junk");
        assert_eq!(media_type, "text/html");
        assert_eq!(parameters.get("charset").map(String::as_str), Some("UTF-8"));
        assert_eq!(parameters.len(), 1);
    }

    #[test]
    fn test_charset_parameter_wins() {
        let h = headers("text/plain; charset=utf-16le");
        assert_eq!(detect_text_encoding(Some(&h), b"abc"), Some(UTF_16LE));
    }

    #[test]
    fn test_text_defaults_to_latin1() {
        let h = headers("text/plain");
        assert_eq!(detect_text_encoding(Some(&h), b"abc").map(|e| e.name()), Some("windows-1252"));

        let h = headers("text/plain; charset=bogus");
        assert_eq!(detect_text_encoding(Some(&h), b"abc").map(|e| e.name()), Some("windows-1252"));
    }

    #[test]
    fn test_statistical_guess() {
        let h = headers("application/octet-stream");
        let body = "héllo wörld, ça va très bien".as_bytes();
        assert_eq!(detect_text_encoding(Some(&h), body), Some(UTF_8));
        assert_eq!(detect_text_encoding(None, b""), None);
    }

    #[test]
    fn test_strict_decode_and_encode() {
        assert_eq!(decode(b"hi", UTF_8).as_deref(), Some("hi"));
        assert_eq!(decode(&[0xff, 0xfe, 0xfd], UTF_8), None);

        assert_eq!(encode("hi", UTF_16LE), Some(vec![b'h', 0, b'i', 0]));
        let latin1 = encoding_for_label("latin1").unwrap();
        assert_eq!(encode("é", latin1), Some(vec![0xe9]));
        assert_eq!(encode("日本", latin1), None);
    }
}

//! Percent-encoding of byte paths into URIs, and URI authorities

use crate::byte_string::{ByteString, ByteStringBuilder};
use crate::error::{ProviderError, Result};
use std::fmt;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~')
}

fn is_sub_delim(byte: u8) -> bool {
    matches!(
        byte,
        b'!' | b'$' | b'&' | b'\'' | b'(' | b')' | b'*' | b'+' | b',' | b';' | b'='
    )
}

fn is_path_char(byte: u8) -> bool {
    is_unreserved(byte) || is_sub_delim(byte) || matches!(byte, b':' | b'@' | b'/')
}

fn is_query_char(byte: u8) -> bool {
    is_path_char(byte) || byte == b'?'
}

fn is_user_info_char(byte: u8) -> bool {
    is_unreserved(byte) || is_sub_delim(byte) || byte == b':'
}

fn encode(bytes: &[u8], allowed: fn(u8) -> bool) -> String {
    let mut encoded = String::with_capacity(bytes.len());
    for &byte in bytes {
        if allowed(byte) {
            encoded.push(byte as char);
        } else {
            encoded.push('%');
            encoded.push(HEX_DIGITS[(byte >> 4) as usize] as char);
            encoded.push(HEX_DIGITS[(byte & 0x0f) as usize] as char);
        }
    }
    encoded
}

/// Encode a path for the path component of a URI
pub fn encode_path(bytes: &[u8]) -> String {
    encode(bytes, is_path_char)
}

pub fn encode_query(bytes: &[u8]) -> String {
    encode(bytes, is_query_char)
}

pub fn encode_fragment(bytes: &[u8]) -> String {
    encode(bytes, is_query_char)
}

/// Decode a percent-encoded URI component into raw bytes
///
/// Fails on non-ASCII input, incomplete escapes and non-hex digits.
pub fn decode(encoded: &str) -> Result<ByteString> {
    let bytes = encoded.as_bytes();
    let mut builder = ByteStringBuilder::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        let byte = bytes[index];
        if !byte.is_ascii() {
            return Err(ProviderError::InvalidArgument(format!(
                "Non-ASCII character in URI component: {}",
                encoded
            )));
        }
        if byte == b'%' {
            if index + 2 >= bytes.len() {
                return Err(ProviderError::InvalidArgument(format!(
                    "Incomplete escape in URI component: {}",
                    encoded
                )));
            }
            let high = hex_value(bytes[index + 1], encoded)?;
            let low = hex_value(bytes[index + 2], encoded)?;
            builder.append_byte((high << 4) | low);
            index += 3;
        } else {
            builder.append_byte(byte);
            index += 1;
        }
    }
    Ok(builder.into_byte_string())
}

fn hex_value(digit: u8, encoded: &str) -> Result<u8> {
    match digit {
        b'0'..=b'9' => Ok(digit - b'0'),
        b'a'..=b'f' => Ok(digit - b'a' + 10),
        b'A'..=b'F' => Ok(digit - b'A' + 10),
        _ => Err(ProviderError::InvalidArgument(format!(
            "Invalid hex digit in URI component: {}",
            encoded
        ))),
    }
}

/// The `[user-info@]host[:port]` part of a URI
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct UriAuthority {
    pub user_info: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

impl UriAuthority {
    pub const EMPTY: UriAuthority = UriAuthority {
        user_info: None,
        host: String::new(),
        port: None,
    };

    pub fn new(user_info: Option<String>, host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            user_info,
            host: host.into(),
            port,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.user_info.is_none() && self.host.is_empty() && self.port.is_none()
    }

    /// Render in URI form, bracketing IPv6 literals
    pub fn encode(&self) -> String {
        let mut encoded = String::new();
        if let Some(user_info) = &self.user_info {
            encoded.push_str(&encode(user_info.as_bytes(), is_user_info_char));
            encoded.push('@');
        }
        if self.host.contains(':') && !self.host.starts_with('[') {
            encoded.push('[');
            encoded.push_str(&self.host);
            encoded.push(']');
        } else {
            encoded.push_str(&self.host);
        }
        if let Some(port) = self.port {
            encoded.push(':');
            encoded.push_str(&port.to_string());
        }
        encoded
    }
}

impl fmt::Display for UriAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_path_keeps_allowed_chars() {
        assert_eq!(encode_path(b"/a b/c@d:e"), "/a%20b/c@d:e");
        assert_eq!(encode_path(b"/q?x#y"), "/q%3Fx%23y");
        assert_eq!(encode_path(&[b'/', 0xe4, 0xb8]), "/%E4%B8");
    }

    #[test]
    fn test_query_allows_question_mark() {
        assert_eq!(encode_query(b"a=1?b"), "a=1?b");
        assert_eq!(encode_fragment(b"x y"), "x%20y");
    }

    #[test]
    fn test_decode() {
        assert_eq!(decode("/a%20b/%e4%B8").unwrap().as_bytes(), b"/a b/\xe4\xb8");
        assert!(decode("/bad%2").is_err());
        assert!(decode("/bad%").is_err());
        assert!(decode("/bad%zz").is_err());
        assert!(decode("/caf\u{e9}").is_err());
    }

    #[test]
    fn test_authority_encode() {
        let authority = UriAuthority::new(Some("user name".into()), "example.com", Some(2121));
        assert_eq!(authority.encode(), "user%20name@example.com:2121");
        assert_eq!(UriAuthority::new(None, "::1", None).encode(), "[::1]");
        assert!(UriAuthority::EMPTY.is_empty());
    }
}

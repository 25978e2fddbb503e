//! ByteString - immutable byte sequences used as path segments
//!
//! POSIX file names are arbitrary bytes, so segments are never decoded as text.
//! Ordering compares bytes as signed values.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Add;
use std::sync::Arc;

/// An immutable, cheaply clonable byte sequence
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ByteString(Arc<[u8]>);

impl ByteString {
    /// Empty byte string
    pub fn empty() -> Self {
        Self(Arc::from(&[][..]))
    }

    /// Copy the given bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(Arc::from(bytes))
    }

    /// Take ownership of the given buffer without copying its contents again
    pub fn take_bytes(bytes: Vec<u8>) -> Self {
        Self(Arc::from(bytes.into_boxed_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<u8> {
        self.0.get(index).copied()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Copy with a trailing nul, for handing to C-style APIs
    pub fn to_nul_terminated(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.len() + 1);
        bytes.extend_from_slice(&self.0);
        bytes.push(0);
        bytes
    }

    pub fn starts_with_at(&self, prefix: &[u8], offset: usize) -> bool {
        self.0
            .get(offset..)
            .map_or(false, |rest| rest.starts_with(prefix))
    }

    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.0.starts_with(prefix)
    }

    pub fn ends_with(&self, suffix: &[u8]) -> bool {
        self.0.ends_with(suffix)
    }

    pub fn index_of_byte(&self, byte: u8) -> Option<usize> {
        self.index_of_byte_from(byte, 0)
    }

    pub fn index_of_byte_from(&self, byte: u8, from: usize) -> Option<usize> {
        self.0
            .get(from..)?
            .iter()
            .position(|b| *b == byte)
            .map(|index| index + from)
    }

    pub fn last_index_of_byte(&self, byte: u8) -> Option<usize> {
        self.0.iter().rposition(|b| *b == byte)
    }

    pub fn contains_byte(&self, byte: u8) -> bool {
        self.0.contains(&byte)
    }

    pub fn index_of(&self, needle: &[u8]) -> Option<usize> {
        if needle.is_empty() {
            return Some(0);
        }
        self.0.windows(needle.len()).position(|window| window == needle)
    }

    pub fn last_index_of(&self, needle: &[u8]) -> Option<usize> {
        if needle.is_empty() {
            return Some(self.len());
        }
        self.0.windows(needle.len()).rposition(|window| window == needle)
    }

    pub fn contains(&self, needle: &[u8]) -> bool {
        self.index_of(needle).is_some()
    }

    /// Slice `[start, end)`; out-of-range bounds are clamped
    pub fn substring(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.len());
        let start = start.min(end);
        if start == 0 && end == self.len() {
            return self.clone();
        }
        Self::from_bytes(&self.0[start..end])
    }

    pub fn substring_from(&self, start: usize) -> Self {
        self.substring(start, self.len())
    }

    /// Split around every occurrence of `delimiter`, keeping empty pieces
    ///
    /// An empty delimiter yields the whole string as a single piece.
    pub fn split(&self, delimiter: &[u8]) -> Vec<ByteString> {
        if delimiter.is_empty() {
            return vec![self.clone()];
        }
        let mut pieces = Vec::new();
        let mut start = 0;
        let mut index = 0;
        while index + delimiter.len() <= self.len() {
            if &self.0[index..index + delimiter.len()] == delimiter {
                pieces.push(Self::from_bytes(&self.0[start..index]));
                index += delimiter.len();
                start = index;
            } else {
                index += 1;
            }
        }
        pieces.push(Self::from_bytes(&self.0[start..]));
        pieces
    }

    /// Join pieces with a single separator byte
    pub fn join<'a>(pieces: impl IntoIterator<Item = &'a ByteString>, separator: u8) -> Self {
        let mut builder = ByteStringBuilder::new();
        for (index, piece) in pieces.into_iter().enumerate() {
            if index > 0 {
                builder.append_byte(separator);
            }
            builder.append(piece);
        }
        builder.to_byte_string()
    }

    /// Lossy UTF-8 rendering for display and logs
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl Default for ByteString {
    fn default() -> Self {
        Self::empty()
    }
}

impl Ord for ByteString {
    fn cmp(&self, other: &Self) -> Ordering {
        for (left, right) in self.0.iter().zip(other.0.iter()) {
            let ordering = (*left as i8).cmp(&(*right as i8));
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        self.len().cmp(&other.len())
    }
}

impl PartialOrd for ByteString {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<&str> for ByteString {
    fn from(value: &str) -> Self {
        Self::from_bytes(value.as_bytes())
    }
}

impl From<String> for ByteString {
    fn from(value: String) -> Self {
        Self::take_bytes(value.into_bytes())
    }
}

impl From<&[u8]> for ByteString {
    fn from(value: &[u8]) -> Self {
        Self::from_bytes(value)
    }
}

impl From<Vec<u8>> for ByteString {
    fn from(value: Vec<u8>) -> Self {
        Self::take_bytes(value)
    }
}

impl AsRef<[u8]> for ByteString {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq<[u8]> for ByteString {
    fn eq(&self, other: &[u8]) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for ByteString {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == other.as_bytes()
    }
}

impl Add<&ByteString> for &ByteString {
    type Output = ByteString;

    fn add(self, other: &ByteString) -> ByteString {
        let mut builder = ByteStringBuilder::with_capacity(self.len() + other.len());
        builder.append(self);
        builder.append(other);
        builder.to_byte_string()
    }
}

impl fmt::Display for ByteString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for ByteString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b\"{}\"", self.0.escape_ascii())
    }
}

/// Growable buffer that produces a [`ByteString`]
#[derive(Debug, Default, Clone)]
pub struct ByteStringBuilder {
    bytes: Vec<u8>,
}

impl ByteStringBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn append_byte(&mut self, byte: u8) -> &mut Self {
        self.bytes.push(byte);
        self
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn append(&mut self, byte_string: &ByteString) -> &mut Self {
        self.append_bytes(byte_string.as_bytes())
    }

    pub fn to_byte_string(&self) -> ByteString {
        ByteString::from_bytes(&self.bytes)
    }

    pub fn into_byte_string(self) -> ByteString {
        ByteString::take_bytes(self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_ordering() {
        // 0x80 is negative as a signed byte, so it sorts before ASCII
        let high = ByteString::from_bytes(&[0x80]);
        let ascii = ByteString::from("a");
        assert!(high < ascii);
        assert!(ByteString::from("ab") < ByteString::from("abc"));
        assert_eq!(ByteString::from("abc").cmp(&ByteString::from("abc")), Ordering::Equal);
    }

    #[test]
    fn test_split_keeps_empty_pieces() {
        let pieces = ByteString::from("/a//b").split(b"/");
        let pieces: Vec<String> = pieces.iter().map(|p| p.to_string()).collect();
        assert_eq!(pieces, vec!["", "a", "", "b"]);
    }

    #[test]
    fn test_search_and_slice() {
        let value = ByteString::from("archive.tar.gz");
        assert_eq!(value.index_of(b".tar"), Some(7));
        assert_eq!(value.last_index_of_byte(b'.'), Some(11));
        assert_eq!(value.substring_from(12), ByteString::from("gz"));
        assert_eq!(value.substring(8, 100), ByteString::from("tar.gz"));
        assert!(value.starts_with_at(b"tar", 8));
        assert!(!value.starts_with_at(b"tar", 100));
    }

    #[test]
    fn test_concat_and_builder() {
        let joined = &ByteString::from("foo") + &ByteString::from("bar");
        assert_eq!(joined, ByteString::from("foobar"));

        let mut builder = ByteStringBuilder::new();
        builder.append_byte(b'/').append_bytes(b"tmp");
        assert_eq!(builder.into_byte_string(), ByteString::from("/tmp"));
    }

    #[test]
    fn test_non_utf8_display_is_lossy() {
        let value = ByteString::from_bytes(&[b'a', 0xff, b'b']);
        assert_eq!(value.to_string(), "a\u{fffd}b");
        assert_eq!(format!("{:?}", value), "b\"a\\xffb\"");
    }
}

//! Order-preserving composite keys.
//!
//! A [`CompositeKey`] is a sequence of typed segments, usually a record
//! type tag followed by identifiers:
//!
//! ```text
//! ("namespace", "foo1")  ->  02 "namespace" 00 02 "foo1" 00
//! ```
//!
//! Each segment is a tag byte followed by its body:
//!
//! - string: tag `0x02`, UTF-8 bytes with `0x00` escaped as `0x00 0xFF`,
//!   terminated by a single `0x00`
//! - integer: tag `0x03`, eight big-endian bytes with the sign bit flipped
//!
//! Byte order of encoded keys equals segment-wise order of the values, and
//! a key built from a prefix of another key's segments is a byte prefix of
//! it. Scanning with `prefix_for("namespace")` therefore visits every
//! namespace row in name order.

use crate::error::{CoreError, CoreResult};
use std::fmt;

const STRING_TAG: u8 = 0x02;
const INT_TAG: u8 = 0x03;
const TERMINATOR: u8 = 0x00;
const ESCAPE: u8 = 0xFF;
const SIGN_BIT: u64 = 0x8000_0000_0000_0000;

/// One typed component of a [`CompositeKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySegment<'a> {
    /// A string component.
    Str(&'a str),
    /// A signed integer component.
    Int(i64),
}

impl<'a> From<&'a str> for KeySegment<'a> {
    fn from(value: &'a str) -> Self {
        Self::Str(value)
    }
}

impl<'a> From<&'a String> for KeySegment<'a> {
    fn from(value: &'a String) -> Self {
        Self::Str(value.as_str())
    }
}

impl From<i64> for KeySegment<'_> {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// An immutable, order-preserving row key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompositeKey(Vec<u8>);

impl CompositeKey {
    /// Starts building a key segment by segment.
    #[must_use]
    pub fn builder() -> KeyBuilder {
        KeyBuilder::default()
    }

    /// Builds a key from an ordered list of segments.
    ///
    /// ```rust
    /// use nsmeta_core::{CompositeKey, KeySegment};
    ///
    /// let key = CompositeKey::build(["namespace".into(), KeySegment::Str("foo1")]);
    /// assert!(CompositeKey::prefix_for("namespace").is_prefix_of(&key));
    /// ```
    pub fn build<'a, I>(segments: I) -> Self
    where
        I: IntoIterator<Item = KeySegment<'a>>,
    {
        let mut builder = KeyBuilder::default();
        for segment in segments {
            builder = match segment {
                KeySegment::Str(s) => builder.add_str(s),
                KeySegment::Int(n) => builder.add_int(n),
            };
        }
        builder.build()
    }

    /// Builds the scan prefix covering every record of `type_tag`.
    #[must_use]
    pub fn prefix_for(type_tag: &str) -> Self {
        KeyBuilder::default().add_str(type_tag).build()
    }

    /// Wraps raw bytes previously produced by [`CompositeKey::as_bytes`].
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the encoded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the key and returns the encoded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Returns true if this key is a byte prefix of `other`.
    #[must_use]
    pub fn is_prefix_of(&self, other: &CompositeKey) -> bool {
        other.0.starts_with(&self.0)
    }

    /// Returns a reader over the segments of this key.
    #[must_use]
    pub fn splitter(&self) -> KeySplitter<'_> {
        KeySplitter {
            bytes: &self.0,
            pos: 0,
        }
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut splitter = self.splitter();
        let mut first = true;
        while !splitter.is_empty() {
            if !first {
                f.write_str("/")?;
            }
            first = false;
            match splitter.peek_tag() {
                Some(STRING_TAG) => match splitter.next_string() {
                    Ok(s) => f.write_str(&s)?,
                    Err(_) => return f.write_str("<malformed>"),
                },
                Some(INT_TAG) => match splitter.next_int() {
                    Ok(n) => write!(f, "{n}")?,
                    Err(_) => return f.write_str("<malformed>"),
                },
                _ => return f.write_str("<malformed>"),
            }
        }
        Ok(())
    }
}

/// Incremental builder for [`CompositeKey`].
#[derive(Debug, Default, Clone)]
pub struct KeyBuilder {
    buf: Vec<u8>,
}

impl KeyBuilder {
    /// Appends a string segment.
    #[must_use]
    pub fn add_str(mut self, value: &str) -> Self {
        self.buf.reserve(value.len() + 2);
        self.buf.push(STRING_TAG);
        for &byte in value.as_bytes() {
            self.buf.push(byte);
            if byte == TERMINATOR {
                self.buf.push(ESCAPE);
            }
        }
        self.buf.push(TERMINATOR);
        self
    }

    /// Appends an integer segment.
    #[must_use]
    pub fn add_int(mut self, value: i64) -> Self {
        self.buf.push(INT_TAG);
        self.buf
            .extend_from_slice(&((value as u64) ^ SIGN_BIT).to_be_bytes());
        self
    }

    /// Finishes the key.
    #[must_use]
    pub fn build(self) -> CompositeKey {
        CompositeKey(self.buf)
    }
}

/// Reads segments back out of a [`CompositeKey`], front to back.
#[derive(Debug, Clone)]
pub struct KeySplitter<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl KeySplitter<'_> {
    /// Returns true when every segment has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek_tag(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn expect_tag(&mut self, tag: u8, what: &str) -> CoreResult<()> {
        match self.peek_tag() {
            Some(found) if found == tag => {
                self.pos += 1;
                Ok(())
            }
            Some(found) => Err(CoreError::codec(format!(
                "expected {what} segment at byte {}, found tag {found:#04x}",
                self.pos
            ))),
            None => Err(CoreError::codec(format!("expected {what} segment, key ended"))),
        }
    }

    /// Reads the next segment as a string.
    ///
    /// # Errors
    ///
    /// Fails if the next segment is not a well-formed string segment.
    pub fn next_string(&mut self) -> CoreResult<String> {
        self.expect_tag(STRING_TAG, "string")?;
        let mut out = Vec::new();
        loop {
            let byte = *self
                .bytes
                .get(self.pos)
                .ok_or_else(|| CoreError::codec("unterminated string segment"))?;
            self.pos += 1;
            if byte != TERMINATOR {
                out.push(byte);
                continue;
            }
            if self.bytes.get(self.pos) == Some(&ESCAPE) {
                self.pos += 1;
                out.push(TERMINATOR);
                continue;
            }
            break;
        }
        String::from_utf8(out).map_err(|e| CoreError::codec(format!("string segment: {e}")))
    }

    /// Reads the next segment as an integer.
    ///
    /// # Errors
    ///
    /// Fails if the next segment is not a well-formed integer segment.
    pub fn next_int(&mut self) -> CoreResult<i64> {
        self.expect_tag(INT_TAG, "integer")?;
        let end = self.pos + 8;
        let raw: [u8; 8] = self
            .bytes
            .get(self.pos..end)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| CoreError::codec("truncated integer segment"))?;
        self.pos = end;
        Ok((u64::from_be_bytes(raw) ^ SIGN_BIT) as i64)
    }

    /// Skips the next segment whatever its type.
    ///
    /// # Errors
    ///
    /// Fails if the next segment is malformed.
    pub fn skip(&mut self) -> CoreResult<()> {
        match self.peek_tag() {
            Some(INT_TAG) => self.next_int().map(drop),
            _ => self.next_string().map(drop),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(segments: &[&str]) -> CompositeKey {
        CompositeKey::build(segments.iter().map(|s| KeySegment::Str(s)))
    }

    #[test]
    fn encodes_type_and_identifier() {
        let k = key(&["namespace", "foo1"]);
        let mut expected = vec![STRING_TAG];
        expected.extend_from_slice(b"namespace");
        expected.push(0);
        expected.push(STRING_TAG);
        expected.extend_from_slice(b"foo1");
        expected.push(0);
        assert_eq!(k.as_bytes(), expected.as_slice());
    }

    #[test]
    fn prefix_covers_records_of_type() {
        let prefix = CompositeKey::prefix_for("namespace");
        assert!(prefix.is_prefix_of(&key(&["namespace", "a"])));
        assert!(prefix.is_prefix_of(&key(&["namespace", ""])));
        assert!(!prefix.is_prefix_of(&key(&["namespaces", "a"])));
        assert!(!prefix.is_prefix_of(&key(&["app", "a"])));
    }

    #[test]
    fn longer_names_do_not_sort_before_shorter_ones() {
        assert!(key(&["namespace", "b"]) > key(&["namespace", "aa"]));
        assert!(key(&["namespace", "foo1"]) < key(&["namespace", "foo2"]));
    }

    #[test]
    fn embedded_nul_round_trips() {
        let k = key(&["t", "a\0b", "c"]);
        let mut s = k.splitter();
        assert_eq!(s.next_string().unwrap(), "t");
        assert_eq!(s.next_string().unwrap(), "a\0b");
        assert_eq!(s.next_string().unwrap(), "c");
        assert!(s.is_empty());
    }

    #[test]
    fn integer_segments_sort_numerically() {
        let values = [i64::MIN, -10, -1, 0, 1, 10, i64::MAX];
        let keys: Vec<_> = values
            .iter()
            .map(|v| CompositeKey::builder().add_str("run").add_int(*v).build())
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);

        let mut s = keys[1].splitter();
        s.skip().unwrap();
        assert_eq!(s.next_int().unwrap(), -10);
    }

    #[test]
    fn splitter_rejects_wrong_type() {
        let k = CompositeKey::builder().add_int(7).build();
        assert!(matches!(
            k.splitter().next_string(),
            Err(CoreError::Codec { .. })
        ));
    }

    #[test]
    fn splitter_rejects_truncated_input() {
        let k = CompositeKey::from_bytes(vec![STRING_TAG, b'a']);
        assert!(k.splitter().next_string().is_err());
        let k = CompositeKey::from_bytes(vec![INT_TAG, 1, 2]);
        assert!(k.splitter().next_int().is_err());
    }

    #[test]
    fn display_joins_segments() {
        let k = CompositeKey::builder().add_str("namespace").add_str("foo").add_int(3).build();
        assert_eq!(k.to_string(), "namespace/foo/3");
    }

    proptest! {
        #[test]
        fn key_order_matches_segment_order(
            a in prop::collection::vec(".{0,8}", 1..4),
            b in prop::collection::vec(".{0,8}", 1..4),
        ) {
            let ka = CompositeKey::build(a.iter().map(KeySegment::from));
            let kb = CompositeKey::build(b.iter().map(KeySegment::from));
            prop_assert_eq!(ka.cmp(&kb), a.cmp(&b));
        }

        #[test]
        fn splitter_recovers_segments(segments in prop::collection::vec(".{0,12}", 0..5)) {
            let k = CompositeKey::build(segments.iter().map(KeySegment::from));
            let mut s = k.splitter();
            for expected in &segments {
                prop_assert_eq!(&s.next_string().unwrap(), expected);
            }
            prop_assert!(s.is_empty());
        }
    }
}

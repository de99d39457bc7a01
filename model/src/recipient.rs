use std::{borrow::Borrow, sync::Arc};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

/// Path prefix of the per-device resource on the gateway.
pub const DEVICE_PATH_PREFIX: &str = "/3/device/";

/// Everything except RFC 3986 unreserved characters gets percent-encoded.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// An opaque destination token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Recipient(Arc<str>);

impl Recipient {
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self(Arc::from(token.into()))
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
    /// The resource path this recipient is addressed at.
    ///
    /// The token is percent-encoded as a single path segment: every byte of its
    /// utf8 form outside `ALPHA / DIGIT / "-" / "." / "_" / "~"` becomes `%XX`
    /// with uppercase hex digits. [`Recipient::from_request_path`] reverses it.
    pub fn request_path(&self) -> String {
        let mut path = String::with_capacity(DEVICE_PATH_PREFIX.len() + self.0.len());
        path.push_str(DEVICE_PATH_PREFIX);
        path.extend(utf8_percent_encode(&self.0, PATH_SEGMENT));
        path
    }
    pub fn from_request_path(path: &str) -> Option<Self> {
        let segment = path.strip_prefix(DEVICE_PATH_PREFIX)?;
        let token = percent_decode_str(segment).decode_utf8().ok()?;
        Some(Self::new(token.into_owned()))
    }
}

impl From<&'_ str> for Recipient {
    fn from(val: &'_ str) -> Self {
        Recipient::new(val)
    }
}

impl From<String> for Recipient {
    fn from(val: String) -> Self {
        Recipient::new(val)
    }
}

impl Borrow<str> for Recipient {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Recipient {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Recipient {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let string = String::deserialize(deserializer)?;
        Ok(Self::new(string))
    }
}

/// Recipients of one dispatch, in input order.
///
/// A single recipient converts into a one element sequence, so `send(n, "tok")`
/// and `send(n, ["tok"])` are the same call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recipients(Vec<Recipient>);

impl Recipients {
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn iter(&self) -> std::slice::Iter<'_, Recipient> {
        self.0.iter()
    }
    pub fn into_vec(self) -> Vec<Recipient> {
        self.0
    }
}

impl From<Recipient> for Recipients {
    fn from(val: Recipient) -> Self {
        Recipients(vec![val])
    }
}

impl From<&'_ str> for Recipients {
    fn from(val: &'_ str) -> Self {
        Recipients(vec![Recipient::from(val)])
    }
}

impl From<String> for Recipients {
    fn from(val: String) -> Self {
        Recipients(vec![Recipient::from(val)])
    }
}

impl<T: Into<Recipient>> From<Vec<T>> for Recipients {
    fn from(val: Vec<T>) -> Self {
        val.into_iter().collect()
    }
}

impl<T: Into<Recipient>, const N: usize> From<[T; N]> for Recipients {
    fn from(val: [T; N]) -> Self {
        val.into_iter().collect()
    }
}

impl<T: Into<Recipient>> FromIterator<T> for Recipients {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Recipients(iter.into_iter().map(Into::into).collect())
    }
}

impl IntoIterator for Recipients {
    type Item = Recipient;
    type IntoIter = std::vec::IntoIter<Recipient>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_normalizes_to_single_element() {
        let scalar = Recipients::from("tokA");
        let sequence = Recipients::from(["tokA"]);
        assert_eq!(scalar, sequence);
        assert_eq!(scalar.len(), 1);
        assert!(Recipients::from(Vec::<String>::new()).is_empty());
    }

    #[test]
    fn test_request_path_escaping() {
        let plain = Recipient::from("a1b2c3d4");
        assert_eq!(plain.request_path(), "/3/device/a1b2c3d4");

        let odd = Recipient::from("tok/with space?&%é~_.-");
        let path = odd.request_path();
        assert_eq!(path, "/3/device/tok%2Fwith%20space%3F%26%25%C3%A9~_.-");
        assert_eq!(Recipient::from_request_path(&path), Some(odd));
    }

    #[test]
    fn test_foreign_path_is_rejected() {
        assert_eq!(Recipient::from_request_path("/3/topic/abc"), None);
        assert_eq!(Recipient::from_request_path("/3/device/%FF"), None);
    }
}

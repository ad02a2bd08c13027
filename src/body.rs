//! Response body variants.
//!
//! The variant decides how the response is finalized: text and bytes are
//! written verbatim, JSON is serialized at the last moment, streams are piped
//! frame by frame, and [`Body::Empty`] gets a status placeholder.

use std::fmt;
use std::io;

use bytes::Bytes;
use futures_util::Stream;
use futures_util::stream::BoxStream;
use serde::Serialize;

use crate::error::Result;

/// A boxed stream of body chunks.
pub type BodyStream = BoxStream<'static, io::Result<Bytes>>;

/// What a response will carry once it is finalized.
#[derive(Default)]
pub enum Body {
    /// No body has been set.
    #[default]
    Empty,
    Text(String),
    Bytes(Bytes),
    /// A structured value, serialized to JSON when the response is sent.
    Json(serde_json::Value),
    Stream(BodyStream),
}

impl Body {
    /// Serializes `value` into a [`Body::Json`].
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(serde_json::to_value(value)?.into())
    }

    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self::Stream(Box::pin(stream))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Byte length for bodies whose size is known without serializing.
    pub fn sized_len(&self) -> Option<usize> {
        match self {
            Self::Text(s) => Some(s.len()),
            Self::Bytes(b) => Some(b.len()),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<()> for Body {
    fn from((): ()) -> Self {
        Self::Empty
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<u8>> for Body {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b.into())
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        Self::Bytes(b)
    }
}

/// `null` is treated as "no body".
impl From<serde_json::Value> for Body {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Empty,
            v => Self::Json(v),
        }
    }
}

impl<T: Into<Body>> From<Option<T>> for Body {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Empty, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_json_is_empty() {
        assert!(Body::from(serde_json::Value::Null).is_empty());
        assert!(Body::from(None::<String>).is_empty());
        assert!(!Body::from(json!({})).is_empty());
    }

    #[test]
    fn sized_lengths() {
        assert_eq!(Body::from("héllo").sized_len(), Some(6));
        assert_eq!(Body::from(vec![0_u8; 3]).sized_len(), Some(3));
        assert_eq!(Body::from(json!([1])).sized_len(), None);
    }

    #[test]
    fn json_helper_serializes() {
        #[derive(Serialize)]
        struct User<'a> {
            name: &'a str,
        }
        let body = Body::json(&User { name: "ada" }).unwrap();
        assert_eq!(body.as_json(), Some(&json!({ "name": "ada" })));
    }
}

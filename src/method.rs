//! HTTP method as a typed enum.
//!
//! Routes are bound per method on a trie node. The set is closed: each
//! variant has an explicit registration helper on [`Router`](crate::Router),
//! and requests carrying any other method never match a handler (they fall
//! through to the default `404`).

use std::fmt;
use std::str::FromStr;

/// A routable HTTP method (RFC 9110).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Method {
    Connect,
    Delete,
    Get,
    Head,
    Options,
    Patch,
    Post,
    Put,
    Trace,
}

impl Method {
    /// Returns the uppercase wire representation (e.g. `"GET"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Delete  => "DELETE",
            Self::Get     => "GET",
            Self::Head    => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch   => "PATCH",
            Self::Post    => "POST",
            Self::Put     => "PUT",
            Self::Trace   => "TRACE",
        }
    }

    /// RFC 9110 §9.2.2.
    pub fn is_idempotent(self) -> bool {
        matches!(
            self,
            Self::Get | Self::Head | Self::Put | Self::Delete | Self::Options | Self::Trace
        )
    }
}

/// Returned when a method string is not one of the routable methods.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unsupported method `{0}`")]
pub struct UnknownMethod(pub String);

/// Parses an uppercase method string (e.g. `"GET"`). Case-sensitive per RFC 9110 §9.1.
impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONNECT" => Ok(Self::Connect),
            "DELETE"  => Ok(Self::Delete),
            "GET"     => Ok(Self::Get),
            "HEAD"    => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            "PATCH"   => Ok(Self::Patch),
            "POST"    => Ok(Self::Post),
            "PUT"     => Ok(Self::Put),
            "TRACE"   => Ok(Self::Trace),
            other     => Err(UnknownMethod(other.to_owned())),
        }
    }
}

impl TryFrom<&http::Method> for Method {
    type Error = UnknownMethod;

    fn try_from(m: &http::Method) -> Result<Self, Self::Error> {
        m.as_str().parse()
    }
}

impl From<Method> for http::Method {
    fn from(m: Method) -> Self {
        match m {
            Method::Connect => Self::CONNECT,
            Method::Delete  => Self::DELETE,
            Method::Get     => Self::GET,
            Method::Head    => Self::HEAD,
            Method::Options => Self::OPTIONS,
            Method::Patch   => Self::PATCH,
            Method::Post    => Self::POST,
            Method::Put     => Self::PUT,
            Method::Trace   => Self::TRACE,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_from_http() {
        assert_eq!(Method::try_from(&http::Method::PATCH), Ok(Method::Patch));
        assert!(Method::try_from(&http::Method::from_bytes(b"PURGE").unwrap()).is_err());
        assert!("get".parse::<Method>().is_err());
    }

    #[test]
    fn round_trips_through_http() {
        for m in [Method::Get, Method::Post, Method::Delete, Method::Head] {
            assert_eq!(Method::try_from(&http::Method::from(m)), Ok(m));
        }
    }

    #[test]
    fn idempotency() {
        assert!(Method::Put.is_idempotent());
        assert!(!Method::Post.is_idempotent());
        assert!(!Method::Patch.is_idempotent());
    }
}

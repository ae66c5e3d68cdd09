//! HTTP/1.1 request/response engine.
//!
//! A [`Client`] owns one [`Transport`](crate::transport::Transport) and
//! reuses it across requests to the same authority. Method-named calls
//! on a client keep the connection alive; the free-standing functions in
//! this module make one-shot requests over a throwaway client.

mod client;

pub use client::Client;

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::error::{Error, HttpError};
use crate::fields::FieldMap;

/// Default port for `http`.
pub const HTTP_PORT: u16 = 80;

/// Default port for `https`.
pub const HTTPS_PORT: u16 = 443;

/// Request/response header fields: case-insensitive keys, insertion
/// order preserved.
pub type Headers = FieldMap;

/// Callback receiving streamed body chunks in arrival order.
pub type BodyCallback<'a> = &'a mut dyn FnMut(&[u8]);

/// All the HTTP methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Connect,
    Trace,
    Patch,
}

impl Method {
    /// Canonical request-line spelling.
    pub const fn as_str(&self) -> &'static str {
        use Method::*;
        match self {
            Get => "GET",
            Post => "POST",
            Put => "PUT",
            Delete => "DELETE",
            Head => "HEAD",
            Options => "OPTIONS",
            Connect => "CONNECT",
            Trace => "TRACE",
            Patch => "PATCH",
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = HttpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use Method::*;
        let method = match s.to_ascii_uppercase().as_str() {
            "GET" => Get,
            "POST" => Post,
            "PUT" => Put,
            "DELETE" => Delete,
            "HEAD" => Head,
            "OPTIONS" => Options,
            "CONNECT" => Connect,
            "TRACE" => Trace,
            "PATCH" => Patch,
            _ => return Err(HttpError::InvalidMethod(s.to_string())),
        };
        Ok(method)
    }
}

/// Generic HTTP response.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status_code: u16,
    pub status_message: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

macro_rules! free_function {
    ($(($name: ident => $method: ident);)+) => {
        $(
            /// One-shot request over a throwaway client
            /// (`keep_alive = false`).
            pub fn $name(
                url: &str,
                headers: &Headers,
                body: &[u8],
                stream: bool,
                cb: Option<BodyCallback<'_>>,
            ) -> Result<Response, Error> {
                Client::new().request(Method::$method, url, headers, body, false, stream, cb)
            }
        )+
    };
}

free_function!(
    (get => Get);
    (post => Post);
    (put => Put);
    (delete => Delete);
    (head => Head);
    (options => Options);
    (connect => Connect);
    (trace => Trace);
    (patch => Patch);
);

/// One-shot request over a throwaway client (`keep_alive = false`).
pub fn request(
    method: Method,
    url: &str,
    headers: &Headers,
    body: &[u8],
    stream: bool,
    cb: Option<BodyCallback<'_>>,
) -> Result<Response, Error> {
    Client::new().request(method, url, headers, body, false, stream, cb)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn method_round_trip() {
        for m in [
            Method::Get,
            Method::Post,
            Method::Put,
            Method::Delete,
            Method::Head,
            Method::Options,
            Method::Connect,
            Method::Trace,
            Method::Patch,
        ] {
            assert_eq!(m.as_str().parse::<Method>().unwrap(), m);
        }
    }

    #[test]
    fn method_parse_is_case_insensitive() {
        assert_eq!("delete".parse::<Method>().unwrap(), Method::Delete);
        assert!(matches!(
            "BREW".parse::<Method>(),
            Err(HttpError::InvalidMethod(_))
        ));
    }
}

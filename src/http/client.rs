use std::sync::{Arc, Mutex};

use crate::error::{Error, HttpError};
use crate::transport::{Transport, DEFAULT_RECV_SIZE};
use crate::uri::Uri;

use super::{BodyCallback, Headers, Method, Response, HTTPS_PORT, HTTP_PORT};

/// Decode at most this many response headers.
const MAX_RESPONSE_HEADERS: usize = 64;

macro_rules! http_method {
    ($(($name: ident => $method: ident);)+) => {
        $(
            /// Convenience wrapper around [`request`](Self::request)
            /// with `keep_alive = true`.
            pub fn $name(
                &self,
                url: &str,
                headers: &Headers,
                body: &[u8],
                stream: bool,
                cb: Option<BodyCallback<'_>>,
            ) -> Result<Response, Error> {
                self.request(Method::$method, url, headers, body, true, stream, cb)
            }
        )+
    };
}

/// HTTP(S) client with connection reuse.
///
/// The client remembers the `host:port` it is talking to; consecutive
/// keep-alive requests to the same authority ride the same connection.
/// A silent disconnect (the server or an intermediary dropped the idle
/// connection) is discovered by a zero-byte probe before each reuse.
pub struct Client {
    transport: Arc<Transport>,
    connected_to: Mutex<Option<String>>,
}

impl Client {
    pub fn new() -> Self {
        Self {
            transport: Arc::new(Transport::new("", 0, true, false)),
            connected_to: Mutex::new(None),
        }
    }

    http_method!(
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

    /// Perform one request and read the full response.
    ///
    /// The URL scheme must be `http` or `https` (defaulting to `http`
    /// when absent); the port defaults per scheme. With `stream` set and
    /// a callback present, body chunks are handed to the callback in
    /// arrival order and `Response::body` stays empty.
    pub fn request(
        &self,
        method: Method,
        url: &str,
        headers: &Headers,
        body: &[u8],
        keep_alive: bool,
        stream: bool,
        mut cb: Option<BodyCallback<'_>>,
    ) -> Result<Response, Error> {
        let mut uri = Uri::parse(url);

        if uri.scheme.is_empty() {
            uri.scheme = "http".to_string();
        }
        if uri.scheme != "http" && uri.scheme != "https" {
            return Err(HttpError::InvalidScheme(uri.scheme).into());
        }
        let port = uri
            .port
            .unwrap_or(if uri.scheme == "http" { HTTP_PORT } else { HTTPS_PORT });

        // An idle connection may have died under us; probe it first so
        // the reuse decision below sees the truth.
        if self.transport.connected() {
            let old_timeout = self.transport.timeout();
            self.transport.set_blocking(false);
            let _ = self.transport.receive(0);
            self.transport.set_timeout(old_timeout);
        }

        let authority = format!("{}:{}", uri.host, port);
        {
            let mut connected_to = self.connected_to.lock().unwrap();
            if connected_to.as_deref() != Some(authority.as_str()) || !self.transport.connected() {
                self.transport.set_hostname(&uri.host);
                self.transport.set_port(port);
                self.transport.set_use_tls(port == HTTPS_PORT);
                self.transport.close();
                match self.transport.connect() {
                    Ok(true) => {}
                    Ok(false) => return Err(HttpError::ConnectFailed(authority).into()),
                    Err(e) => {
                        log::warn!("connect to {} failed: {}", authority, e);
                        return Err(HttpError::ConnectFailed(authority).into());
                    }
                }
                *connected_to = Some(authority.clone());
            }
            if !keep_alive {
                *connected_to = None;
            }
        }

        let wire = compose(method, &uri, port, headers, body, keep_alive);

        let mut sent = 0;
        while sent < wire.len() {
            sent += self.transport.send(&wire[sent..])?;
        }

        let res = self.receive_response(method, stream, &mut cb)?;

        if !keep_alive {
            self.transport.close();
        }
        Ok(res)
    }

    /// The transport under this client. The websocket client keeps
    /// driving it after a protocol switch.
    pub(crate) fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    fn receive_response(
        &self,
        method: Method,
        stream: bool,
        cb: &mut Option<BodyCallback<'_>>,
    ) -> Result<Response, Error> {
        // Read until the head/body boundary has appeared at least once.
        let mut raw = Vec::new();
        let boundary = loop {
            let chunk = self.transport.receive(DEFAULT_RECV_SIZE)?;
            if chunk.is_empty() {
                if !self.transport.connected() {
                    return Err(HttpError::UnexpectedEof.into());
                }
                continue;
            }
            // the boundary may straddle two reads
            let search_from = raw.len().saturating_sub(3);
            raw.extend_from_slice(&chunk);
            if let Some(pos) = find(&raw[search_from..], b"\r\n\r\n") {
                break search_from + pos;
            }
        };

        let mut header_storage = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
        let mut parsed = httparse::Response::new(&mut header_storage);
        match parsed.parse(&raw[..boundary + 4]).map_err(HttpError::MalformedHead)? {
            httparse::Status::Complete(_) => {}
            httparse::Status::Partial => return Err(HttpError::UnexpectedEof.into()),
        }

        let mut res = Response {
            status_code: parsed.code.unwrap_or_default(),
            status_message: parsed.reason.unwrap_or_default().to_string(),
            ..Default::default()
        };
        for h in parsed.headers.iter() {
            res.headers
                .insert(h.name, String::from_utf8_lossy(h.value).into_owned());
        }

        let mut body = raw[boundary + 4..].to_vec();

        // HEAD responses and bodiless statuses end at the head; anything
        // already read past it belongs to whatever speaks next.
        if method == Method::Head
            || res.status_code < 200
            || res.status_code == 204
            || res.status_code == 304
        {
            if !body.is_empty() {
                self.transport.unread(&body);
            }
            return Ok(res);
        }

        let content_length: usize = res
            .headers
            .get("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        let chunked = res
            .headers
            .get("Transfer-Encoding")
            .map(|v| v.trim().eq_ignore_ascii_case("chunked"))
            .unwrap_or(false);

        let streaming = stream && cb.is_some();

        let mut bytes_received = body.len();
        if streaming && !body.is_empty() {
            (cb.as_mut().unwrap())(&body);
        }

        while bytes_received < content_length {
            let want = std::cmp::max(content_length - bytes_received, DEFAULT_RECV_SIZE);
            let chunk = self.transport.receive(want)?;
            if chunk.is_empty() {
                if !self.transport.connected() {
                    break;
                }
                continue;
            }
            if streaming {
                (cb.as_mut().unwrap())(&chunk);
            } else {
                body.extend_from_slice(&chunk);
            }
            bytes_received += chunk.len();
        }

        if chunked {
            // keep reading until the terminating zero-size group arrives
            let mut search_from = 0;
            while find(&body[search_from..], b"0\r\n\r\n").is_none() {
                let old_len = body.len();
                let chunk = self.transport.receive(DEFAULT_RECV_SIZE)?;
                if chunk.is_empty() {
                    if !self.transport.connected() {
                        break;
                    }
                    continue;
                }
                if streaming {
                    (cb.as_mut().unwrap())(&chunk);
                }
                body.extend_from_slice(&chunk);
                search_from = old_len.saturating_sub(4);
            }
            if !streaming {
                body = decode_chunked(&body);
            }
        }

        if streaming {
            body.clear();
        }
        res.body = body;
        Ok(res)
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

fn compose(
    method: Method,
    uri: &Uri,
    port: u16,
    headers: &Headers,
    body: &[u8],
    keep_alive: bool,
) -> Vec<u8> {
    use std::fmt::Write;

    let mut target = if uri.path.is_empty() {
        "/".to_string()
    } else {
        uri.path.clone()
    };
    if !uri.query.is_empty() {
        target.push('?');
        target.push_str(&uri.query_string());
    }
    if !uri.fragment.is_empty() {
        target.push('#');
        target.push_str(&uri.fragment);
    }

    let host = if uri.host.contains(':') {
        format!("[{}]", uri.host)
    } else {
        uri.host.clone()
    };

    let mut head = String::new();
    let _ = write!(head, "{} {} HTTP/1.1\r\n", method.as_str(), target);
    if port == HTTP_PORT || port == HTTPS_PORT {
        let _ = write!(head, "Host: {}\r\n", host);
    } else {
        let _ = write!(head, "Host: {}:{}\r\n", host, port);
    }
    for (k, v) in headers.iter() {
        let _ = write!(head, "{}: {}\r\n", k, v);
    }
    if !keep_alive {
        head.push_str("Connection: close\r\n");
    }
    if !body.is_empty() && !headers.contains("Content-Length") {
        let _ = write!(head, "Content-Length: {}\r\n", body.len());
    }
    head.push_str("\r\n");

    let mut wire = head.into_bytes();
    wire.extend_from_slice(body);
    wire
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Decode a chunked transfer coding: repeated `hex-size CRLF payload
/// CRLF` groups, terminated by a zero-size group. Trailing garbage and a
/// truncated tail decode to whatever is recoverable.
fn decode_chunked(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pos = 0;

    loop {
        let line_end = match find(&raw[pos..], b"\r\n") {
            Some(i) => pos + i,
            None => break,
        };
        let size_line = std::str::from_utf8(&raw[pos..line_end]).unwrap_or("");
        // chunk extensions after ';' are ignored
        let size_str = size_line.split(';').next().unwrap_or("").trim();
        let size = match usize::from_str_radix(size_str, 16) {
            Ok(n) => n,
            Err(_) => break,
        };
        if size == 0 {
            break;
        }

        let data_start = line_end + 2;
        let data_end = data_start + size;
        if data_end > raw.len() {
            out.extend_from_slice(&raw[data_start.min(raw.len())..]);
            break;
        }
        out.extend_from_slice(&raw[data_start..data_end]);
        pos = data_end + 2;
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn chunked_decoding() {
        let raw = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        assert_eq!(decode_chunked(raw), b"Wikipedia");
    }

    #[test]
    fn chunked_decoding_with_extension() {
        let raw = b"4;name=value\r\nWiki\r\n0\r\n\r\n";
        assert_eq!(decode_chunked(raw), b"Wiki");
    }

    #[test]
    fn chunked_decoding_truncated_tail() {
        let raw = b"4\r\nWiki\r\nA\r\nped";
        assert_eq!(decode_chunked(raw), b"Wikiped");
    }

    #[test]
    fn request_target_composition() {
        let uri = Uri::parse("http://example.org/hello:12?foo=bar#test");
        let wire = compose(Method::Get, &uri, 80, &Headers::new(), b"", true);
        let text = String::from_utf8(wire).unwrap();

        assert!(text.starts_with("GET /hello:12?foo=bar#test HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.org\r\n"));
        assert!(!text.contains("Connection: close"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn empty_path_becomes_root() {
        let uri = Uri::parse("http://example.org");
        let wire = compose(Method::Get, &uri, 8080, &Headers::new(), b"", false);
        let text = String::from_utf8(wire).unwrap();

        assert!(text.starts_with("GET / HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.org:8080\r\n"));
        assert!(text.contains("Connection: close\r\n"));
    }

    #[test]
    fn content_length_added_once() {
        let uri = Uri::parse("http://example.org/submit");

        let wire = compose(Method::Post, &uri, 80, &Headers::new(), b"hello", true);
        let text = String::from_utf8(wire).unwrap();
        assert!(text.contains("Content-Length: 5\r\n"));

        let headers: Headers = [("Content-Length", "5")].into_iter().collect();
        let wire = compose(Method::Post, &uri, 80, &headers, b"hello", true);
        let text = String::from_utf8(wire).unwrap();
        assert_eq!(text.matches("Content-Length").count(), 1);
    }
}

//! Client-side networking stack: a non-blocking TCP/UDP transport with
//! optional TLS, an HTTP/1.1 request engine on top of it, and a websocket
//! client layered on the HTTP engine.
//!
//! ```no_run
//! use webwire::http::Client;
//! use webwire::fields::FieldMap;
//!
//! let client = Client::new();
//! let res = client.get("https://example.org/", &FieldMap::new(), b"", false, None).unwrap();
//! assert_eq!(res.status_code, 200);
//! ```

pub mod error;
pub mod fields;
pub mod http;
pub mod transport;
pub mod uri;
pub mod ws;

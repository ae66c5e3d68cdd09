//! Websocket opening handshake key material.
//!
//! [RFC-6455 Section 4.1](https://datatracker.ietf.org/doc/html/rfc6455#section-4.1)

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};

/// 258EAFA5-E914-47DA-95CA-C5AB0DC85B11
pub const GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Generate a new `Sec-WebSocket-Key`: 16 random bytes, base64-encoded.
#[inline]
pub fn new_sec_key() -> String {
    let nonce: [u8; 16] = rand::random();
    STANDARD.encode(nonce)
}

/// Derive the `Sec-WebSocket-Accept` value a compliant server must
/// answer with for a given `Sec-WebSocket-Key`.
#[inline]
pub fn derive_accept_key(sec_key: &str) -> String {
    let mut sha1 = Sha1::default();
    sha1.update(sec_key.as_bytes());
    sha1.update(GUID);
    STANDARD.encode(sha1.finalize())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn generate_sec_key() {
        let key = new_sec_key();
        // 16 bytes encode to 24 base64 characters
        assert_eq!(key.len(), 24);
        assert_ne!(key, new_sec_key());
    }

    #[test]
    fn derive_sec_key() {
        assert_eq!(
            derive_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }
}

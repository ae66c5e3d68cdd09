//! Payload masking.
//!
//! Clients must mask every outbound frame with a fresh 32-bit key;
//! payload byte `i` is XORed with key octet `i mod 4`, keyed from the
//! most significant octet down.

/// Generate a new random masking key.
#[inline]
pub fn new_mask_key() -> [u8; 4] {
    rand::random::<[u8; 4]>()
}

/// Mask (or unmask; the operation is its own inverse) the buffer.
#[inline]
pub fn apply_mask(key: [u8; 4], buf: &mut [u8]) {
    for (i, b) in buf.iter_mut().enumerate() {
        *b ^= key[i & 0x03];
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mask_is_involution() {
        let key = new_mask_key();
        let data: Vec<u8> = (0..1024).map(|_| rand::random()).collect();

        let mut masked = data.clone();
        apply_mask(key, &mut masked);
        apply_mask(key, &mut masked);

        assert_eq!(data, masked);
    }

    #[test]
    fn known_vector() {
        // the single-frame masked "Hello" from RFC-6455 section 5.7
        let key = [0x37, 0xfa, 0x21, 0x3d];
        let mut data = *b"Hello";
        apply_mask(key, &mut data);
        assert_eq!(data, [0x7f, 0x9f, 0x4d, 0x51, 0x58]);
    }
}

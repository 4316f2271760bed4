//! Base64 body codec.
//!
//! Bodies travel inside the JSON poll payload as standard, padded base64.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::Result;

/// Encode raw body bytes for the wire
pub fn encode_body(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a wire body back into raw bytes
pub fn decode_body(encoded: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(encoded.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(encode_body(b"hello"), "aGVsbG8=");
        assert_eq!(decode_body("T0s=").unwrap(), b"OK");
        assert_eq!(decode_body("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_body("not base64!").is_err());
    }
}

//! Opaque page token codec for the record `List` RPC.
//!
//! Reuses the exact encoding `stowage_core::repo` already uses for
//! `Discover` pagination, so a page token means the same thing at every
//! layer of the service.

use stowage_core::{decode_page_token, encode_page_token};

use crate::status::{Status, StatusCode};

/// Encode an offset as an opaque page token.
pub fn encode(offset: u64) -> String {
    encode_page_token(offset)
}

/// Decode a page token into an offset, mapping an unreadable token to
/// `INVALID_ARGUMENT`.
pub fn decode(token: &str) -> Result<u64, Status> {
    decode_page_token(if token.is_empty() { None } else { Some(token) }).map_err(|e| Status {
        code: StatusCode::InvalidArgument,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let token = encode(42);
        assert_eq!(decode(&token).unwrap(), 42);
    }

    #[test]
    fn test_empty_token_is_offset_zero() {
        assert_eq!(decode("").unwrap(), 0);
    }

    #[test]
    fn test_garbage_token_is_invalid_argument() {
        let err = decode("%%%not-base64%%%").unwrap_err();
        assert_eq!(err.code, StatusCode::InvalidArgument);
    }
}

//! SHA-256 checksum normalization
//!
//! Clients may send the object checksum as hex or base64, optionally
//! prefixed with the algorithm (`sha256:...`). Object stores expect base64,
//! so everything is normalized to base64 before presigning or comparing.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::StorageError;

/// Normalizes a checksum to base64
///
/// Empty input (after trimming) yields an empty string, meaning "no
/// checksum". The function is idempotent.
///
/// # Errors
///
/// `StorageError::InvalidInput` when the value is neither hex nor base64.
///
/// # Example
///
/// ```
/// use toq_shared::storage::normalize_checksum;
///
/// let b64 = normalize_checksum(
///     "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
/// ).unwrap();
/// assert_eq!(b64, "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=");
/// ```
pub fn normalize_checksum(raw: &str) -> Result<String, StorageError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(String::new());
    }

    let value = match trimmed.split_once(':') {
        Some((_, rest)) => rest.trim(),
        None => trimmed,
    };
    if value.is_empty() {
        return Err(invalid());
    }

    if value.len() % 2 == 0 && value.chars().all(|c| c.is_ascii_hexdigit()) {
        let bytes = hex::decode(value).map_err(|_| invalid())?;
        return Ok(STANDARD.encode(bytes));
    }

    if STANDARD.decode(value).is_ok() {
        return Ok(value.to_string());
    }

    Err(invalid())
}

/// Base64 SHA-256 of `data`
pub fn sha256_base64(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    STANDARD.encode(Sha256::digest(data))
}

fn invalid() -> StorageError {
    StorageError::InvalidInput {
        field: "checksum".to_string(),
        message: "checksum must be a hex or base64 encoded sha256".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_HEX: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const EMPTY_B64: &str = "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=";

    #[test]
    fn test_hex_to_base64() {
        assert_eq!(normalize_checksum(EMPTY_HEX).unwrap(), EMPTY_B64);
        assert_eq!(normalize_checksum(&EMPTY_HEX.to_uppercase()).unwrap(), EMPTY_B64);
    }

    #[test]
    fn test_prefixed_base64() {
        let prefixed = format!("sha256:{}", EMPTY_B64);
        assert_eq!(normalize_checksum(&prefixed).unwrap(), EMPTY_B64);
    }

    #[test]
    fn test_rejects_garbage() {
        let err = normalize_checksum("notbase64!!").unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput { .. }));
    }

    #[test]
    fn test_empty_means_none() {
        assert_eq!(normalize_checksum("   ").unwrap(), "");
    }

    #[test]
    fn test_idempotent() {
        for input in [EMPTY_HEX, EMPTY_B64, "sha256:47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=", ""] {
            let once = normalize_checksum(input).unwrap();
            assert_eq!(normalize_checksum(&once).unwrap(), once);
        }
    }

    #[test]
    fn test_sha256_base64_of_empty() {
        assert_eq!(sha256_base64(b""), EMPTY_B64);
    }
}

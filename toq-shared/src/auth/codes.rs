/// Verification codes
///
/// Six-character alphanumeric codes sent by email/SMS for contact and
/// password changes. Glyphs that are easy to confuse when read aloud or
/// typed from a phone (`0/O`, `1/I/L`) are excluded. Comparison is
/// case-insensitive and constant time.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

/// Length of every verification code
pub const CODE_LENGTH: usize = 6;

/// Time a code stays valid
pub const CODE_TTL_MINUTES: i64 = 15;

const CODE_CHARSET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Generates a fresh verification code
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
        .collect()
}

/// Expiry instant for a code issued at `now`
pub fn code_expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now + ttl
}

/// Case-insensitive, constant-time code comparison
pub fn codes_match(submitted: &str, stored: &str) -> bool {
    let a = submitted.trim().to_ascii_uppercase();
    let b = stored.trim().to_ascii_uppercase();
    constant_time_compare(a.as_bytes(), b.as_bytes())
}

/// Compares two byte strings without early exit on the first mismatch
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_code_shape() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.bytes().all(|b| CODE_CHARSET.contains(&b)));
            assert!(!code.contains('0') && !code.contains('O') && !code.contains('I'));
        }
    }

    #[test]
    fn test_codes_are_random() {
        assert_ne!(generate_code(), generate_code());
    }

    #[test]
    fn test_codes_match_case_insensitive() {
        assert!(codes_match("abc234", "ABC234"));
        assert!(codes_match(" ABC234 ", "abc234"));
        assert!(!codes_match("ABC235", "ABC234"));
        assert!(!codes_match("ABC23", "ABC234"));
    }

    #[test]
    fn test_code_expiry() {
        let now = Utc::now();
        assert_eq!(
            code_expiry(now, Duration::minutes(CODE_TTL_MINUTES)) - now,
            Duration::minutes(15)
        );
    }
}

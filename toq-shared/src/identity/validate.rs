//! Input normalization and checks for identity documents and contacts
//!
//! CPF and CNPJ are validated with their check digits before any call to the
//! identity provider. Phones are stored in E.164; Brazilian numbers typed
//! without the country code get `+55`.

use uuid::Uuid;

use crate::error::{DomainError, DomainResult};
use crate::models::user::digits_only;

const CPF_LEN: usize = 11;
const CNPJ_LEN: usize = 14;

/// Digits of a CPF with valid check digits
pub fn normalize_cpf(value: &str) -> DomainResult<String> {
    let digits = digits_only(value);
    if !is_valid_cpf(&digits) {
        return Err(DomainError::validation("national_id", "invalid CPF"));
    }
    Ok(digits)
}

/// Digits of a CNPJ with valid check digits
pub fn normalize_cnpj(value: &str) -> DomainResult<String> {
    let digits = digits_only(value);
    if !is_valid_cnpj(&digits) {
        return Err(DomainError::validation("national_id", "invalid CNPJ"));
    }
    Ok(digits)
}

pub fn is_valid_cpf(digits: &str) -> bool {
    let nums = match to_numbers(digits, CPF_LEN) {
        Some(nums) => nums,
        None => return false,
    };
    if nums.iter().all(|&d| d == nums[0]) {
        return false;
    }

    let check = |len: usize| -> u32 {
        let sum: u32 = nums[..len]
            .iter()
            .enumerate()
            .map(|(i, &d)| d * (len as u32 + 1 - i as u32))
            .sum();
        let rest = (sum * 10) % 11;
        if rest == 10 {
            0
        } else {
            rest
        }
    };
    check(9) == nums[9] && check(10) == nums[10]
}

pub fn is_valid_cnpj(digits: &str) -> bool {
    let nums = match to_numbers(digits, CNPJ_LEN) {
        Some(nums) => nums,
        None => return false,
    };
    if nums.iter().all(|&d| d == nums[0]) {
        return false;
    }

    const FIRST: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
    const SECOND: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
    let check = |weights: &[u32]| -> u32 {
        let sum: u32 = nums.iter().zip(weights).map(|(d, w)| d * w).sum();
        let rest = sum % 11;
        if rest < 2 {
            0
        } else {
            11 - rest
        }
    };
    check(&FIRST) == nums[12] && check(&SECOND) == nums[13]
}

fn to_numbers(digits: &str, len: usize) -> Option<Vec<u32>> {
    if digits.len() != len {
        return None;
    }
    digits.chars().map(|c| c.to_digit(10)).collect()
}

/// E.164 phone; 10 or 11 bare digits are taken as Brazilian
pub fn normalize_phone(value: &str) -> DomainResult<String> {
    let trimmed = value.trim();
    let digits = digits_only(trimmed);
    let e164 = if trimmed.starts_with('+') {
        format!("+{}", digits)
    } else if digits.len() == 10 || digits.len() == 11 {
        format!("+55{}", digits)
    } else {
        format!("+{}", digits)
    };

    // E.164 allows at most 15 digits after the plus sign
    let len = e164.len() - 1;
    if !(10..=15).contains(&len) || e164.starts_with("+0") {
        return Err(DomainError::validation("phone", "invalid phone number"));
    }
    Ok(e164)
}

/// Trimmed, lowercase email
pub fn normalize_email(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

/// Parses a client-supplied device id
pub fn parse_device_id(value: &str) -> DomainResult<Uuid> {
    Uuid::parse_str(value.trim())
        .map_err(|_| DomainError::validation("device_id", "device id must be a UUID"))
}

/// Rejects blank required fields
pub fn require(field: &'static str, value: &str) -> DomainResult<()> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(field, "is required"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpf_check_digits() {
        assert!(is_valid_cpf("52998224725"));
        assert!(is_valid_cpf("11144477735"));
        assert!(!is_valid_cpf("52998224724"));
        assert!(!is_valid_cpf("11111111111"));
        assert!(!is_valid_cpf("1234"));
        assert_eq!(normalize_cpf("529.982.247-25").unwrap(), "52998224725");
    }

    #[test]
    fn test_template_national_id_is_accepted() {
        assert!(is_valid_cpf("00000000191"));
    }

    #[test]
    fn test_cnpj_check_digits() {
        assert!(is_valid_cnpj("11222333000181"));
        assert!(!is_valid_cnpj("11222333000182"));
        assert!(!is_valid_cnpj("00000000000000"));
        assert_eq!(normalize_cnpj("11.222.333/0001-81").unwrap(), "11222333000181");
        assert!(normalize_cnpj("11.222.333/0001").is_err());
    }

    #[test]
    fn test_phone_normalization() {
        assert_eq!(normalize_phone("+55 (11) 99999-9999").unwrap(), "+5511999999999");
        assert_eq!(normalize_phone("(11) 99999-9999").unwrap(), "+5511999999999");
        assert_eq!(normalize_phone("1133334444").unwrap(), "+551133334444");
        assert!(normalize_phone("12345").is_err());
        assert!(normalize_phone("").is_err());
    }

    #[test]
    fn test_device_id_must_be_uuid() {
        assert!(parse_device_id("8f14e45f-ceea-4e7a-9c3b-5a1d2c3e4f50").is_ok());
        let err = parse_device_id("device-1").unwrap_err();
        assert_eq!(err.details().map(|(f, _)| f), Some("device_id".to_string()));
    }

    #[test]
    fn test_email_normalization() {
        assert_eq!(normalize_email("  Maria@Example.COM "), "maria@example.com");
    }
}

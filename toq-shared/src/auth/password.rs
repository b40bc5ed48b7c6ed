/// Password hashing and policy
///
/// Passwords are stored as Argon2id PHC strings. Cost parameters are part of
/// [`HashParams`] so that test suites can run with cheap settings while
/// production keeps the 64 MB / 3 iteration profile.
///
/// Signin must take roughly the same time whether or not the national id
/// exists, so [`PasswordHashing`] keeps a pre-computed dummy hash and
/// [`PasswordHashing::verify_or_dummy`] always runs one verification.
///
/// # Example
///
/// ```
/// use toq_shared::auth::password::{validate_password_policy, HashParams, PasswordHashing};
///
/// let hashing = PasswordHashing::new(HashParams::fast()).unwrap();
/// let hash = hashing.hash("Abcdefgh1!").unwrap();
/// assert!(hashing.verify("Abcdefgh1!", &hash).unwrap());
/// assert!(validate_password_policy("Abcdefg1").is_err());
/// ```

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params, ParamsBuilder, Version,
};
use rand::seq::SliceRandom;
use rand::Rng;

/// Message returned for any policy violation
pub const PASSWORD_POLICY_MESSAGE: &str =
    "password must have at least 8 characters & special char, upper and lower case letters and a digit";

/// Password hashing errors
#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    /// Hashing failed
    #[error("Failed to hash password: {0}")]
    HashError(String),

    /// Verification failed (not the same as wrong password)
    #[error("Failed to verify password: {0}")]
    VerifyError(String),

    /// Invalid hash format
    #[error("Invalid password hash format: {0}")]
    InvalidHash(String),
}

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashParams {
    /// Memory in KiB
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for HashParams {
    fn default() -> Self {
        Self {
            m_cost: 65536,
            t_cost: 3,
            p_cost: 4,
        }
    }
}

impl HashParams {
    /// Minimal cost, for tests and local tooling only
    pub fn fast() -> Self {
        Self {
            m_cost: 8,
            t_cost: 1,
            p_cost: 1,
        }
    }

    fn build(&self) -> Result<Params, PasswordError> {
        ParamsBuilder::new()
            .m_cost(self.m_cost)
            .t_cost(self.t_cost)
            .p_cost(self.p_cost)
            .output_len(32)
            .build()
            .map_err(|e| PasswordError::HashError(format!("Invalid parameters: {}", e)))
    }
}

/// Hashes a password with the given parameters
///
/// # Errors
///
/// Returns `PasswordError::HashError` if the parameters are invalid or
/// hashing fails.
pub fn hash_password_with(password: &str, params: &HashParams) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params.build()?);

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::HashError(format!("Hash generation failed: {}", e)))?;

    Ok(password_hash.to_string())
}

/// Hashes a password with the production parameters
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    hash_password_with(password, &HashParams::default())
}

/// Verifies a password against a PHC hash in constant time
///
/// Parameters are read from the hash itself.
///
/// # Errors
///
/// Returns an error if the hash is malformed. A wrong password is `Ok(false)`.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| PasswordError::InvalidHash(format!("Failed to parse hash: {}", e)))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(_) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::VerifyError(format!("Verification failed: {}", e))),
    }
}

/// Checks the password policy: at least 8 characters, upper and lower case
/// letters, a digit and a special character.
pub fn validate_password_policy(password: &str) -> Result<(), String> {
    let long_enough = password.chars().count() >= 8;
    let upper = password.chars().any(|c| c.is_uppercase());
    let lower = password.chars().any(|c| c.is_lowercase());
    let digit = password.chars().any(|c| c.is_ascii_digit());
    let special = password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace());

    if long_enough && upper && lower && digit && special {
        Ok(())
    } else {
        Err(PASSWORD_POLICY_MESSAGE.to_string())
    }
}

/// Generates a random password that satisfies the policy
///
/// Used for system users, who must go through the reset flow to pick their
/// own password.
pub fn generate_strong_password(length: usize) -> String {
    const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
    const LOWER: &[u8] = b"abcdefghijkmnopqrstuvwxyz";
    const DIGITS: &[u8] = b"23456789";
    const SPECIAL: &[u8] = b"!@#$%&*?-_";

    let length = length.max(12);
    let mut rng = rand::thread_rng();
    let mut pick = |set: &[u8]| set[rng.gen_range(0..set.len())] as char;

    let mut chars = vec![pick(UPPER), pick(LOWER), pick(DIGITS), pick(SPECIAL)];
    let all: Vec<u8> = [UPPER, LOWER, DIGITS, SPECIAL].concat();
    while chars.len() < length {
        chars.push(pick(all.as_slice()));
    }
    chars.shuffle(&mut rand::thread_rng());
    chars.into_iter().collect()
}

/// Hasher bound to one parameter set, with a dummy hash for timing-safe
/// lookups
#[derive(Debug, Clone)]
pub struct PasswordHashing {
    params: HashParams,
    dummy_hash: String,
}

impl PasswordHashing {
    pub fn new(params: HashParams) -> Result<Self, PasswordError> {
        let dummy_hash = hash_password_with("toq-dummy-password-never-matches", &params)?;
        Ok(Self { params, dummy_hash })
    }

    pub fn params(&self) -> HashParams {
        self.params
    }

    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        hash_password_with(password, &self.params)
    }

    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, PasswordError> {
        verify_password(password, hash)
    }

    /// Verifies against `hash`, or against the dummy hash when the user is
    /// absent. Always returns `false` in the latter case.
    pub fn verify_or_dummy(&self, password: &str, hash: Option<&str>) -> Result<bool, PasswordError> {
        match hash {
            Some(hash) => verify_password(password, hash),
            None => {
                let _ = verify_password(password, &self.dummy_hash)?;
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_password_fast_params() {
        let hash = hash_password_with("Abcdefgh1!", &HashParams::fast()).expect("Hash should succeed");

        assert!(hash.starts_with("$argon2id$"));
        assert!(hash.contains("v=19"));
        assert!(hash.contains("m=8"));
        assert!(hash.contains("t=1"));
    }

    #[test]
    fn test_hash_password_produces_different_salts() {
        let params = HashParams::fast();
        let hash1 = hash_password_with("same_password", &params).unwrap();
        let hash2 = hash_password_with("same_password", &params).unwrap();
        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_verify_password() {
        let hash = hash_password_with("correct_password", &HashParams::fast()).unwrap();

        assert!(verify_password("correct_password", &hash).unwrap());
        assert!(!verify_password("wrong_password", &hash).unwrap());
        assert!(!verify_password("", &hash).unwrap());
    }

    #[test]
    fn test_verify_password_invalid_hash() {
        assert!(verify_password("password", "invalid_hash").is_err());
        assert!(verify_password("password", "$argon2id$invalid").is_err());
    }

    #[test]
    fn test_password_policy_boundaries() {
        let err = validate_password_policy("Abcdefg1").unwrap_err();
        assert!(err.contains("at least 8 characters & special char"));

        assert!(validate_password_policy("Abcdefgh1!").is_ok());
        assert!(validate_password_policy("Ab1!").is_err());
        assert!(validate_password_policy("abcdefgh1!").is_err());
        assert!(validate_password_policy("ABCDEFGH1!").is_err());
        assert!(validate_password_policy("Abcdefghi!").is_err());
    }

    #[test]
    fn test_generated_password_satisfies_policy() {
        for _ in 0..20 {
            let password = generate_strong_password(16);
            assert_eq!(password.len(), 16);
            assert!(validate_password_policy(&password).is_ok(), "{}", password);
        }
    }

    #[test]
    fn test_verify_or_dummy() {
        let hashing = PasswordHashing::new(HashParams::fast()).unwrap();
        let hash = hashing.hash("Abcdefgh1!").unwrap();

        assert!(hashing.verify_or_dummy("Abcdefgh1!", Some(&hash)).unwrap());
        assert!(!hashing.verify_or_dummy("Abcdefgh1!", None).unwrap());
        assert!(!hashing
            .verify_or_dummy("toq-dummy-password-never-matches", None)
            .unwrap());
    }
}

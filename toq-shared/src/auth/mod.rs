/// Authentication primitives
///
/// # Modules
///
/// - [`password`]: Argon2id hashing, password policy, generated passwords
/// - [`jwt`]: access/refresh token minting and validation
/// - [`codes`]: six-character verification codes
/// - [`signature`]: HMAC-SHA256 body signatures for callbacks and relays
///
/// # Security Features
///
/// - **Password Hashing**: Argon2id, 64 MB memory, 3 iterations by default
/// - **JWT Tokens**: HS256 signing with injected secret and TTLs
/// - **Constant-time Comparison**: codes and signatures
/// - **Timing-safe signin**: dummy-hash verification for unknown users

pub mod codes;
pub mod jwt;
pub mod password;
pub mod signature;

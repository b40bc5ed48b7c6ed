/// API route handlers
///
/// - `health`: database and Redis probe
/// - `auth`: signin, refresh and signout
/// - `media`: media-processing callback
/// - `admin`: transition-rule reload

pub mod admin;
pub mod auth;
pub mod health;
pub mod media;

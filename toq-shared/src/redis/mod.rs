/// Redis integration
///
/// A single shared [`RedisClient`] backs the token blocklist and the
/// permission cache.

pub mod client;

pub use client::{RedisClient, RedisClientError, RedisConfig};

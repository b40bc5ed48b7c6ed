//! # Toq API Server Library
//!
//! HTTP surface of the identity core.
//!
//! ## Modules
//!
//! - `app`: Application state and router builder
//! - `config`: HTTP server configuration
//! - `error`: Domain error to HTTP response mapping
//! - `middleware`: Request context and bearer authentication
//! - `routes`: Route handlers

pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;

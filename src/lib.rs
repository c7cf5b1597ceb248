//! Turnstile - per-identity rate limiting for HTTP services
//!
//! Each request is attributed to an identity (an API token if present,
//! otherwise the client IP) and counted against a fixed-window quota kept in
//! a shared counter store. Requests over quota are rejected with
//! `429 Too Many Requests`.
//!
//! Windows are fixed: a burst straddling a window edge can see up to twice
//! the limit admitted across the two windows.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;

//! domintel: domain intelligence aggregation and caching
//!
//! Resolves DNS records, registration data, network operator, software
//! fingerprint and transport security for a domain through fallback chains
//! of unreliable sources, and merges them into one always-complete record
//! backed by a staleness-checked durable cache.

pub mod cache;
pub mod chain;
pub mod cli;
pub mod clock;
pub mod config;
pub mod core;
pub mod dns;
pub mod error;
pub mod fingerprint;
pub mod http;
pub mod model;
pub mod operator;
pub mod rate_limit;
pub mod registration;
pub mod retry;
pub mod sanitize;
pub mod security;
pub mod store;
pub mod validation;

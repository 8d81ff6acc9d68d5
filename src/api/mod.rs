//! HTTP API: router and request handlers

pub mod handlers;
pub mod routes;

/// Prefix shared by every versioned route
pub const API_PREFIX: &str = "/api/v1";

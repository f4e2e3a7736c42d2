// Lazy Image library
// Content-addressed image store with lazily computed, cached variants

pub mod auth;
pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod service;
pub mod store;
pub mod upload;
pub mod variant;

// Upstream provider module

pub mod client;
pub mod models;

pub use client::{GeminiClient, UpstreamError};

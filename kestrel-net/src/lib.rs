//! Kestrel network layer
//!
//! Provides the HTTP side of collection:
//! - Client construction with timeout and user agent
//! - The page fetch primitive consumed by the collector

pub mod client;
pub mod pages;

pub use client::*;
pub use pages::*;

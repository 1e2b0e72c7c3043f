//! Kestrel Core - Record model, source registry and feature extraction
//!
//! This crate provides the foundational primitives shared by both pipelines:
//! - Known sources and their collection endpoints
//! - The persisted record model
//! - Text feature extraction for the scorer

pub mod source;
pub mod record;
pub mod features;

pub use source::*;
pub use record::*;
pub use features::*;

/// Default number of items requested per page
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Default number of records classified per batch
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Dimension of the hashed feature space
pub const FEATURE_DIM: u32 = 1 << 18;

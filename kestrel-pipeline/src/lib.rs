//! Kestrel Pipelines
//!
//! The two jobs that run against the record store:
//! - **Collector**: walks a source's paginated API and upserts every item
//! - **Scorer**: classifies stored records in primary-key batches
//!
//! Both report through a [`ProgressObserver`] and leave all committed work in
//! place when they stop early.

pub mod error;
pub mod progress;
pub mod classifier;
pub mod collector;
pub mod scorer;

pub use error::*;
pub use progress::*;
pub use classifier::*;
pub use collector::*;
pub use scorer::*;

//! Atlas indexing.
//!
//! - [`scan`] - Deterministic enumeration of a category-labeled atlas
//! - [`builder`] - Batched embed-and-write with per-item fallback

pub mod builder;
pub mod scan;

pub use builder::{BuildOptions, BuildReport, IndexBuilder, SkippedItem};
pub use scan::{is_supported_image, scan_atlas, SUPPORTED_EXTENSIONS};

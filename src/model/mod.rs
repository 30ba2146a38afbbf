//! Data models for Atlas Search.
//!
//! This module contains the domain models shared by both pipelines:
//! - ReferenceItem (one indexed atlas image)
//! - Match / SearchOutcome (query results)

pub mod item;
pub mod result;

pub use item::{reference_id, Metadata, ReferenceItem, DEFAULT_PROVENANCE};
pub use result::{similarity_from_distance, CaseView, Match, SearchOutcome, MATCH_NOTE};

//! The dual-path extraction pipeline.
//!
//! `regex_extractor` runs the configurable pattern set over raw text;
//! `merger` unions AST and regex detections with similarity dedup; `content`
//! orchestrates the per-page passes and source attribution.

pub mod content;
pub mod merger;
pub mod regex_extractor;

pub use content::ContentExtractor;
pub use merger::ResultMerger;
pub use regex_extractor::RegexExtractor;

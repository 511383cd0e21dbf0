//! websift - static scanner for sensitive information and attack surface in
//! web application source.
//!
//! This library provides tools for discovering endpoints, credentials,
//! tokens, routes, and framework metadata by:
//! - Fetching a page and decomposing it into script and non-script text
//! - Extracting artifacts with a dual-path pipeline (configurable regexes
//!   plus a JavaScript AST analyzer with pluggable visitors)
//! - Reconstructing Vue router tables and webpack chunk maps statically
//! - Recursively crawling discovered URLs under a bounded-concurrency,
//!   layered BFS with content-hash dedup
//!
//! # Example
//!
//! ```no_run
//! use websift::config::ScanConfig;
//! use websift::scanner::Scanner;
//!
//! #[tokio::main]
//! async fn main() {
//!     let scanner = Scanner::new(ScanConfig::default()).unwrap();
//!     let report = scanner.scan("https://example.com").await.unwrap();
//!     println!("Found {} artifacts", report.results.total());
//! }
//! ```

pub mod ast;
pub mod browser;
pub mod config;
pub mod console;
pub mod crawl;
pub mod extract;
pub mod filters;
pub mod framework;
pub mod live;
pub mod patterns;
pub mod scanner;
pub mod storage;
pub mod types;

pub use config::{Commands, Config, ScanConfig, Settings};
pub use scanner::Scanner;
pub use types::{
    Detection, DetectionSource, DetectionType, ExtractionResult, Result, RouteRecord,
    ScanReport, WebsiftError,
};

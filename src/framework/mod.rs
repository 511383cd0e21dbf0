//! Framework introspection: Vue router reconstruction and webpack runtime
//! analysis.

pub mod vue;
pub mod webpack;

pub use vue::VueStaticAnalyzer;
pub use webpack::WebpackAnalyzer;

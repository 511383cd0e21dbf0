//! Live-browser introspection of the target page.

pub mod vue_probe;

pub use vue_probe::{VueProbe, VueProbeResult};

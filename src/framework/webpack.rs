//! Static reconstruction of webpack chunk maps from bundler runtime code.
//!
//! Recognizes the classic name/hash pair expression, single-map variants,
//! webpack 5's `__webpack_require__.u`, and chunk-shaped filename literals,
//! multiplying the maps out into loadable chunk URLs. Also discovers source
//! map references and DefinePlugin-style environment constants.

use crate::types::{Detection, DetectionType};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, trace};

/// Map keys that mark an object literal as something other than a chunk map.
const RESERVED_MAP_KEYS: &[&str] = &["id", "name", "type", "hash", "version", "mode"];

static RUNTIME_CLASSIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\{([^{}]*)\}\[(\w+)\]\)?\s*\+\s*["']\.["']\s*\+\s*\(?\{([^{}]*)\}\[(\w+)\]\)?\s*\+\s*["'](\.js[^"']*)["']"#,
    )
    .unwrap()
});

static SINGLE_MAP_JS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{([^{}]*)\}\[(\w+)\]\)?\s*\+\s*["'](\.js[^"']*)["']"#).unwrap()
});

static MAP_ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["']?([\w~.-]+)["']?\s*:\s*["']([^"']*)["']"#).unwrap()
});

static BASE_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\b\w+\.p\s*=\s*["']([^"']+)["']"#).unwrap());

static U_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["']([\w./-]*/)["']\s*\+"#).unwrap());

static MAP_OBJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{((?:\s*["']?[\w~.-]+["']?\s*:\s*["'][^"']*["']\s*,?)+)\}"#).unwrap()
});

static CHUNK_FILENAME_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\b\d+\.[a-f0-9]{6,}\.js\b",
        r"\bvendors~[\w.~-]+\.js\b",
        r"\bcommons~[\w.~-]+\.js\b",
        r"\bchunk-[\w-]+\.js\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static chunk pattern"))
    .collect()
});

static SOURCEMAP_COMMENT_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"//[#@]\s*sourceMappingURL\s*=\s*(\S+)",
        r"/\*[#@]\s*sourceMappingURL\s*=\s*(\S+?)\s*\*/",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static sourcemap pattern"))
    .collect()
});

static DEFINE_CONSTANT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bprocess\.env\.([A-Z][A-Z0-9_]*)\b").unwrap());

/// Runtime indicators used for webpack detection.
const BUNDLE_INDICATORS: &[&str] = &[
    "webpackJsonp",
    "__webpack_require__",
    "__webpack_chunk_load__",
    "webpackChunk",
];

/// One reconstructed lazily-loadable chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkArtifact {
    pub url: String,
    pub chunk_id: String,
    /// Which runtime pattern produced it.
    pub source: &'static str,
}

/// Full analysis of one bundle file.
#[derive(Debug, Clone, Default)]
pub struct WebpackAnalysis {
    pub detected: bool,
    pub indicators: Vec<&'static str>,
    pub chunks: Vec<ChunkArtifact>,
    pub define_constants: Vec<String>,
    pub source_map_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct WebpackAnalyzer;

impl WebpackAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Check if JS content is a webpack bundle.
    pub fn is_webpack_bundle(&self, content: &str) -> bool {
        BUNDLE_INDICATORS.iter().any(|i| content.contains(i))
    }

    /// Run all chunk reconstruction patterns over bundle content.
    pub fn analyze(&self, content: &str, source_url: &str) -> WebpackAnalysis {
        let mut analysis = WebpackAnalysis {
            indicators: BUNDLE_INDICATORS
                .iter()
                .copied()
                .filter(|i| content.contains(i))
                .collect(),
            ..WebpackAnalysis::default()
        };
        analysis.detected = !analysis.indicators.is_empty();

        let base = detect_base_path(content).unwrap_or_else(|| "/".to_string());
        let mut seen: HashSet<String> = HashSet::new();
        let mut classic_spans: Vec<(usize, usize)> = Vec::new();

        // Pattern 1: classic name/hash pair expression.
        for caps in RUNTIME_CLASSIC_RE.captures_iter(content) {
            let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
            classic_spans.push(whole);

            let (Some(names), Some(hashes), Some(suffix)) = (caps.get(1), caps.get(3), caps.get(5))
            else {
                continue;
            };
            let name_map = parse_map(names.as_str());
            let hash_map = parse_map(hashes.as_str());

            for (id, name) in &name_map {
                let Some(hash) = hash_map.iter().find(|(h, _)| h == id).map(|(_, v)| v) else {
                    continue;
                };
                let url = join_chunk_url(&base, source_url, &format!("{}.{}{}", name, hash, suffix.as_str()));
                if seen.insert(url.clone()) {
                    analysis.chunks.push(ChunkArtifact {
                        url,
                        chunk_id: id.clone(),
                        source: "runtime-classic",
                    });
                }
            }
        }

        // Patterns 2/3/5/6: single map multiplied with the base path.
        for caps in SINGLE_MAP_JS_RE.captures_iter(content) {
            let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
            if classic_spans
                .iter()
                .any(|(start, end)| whole.0 >= *start && whole.0 < *end)
            {
                continue;
            }

            let (Some(body), Some(suffix)) = (caps.get(1), caps.get(3)) else {
                continue;
            };
            let map = parse_map(body.as_str());
            if map.is_empty() || looks_reserved(&map) {
                continue;
            }

            for (id, hash) in &map {
                if hash.is_empty() {
                    continue;
                }
                let url = join_chunk_url(&base, source_url, &format!("{}.{}{}", id, hash, suffix.as_str()));
                if seen.insert(url.clone()) {
                    analysis.chunks.push(ChunkArtifact {
                        url,
                        chunk_id: id.clone(),
                        source: "runtime-map",
                    });
                }
            }
        }

        // Pattern 4: webpack 5 chunk URL function.
        if let Some(offset) = content.find("__webpack_require__.u") {
            let window = &content[offset..(offset + 2000).min(content.len())];
            let prefix = U_PREFIX_RE
                .captures(window)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string());
            if let Some(map_caps) = MAP_OBJECT_RE.captures(window) {
                let map = parse_map(map_caps.get(1).map(|m| m.as_str()).unwrap_or(""));
                let effective_base = prefix
                    .map(|p| join_base(&base, &p))
                    .unwrap_or_else(|| base.clone());
                for (id, hash) in &map {
                    if hash.is_empty() {
                        continue;
                    }
                    let url =
                        join_chunk_url(&effective_base, source_url, &format!("{}.{}.js", id, hash));
                    if seen.insert(url.clone()) {
                        analysis.chunks.push(ChunkArtifact {
                            url,
                            chunk_id: id.clone(),
                            source: "runtime-u",
                        });
                    }
                }
            }
        }

        // Lightweight scan for chunk-shaped filename literals.
        for regex in CHUNK_FILENAME_RES.iter() {
            for found in regex.find_iter(content) {
                let url = join_chunk_url(&base, source_url, found.as_str());
                if seen.insert(url.clone()) {
                    analysis.chunks.push(ChunkArtifact {
                        url,
                        chunk_id: found.as_str().to_string(),
                        source: "literal",
                    });
                }
            }
        }

        for caps in DEFINE_CONSTANT_RE.captures_iter(content) {
            if let Some(name) = caps.get(1) {
                let constant = format!("process.env.{}", name.as_str());
                if !analysis.define_constants.contains(&constant) {
                    analysis.define_constants.push(constant);
                }
            }
        }

        analysis.source_map_url = extract_sourcemap_url(content, source_url);

        debug!(
            "webpack analysis of {}: {} chunks, {} constants",
            source_url,
            analysis.chunks.len(),
            analysis.define_constants.len()
        );
        analysis
    }

    /// Convert an analysis into detections, skipping chunk URLs that are
    /// already loaded on the page.
    pub fn to_detections(
        &self,
        analysis: &WebpackAnalysis,
        source_url: &str,
        loaded_scripts: &[String],
    ) -> Vec<Detection> {
        let mut detections = Vec::new();

        if analysis.detected {
            let mut det = Detection::regex(DetectionType::WebpackDetection, "webpack", source_url);
            det.confidence = 0.9;
            det = det.with_context(
                "indicators",
                serde_json::Value::Array(
                    analysis
                        .indicators
                        .iter()
                        .map(|i| serde_json::Value::String(i.to_string()))
                        .collect(),
                ),
            );
            detections.push(det);
        }

        for chunk in &analysis.chunks {
            if loaded_scripts.iter().any(|s| s.ends_with(&chunk.url) || chunk.url.ends_with(s)) {
                trace!("chunk already loaded, skipping: {}", chunk.url);
                continue;
            }
            detections.push(
                Detection::regex(DetectionType::WebpackChunk, chunk.url.clone(), source_url)
                    .with_context("chunkId", chunk.chunk_id.as_str())
                    .with_context("type", "async")
                    .with_context("source", chunk.source),
            );
        }

        for constant in &analysis.define_constants {
            detections.push(Detection::regex(
                DetectionType::DefineConstant,
                constant.clone(),
                source_url,
            ));
        }

        if let Some(map_url) = &analysis.source_map_url {
            detections.push(Detection::regex(
                DetectionType::WebpackSourceMap,
                map_url.clone(),
                source_url,
            ));
        }

        detections
    }
}

/// Result category for a webpack analyzer detection.
pub fn detection_category(ty: &DetectionType) -> &'static str {
    match ty {
        DetectionType::WebpackChunk => "webpackChunks",
        DetectionType::DefineConstant => "webpackDefineConstants",
        DetectionType::WebpackSourceMap => "webpackSourceMaps",
        _ => "webpackDetection",
    }
}

/// Parse `"key":"value"` entries out of an object-literal body.
fn parse_map(body: &str) -> Vec<(String, String)> {
    MAP_ENTRY_RE
        .captures_iter(body)
        .filter_map(|caps| {
            let key = caps.get(1)?.as_str().to_string();
            let value = caps.get(2)?.as_str().to_string();
            Some((key, value))
        })
        .collect()
}

fn looks_reserved(map: &[(String, String)]) -> bool {
    map.iter()
        .all(|(key, _)| RESERVED_MAP_KEYS.contains(&key.as_str()))
}

/// The webpack public path (`x.p = "..."`) when present.
pub fn detect_base_path(content: &str) -> Option<String> {
    BASE_PATH_RE
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn join_base(base: &str, prefix: &str) -> String {
    if prefix.starts_with('/') {
        prefix.to_string()
    } else {
        format!("{}{}", base, prefix)
    }
}

/// Resolve a chunk file name against the public path or the bundle's own
/// directory.
fn join_chunk_url(base: &str, source_url: &str, file: &str) -> String {
    if base.starts_with("http://") || base.starts_with("https://") || base.starts_with('/') {
        return format!("{}{}", base, file);
    }

    // Relative base: resolve against the bundle directory.
    match source_url.rfind('/') {
        Some(pos) => format!("{}{}{}", &source_url[..=pos], base, file),
        None => format!("{}{}", base, file),
    }
}

/// Source map discovery: explicit `sourceMappingURL` comments, resolved
/// against the file URL.
pub fn extract_sourcemap_url(content: &str, base_url: &str) -> Option<String> {
    for regex in SOURCEMAP_COMMENT_RES.iter() {
        if let Some(caps) = regex.captures(content) {
            if let Some(url_match) = caps.get(1) {
                let map_url = url_match.as_str().trim();

                if map_url.starts_with("data:") {
                    return Some(map_url.to_string());
                }
                if map_url.starts_with("http://") || map_url.starts_with("https://") {
                    return Some(map_url.to_string());
                }
                if let Ok(base) = url::Url::parse(base_url) {
                    if let Ok(resolved) = base.join(map_url) {
                        return Some(resolved.to_string());
                    }
                }
            }
        }
    }
    None
}

/// `.map` URL variations probed for bundle-looking files.
pub fn sourcemap_variations(js_url: &str) -> Vec<String> {
    let mut variations = vec![format!("{}.map", js_url)];

    if js_url.contains(".min.js") {
        variations.push(format!("{}.map", js_url.replace(".min.js", ".js")));
    } else if js_url.ends_with(".js") {
        variations.push(format!("{}.map", js_url.replace(".js", ".min.js")));
    }

    variations
}

/// Enumerate the `sources` array of a fetched source map.
pub fn sourcemap_module_paths(map_content: &str) -> Vec<String> {
    match sourcemap::SourceMap::from_slice(map_content.as_bytes()) {
        Ok(map) => map
            .sources()
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(e) => {
            trace!("not a parsable source map: {}", e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classic_pair_reconstruction() {
        let analyzer = WebpackAnalyzer::new();
        let runtime = r#"
            a.p = "/static/js/";
            __webpack_require__.e = function(e) {
                return a.p + ({"0":"home","1":"admin"}[e]) + "." + ({"0":"abc","1":"def"}[e]) + ".js";
            };
        "#;
        let analysis = analyzer.analyze(runtime, "https://app.example.com/static/js/runtime.js");

        let urls: Vec<&str> = analysis.chunks.iter().map(|c| c.url.as_str()).collect();
        assert!(urls.contains(&"/static/js/home.abc.js"));
        assert!(urls.contains(&"/static/js/admin.def.js"));
        assert!(analysis
            .chunks
            .iter()
            .all(|c| c.source == "runtime-classic"));
    }

    #[test]
    fn test_single_map_variant() {
        let analyzer = WebpackAnalyzer::new();
        let runtime = r#"
            n.p = "/assets/";
            __webpack_require__ = n;
            t.src = n.p + "js/" + {"7":"a1b2c3","9":"d4e5f6"}[e] + ".js";
        "#;
        let analysis = analyzer.analyze(runtime, "https://app.example.com/assets/runtime.js");

        let urls: Vec<&str> = analysis.chunks.iter().map(|c| c.url.as_str()).collect();
        assert!(urls.contains(&"/assets/7.a1b2c3.js"));
        assert!(urls.contains(&"/assets/9.d4e5f6.js"));
    }

    #[test]
    fn test_webpack5_u_function() {
        let analyzer = WebpackAnalyzer::new();
        let runtime = r#"
            __webpack_require__.p = "/dist/";
            __webpack_require__.u = function(e) {
                return "js/" + e + "." + {"main":"0a1b2c","vendor":"3d4e5f"}[e] + ".js";
            };
        "#;
        let analysis = analyzer.analyze(runtime, "https://app.example.com/dist/runtime.js");

        let urls: Vec<&str> = analysis.chunks.iter().map(|c| c.url.as_str()).collect();
        assert!(urls.contains(&"/dist/js/main.0a1b2c.js"));
        assert!(urls.contains(&"/dist/js/vendor.3d4e5f.js"));
    }

    #[test]
    fn test_chunk_filename_literals() {
        let analyzer = WebpackAnalyzer::new();
        let js = r#"loadScript("7.abc123def.js"); other("vendors~main.8f9a0b.js");"#;
        let analysis = analyzer.analyze(js, "https://app.example.com/js/app.js");

        assert!(analysis
            .chunks
            .iter()
            .any(|c| c.url.ends_with("7.abc123def.js") && c.source == "literal"));
        assert!(analysis
            .chunks
            .iter()
            .any(|c| c.url.ends_with("vendors~main.8f9a0b.js")));
    }

    #[test]
    fn test_is_webpack_bundle_and_detection_record() {
        let analyzer = WebpackAnalyzer::new();
        assert!(analyzer.is_webpack_bundle("(window.webpackJsonp=window.webpackJsonp||[]).push"));
        assert!(analyzer.is_webpack_bundle("__webpack_require__(123)"));
        assert!(!analyzer.is_webpack_bundle("console.log('hello')"));

        let analysis = analyzer.analyze("__webpack_require__(1)", "https://a/app.js");
        let detections = analyzer.to_detections(&analysis, "https://a/app.js", &[]);
        assert!(detections
            .iter()
            .any(|d| d.detection_type == DetectionType::WebpackDetection));
    }

    #[test]
    fn test_loaded_chunks_filtered() {
        let analyzer = WebpackAnalyzer::new();
        let js = r#"p.p="/js/"; x = p.p + ({"0":"home"}[e]) + "." + ({"0":"abc"}[e]) + ".js";"#;
        let analysis = analyzer.analyze(js, "https://a/js/runtime.js");
        let loaded = vec!["https://a/js/home.abc.js".to_string()];
        let detections = analyzer.to_detections(&analysis, "https://a/js/runtime.js", &loaded);

        assert!(!detections
            .iter()
            .any(|d| d.detection_type == DetectionType::WebpackChunk));
    }

    #[test]
    fn test_define_constants() {
        let analyzer = WebpackAnalyzer::new();
        let js = r#"if (process.env.NODE_ENV === "production" && process.env.API_BASE) {}"#;
        let analysis = analyzer.analyze(js, "https://a/app.js");
        assert_eq!(
            analysis.define_constants,
            vec!["process.env.NODE_ENV", "process.env.API_BASE"]
        );
    }

    #[test]
    fn test_sourcemap_url_extraction_and_variations() {
        let content = "console.log(1);\n//# sourceMappingURL=main.js.map";
        assert_eq!(
            extract_sourcemap_url(content, "https://example.com/js/main.js"),
            Some("https://example.com/js/main.js.map".to_string())
        );

        let variations = sourcemap_variations("https://example.com/js/app.min.js");
        assert!(variations.contains(&"https://example.com/js/app.min.js.map".to_string()));
        assert!(variations.contains(&"https://example.com/js/app.js.map".to_string()));
    }

    #[test]
    fn test_sourcemap_module_paths() {
        let map = r#"{"version":3,"sources":["webpack:///src/app.js","webpack:///src/auth/login.js"],"names":[],"mappings":"AAAA"}"#;
        let paths = sourcemap_module_paths(map);
        assert_eq!(paths.len(), 2);
        assert!(paths[1].contains("auth/login"));

        assert!(sourcemap_module_paths("not a map").is_empty());
    }
}

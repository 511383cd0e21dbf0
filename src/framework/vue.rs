//! Static Vue route extraction from JS source text.
//!
//! Reconstructs router tables from `path:` properties, `addRoute`/`push`
//! call sites, router-link targets, and hash links, then classifies routes
//! for auth requirements and sensitive keywords.

use crate::filters;
use crate::types::{Detection, DetectionType, RouteRecord, RouteSource};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::trace;

/// Route path keywords that flag a route as sensitive.
pub const SENSITIVE_ROUTE_KEYWORDS: &[&str] = &[
    "admin", "manage", "dashboard", "system", "config", "setting", "user", "account",
    "profile", "password", "secret", "api", "upload", "file", "download", "export",
    "import", "backup", "log", "audit", "monitor", "debug", "test", "dev", "internal",
];

/// Meta keys that gate access when truthy.
static AUTH_META_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)auth|requireauth|requiresauth|authenticated|login|permission|role").unwrap()
});

static PATH_PROP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bpath\s*:\s*["']([^"']+)["']"#).unwrap());

static PATH_WITH_META_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{\s*path\s*:\s*["']([^"']+)["'][^{}]*?\bmeta\s*:\s*\{([^{}]*)\}"#).unwrap()
});

static NAME_NEAR_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bpath\s*:\s*["']([^"']+)["']\s*,\s*name\s*:\s*["']([^"']+)["']"#).unwrap()
});

static ROUTER_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\$?router\.(?:addRoute|push|replace)\s*\(\s*["']([^"']+)["']"#).unwrap()
});

static ROUTER_CALL_OBJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\$?router\.(?:addRoute|push|replace)\s*\(\s*\{\s*path\s*:\s*["']([^"']+)["']"#)
        .unwrap()
});

static ROUTER_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"router-link[^>]*\s(?::to|to)\s*=\s*["']([^"'{][^"']*)["']"#).unwrap()
});

static HASH_HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r##"href\s*=\s*["']#(/[^"']*)["']"##).unwrap());

static META_FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([\w$]+)\s*:\s*(true|false|1|0|"[^"]*"|'[^']*'|\[[^\]]*\]|\{[^}]*\})"#).unwrap()
});

/// Trailing resource segments removed when computing the application base.
static RESOURCE_TAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^/]+\.(?:js|html|css|json|vue)$").unwrap());

const ASSET_DIRECTORIES: &[&str] = &["assets", "dist", "js", "css", "static", "build", "public"];

/// Static-branch Vue route analyzer.
#[derive(Debug, Clone, Default)]
pub struct VueStaticAnalyzer;

impl VueStaticAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Extract route records from JS (or inline template) source text.
    pub fn extract_routes(&self, source: &str, source_url: &str) -> Vec<RouteRecord> {
        let mut paths: BTreeMap<String, RouteRecord> = BTreeMap::new();

        // Routes declared with explicit meta blocks come first so their auth
        // classification wins.
        for caps in PATH_WITH_META_RE.captures_iter(source) {
            let (Some(path), Some(meta_body)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let Some(normalized) = normalize_route_path(path.as_str()) else {
                continue;
            };
            let meta = parse_meta_body(meta_body.as_str());
            let meta_auth = meta_grants_auth(&meta);
            let record = self.build_record(&normalized, Some(meta), meta_auth, source_url);
            paths.insert(normalized, record);
        }

        let simple_sources: [&Regex; 5] = [
            &PATH_PROP_RE,
            &ROUTER_CALL_RE,
            &ROUTER_CALL_OBJECT_RE,
            &ROUTER_LINK_RE,
            &HASH_HREF_RE,
        ];
        for regex in simple_sources {
            for caps in regex.captures_iter(source) {
                let Some(path) = caps.get(1) else { continue };
                let Some(normalized) = normalize_route_path(path.as_str()) else {
                    continue;
                };
                paths
                    .entry(normalized.clone())
                    .or_insert_with(|| {
                        self.build_record(&normalized, None, false, source_url)
                    });
            }
        }

        // Attach names where a `path, name` pair is visible.
        for caps in NAME_NEAR_PATH_RE.captures_iter(source) {
            if let (Some(path), Some(name)) = (caps.get(1), caps.get(2)) {
                if let Some(normalized) = normalize_route_path(path.as_str()) {
                    if let Some(record) = paths.get_mut(&normalized) {
                        record.name = Some(name.as_str().to_string());
                    }
                }
            }
        }

        trace!("static vue extraction found {} routes in {}", paths.len(), source_url);
        paths.into_values().collect()
    }

    fn build_record(
        &self,
        path: &str,
        meta: Option<serde_json::Value>,
        meta_auth: bool,
        source_url: &str,
    ) -> RouteRecord {
        let matched_keyword = sensitive_route_keyword(path, None);
        RouteRecord {
            path: path.to_string(),
            full_path: Some(compose_full_url(source_url, path)),
            name: None,
            meta: meta.unwrap_or(serde_json::Value::Null),
            has_auth: meta_auth || matched_keyword.is_some(),
            source: RouteSource::Static,
            matched_keyword,
        }
    }

    /// Detection records for the vueRoutes category.
    pub fn routes_to_detections(&self, routes: &[RouteRecord], source_url: &str) -> Vec<Detection> {
        routes
            .iter()
            .map(|route| {
                let mut det = Detection::regex(
                    DetectionType::VueRoute,
                    route.path.clone(),
                    source_url,
                );
                det.confidence = 0.7;
                det = det.with_context("hasAuth", route.has_auth);
                det = det.with_context("source", "static");
                if let Some(full) = &route.full_path {
                    det = det.with_context("fullUrl", full.as_str());
                }
                if let Some(name) = &route.name {
                    det = det.with_context("name", name.as_str());
                }
                if let Some(keyword) = &route.matched_keyword {
                    det = det.with_context("matchedKeyword", keyword.as_str());
                }
                if !route.meta.is_null() {
                    det = det.with_context("meta", route.meta.clone());
                }
                det
            })
            .collect()
    }
}

/// Reject template expressions, full URLs, and static files; normalize to a
/// leading slash.
pub fn normalize_route_path(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.contains("${")
        || trimmed.starts_with("http://")
        || trimmed.starts_with("https://")
        || trimmed.starts_with("//")
        || trimmed.starts_with("mailto:")
        || trimmed.starts_with("javascript:")
    {
        return None;
    }
    if filters::is_static_file(trimmed) {
        return None;
    }

    let normalized = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    };
    if normalized.len() < 2 {
        return None;
    }
    Some(normalized)
}

/// First sensitive keyword hit in the path or name.
pub fn sensitive_route_keyword(path: &str, name: Option<&str>) -> Option<String> {
    let haystack = match name {
        Some(name) => format!("{} {}", path, name).to_ascii_lowercase(),
        None => path.to_ascii_lowercase(),
    };
    SENSITIVE_ROUTE_KEYWORDS
        .iter()
        .find(|kw| haystack.contains(*kw))
        .map(|kw| kw.to_string())
}

/// A meta value grants auth when it is `true`, `"true"`, `1`, a non-empty
/// array, or a non-empty object.
pub fn is_auth_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => s == "true",
        serde_json::Value::Number(n) => n.as_i64() == Some(1),
        serde_json::Value::Array(items) => !items.is_empty(),
        serde_json::Value::Object(map) => !map.is_empty(),
        serde_json::Value::Null => false,
    }
}

/// Whether any auth-named meta key carries an auth-truthy value.
pub fn meta_grants_auth(meta: &serde_json::Value) -> bool {
    let serde_json::Value::Object(map) = meta else {
        return false;
    };
    map.iter()
        .any(|(key, value)| AUTH_META_KEY_RE.is_match(key) && is_auth_truthy(value))
}

/// Parse a `key: value` meta body into a JSON object, best effort.
fn parse_meta_body(body: &str) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for caps in META_FIELD_RE.captures_iter(body) {
        let (Some(key), Some(raw)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let value = match raw.as_str() {
            "true" => serde_json::Value::Bool(true),
            "false" => serde_json::Value::Bool(false),
            "1" => serde_json::Value::from(1),
            "0" => serde_json::Value::from(0),
            other if other.starts_with('[') => {
                let empty = other.trim_start_matches('[').trim_end_matches(']').trim().is_empty();
                if empty {
                    serde_json::Value::Array(Vec::new())
                } else {
                    serde_json::Value::Array(vec![serde_json::Value::String(
                        other.trim_matches(['[', ']']).to_string(),
                    )])
                }
            }
            other if other.starts_with('{') => {
                let empty = other.trim_start_matches('{').trim_end_matches('}').trim().is_empty();
                if empty {
                    serde_json::Value::Object(serde_json::Map::new())
                } else {
                    let mut inner = serde_json::Map::new();
                    inner.insert(
                        "raw".to_string(),
                        serde_json::Value::String(other.to_string()),
                    );
                    serde_json::Value::Object(inner)
                }
            }
            other => serde_json::Value::String(other.trim_matches(['"', '\'']).to_string()),
        };
        map.insert(key.as_str().to_string(), value);
    }
    serde_json::Value::Object(map)
}

/// Compose a best-effort full URL for a route: strip trailing resource
/// segments and known asset directories from the source URL, then default to
/// hash-router composition.
pub fn compose_full_url(source_url: &str, route_path: &str) -> String {
    let Ok(parsed) = url::Url::parse(source_url) else {
        return route_path.to_string();
    };
    let origin = format!(
        "{}://{}{}",
        parsed.scheme(),
        parsed.host_str().unwrap_or(""),
        parsed
            .port()
            .map(|p| format!(":{}", p))
            .unwrap_or_default()
    );

    let mut base = parsed.path().to_string();
    base = RESOURCE_TAIL_RE.replace(&base, "").to_string();

    loop {
        let trimmed = base.trim_end_matches('/');
        let Some(last) = trimmed.rsplit('/').next() else {
            break;
        };
        if ASSET_DIRECTORIES.contains(&last) {
            base = trimmed[..trimmed.len() - last.len()].to_string();
        } else {
            break;
        }
    }
    if !base.ends_with('/') {
        base.push('/');
    }

    format!("{}{}#{}", origin, base, route_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_routes_flagged(){
        let analyzer = VueStaticAnalyzer::new();
        let js = r#"const routes = [{path:"/admin"},{path:"/user/profile"}];"#;
        let routes = analyzer.extract_routes(js, "https://app.example.com/static/js/app.js");

        assert_eq!(routes.len(), 2);
        let admin = routes.iter().find(|r| r.path == "/admin").unwrap();
        assert!(admin.has_auth);
        assert_eq!(admin.matched_keyword.as_deref(), Some("admin"));

        let profile = routes.iter().find(|r| r.path == "/user/profile").unwrap();
        assert!(profile.has_auth);
        assert_eq!(profile.matched_keyword.as_deref(), Some("user"));
    }

    #[test]
    fn test_meta_auth_classification() {
        let analyzer = VueStaticAnalyzer::new();
        let js = r#"
            const routes = [
                { path: "/orders", meta: { requiresAuth: true } },
                { path: "/open", meta: { requiresAuth: false } },
            ];
        "#;
        let routes = analyzer.extract_routes(js, "https://a.example.com/app.js");

        let orders = routes.iter().find(|r| r.path == "/orders").unwrap();
        assert!(orders.has_auth);

        let open = routes.iter().find(|r| r.path == "/open").unwrap();
        assert!(!open.has_auth);
    }

    #[test]
    fn test_template_and_url_paths_rejected() {
        assert!(normalize_route_path("${dynamic}/x").is_none());
        assert!(normalize_route_path("https://example.com/admin").is_none());
        assert!(normalize_route_path("/app/main.js").is_none());
        assert_eq!(normalize_route_path("orders"), Some("/orders".to_string()));
    }

    #[test]
    fn test_router_calls_and_links() {
        let analyzer = VueStaticAnalyzer::new();
        let js = r##"
            router.push("/checkout");
            router.addRoute({ path: "/late/added" });
            const tpl = '<router-link to="/about">x</router-link><a href="#/hash/route">y</a>';
        "##;
        let routes = analyzer.extract_routes(js, "https://a.example.com/app.js");
        let paths: Vec<&str> = routes.iter().map(|r| r.path.as_str()).collect();

        assert!(paths.contains(&"/checkout"));
        assert!(paths.contains(&"/late/added"));
        assert!(paths.contains(&"/about"));
        assert!(paths.contains(&"/hash/route"));
    }

    #[test]
    fn test_auth_truthiness() {
        assert!(is_auth_truthy(&serde_json::json!(true)));
        assert!(is_auth_truthy(&serde_json::json!("true")));
        assert!(is_auth_truthy(&serde_json::json!(1)));
        assert!(is_auth_truthy(&serde_json::json!(["admin"])));
        assert!(is_auth_truthy(&serde_json::json!({"role": "admin"})));
        assert!(!is_auth_truthy(&serde_json::json!(false)));
        assert!(!is_auth_truthy(&serde_json::json!(0)));
        assert!(!is_auth_truthy(&serde_json::json!([])));
        assert!(!is_auth_truthy(&serde_json::json!({})));
    }

    #[test]
    fn test_full_url_composition_strips_asset_dirs() {
        let full = compose_full_url("https://app.example.com/static/js/app.1a2b.js", "/admin");
        assert_eq!(full, "https://app.example.com/#/admin");

        let nested = compose_full_url("https://app.example.com/portal/assets/main.js", "/x");
        assert_eq!(nested, "https://app.example.com/portal/#/x");
    }
}

//! API endpoint detection from call sites, literals, and templates.

use crate::ast::{AstVisitor, CallArg, NodeData, NodeEvent, NodeKind, VisitContext};
use crate::filters;
use crate::types::{Detection, DetectionType};
use regex::Regex;
use std::sync::LazyLock;

static VERSION_SEGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/v\d+(?:/|$)").unwrap());

static ROUTE_DEFINITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:app|router|route|server|api)\.(get|post|put|delete|patch|head|options|all|use)$")
        .unwrap()
});

const HTTP_METHODS: &[&str] = &["get", "post", "put", "delete", "patch", "head", "options"];

/// Static path markers that classify a string as API-like.
const API_MARKERS: &[&str] = &["/api/", "/rest/", "/graphql", "/gateway/", "/service/"];

pub struct ApiEndpointVisitor;

impl ApiEndpointVisitor {
    pub fn new() -> Self {
        Self
    }

    fn endpoint(
        &self,
        value: &str,
        method: &str,
        http_method: Option<String>,
        event: &NodeEvent,
        ctx: &VisitContext<'_>,
    ) -> Option<Detection> {
        let trimmed = value.trim();
        if trimmed.len() < 2 || filters::is_static_file(trimmed) || filters::is_garbage_path(trimmed)
        {
            return None;
        }

        let confidence = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            0.9
        } else {
            0.7
        };

        let mut det = Detection::ast(
            DetectionType::ApiEndpoint,
            trimmed,
            confidence,
            event.location,
            ctx.source_url,
        )
        .with_context("method", method)
        .with_context("snippet", event.snippet.as_str());

        if let Some(http_method) = http_method {
            det = det.with_context("httpMethod", http_method);
        }

        Some(det)
    }

    fn from_call(
        &self,
        callee: &str,
        args: &[CallArg],
        event: &NodeEvent,
        ctx: &VisitContext<'_>,
    ) -> Option<Detection> {
        // fetch(url, { method: "GET" })
        if callee == "fetch" || callee.ends_with(".fetch") {
            let url = args.first()?.string_value.clone()?;
            let http_method = args
                .get(1)
                .and_then(|cfg| {
                    cfg.object_props
                        .iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case("method"))
                        .and_then(|(_, v)| v.clone())
                })
                .map(|m| m.to_ascii_uppercase());
            return self.endpoint(&url, "fetch", http_method, event, ctx);
        }

        // axios(config | url), axios.get(url), axios.post(url, body)...
        if callee == "axios" {
            if let Some(url) = args.first().and_then(|a| a.string_value.clone()) {
                return self.endpoint(&url, "axios", None, event, ctx);
            }
            let url = args.first().and_then(|a| {
                a.object_props
                    .iter()
                    .find(|(k, _)| k == "url")
                    .and_then(|(_, v)| v.clone())
            })?;
            return self.endpoint(&url, "axios", None, event, ctx);
        }
        if let Some(method) = callee.strip_prefix("axios.") {
            if HTTP_METHODS.contains(&method) || method == "request" {
                let url = args.first()?.string_value.clone()?;
                let http_method = (method != "request").then(|| method.to_ascii_uppercase());
                return self.endpoint(&url, "axios", http_method, event, ctx);
            }
        }

        // xhr.open("GET", url)
        if callee.ends_with(".open") {
            let method = args.first()?.string_value.clone()?;
            if HTTP_METHODS.contains(&method.to_ascii_lowercase().as_str()) {
                let url = args.get(1)?.string_value.clone()?;
                return self.endpoint(
                    &url,
                    "xhr",
                    Some(method.to_ascii_uppercase()),
                    event,
                    ctx,
                );
            }
            return None;
        }

        // app.get("/path", handler) route definitions.
        if let Some(caps) = ROUTE_DEFINITION_RE.captures(callee) {
            let url = args.first()?.string_value.clone()?;
            if url.starts_with('/') {
                let verb = caps.get(1).map(|m| m.as_str().to_ascii_uppercase());
                return self.endpoint(&url, "route", verb, event, ctx);
            }
        }

        None
    }
}

impl Default for ApiEndpointVisitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a path string reads as an API endpoint: a known marker, a version
/// segment, or an absolute path at least two segments deep.
pub fn is_api_like(path: &str) -> bool {
    let lowered = path.to_ascii_lowercase();
    if API_MARKERS.iter().any(|m| lowered.contains(m)) {
        return true;
    }
    if VERSION_SEGMENT_RE.is_match(&lowered) {
        return true;
    }

    let without_scheme = lowered
        .split("://")
        .nth(1)
        .and_then(|rest| rest.find('/').map(|i| &rest[i..]))
        .unwrap_or(&lowered);

    without_scheme.starts_with('/')
        && without_scheme
            .trim_end_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .count()
            >= 2
}

impl AstVisitor for ApiEndpointVisitor {
    fn name(&self) -> &'static str {
        "api_endpoint"
    }

    fn node_kinds(&self) -> &'static [NodeKind] {
        &[
            NodeKind::CallExpression,
            NodeKind::Literal,
            NodeKind::TemplateLiteral,
        ]
    }

    fn visit(&self, event: &NodeEvent, ctx: &VisitContext<'_>) -> Vec<Detection> {
        let found = match &event.data {
            NodeData::Call {
                callee,
                args,
                is_new: false,
                ..
            } => self.from_call(callee, args, event, ctx),
            NodeData::StringLiteral { value } => {
                if is_api_like(value) && !value.contains(' ') {
                    self.endpoint(value, "literal", None, event, ctx)
                } else {
                    None
                }
            }
            NodeData::TemplateLiteral {
                quasis,
                expression_count,
            } => {
                let joined = if *expression_count == 0 {
                    quasis.join("")
                } else {
                    quasis.join("${}")
                };
                if is_api_like(&joined) && !joined.contains(' ') {
                    self.endpoint(&joined, "template", None, event, ctx)
                        .map(|d| d.with_context("template", *expression_count > 0))
                } else {
                    None
                }
            }
            _ => None,
        };

        found.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AstExtractor, ExtractOptions};

    fn extract(code: &str) -> Vec<Detection> {
        let extractor = AstExtractor::with_default_visitors();
        let outcome = extractor.extract(code, "https://a/app.js", &ExtractOptions::default());
        outcome
            .detections
            .into_iter()
            .filter(|d| d.detection_type == DetectionType::ApiEndpoint)
            .collect()
    }

    #[test]
    fn test_fetch_with_method() {
        let found = extract(r#"fetch("/api/v1/users", {method:"GET"});"#);
        let det = found
            .iter()
            .find(|d| d.context.get("method") == Some(&"fetch".into()))
            .expect("fetch detection");
        assert_eq!(det.value, "/api/v1/users");
        assert_eq!(det.context.get("httpMethod"), Some(&"GET".into()));
        assert!((det.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_axios_method_calls() {
        let found = extract(r#"axios.post("https://api.example.com/v2/orders", body);"#);
        let det = &found[0];
        assert_eq!(det.value, "https://api.example.com/v2/orders");
        assert_eq!(det.context.get("httpMethod"), Some(&"POST".into()));
        assert!((det.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_xhr_open() {
        let found = extract(r#"xhr.open("POST", "/api/upload", true);"#);
        assert!(found
            .iter()
            .any(|d| d.value == "/api/upload"
                && d.context.get("httpMethod") == Some(&"POST".into())));
    }

    #[test]
    fn test_route_definition() {
        let found = extract(r#"router.get("/admin/users", handler);"#);
        assert!(found.iter().any(|d| d.value == "/admin/users"));
    }

    #[test]
    fn test_template_literal_with_marker() {
        let found = extract("const u = `/api/users/${id}/posts`;");
        assert!(found
            .iter()
            .any(|d| d.context.get("template") == Some(&true.into())));
    }

    #[test]
    fn test_plain_literal_requires_api_shape() {
        let found = extract(r#"const s = "hello world"; const p = "/onesegment";"#);
        assert!(found.is_empty());
    }

    #[test]
    fn test_is_api_like() {
        assert!(is_api_like("/api/v1/users"));
        assert!(is_api_like("/rest/items"));
        assert!(is_api_like("/v2/accounts"));
        assert!(is_api_like("/deep/path"));
        assert!(!is_api_like("/single"));
        assert!(!is_api_like("relative/path"));
    }
}

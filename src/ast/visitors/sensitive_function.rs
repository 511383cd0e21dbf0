//! Detection of security-relevant API usage.

use crate::ast::{AstVisitor, NodeData, NodeEvent, NodeKind, VisitContext};
use crate::types::{Detection, DetectionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    fn confidence(self) -> f64 {
        match self {
            Self::High => 0.9,
            Self::Medium => 0.7,
            Self::Low => 0.5,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Call-site APIs, matched exactly or as a `.name` suffix.
const CALL_APIS: &[(&str, Severity)] = &[
    ("eval", Severity::High),
    ("Function", Severity::High),
    ("execScript", Severity::High),
    ("importScripts", Severity::High),
    ("document.write", Severity::High),
    ("document.writeln", Severity::High),
    ("insertAdjacentHTML", Severity::Medium),
    ("execCommand", Severity::Medium),
    ("localStorage.setItem", Severity::Medium),
    ("sessionStorage.setItem", Severity::Medium),
    ("postMessage", Severity::Low),
    ("atob", Severity::Low),
    ("btoa", Severity::Low),
    ("navigator.sendBeacon", Severity::Low),
];

/// Constructor APIs, matched on `new <name>(...)`.
const CONSTRUCTOR_APIS: &[(&str, Severity)] = &[
    ("XMLHttpRequest", Severity::Medium),
    ("WebSocket", Severity::Medium),
    ("EventSource", Severity::Medium),
    ("Worker", Severity::Low),
    ("SharedWorker", Severity::Low),
    ("Function", Severity::High),
];

/// Member accesses, with assignment-site restriction where noted.
const MEMBER_APIS: &[(&str, Severity, bool)] = &[
    ("document.cookie", Severity::High, false),
    ("document.domain", Severity::Medium, false),
    ("innerHTML", Severity::High, true),
    ("outerHTML", Severity::High, true),
];

/// Member-path prefixes flagged as crypto usage.
const CRYPTO_PREFIXES: &[&str] = &["crypto.subtle.", "CryptoJS."];

pub struct SensitiveFunctionVisitor;

impl SensitiveFunctionVisitor {
    pub fn new() -> Self {
        Self
    }

    fn detection(
        &self,
        api: &str,
        severity: Severity,
        kind: &str,
        event: &NodeEvent,
        ctx: &VisitContext<'_>,
    ) -> Detection {
        Detection::ast(
            DetectionType::SensitiveFunction,
            api,
            severity.confidence(),
            event.location,
            ctx.source_url,
        )
        .with_context("severity", severity.as_str())
        .with_context("kind", kind)
        .with_context("snippet", event.snippet.as_str())
    }
}

impl Default for SensitiveFunctionVisitor {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_api(callee: &str, api: &str) -> bool {
    callee == api || callee.ends_with(&format!(".{}", api))
}

impl AstVisitor for SensitiveFunctionVisitor {
    fn name(&self) -> &'static str {
        "sensitive_function"
    }

    fn node_kinds(&self) -> &'static [NodeKind] {
        &[NodeKind::CallExpression, NodeKind::MemberExpression]
    }

    fn visit(&self, event: &NodeEvent, ctx: &VisitContext<'_>) -> Vec<Detection> {
        let mut found = Vec::new();

        match &event.data {
            NodeData::Call { callee, is_new, .. } => {
                if *is_new {
                    for (api, severity) in CONSTRUCTOR_APIS {
                        if matches_api(callee, api) {
                            found.push(self.detection(api, *severity, "constructor", event, ctx));
                            break;
                        }
                    }
                } else {
                    for (api, severity) in CALL_APIS {
                        if matches_api(callee, api) {
                            found.push(self.detection(api, *severity, "call", event, ctx));
                            break;
                        }
                    }

                    if CRYPTO_PREFIXES.iter().any(|p| callee.starts_with(p)) {
                        found.push(
                            self.detection(callee, Severity::Medium, "call", event, ctx)
                                .with_context("category", "crypto"),
                        );
                    }
                }
            }
            NodeData::Member { path, assigned } => {
                for (api, severity, assignment_only) in MEMBER_APIS {
                    let hit = if api.contains('.') {
                        matches_api(path, api) || path == api
                    } else {
                        path.ends_with(&format!(".{}", api))
                    };
                    if hit && (!assignment_only || *assigned) {
                        found.push(self.detection(api, *severity, "member", event, ctx));
                        break;
                    }
                }
            }
            _ => {}
        }

        found
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
            .filter(|d| d.detection_type == DetectionType::SensitiveFunction)
            .collect()
    }

    #[test]
    fn test_eval_is_high_severity() {
        let found = extract(r#"eval("code");"#);
        assert_eq!(found[0].value, "eval");
        assert!((found[0].confidence - 0.9).abs() < 1e-9);
        assert_eq!(found[0].context.get("severity"), Some(&"high".into()));
    }

    #[test]
    fn test_inner_html_only_flagged_at_assignment() {
        let read_only = extract("const html = el.innerHTML;");
        assert!(read_only.is_empty());

        let written = extract(r#"el.innerHTML = payload;"#);
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].value, "innerHTML");
    }

    #[test]
    fn test_document_cookie_access() {
        let found = extract("const c = document.cookie;");
        assert!(found.iter().any(|d| d.value == "document.cookie"));
    }

    #[test]
    fn test_constructors() {
        let found = extract("const ws = new WebSocket(url); const x = new XMLHttpRequest();");
        assert!(found.iter().any(|d| d.value == "WebSocket"));
        assert!(found.iter().any(|d| d.value == "XMLHttpRequest"));
    }

    #[test]
    fn test_storage_and_crypto() {
        let found = extract(
            r#"localStorage.setItem("k", v); crypto.subtle.digest("SHA-256", data);"#,
        );
        assert!(found.iter().any(|d| d.value == "localStorage.setItem"));
        assert!(found
            .iter()
            .any(|d| d.context.get("category") == Some(&"crypto".into())));
    }

    #[test]
    fn test_suffix_matching_through_window() {
        let found = extract(r#"window.eval("x");"#);
        assert!(found.iter().any(|d| d.value == "eval"));
    }
}

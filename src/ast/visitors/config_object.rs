//! Sensitive configuration keys inside object literals.

use crate::ast::{AstVisitor, NodeData, NodeEvent, NodeKind, VisitContext};
use crate::types::{Detection, DetectionType};
use regex::Regex;
use std::sync::LazyLock;

/// Keys that expose configuration secrets or infrastructure details.
const SENSITIVE_KEYS: &[&str] = &[
    "apikey", "api_key", "apisecret", "api_secret", "secret", "secretkey", "secret_key",
    "password", "passwd", "token", "accesstoken", "access_token", "refreshtoken",
    "refresh_token", "auth", "authorization", "credential", "privatekey", "private_key",
    "publickey", "public_key", "database", "db_password", "connectionstring",
    "connection_string", "dsn", "aws", "awskey", "aws_secret", "s3bucket", "smtp", "redis",
    "mongo", "mysql", "postgres", "appid", "app_id", "appsecret", "app_secret", "clientid",
    "client_id", "clientsecret", "client_secret", "endpoint", "baseurl", "base_url",
    "webhook",
];

/// Keys that on their own carry a secret value.
const STRONG_KEYS: &[&str] = &["secret", "password", "token", "key", "credential"];

static CONFIG_CONTAINER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:config|settings|options|env|conf|cfg|constants|defaults)\b").unwrap()
});

pub struct ConfigObjectVisitor;

impl ConfigObjectVisitor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConfigObjectVisitor {
    fn default() -> Self {
        Self::new()
    }
}

impl AstVisitor for ConfigObjectVisitor {
    fn name(&self) -> &'static str {
        "config_object"
    }

    fn node_kinds(&self) -> &'static [NodeKind] {
        &[
            NodeKind::ObjectExpression,
            NodeKind::AssignmentExpression,
            NodeKind::ExportDefaultDeclaration,
        ]
    }

    fn visit(&self, event: &NodeEvent, ctx: &VisitContext<'_>) -> Vec<Detection> {
        let NodeData::ObjectExpr {
            properties,
            container,
        } = &event.data
        else {
            return Vec::new();
        };

        let exported = container.as_deref() == Some("export default")
            || container.as_deref() == Some("module.exports")
            || ctx
                .ancestors
                .iter()
                .any(|a| a.kind == NodeKind::ExportDefaultDeclaration);
        let config_named = container
            .as_deref()
            .map(|name| CONFIG_CONTAINER_RE.is_match(name))
            .unwrap_or(false);

        let mut found = Vec::new();

        for property in properties {
            let Some(value) = &property.value else {
                continue;
            };
            if value.value.len() < 3 || value.value.len() > 512 {
                continue;
            }

            let key_lower = property.key.to_ascii_lowercase();
            if !SENSITIVE_KEYS.iter().any(|k| key_lower.contains(k)) {
                continue;
            }

            let mut confidence: f64 = 0.7;
            if STRONG_KEYS.iter().any(|k| key_lower.contains(k)) {
                confidence += 0.05;
            }
            if config_named {
                confidence += 0.1;
            }
            if exported {
                confidence += 0.1;
            }
            confidence = confidence.min(0.95);

            let mut det = Detection::ast(
                DetectionType::ConfigObject,
                value.value.as_str(),
                confidence,
                property.location,
                ctx.source_url,
            )
            .with_context("key", property.key.as_str())
            .with_context("snippet", event.snippet.as_str());

            if let Some(container) = container {
                det = det.with_context("object", container.as_str());
            }
            if !value.literal {
                det = det.with_context("envFallback", true);
            }

            found.push(det);
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
            .filter(|d| d.detection_type == DetectionType::ConfigObject)
            .collect()
    }

    #[test]
    fn test_config_object_keys_detected() {
        let found = extract(
            r#"
            const config = {
                apiKey: "abcd1234efgh",
                endpoint: "https://internal.example.com",
                retries: 3,
            };
            "#,
        );
        assert_eq!(found.len(), 2);
        let api_key = found.iter().find(|d| d.context["key"] == "apiKey").unwrap();
        // Config-named container earns the boost.
        assert!(api_key.confidence > 0.8);
    }

    #[test]
    fn test_module_exports_boost() {
        let found = extract(r#"module.exports = { dbPassword: "hunter22" };"#);
        assert_eq!(found.len(), 1);
        assert!(found[0].confidence > 0.8);
        assert_eq!(found[0].context.get("object"), Some(&"module.exports".into()));
    }

    #[test]
    fn test_export_default_boost() {
        let found = extract(r#"export default { clientSecret: "s3cr3tv4lue" };"#);
        assert_eq!(found.len(), 1);
        assert!(found[0].confidence > 0.8);
    }

    #[test]
    fn test_env_fallback_resolution() {
        let found = extract(r#"const cfg = { token: process.env.TOKEN || "fallback-token" };"#);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, "fallback-token");
        assert_eq!(found[0].context.get("envFallback"), Some(&true.into()));
    }

    #[test]
    fn test_plain_object_without_sensitive_keys() {
        let found = extract(r#"const point = { x: "1", y: "2" };"#);
        assert!(found.is_empty());
    }
}

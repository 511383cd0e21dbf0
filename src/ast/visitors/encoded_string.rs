//! Encoded and obfuscated string detection: base64/hex literals,
//! concatenation and join reconstruction, and `atob`/`fromCharCode` calls.

use crate::ast::{AstVisitor, NodeData, NodeEvent, NodeKind, VisitContext};
use crate::types::{Detection, DetectionType};
use base64::{engine::general_purpose::STANDARD, Engine};
use regex::Regex;
use std::sync::LazyLock;

/// Keywords a decoded value must contain to be worth reporting.
const SENSITIVE_KEYWORDS: &[&str] = &[
    "password", "passwd", "pwd", "secret", "token", "apikey", "api_key", "credential",
    "auth", "private", "access",
];

static HEX_LITERAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:0x)?[a-fA-F0-9]{16,}$").unwrap());

pub struct EncodedStringVisitor;

impl EncodedStringVisitor {
    pub fn new() -> Self {
        Self
    }

    fn report(
        &self,
        original: &str,
        decoded: &str,
        encoding: &str,
        confidence: f64,
        event: &NodeEvent,
        ctx: &VisitContext<'_>,
    ) -> Option<Detection> {
        let lowered = decoded.to_ascii_lowercase();
        if !SENSITIVE_KEYWORDS.iter().any(|k| lowered.contains(k)) {
            return None;
        }

        Some(
            Detection::ast(
                DetectionType::EncodedString,
                original,
                confidence,
                event.location,
                ctx.source_url,
            )
            .with_context("encoding", encoding)
            .with_context("decoded", decoded)
            .with_context("snippet", event.snippet.as_str()),
        )
    }
}

impl Default for EncodedStringVisitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a base64 candidate: length and charset gated, printable output
/// required.
pub fn decode_base64(candidate: &str) -> Option<String> {
    if candidate.len() < 16 || candidate.len() % 4 != 0 {
        return None;
    }
    if !candidate
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=')
    {
        return None;
    }

    let bytes = STANDARD.decode(candidate).ok()?;
    let decoded = String::from_utf8(bytes).ok()?;
    is_printable(&decoded).then_some(decoded)
}

/// Decode a hex candidate (`0x`-prefixed or bare, 16+ digits).
pub fn decode_hex(candidate: &str) -> Option<String> {
    if !HEX_LITERAL_RE.is_match(candidate) {
        return None;
    }
    let digits = candidate.trim_start_matches("0x").trim_start_matches("0X");
    if digits.len() % 2 != 0 {
        return None;
    }

    let bytes = hex::decode(digits).ok()?;
    let decoded = String::from_utf8(bytes).ok()?;
    is_printable(&decoded).then_some(decoded)
}

fn is_printable(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| !c.is_control() || c == '\n' || c == '\t' || c == '\r')
}

fn chars_from_codes(codes: &[f64]) -> Option<String> {
    if codes.is_empty() {
        return None;
    }
    codes
        .iter()
        .map(|c| {
            if c.fract() == 0.0 && *c >= 0.0 {
                char::from_u32(*c as u32)
            } else {
                None
            }
        })
        .collect()
}

impl AstVisitor for EncodedStringVisitor {
    fn name(&self) -> &'static str {
        "encoded_string"
    }

    fn node_kinds(&self) -> &'static [NodeKind] {
        &[
            NodeKind::Literal,
            NodeKind::BinaryExpression,
            NodeKind::CallExpression,
        ]
    }

    fn visit(&self, event: &NodeEvent, ctx: &VisitContext<'_>) -> Vec<Detection> {
        let mut found = Vec::new();

        match &event.data {
            NodeData::StringLiteral { value } => {
                if let Some(decoded) = decode_base64(value) {
                    found.extend(self.report(value, &decoded, "base64", 0.85, event, ctx));
                } else if let Some(decoded) = decode_hex(value) {
                    found.extend(self.report(value, &decoded, "hex", 0.85, event, ctx));
                }
            }
            NodeData::Binary {
                reconstructed: Some(joined),
            } => {
                // A concatenation may itself assemble an encoded payload.
                if let Some(decoded) = decode_base64(joined) {
                    found.extend(self.report(joined, &decoded, "base64", 0.85, event, ctx));
                } else {
                    found.extend(self.report(joined, joined, "concat", 0.7, event, ctx));
                }
            }
            NodeData::Call {
                callee,
                args,
                join_parts,
                is_new: false,
            } => {
                if callee == "atob" || callee.ends_with(".atob") {
                    if let Some(encoded) = args.first().and_then(|a| a.string_value.clone()) {
                        if let Some(decoded) = decode_base64(&encoded) {
                            found.extend(self.report(&encoded, &decoded, "base64", 0.85, event, ctx));
                        }
                    }
                } else if callee.ends_with("fromCharCode") {
                    let codes: Vec<f64> = args.iter().filter_map(|a| a.number_value).collect();
                    if codes.len() == args.len() {
                        if let Some(decoded) = chars_from_codes(&codes) {
                            found.extend(self.report(
                                &decoded,
                                &decoded,
                                "fromCharCode",
                                0.85,
                                event,
                                ctx,
                            ));
                        }
                    }
                } else if let Some((parts, separator)) = join_parts {
                    let joined = parts.join(separator);
                    found.extend(self.report(&joined, &joined, "join", 0.7, event, ctx));
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
            .filter(|d| d.detection_type == DetectionType::EncodedString)
            .collect()
    }

    #[test]
    fn test_base64_literal_with_sensitive_payload() {
        // "password=hunter2" base64-encoded.
        let encoded = STANDARD.encode("password=hunter2");
        let code = format!(r#"const blob = "{}";"#, encoded);
        let found = extract(&code);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].context["decoded"], "password=hunter2");
        assert!((found[0].confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_base64_without_keyword_is_ignored() {
        let encoded = STANDARD.encode("just some plain text!");
        let found = extract(&format!(r#"const b = "{}";"#, encoded));
        assert!(found.is_empty());
    }

    #[test]
    fn test_concat_reconstruction() {
        let found = extract(r#"const k = "secret_" + "tok" + "en_value";"#);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, "secret_token_value");
        assert_eq!(found[0].context["encoding"], "concat");
    }

    #[test]
    fn test_atob_call() {
        let encoded = STANDARD.encode("auth_token=abc12345");
        let found = extract(&format!(r#"const v = atob("{}");"#, encoded));
        assert!(found
            .iter()
            .any(|d| d.context["decoded"] == "auth_token=abc12345"));
    }

    #[test]
    fn test_from_char_code() {
        // "password" as char codes.
        let found = extract("const s = String.fromCharCode(112,97,115,115,119,111,114,100);");
        assert!(found.iter().any(|d| d.value == "password"));
    }

    #[test]
    fn test_array_join() {
        let found = extract(r#"const s = ["sec","ret","_key"].join("");"#);
        assert!(found.iter().any(|d| d.value == "secret_key"));
    }

    #[test]
    fn test_decode_helpers() {
        assert_eq!(
            decode_base64("cGFzc3dvcmQ9aHVudGVyMg=="),
            Some("password=hunter2".to_string())
        );
        assert_eq!(decode_base64("short"), None);
        assert_eq!(
            decode_hex("70617373776f72643d31"),
            Some("password=1".to_string())
        );
    }
}

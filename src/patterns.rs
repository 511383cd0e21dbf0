//! The live pattern set: built-in category regexes plus user-defined
//! `custom_*` entries.
//!
//! Pattern strings accept either the `/body/flags` literal syntax or a bare
//! regex source (flags default to `g`). The set has a single writer (the
//! settings loader) and many readers; updates build a fresh set that the
//! owner swaps in, so extractors never observe a partially-mutated set.

use crate::config::{validate_custom_key, Settings};
use crate::types::{DetectionType, Result, WebsiftError};
use regex::Regex;
use tracing::{debug, warn};

/// Maximum matches kept per pattern per extraction call.
pub const MATCH_CAP: usize = 5_000;

/// Hard stop on match-loop iterations per pattern.
pub const ITERATION_CAP: usize = 10_000;

/// Built-in pattern table: key, result category, detection type, source.
///
/// Sources avoid look-around; the regex engine rejects it at compile time
/// and a settings override carrying it is skipped with a warning.
const DEFAULT_PATTERNS: &[(&str, &str, &str)] = &[
    (
        "absoluteApi",
        "absoluteApis",
        r#"["'`](/[a-zA-Z0-9_][a-zA-Z0-9_\-./{}]{1,200})["'`]"#,
    ),
    (
        "relativeApi",
        "relativeApis",
        r#"["'`](\.{1,2}/[a-zA-Z0-9_\-./{}]{1,200})["'`]"#,
    ),
    (
        "jsFile",
        "jsFiles",
        r#"["'`]([^"'`\s]{1,300}\.(?:js|mjs|cjs)(?:\?[^"'`\s]*)?)["'`]"#,
    ),
    (
        "cssFile",
        "cssFiles",
        r#"["'`]([^"'`\s]{1,300}\.css(?:\?[^"'`\s]*)?)["'`]"#,
    ),
    (
        "image",
        "images",
        r#"["'`]([^"'`\s]{1,300}\.(?:png|jpe?g|gif|svg|webp|ico|bmp)(?:\?[^"'`\s]*)?)["'`]"#,
    ),
    (
        "url",
        "urls",
        r#"\b(?:https?|wss?)://[a-zA-Z0-9\-._~:/?#\[\]@!$&'()*+,;=%]+"#,
    ),
    (
        "domain",
        "domains",
        r#"\b(?:[a-zA-Z0-9](?:[a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,10}\b"#,
    ),
    (
        "email",
        "emails",
        r#"\b[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,10}\b"#,
    ),
    (
        "phone",
        "phoneNumbers",
        r#"(?:\+?0?86[\- ]?)?1[3-9]\d{9}\b|\+\d{7,15}\b"#,
    ),
    (
        "credentials",
        "credentials",
        r#"(?i)[a-z0-9_\-]*(?:password|passwd|pwd|secret|token|api[_\-]?key|access[_\-]?key|client[_\-]?secret|private[_\-]?key)["']?\s*[:=]\s*["']([^"']{4,120})["']|\b((?:sk_live_|sk_test_|pk_live_|ghp_|gho_|AKIA|AIza|xox[baprs]-)[A-Za-z0-9_\-]{8,})\b"#,
    ),
    (
        "ip",
        "ipAddresses",
        r#"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)(?::\d{1,5})?\b"#,
    ),
    (
        "paths",
        "paths",
        r#"["'`]((?:/[a-zA-Z0-9_.\-]+){2,}/?)["'`]"#,
    ),
    (
        "jwt",
        "jwts",
        r#"\beyJ[A-Za-z0-9_\-]{8,}\.[A-Za-z0-9_\-]{8,}\.[A-Za-z0-9_\-]{8,}\b"#,
    ),
    (
        "github",
        "githubUrls",
        r#"https?://(?:www\.)?github\.com/[A-Za-z0-9_.\-]+(?:/[A-Za-z0-9_.\-]+)*"#,
    ),
    ("vue", "vueFiles", r#"["']([^"']{3,200}\.vue)["']"#),
    (
        "company",
        "companies",
        r#"[\p{Han}]{2,20}(?:有限公司|股份公司|集团|公司|银行|研究院)"#,
    ),
    (
        "comments",
        "comments",
        r#"/\*[\s\S]*?\*/|//[^\r\n]*|<!--[\s\S]*?-->"#,
    ),
    ("idCard", "idCards", r#"\b\d{17}[\dXx]\b"#),
    (
        "bearerToken",
        "bearerTokens",
        r#"(?i)bearer\s+([A-Za-z0-9\-._~+/]{16,}=*)"#,
    ),
    (
        "basicAuth",
        "basicAuth",
        r#"(?i)basic\s+([A-Za-z0-9+/]{12,}={0,2})"#,
    ),
    (
        "authHeader",
        "authHeaders",
        r#"(?i)["']?authorization["']?\s*[:=]\s*["']([^"']{6,200})["']"#,
    ),
    ("wechatAppId", "wechatAppIds", r#"\bwx[a-f0-9]{16}\b"#),
    (
        "awsKey",
        "awsKeys",
        r#"\b(?:A3T[A-Z0-9]|AKIA|AGPA|AIDA|AROA|AIPA|ANPA|ANVA|ASIA)[A-Z0-9]{16}\b"#,
    ),
    (
        "googleApiKey",
        "googleApiKeys",
        r#"\bAIza[0-9A-Za-z_\-]{35}\b"#,
    ),
    (
        "githubToken",
        "githubTokens",
        r#"\b(?:ghp|gho|ghu|ghs|ghr)_[A-Za-z0-9]{36,}\b"#,
    ),
    (
        "gitlabToken",
        "gitlabTokens",
        r#"\bglpat-[A-Za-z0-9_\-]{20,}\b"#,
    ),
    (
        "webhookUrls",
        "webhookUrls",
        r#"https://(?:hooks\.slack\.com/services/[A-Za-z0-9/_\-]+|discord(?:app)?\.com/api/webhooks/\d+/[A-Za-z0-9_\-]+|oapi\.dingtalk\.com/robot/send\?access_token=[a-f0-9]+|qyapi\.weixin\.qq\.com/cgi-bin/webhook/send\?key=[A-Za-z0-9\-]+)"#,
    ),
    (
        "cryptoUsage",
        "cryptoUsage",
        r#"\b(?:CryptoJS\.[A-Za-z0-9.]+|crypto\.subtle\.[a-zA-Z]+|AES\.(?:encrypt|decrypt)|DES\.(?:encrypt|decrypt)|RSA\.(?:encrypt|decrypt)|md5\s*\(|sha(?:1|256|512)\s*\()"#,
    ),
    (
        "sensitiveKeyword",
        "sensitiveKeywords",
        r#"(?i)\b(?:confidential|do[_\- ]?not[_\- ]?share|internal[_\- ]?only|restricted|backdoor|debug[_\- ]?mode|hardcoded)\b"#,
    ),
    (
        "port",
        "ports",
        r#"(?i)\bport["']?\s*[:=]\s*["']?(\d{2,5})\b"#,
    ),
    (
        "parameter",
        "parameters",
        r#"[?&]([a-zA-Z_][a-zA-Z0-9_\-]{1,40})="#,
    ),
    (
        "cookie",
        "cookies",
        r#"(?i)["']?(?:jsessionid|phpsessid|sessionid|session[_\-]?id|csrf[_\-]?token|xsrf[_\-]?token)["']?\s*[:=]\s*["']([^"']{3,100})["']"#,
    ),
    (
        "idKey",
        "idKeys",
        r#"(?i)["']?(?:client[_\-]?id|app[_\-]?id|user[_\-]?id|account[_\-]?id|open[_\-]?id|union[_\-]?id|merchant[_\-]?id)["']?\s*[:=]\s*["']([A-Za-z0-9_\-]{3,64})["']"#,
    ),
];

/// A compiled pattern bound to its result category.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub key: String,
    /// Result category this pattern feeds (an `ExtractionResult` key).
    pub category: String,
    pub target: DetectionType,
    pub regex: Regex,
    /// Display name for user-defined entries.
    pub name: Option<String>,
    pub is_custom: bool,
}

/// Ordered mapping of pattern key to compiled regex.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    entries: Vec<CompiledPattern>,
}

impl PatternSet {
    /// All built-in pattern keys, in table order.
    pub fn builtin_keys() -> Vec<&'static str> {
        DEFAULT_PATTERNS.iter().map(|(key, _, _)| *key).collect()
    }

    /// Build a pattern set from a settings document. Built-in entries come
    /// from the table, overridden per key by `regexSettings`; custom entries
    /// follow. A pattern that fails to compile is logged and omitted; a
    /// custom key colliding with a built-in one is a validation error.
    pub fn load(settings: &Settings) -> Result<Self> {
        let mut set = PatternSet::default();

        for (key, category, default_source) in DEFAULT_PATTERNS {
            let raw = settings
                .regex_settings
                .get(*key)
                .map(String::as_str)
                .unwrap_or(default_source);

            match compile_pattern(raw) {
                Ok(regex) => set.entries.push(CompiledPattern {
                    key: (*key).to_string(),
                    category: (*category).to_string(),
                    target: category_detection_type(key),
                    regex,
                    name: None,
                    is_custom: false,
                }),
                Err(e) => {
                    warn!("pattern '{}' failed to compile, skipping: {}", key, e);
                }
            }
        }

        set.append_custom_entries(settings)?;

        debug!("loaded {} patterns", set.entries.len());
        Ok(set)
    }

    /// Re-apply settings, preserving previously loaded `custom_*` entries
    /// that the new settings do not mention.
    pub fn update(&self, settings: &Settings) -> Result<Self> {
        let mut next = Self::load(settings)?;

        for existing in self.entries.iter().filter(|p| p.is_custom) {
            if next.get(&existing.key).is_none() {
                next.entries.push(existing.clone());
            }
        }

        Ok(next)
    }

    fn append_custom_entries(&mut self, settings: &Settings) -> Result<()> {
        let builtins = Self::builtin_keys();

        for entry in settings.custom_regex_configs.entries() {
            validate_custom_key(&entry.key, &builtins)?;

            let bare = entry
                .key
                .strip_prefix("custom_")
                .unwrap_or(&entry.key)
                .to_string();
            let key = format!("custom_{}", bare);

            if self.get(&key).is_some() {
                return Err(WebsiftError::ConfigError(format!(
                    "duplicate custom pattern key '{}'",
                    key
                )));
            }

            match compile_pattern(&entry.pattern) {
                Ok(regex) => self.entries.push(CompiledPattern {
                    category: key.clone(),
                    target: DetectionType::Custom(bare),
                    key,
                    regex,
                    name: Some(entry.name.clone()),
                    is_custom: true,
                }),
                Err(e) => {
                    warn!("custom pattern '{}' failed to compile, skipping: {}", key, e);
                }
            }
        }

        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&CompiledPattern> {
        self.entries.iter().find(|p| p.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledPattern> {
        self.entries.iter()
    }

    /// Built-in generic-pass patterns: everything except the API and
    /// resource sub-pass keys, which have dedicated handling.
    pub fn generic_patterns(&self) -> impl Iterator<Item = &CompiledPattern> {
        const SPECIAL: &[&str] = &["absoluteApi", "relativeApi", "jsFile", "cssFile", "image", "url"];
        self.entries
            .iter()
            .filter(|p| !p.is_custom && !SPECIAL.contains(&p.key.as_str()))
    }

    pub fn custom_patterns(&self) -> impl Iterator<Item = &CompiledPattern> {
        self.entries.iter().filter(|p| p.is_custom)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Detection type assigned to values produced by a built-in pattern key.
fn category_detection_type(key: &str) -> DetectionType {
    match key {
        "absoluteApi" | "relativeApi" => DetectionType::ApiEndpoint,
        "jsFile" => DetectionType::JsFile,
        "cssFile" => DetectionType::CssFile,
        "image" => DetectionType::Image,
        "url" => DetectionType::Url,
        "domain" => DetectionType::Domain,
        "email" => DetectionType::Email,
        "phone" => DetectionType::Phone,
        "credentials" => DetectionType::Credential,
        "ip" => DetectionType::Ip,
        "paths" => DetectionType::Path,
        "jwt" => DetectionType::Jwt,
        "github" => DetectionType::GithubUrl,
        "vue" => DetectionType::VueFile,
        "company" => DetectionType::Company,
        "comments" => DetectionType::Comment,
        "idCard" => DetectionType::IdCard,
        "bearerToken" => DetectionType::BearerToken,
        "basicAuth" => DetectionType::BasicAuth,
        "authHeader" => DetectionType::AuthHeader,
        "wechatAppId" => DetectionType::WechatAppId,
        "awsKey" => DetectionType::AwsKey,
        "googleApiKey" => DetectionType::GoogleApiKey,
        "githubToken" => DetectionType::GithubToken,
        "gitlabToken" => DetectionType::GitlabToken,
        "webhookUrls" => DetectionType::WebhookUrl,
        "cryptoUsage" => DetectionType::CryptoUsage,
        "sensitiveKeyword" => DetectionType::SensitiveKeyword,
        "port" => DetectionType::Port,
        "parameter" => DetectionType::Parameter,
        "cookie" => DetectionType::Cookie,
        "idKey" => DetectionType::IdKey,
        other => DetectionType::Custom(other.to_string()),
    }
}

/// Split a pattern string into `(body, flags)`, accepting both the
/// `/body/flags` literal form and a bare source.
pub fn parse_pattern(raw: &str) -> (String, String) {
    let trimmed = raw.trim();

    if trimmed.len() >= 2 && trimmed.starts_with('/') {
        // Find the closing unescaped slash scanning from the end.
        if let Some(close) = find_closing_slash(trimmed) {
            let body = &trimmed[1..close];
            let flags = &trimmed[close + 1..];
            if flags.chars().all(|c| "gimsuy".contains(c)) {
                return (body.to_string(), if flags.is_empty() { "g".into() } else { flags.into() });
            }
        }
    }

    (trimmed.to_string(), "g".to_string())
}

fn find_closing_slash(literal: &str) -> Option<usize> {
    let bytes = literal.as_bytes();
    let mut idx = bytes.len();
    while idx > 1 {
        idx -= 1;
        if bytes[idx] == b'/' {
            // Count preceding backslashes; an even count means unescaped.
            let mut backslashes = 0;
            let mut j = idx;
            while j > 1 && bytes[j - 1] == b'\\' {
                backslashes += 1;
                j -= 1;
            }
            if backslashes % 2 == 0 {
                return Some(idx);
            }
        }
    }
    None
}

/// Whether a pattern body uses look-around assertions. The regex engine
/// rejects these at compile time; detecting them first gives a clearer log.
pub fn contains_lookaround(body: &str) -> bool {
    ["(?=", "(?!", "(?<=", "(?<!"].iter().any(|a| body.contains(a))
}

/// Compile a pattern string, translating JS-style flags into inline groups.
pub fn compile_pattern(raw: &str) -> Result<Regex> {
    let (body, flags) = parse_pattern(raw);

    if contains_lookaround(&body) {
        return Err(WebsiftError::PatternError(format!(
            "look-around assertions are not supported by this engine: {}",
            raw
        )));
    }

    let mut inline = String::new();
    if flags.contains('i') {
        inline.push('i');
    }
    if flags.contains('m') {
        inline.push('m');
    }
    if flags.contains('s') {
        inline.push('s');
    }

    let source = if inline.is_empty() {
        body
    } else {
        format!("(?{}){}", inline, body)
    };

    Regex::new(&source).map_err(|e| WebsiftError::PatternError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CustomRegexConfigs, CustomRegexEntry};

    #[test]
    fn test_parse_pattern_literal_and_bare() {
        let (body, flags) = parse_pattern("/ab\\/c/gi");
        assert_eq!(body, "ab\\/c");
        assert_eq!(flags, "gi");

        let (body, flags) = parse_pattern("plain[0-9]+");
        assert_eq!(body, "plain[0-9]+");
        assert_eq!(flags, "g");

        // A slash-containing bare pattern with no valid flags stays bare.
        let (body, _) = parse_pattern("a/b");
        assert_eq!(body, "a/b");
    }

    #[test]
    fn test_compile_applies_case_flag() {
        let re = compile_pattern("/token/i").unwrap();
        assert!(re.is_match("TOKEN"));
    }

    #[test]
    fn test_compile_rejects_lookaround() {
        assert!(compile_pattern(r"(?=foo)bar").is_err());
        assert!(compile_pattern(r"/(?<!x)y/g").is_err());
    }

    #[test]
    fn test_default_patterns_all_compile() {
        let set = PatternSet::load(&Settings::default()).unwrap();
        assert_eq!(set.len(), DEFAULT_PATTERNS.len());
    }

    #[test]
    fn test_default_patterns_empty_input_yields_nothing() {
        let set = PatternSet::load(&Settings::default()).unwrap();
        for pattern in set.iter() {
            assert!(
                pattern.regex.find_iter("").next().is_none(),
                "pattern {} matched the empty string",
                pattern.key
            );
        }
    }

    #[test]
    fn test_custom_entries_survive_update() {
        let mut settings = Settings::default();
        settings.custom_regex_configs = CustomRegexConfigs::List(vec![CustomRegexEntry {
            key: "session".into(),
            name: "Session".into(),
            pattern: "sess_[a-z0-9]{8}".into(),
        }]);

        let set = PatternSet::load(&settings).unwrap();
        assert!(set.get("custom_session").is_some());

        // An update without the custom entry must preserve it.
        let updated = set.update(&Settings::default()).unwrap();
        assert!(updated.get("custom_session").is_some());
    }

    #[test]
    fn test_custom_key_collision_is_rejected() {
        let mut settings = Settings::default();
        settings.custom_regex_configs = CustomRegexConfigs::List(vec![CustomRegexEntry {
            key: "domain".into(),
            name: "Shadow".into(),
            pattern: "x".into(),
        }]);

        assert!(PatternSet::load(&settings).is_err());
    }

    #[test]
    fn test_invalid_override_is_skipped_not_fatal() {
        let mut settings = Settings::default();
        settings
            .regex_settings
            .insert("email".into(), "([unclosed".into());

        let set = PatternSet::load(&settings).unwrap();
        assert!(set.get("email").is_none());
        assert!(set.get("domain").is_some());
    }
}

//! Configuration handling: CLI arguments and the scan settings document.

use crate::types::{HttpConfig, Result, WebsiftError};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Static scanner for sensitive information and attack surface in web
/// application source.
#[derive(Parser, Debug, Clone)]
#[command(name = "websift")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Scan one or more targets
    Scan(ScanConfig),
    /// Print the compiled pattern set and exit
    Patterns(PatternsConfig),
}

/// Configuration for the patterns command.
#[derive(Parser, Debug, Clone)]
pub struct PatternsConfig {
    /// Settings document (JSON) with regex overrides and custom patterns
    #[arg(short, long)]
    pub settings: Option<PathBuf>,
}

/// Configuration for the scan command.
#[derive(Parser, Debug, Clone)]
pub struct ScanConfig {
    /// Target URL(s) to scan
    #[arg(required_unless_present = "file")]
    pub targets: Vec<String>,

    /// File containing URLs to scan (one per line)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Settings document (JSON) with regex overrides and custom patterns
    #[arg(short, long, env = "WEBSIFT_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Deep crawl depth (0 = scan the page only)
    #[arg(short, long, default_value = "1")]
    pub depth: usize,

    /// Number of concurrent crawl workers
    #[arg(short, long, default_value = "5")]
    pub concurrency: usize,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "5")]
    pub timeout: u64,

    /// Maximum retries for failed requests
    #[arg(long, default_value = "2")]
    pub max_retries: u32,

    /// Rate limit (requests per second)
    #[arg(long, default_value = "10")]
    pub rate_limit: u32,

    /// Also scan URLs on subdomains of the target
    #[arg(long)]
    pub allow_subdomains: bool,

    /// Scan URLs on any domain (overrides --allow-subdomains)
    #[arg(long)]
    pub allow_all_domains: bool,

    /// Skip JS files when building the crawl frontier
    #[arg(long)]
    pub no_js: bool,

    /// Skip HTML pages when building the crawl frontier
    #[arg(long)]
    pub no_html: bool,

    /// Also crawl discovered API endpoints
    #[arg(long)]
    pub scan_api: bool,

    /// Drive a headless browser for live Vue introspection
    #[arg(long)]
    pub browser: bool,

    /// Path to Chrome/Chromium executable (overrides auto-detection)
    #[arg(long)]
    pub chrome_path: Option<PathBuf>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Output file path (defaults to stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Directory for incremental scan-state persistence
    #[arg(long)]
    pub save_dir: Option<PathBuf>,

    /// Custom User-Agent string
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Quiet mode: only print the final summary
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            file: None,
            settings: None,
            depth: 1,
            concurrency: 5,
            timeout: 5,
            max_retries: 2,
            rate_limit: 10,
            allow_subdomains: false,
            allow_all_domains: false,
            no_js: false,
            no_html: false,
            scan_api: false,
            browser: false,
            chrome_path: None,
            json: false,
            output: None,
            save_dir: None,
            user_agent: None,
            quiet: false,
            verbose: false,
        }
    }
}

impl ScanConfig {
    /// Get HTTP configuration from scan config.
    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            timeout_secs: self.timeout,
            max_retries: self.max_retries,
            user_agent: self.user_agent.clone().unwrap_or_else(|| {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
            }),
        }
    }

    /// Load targets from file if specified.
    pub fn load_targets(&self) -> Result<Vec<String>> {
        let mut targets = self.targets.clone();

        if let Some(ref file_path) = self.file {
            let content = std::fs::read_to_string(file_path)?;
            for line in content.lines() {
                let trimmed = line.trim();
                if !trimmed.is_empty() && !trimmed.starts_with('#') {
                    targets.push(trimmed.to_string());
                }
            }
        }

        // Normalize URLs
        let normalized: Vec<String> = targets
            .into_iter()
            .map(|t| {
                if !t.starts_with("http://") && !t.starts_with("https://") {
                    format!("https://{}", t)
                } else {
                    t
                }
            })
            .collect();

        Ok(normalized)
    }

    /// Domain policy derived from CLI flags (settings may override).
    pub fn domain_policy(&self) -> DomainPolicy {
        DomainScanSettings {
            allow_subdomains: self.allow_subdomains,
            allow_all_domains: self.allow_all_domains,
        }
        .policy()
    }
}

/// Which discovered URLs are in scope for the deep crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DomainPolicy {
    SameOrigin,
    Subdomains,
    AllDomains,
}

/// The settings document consumed by the scanner. All sections are optional;
/// absent sections fall back to built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// `category -> patternString` overrides; patternString is either a
    /// `/body/flags` literal or a bare regex source.
    pub regex_settings: BTreeMap<String, String>,
    /// User-defined patterns; accepts both the array and the object form.
    pub custom_regex_configs: CustomRegexConfigs,
    pub domain_scan_settings: DomainScanSettings,
    pub vue_detector_settings: VueDetectorSettings,
}

impl Settings {
    /// Load a settings document from a JSON file.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    /// Load from an optional path, defaulting when absent.
    pub fn load_or_default(path: Option<&std::path::Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}

/// User-defined regex entries arrive either as an array or as a keyed map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CustomRegexConfigs {
    List(Vec<CustomRegexEntry>),
    Map(BTreeMap<String, CustomRegexMapEntry>),
}

impl Default for CustomRegexConfigs {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomRegexEntry {
    pub key: String,
    pub name: String,
    pub pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomRegexMapEntry {
    pub name: String,
    pub pattern: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl CustomRegexConfigs {
    /// Flatten both accepted shapes into `(key, name, pattern)` triples.
    /// Keys are returned as provided; prefixing and collision validation
    /// happen in the pattern set loader.
    pub fn entries(&self) -> Vec<CustomRegexEntry> {
        match self {
            Self::List(list) => list.clone(),
            Self::Map(map) => map
                .iter()
                .map(|(key, entry)| CustomRegexEntry {
                    key: key.clone(),
                    name: entry.name.clone(),
                    pattern: entry.pattern.clone(),
                })
                .collect(),
        }
    }
}

/// Scope policy for the deep crawl.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DomainScanSettings {
    pub allow_subdomains: bool,
    pub allow_all_domains: bool,
}

impl DomainScanSettings {
    pub fn policy(&self) -> DomainPolicy {
        if self.allow_all_domains {
            DomainPolicy::AllDomains
        } else if self.allow_subdomains {
            DomainPolicy::Subdomains
        } else {
            DomainPolicy::SameOrigin
        }
    }
}

/// Settings for the live Vue introspector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VueDetectorSettings {
    pub enabled: bool,
    pub enable_guard_patch: bool,
    pub enable_auth_patch: bool,
    /// Probe evaluation timeout in milliseconds.
    pub timeout: u64,
    /// DOM breadth-first search depth bound when locating the Vue root.
    pub max_depth: usize,
}

impl Default for VueDetectorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            enable_guard_patch: false,
            enable_auth_patch: false,
            timeout: 5000,
            max_depth: 1000,
        }
    }
}

/// Validate that a user-provided custom key does not shadow a built-in
/// pattern category once prefixed.
pub fn validate_custom_key(key: &str, builtin_keys: &[&str]) -> Result<()> {
    let bare = key.strip_prefix("custom_").unwrap_or(key);
    if bare.is_empty() {
        return Err(WebsiftError::ConfigError(
            "custom pattern key must not be empty".to_string(),
        ));
    }
    if builtin_keys.contains(&key) || builtin_keys.contains(&bare) {
        return Err(WebsiftError::ConfigError(format!(
            "custom pattern key '{}' collides with a built-in pattern",
            key
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_configs_accepts_both_shapes() {
        let list: CustomRegexConfigs = serde_json::from_str(
            r#"[{"key":"session","name":"Session","pattern":"sess_[a-z0-9]+"}]"#,
        )
        .unwrap();
        assert_eq!(list.entries().len(), 1);
        assert_eq!(list.entries()[0].key, "session");

        let map: CustomRegexConfigs = serde_json::from_str(
            r#"{"session":{"name":"Session","pattern":"sess_[a-z0-9]+","createdAt":"2024-01-01"}}"#,
        )
        .unwrap();
        assert_eq!(map.entries().len(), 1);
        assert_eq!(map.entries()[0].pattern, "sess_[a-z0-9]+");
    }

    #[test]
    fn test_domain_policy_resolution() {
        let same = DomainScanSettings::default();
        assert_eq!(same.policy(), DomainPolicy::SameOrigin);

        let subs = DomainScanSettings {
            allow_subdomains: true,
            allow_all_domains: false,
        };
        assert_eq!(subs.policy(), DomainPolicy::Subdomains);

        let all = DomainScanSettings {
            allow_subdomains: true,
            allow_all_domains: true,
        };
        assert_eq!(all.policy(), DomainPolicy::AllDomains);
    }

    #[test]
    fn test_validate_custom_key_rejects_builtin_collision() {
        let builtins = ["domain", "email"];
        assert!(validate_custom_key("custom_session", &builtins).is_ok());
        assert!(validate_custom_key("domain", &builtins).is_err());
        assert!(validate_custom_key("custom_domain", &builtins).is_err());
        assert!(validate_custom_key("custom_", &builtins).is_err());
    }

    #[test]
    fn test_settings_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert!(settings.regex_settings.is_empty());
        assert!(settings.vue_detector_settings.enabled);
        assert_eq!(settings.vue_detector_settings.max_depth, 1000);
    }
}

//! Main scanner orchestrating all components for one target.

use crate::ast::AstExtractor;
use crate::config::{ScanConfig, Settings};
use crate::console::ConsoleOutput;
use crate::crawl::{CrawlOptions, DeepCrawler, RequestTransport};
use crate::extract::content::{cross_category_dedup, enrich_domains, ContentExtractor};
use crate::extract::RegexExtractor;
use crate::framework::{VueStaticAnalyzer, WebpackAnalyzer};
use crate::live::vue_probe::{probe_to_detections, VueProbe};
use crate::patterns::PatternSet;
use crate::storage::{JsonFileStore, ScanStore};
use crate::types::{ExtractionResult, Result, ScanReport, WebsiftError};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Main scanner that orchestrates all scanning components.
pub struct Scanner {
    config: ScanConfig,
    settings: Settings,
    patterns: Arc<PatternSet>,
    transport: Arc<RequestTransport>,
    content: Arc<ContentExtractor>,
    vue: VueStaticAnalyzer,
    webpack: WebpackAnalyzer,
    console: ConsoleOutput,
    store: Option<Arc<dyn ScanStore>>,
    running: Arc<AtomicBool>,
}

impl Scanner {
    /// Create a new scanner with the given configuration.
    pub fn new(config: ScanConfig) -> Result<Self> {
        let settings = Settings::load_or_default(config.settings.as_deref())?;
        let patterns = Arc::new(PatternSet::load(&settings)?);

        let transport = Arc::new(RequestTransport::new(
            config.http_config(),
            config.rate_limit,
        )?);
        let ast = Arc::new(AstExtractor::with_default_visitors());
        let content = Arc::new(ContentExtractor::new(
            RegexExtractor::new(Arc::clone(&patterns)),
            ast,
        ));

        let console = ConsoleOutput::new(config.verbose, config.json, config.quiet);
        let store: Option<Arc<dyn ScanStore>> = config
            .save_dir
            .as_ref()
            .map(|dir| Arc::new(JsonFileStore::new(dir.clone())) as Arc<dyn ScanStore>);

        Ok(Self {
            config,
            settings,
            patterns,
            transport,
            content,
            vue: VueStaticAnalyzer::new(),
            webpack: WebpackAnalyzer::new(),
            console,
            store,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// The loaded pattern set (for the `patterns` command).
    pub fn patterns(&self) -> &Arc<PatternSet> {
        &self.patterns
    }

    /// Apply new settings: rebuilds the pattern set preserving custom
    /// entries, then swaps in a content extractor reading the new set.
    pub fn update_settings(&mut self, settings: Settings) -> Result<()> {
        let patterns = Arc::new(self.patterns.update(&settings)?);
        self.content = Arc::new(ContentExtractor::new(
            RegexExtractor::new(Arc::clone(&patterns)),
            Arc::clone(self.content.ast_extractor()),
        ));
        self.patterns = patterns;
        self.settings = settings;
        Ok(())
    }

    /// Process-level stop flag, shared with the deep crawler.
    pub fn running_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Scan a single target URL.
    pub async fn scan(&self, target: &str) -> Result<ScanReport> {
        let start_time = Instant::now();
        self.console.print_scan_start(target);

        let mut errors: Vec<String> = Vec::new();

        // Fetch the page through the transport.
        let response = self.transport.request(target).await?;
        if response.binary {
            return Err(WebsiftError::ConfigError(format!(
                "target responds with a binary content type: {}",
                target
            )));
        }

        // Optional live introspection before static extraction, so storage
        // pairs can feed the script pass.
        let mut storage_pairs: Vec<(String, String)> = Vec::new();
        let mut probe_result = None;
        if self.config.browser && self.settings.vue_detector_settings.enabled {
            self.console.print_progress("probing Vue runtime in headless browser...");
            let probe = VueProbe::new(
                self.config.timeout,
                self.settings.vue_detector_settings.clone(),
            )
            .with_chrome_executable(self.config.chrome_path.clone());

            match probe.probe(target).await {
                Ok(result) => {
                    storage_pairs = result.storage_pairs.clone();
                    probe_result = Some(result);
                }
                Err(e) => {
                    warn!("vue probe failed: {}", e);
                    errors.push(format!("vue probe failed: {}", e));
                }
            }
        }

        // Page extraction: two passes over the decomposed document.
        let (mut results, page) = self
            .content
            .extract_page(target, &response.final_url, &response.text, &storage_pairs)
            .await;
        self.console.print_info(&format!(
            "page extraction found {} artifacts",
            results.total()
        ));

        // Framework passes over the page's inline script text.
        let routes = self.vue.extract_routes(&page.script_text, target);
        for det in self.vue.routes_to_detections(&routes, target) {
            results.insert("vueRoutes", det);
        }
        let analysis = self.webpack.analyze(&page.script_text, target);
        for det in self
            .webpack
            .to_detections(&analysis, target, &page.external_scripts)
        {
            let category = crate::framework::webpack::detection_category(&det.detection_type);
            results.insert(category, det);
        }

        if let Some(probe) = &probe_result {
            for (category, det) in probe_to_detections(probe, target) {
                results.insert(&category, det);
            }
        }

        enrich_domains(&mut results, target);
        cross_category_dedup(&mut results);

        // Deep crawl over discovered URLs.
        let mut pages_scanned = 0;
        if self.config.depth > 0 {
            let policy = if self.config.allow_all_domains || self.config.allow_subdomains {
                self.config.domain_policy()
            } else {
                self.settings.domain_scan_settings.policy()
            };
            let options = CrawlOptions {
                max_depth: self.config.depth,
                concurrency: self.config.concurrency,
                domain_policy: policy,
                scan_js_files: !self.config.no_js,
                scan_html_files: !self.config.no_html,
                scan_api_files: self.config.scan_api,
            };

            let display_console =
                ConsoleOutput::new(self.config.verbose, self.config.json, self.config.quiet);
            let mut crawler = DeepCrawler::new(
                Arc::clone(&self.transport),
                Arc::clone(&self.content),
                options,
            )
            .with_running_flag(Arc::clone(&self.running))
            .with_display_callback(Arc::new(move |progress: &crate::crawl::CrawlProgress| {
                display_console.print_crawl_progress(progress);
            }));
            if let Some(store) = &self.store {
                crawler = crawler.with_store(Arc::clone(store));
            }

            let progress_bar = if self.config.quiet {
                None
            } else {
                self.console.create_progress_bar(0, "deep crawl")
            };
            if let Some(pb) = &progress_bar {
                let pb = pb.clone();
                crawler = crawler.with_progress_callback(Arc::new(
                    move |progress: &crate::crawl::CrawlProgress| {
                        pb.set_length((progress.processed + progress.queued) as u64);
                        pb.set_position(progress.processed as u64);
                        pb.set_message(format!(
                            "depth {}/{}",
                            progress.depth, progress.max_depth
                        ));
                    },
                ));
            }

            let (deep_results, processed) = crawler.crawl(target, &results).await;
            if let Some(pb) = progress_bar {
                pb.finish_and_clear();
            }
            pages_scanned = processed;
            results.merge(deep_results);
            enrich_domains(&mut results, target);
            cross_category_dedup(&mut results);
        }

        // Best-effort final persistence of the merged results.
        if let Some(store) = &self.store {
            if let Err(e) = store
                .save_scan_results(target, &results, target, page.title.as_deref())
                .await
            {
                debug!("scan results write failed: {}", e);
                errors.push(format!("persistence failed: {}", e));
            }
        }

        let report = ScanReport {
            target: target.to_string(),
            page_title: page.title.clone(),
            results,
            pages_scanned,
            duration_secs: start_time.elapsed().as_secs_f64(),
            errors,
        };

        self.console.print_highlights(&report);
        self.console.print_summary(&report);

        Ok(report)
    }

    /// Scan multiple targets sequentially, converting failures into error
    /// reports.
    pub async fn scan_multiple(&self, targets: Vec<String>) -> Vec<ScanReport> {
        let mut reports = Vec::with_capacity(targets.len());
        for target in targets {
            if !self.running.load(std::sync::atomic::Ordering::SeqCst) {
                break;
            }
            match self.scan(&target).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    reports.push(ScanReport {
                        target,
                        page_title: None,
                        results: ExtractionResult::default(),
                        pages_scanned: 0,
                        duration_secs: 0.0,
                        errors: vec![e.to_string()],
                    });
                }
            }
        }
        reports
    }
}

/// Count the highlighted sensitive artifacts in a set of reports.
pub fn total_sensitive(reports: &[ScanReport]) -> usize {
    const SENSITIVE: &[&str] = &[
        "credentials",
        "jwts",
        "awsKeys",
        "googleApiKeys",
        "githubTokens",
        "gitlabTokens",
        "bearerTokens",
        "basicAuth",
        "webhookUrls",
        "idCards",
    ];

    reports
        .iter()
        .map(|report| {
            let mut count = 0;
            report.results.for_each(|category, detections| {
                if SENSITIVE.contains(&category) {
                    count += detections.len();
                }
            });
            count
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scanner_construction() {
        let scanner = Scanner::new(ScanConfig::default()).unwrap();
        assert!(scanner.patterns().len() > 20);
        assert!(scanner.running_handle().load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_update_settings_preserves_custom_patterns() {
        use crate::config::{CustomRegexConfigs, CustomRegexEntry};

        let mut initial = Settings::default();
        initial.custom_regex_configs = CustomRegexConfigs::List(vec![CustomRegexEntry {
            key: "marker".into(),
            name: "Marker".into(),
            pattern: "mk_[0-9a-f]{8}".into(),
        }]);

        let mut config = ScanConfig::default();
        config.targets = vec!["https://example.com".into()];
        let mut scanner = Scanner::new(config).unwrap();
        scanner.update_settings(initial).unwrap();
        assert!(scanner.patterns().get("custom_marker").is_some());

        // A later update without the entry keeps it.
        scanner.update_settings(Settings::default()).unwrap();
        assert!(scanner.patterns().get("custom_marker").is_some());
    }

    #[test]
    fn test_total_sensitive() {
        use crate::types::{Detection, DetectionType};

        let mut results = ExtractionResult::default();
        results.insert(
            "credentials",
            Detection::regex(DetectionType::Credential, "tok_12345678", "https://a/"),
        );
        let report = ScanReport {
            target: "https://a/".into(),
            page_title: None,
            results,
            pages_scanned: 0,
            duration_secs: 0.0,
            errors: vec![],
        };
        assert_eq!(total_sensitive(&[report]), 1);
    }
}

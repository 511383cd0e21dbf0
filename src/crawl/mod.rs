//! Layered BFS deep crawl with bounded concurrency.
//!
//! Each layer's URLs feed a worker pool (`buffer_unordered`); workers fetch
//! through the request transport, dedup by URL and truncated content hash,
//! run the extraction pipeline, and harvest the next layer from what was
//! extracted. Display and persistence are throttled; a final flush ignores
//! the throttles.

pub mod fetcher;

pub use fetcher::{RequestTransport, TransportResponse};

use crate::config::DomainPolicy;
use crate::extract::content::{
    cross_category_dedup, enrich_domains, looks_like_script, registrable_suffix,
    ContentExtractor,
};
use crate::extract::regex_extractor::extract_host;
use crate::filters;
use crate::framework::webpack::sourcemap_module_paths;
use crate::framework::{VueStaticAnalyzer, WebpackAnalyzer};
use crate::storage::{DeepScanState, ScanStore};
use crate::types::{djb2, Detection, DetectionType, ExtractionResult};
use dashmap::DashSet;
use futures::stream::StreamExt;
use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// URL-level response cache bound.
pub const URL_CACHE_CAPACITY: usize = 100;

/// Characters hashed for content dedup.
pub const CONTENT_HASH_PREFIX: usize = 10_000;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);
const DISPLAY_INTERVAL: Duration = Duration::from_millis(2_000);
const PERSIST_INTERVAL: Duration = Duration::from_millis(5_000);

/// Scheduler options.
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub max_depth: usize,
    pub concurrency: usize,
    pub domain_policy: DomainPolicy,
    pub scan_js_files: bool,
    pub scan_html_files: bool,
    pub scan_api_files: bool,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_depth: 1,
            concurrency: 5,
            domain_policy: DomainPolicy::SameOrigin,
            scan_js_files: true,
            scan_html_files: true,
            scan_api_files: false,
        }
    }
}

/// Progress snapshot handed to callbacks.
#[derive(Debug, Clone)]
pub struct CrawlProgress {
    pub depth: usize,
    pub max_depth: usize,
    pub processed: usize,
    pub queued: usize,
    pub detections: usize,
}

pub type ProgressCallback = Arc<dyn Fn(&CrawlProgress) + Send + Sync>;

/// Whether `host` is in scope for a crawl seeded at `seed_host`.
///
/// Subdomain mode admits any host sharing the seed's registrable parent, so
/// a scan seeded at `a.example.com` also covers `b.example.com`.
pub fn in_scope(policy: DomainPolicy, seed_host: &str, host: &str) -> bool {
    match policy {
        DomainPolicy::AllDomains => true,
        DomainPolicy::SameOrigin => seed_host.eq_ignore_ascii_case(host),
        DomainPolicy::Subdomains => {
            let seed = seed_host.to_ascii_lowercase();
            let host = host.to_ascii_lowercase();
            seed == host || registrable_suffix(&seed) == registrable_suffix(&host)
        }
    }
}

/// Heuristic: a URL worth fetching as a page rather than a resource.
pub fn is_page_url(url: &str) -> bool {
    if filters::is_static_file(url) {
        return false;
    }
    let path = url
        .split("://")
        .nth(1)
        .and_then(|rest| rest.find('/').map(|i| &rest[i..]))
        .unwrap_or(url);
    let path = path.split(['?', '#']).next().unwrap_or(path);

    if path.is_empty() || path.ends_with('/') {
        return true;
    }
    let last = path.rsplit('/').next().unwrap_or(path);
    if last.ends_with(".html") || last.ends_with(".htm") {
        return true;
    }
    !last.contains('.')
}

/// Bounded-concurrency layered BFS scanner.
pub struct DeepCrawler {
    transport: Arc<RequestTransport>,
    content: Arc<ContentExtractor>,
    vue: VueStaticAnalyzer,
    webpack: WebpackAnalyzer,
    options: CrawlOptions,
    store: Option<Arc<dyn ScanStore>>,
    on_progress: Option<ProgressCallback>,
    on_display: Option<ProgressCallback>,
    running: Arc<AtomicBool>,
    scanned: DashSet<String>,
    content_hashes: DashSet<u64>,
    url_cache: Mutex<LruCache<String, String>>,
    processed: AtomicUsize,
    persist_pending: Arc<AtomicBool>,
}

impl DeepCrawler {
    pub fn new(
        transport: Arc<RequestTransport>,
        content: Arc<ContentExtractor>,
        options: CrawlOptions,
    ) -> Self {
        Self {
            transport,
            content,
            vue: VueStaticAnalyzer::new(),
            webpack: WebpackAnalyzer::new(),
            options,
            store: None,
            on_progress: None,
            on_display: None,
            running: Arc::new(AtomicBool::new(true)),
            scanned: DashSet::new(),
            content_hashes: DashSet::new(),
            url_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(URL_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
            processed: AtomicUsize::new(0),
            persist_pending: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ScanStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn with_display_callback(mut self, callback: ProgressCallback) -> Self {
        self.on_display = Some(callback);
        self
    }

    /// Share an externally owned stop flag (e.g. the process-level ctrl-c
    /// handler) instead of the crawler's own.
    pub fn with_running_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }

    /// Shared stop flag; flipping it to false drains the queue, lets
    /// in-flight workers finish, and runs the final flush.
    pub fn running_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn processed_count(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    /// Run the crawl from the seed page's extraction results. Returns the
    /// aggregate results of all crawled URLs and the number processed.
    pub async fn crawl(&self, origin: &str, seed: &ExtractionResult) -> (ExtractionResult, usize) {
        let Some(seed_host) = extract_host(origin) else {
            warn!("crawl origin has no host: {}", origin);
            return (ExtractionResult::default(), 0);
        };

        let mut aggregate = ExtractionResult::default();
        let mut frontier = self.select_frontier(seed, origin, &seed_host);
        let mut last_progress = Instant::now();
        let mut last_display = Instant::now();
        let mut last_persist = Instant::now();

        for depth in 1..=self.options.max_depth {
            if frontier.is_empty() || !self.running.load(Ordering::SeqCst) {
                break;
            }
            debug!("crawl layer {} with {} urls", depth, frontier.len());

            let layer: Vec<String> = frontier.drain(..).collect();
            let queued = layer.len();
            let mut next: HashSet<String> = HashSet::new();

            let mut workers = futures::stream::iter(
                layer.into_iter().map(|url| self.process_url(url)),
            )
            .buffer_unordered(self.options.concurrency.max(1));

            while let Some(outcome) = workers.next().await {
                let Some((result, discovered)) = outcome else {
                    continue;
                };

                for url in discovered {
                    if !self.scanned.contains(&url) {
                        next.insert(url);
                    }
                }
                aggregate.merge(result);
                cross_category_dedup(&mut aggregate);

                let progress = CrawlProgress {
                    depth,
                    max_depth: self.options.max_depth,
                    processed: self.processed_count(),
                    queued,
                    detections: aggregate.total(),
                };
                if last_progress.elapsed() >= PROGRESS_INTERVAL {
                    last_progress = Instant::now();
                    if let Some(cb) = &self.on_progress {
                        cb(&progress);
                    }
                }
                if last_display.elapsed() >= DISPLAY_INTERVAL {
                    last_display = Instant::now();
                    if let Some(cb) = &self.on_display {
                        cb(&progress);
                    }
                }
                if last_persist.elapsed() >= PERSIST_INTERVAL {
                    last_persist = Instant::now();
                    self.spawn_persist(origin, &aggregate, depth);
                }
            }
            drop(workers);

            frontier = next.into_iter().collect();
        }

        self.flush(origin, &aggregate).await;
        (aggregate, self.processed_count())
    }

    /// Final flush: one display update and one storage write, regardless of
    /// throttles.
    async fn flush(&self, origin: &str, aggregate: &ExtractionResult) {
        let progress = CrawlProgress {
            depth: self.options.max_depth,
            max_depth: self.options.max_depth,
            processed: self.processed_count(),
            queued: 0,
            detections: aggregate.total(),
        };
        if let Some(cb) = &self.on_display {
            cb(&progress);
        }

        let Some(store) = &self.store else { return };
        let state = DeepScanState {
            running: false,
            current_depth: self.options.max_depth,
            max_depth: self.options.max_depth,
            scanned_count: self.scanned.len(),
            processed_count: self.processed_count(),
        };
        if let Err(e) = store
            .save_scan_results(origin, aggregate, origin, None)
            .await
        {
            debug!("final results write failed: {}", e);
        }
        if let Err(e) = store.save_deep_scan_state(origin, &state).await {
            debug!("final state write failed: {}", e);
        }
    }

    /// Throttled, coalesced persistence: a write requested while one is
    /// pending is dropped.
    fn spawn_persist(&self, origin: &str, aggregate: &ExtractionResult, depth: usize) {
        let Some(store) = &self.store else { return };
        if self.persist_pending.swap(true, Ordering::SeqCst) {
            trace!("persist already pending, dropping write");
            return;
        }

        let store = Arc::clone(store);
        let pending = Arc::clone(&self.persist_pending);
        let origin = origin.to_string();
        let results = aggregate.clone();
        let state = DeepScanState {
            running: true,
            current_depth: depth,
            max_depth: self.options.max_depth,
            scanned_count: self.scanned.len(),
            processed_count: self.processed.load(Ordering::Relaxed),
        };

        tokio::spawn(async move {
            if let Err(e) = store
                .save_scan_results(&origin, &results, &origin, None)
                .await
            {
                debug!("throttled results write failed: {}", e);
            }
            if let Err(e) = store.save_deep_scan_state(&origin, &state).await {
                debug!("throttled state write failed: {}", e);
            }
            pending.store(false, Ordering::SeqCst);
        });
    }

    /// Process one URL: fetch, dedup, extract, harvest.
    async fn process_url(&self, url: String) -> Option<(ExtractionResult, Vec<String>)> {
        if !self.running.load(Ordering::SeqCst) {
            return None;
        }
        // Dispatched-once invariant.
        if !self.scanned.insert(url.clone()) {
            return None;
        }

        let (body, content_type) = self.fetch_cached(&url).await?;
        if body.is_empty() {
            return None;
        }

        let prefix: String = body.chars().take(CONTENT_HASH_PREFIX).collect();
        if !self.content_hashes.insert(djb2(&prefix)) {
            trace!("content hash already processed: {}", url);
            return None;
        }
        self.processed.fetch_add(1, Ordering::Relaxed);

        let script_like = looks_like_script(&url, content_type.as_deref(), &body);
        let mut discovered_extra: Vec<String> = Vec::new();

        let mut result = if !script_like && body.trim_start().starts_with('<') {
            let (page_result, page) = self.content.extract_page(&url, &url, &body, &[]).await;
            discovered_extra.extend(page.external_scripts);
            page_result
        } else {
            self.content.extract_content(&body, &url, script_like).await
        };

        if script_like {
            self.analyze_script(&url, &body, &mut result, &mut discovered_extra)
                .await;
        }

        enrich_domains(&mut result, &url);
        cross_category_dedup(&mut result);

        let discovered = self.harvest_urls(&result, &url, discovered_extra);
        Some((result, discovered))
    }

    /// Framework passes over script content: static Vue routes, webpack
    /// chunk reconstruction, and source map module paths.
    async fn analyze_script(
        &self,
        url: &str,
        body: &str,
        result: &mut ExtractionResult,
        discovered: &mut Vec<String>,
    ) {
        let routes = self.vue.extract_routes(body, url);
        for det in self.vue.routes_to_detections(&routes, url) {
            result.insert("vueRoutes", det);
        }

        let analysis = self.webpack.analyze(body, url);
        for chunk in &analysis.chunks {
            if let Some(resolved) = resolve_candidate(url, &chunk.url) {
                discovered.push(resolved);
            }
        }
        for det in self.webpack.to_detections(&analysis, url, &[]) {
            let category = crate::framework::webpack::detection_category(&det.detection_type);
            result.insert(category, det);
        }

        // Fetch a referenced source map and enumerate its modules.
        if let Some(map_url) = &analysis.source_map_url {
            if !map_url.starts_with("data:") {
                if let Ok(response) = self.transport.request(map_url).await {
                    for module in sourcemap_module_paths(&response.text) {
                        result.insert(
                            "modulePaths",
                            Detection::regex(DetectionType::ModulePath, module, map_url.as_str()),
                        );
                    }
                }
            }
        }
    }

    async fn fetch_cached(&self, url: &str) -> Option<(String, Option<String>)> {
        {
            let mut cache = self.url_cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(body) = cache.get(url) {
                trace!("url cache hit: {}", url);
                return Some((body.clone(), None));
            }
        }

        match self.transport.request(url).await {
            Ok(response) if response.binary || response.text.is_empty() => None,
            Ok(response) => {
                self.url_cache
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .put(url.to_string(), response.text.clone());
                Some((response.text, response.content_type))
            }
            // Fetch failures leave the URL marked scanned with no content.
            Err(_) => None,
        }
    }

    /// Frontier selection from extraction results, honoring the option
    /// flags and domain policy.
    fn select_frontier(
        &self,
        results: &ExtractionResult,
        base_url: &str,
        seed_host: &str,
    ) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        let mut push = |url: String| {
            if !self.scanned.contains(&url) && seen.insert(url.clone()) {
                out.push(url);
            }
        };

        if self.options.scan_js_files {
            for det in results.js_files.iter().chain(results.webpack_chunks.iter()) {
                if let Some(url) = self.admit(base_url, seed_host, &det.value, false) {
                    push(url);
                }
            }
        }
        if self.options.scan_html_files {
            for det in &results.urls {
                if let Some(url) = self.admit(base_url, seed_host, &det.value, true) {
                    push(url);
                }
            }
        }
        if self.options.scan_api_files {
            for det in results.absolute_apis.iter().chain(results.relative_apis.iter()) {
                if let Some(url) = self.admit(base_url, seed_host, &det.value, false) {
                    push(url);
                }
            }
        }

        out
    }

    fn harvest_urls(
        &self,
        results: &ExtractionResult,
        base_url: &str,
        extra: Vec<String>,
    ) -> Vec<String> {
        let Some(seed_host) = extract_host(base_url) else {
            return Vec::new();
        };
        let mut urls = self.select_frontier(results, base_url, &seed_host);
        for candidate in extra {
            if let Some(url) = self.admit(base_url, &seed_host, &candidate, false) {
                if !urls.contains(&url) {
                    urls.push(url);
                }
            }
        }
        urls
    }

    /// Resolve a candidate against the base URL and apply the domain policy
    /// (and, for pages, the page heuristic).
    fn admit(
        &self,
        base_url: &str,
        seed_host: &str,
        candidate: &str,
        page_only: bool,
    ) -> Option<String> {
        let resolved = resolve_candidate(base_url, candidate)?;
        let host = extract_host(&resolved)?;
        if !in_scope(self.options.domain_policy, seed_host, &host) {
            return None;
        }
        if page_only && !is_page_url(&resolved) {
            return None;
        }
        Some(resolved)
    }
}

/// Resolve a discovered value into an absolute http(s) URL.
pub fn resolve_candidate(base_url: &str, candidate: &str) -> Option<String> {
    let trimmed = candidate.trim();
    if trimmed.is_empty()
        || trimmed.starts_with("data:")
        || trimmed.starts_with("javascript:")
        || trimmed.starts_with("mailto:")
        || trimmed.starts_with('#')
        || trimmed.contains("${")
    {
        return None;
    }

    let base = url::Url::parse(base_url).ok()?;
    let resolved = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        url::Url::parse(trimmed).ok()?
    } else {
        base.join(trimmed).ok()?
    };

    match resolved.scheme() {
        "http" | "https" => Some(resolved.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AstExtractor;
    use crate::config::Settings;
    use crate::extract::RegexExtractor;
    use crate::patterns::PatternSet;
    use crate::types::HttpConfig;

    fn make_crawler(options: CrawlOptions) -> DeepCrawler {
        let patterns = Arc::new(PatternSet::load(&Settings::default()).unwrap());
        let content = Arc::new(ContentExtractor::new(
            RegexExtractor::new(patterns),
            Arc::new(AstExtractor::with_default_visitors()),
        ));
        let transport = Arc::new(RequestTransport::new(HttpConfig::default(), 10).unwrap());
        DeepCrawler::new(transport, content, options)
    }

    #[test]
    fn test_in_scope_policies() {
        // Same origin.
        assert!(in_scope(DomainPolicy::SameOrigin, "a.example.com", "a.example.com"));
        assert!(!in_scope(DomainPolicy::SameOrigin, "a.example.com", "b.example.com"));

        // Subdomains share a registrable parent in either direction.
        assert!(in_scope(DomainPolicy::Subdomains, "example.com", "b.example.com"));
        assert!(in_scope(DomainPolicy::Subdomains, "a.example.com", "example.com"));
        assert!(in_scope(DomainPolicy::Subdomains, "a.example.com", "b.example.com"));
        assert!(!in_scope(DomainPolicy::Subdomains, "a.example.com", "other.org"));
        assert!(in_scope(DomainPolicy::Subdomains, "a.example.co.uk", "b.example.co.uk"));
        assert!(!in_scope(DomainPolicy::Subdomains, "a.example.co.uk", "a.other.co.uk"));

        // All domains.
        assert!(in_scope(DomainPolicy::AllDomains, "a.example.com", "other.org"));
    }

    #[test]
    fn test_subdomain_policy_scenario() {
        // The crawl is seeded with the full origin host; deriving it the
        // way crawl() does must still admit the sibling subdomain and
        // reject the foreign org.
        let seed_host = extract_host("https://a.example.com/").unwrap();
        assert_eq!(seed_host, "a.example.com");
        assert!(in_scope(DomainPolicy::Subdomains, &seed_host, "b.example.com"));
        assert!(!in_scope(DomainPolicy::Subdomains, &seed_host, "other.org"));
    }

    #[test]
    fn test_is_page_url() {
        assert!(is_page_url("https://a.example.com/"));
        assert!(is_page_url("https://a.example.com/admin"));
        assert!(is_page_url("https://a.example.com/docs/index.html"));
        assert!(!is_page_url("https://a.example.com/app.js"));
        assert!(!is_page_url("https://a.example.com/logo.png"));
    }

    #[test]
    fn test_resolve_candidate() {
        let base = "https://a.example.com/app/index.html";
        assert_eq!(
            resolve_candidate(base, "/static/app.js"),
            Some("https://a.example.com/static/app.js".to_string())
        );
        assert_eq!(
            resolve_candidate(base, "chunk.js"),
            Some("https://a.example.com/app/chunk.js".to_string())
        );
        assert_eq!(
            resolve_candidate(base, "https://b.example.com/x.js"),
            Some("https://b.example.com/x.js".to_string())
        );
        assert_eq!(resolve_candidate(base, "data:text/plain,x"), None);
        assert_eq!(resolve_candidate(base, "${dynamic}.js"), None);
        assert_eq!(resolve_candidate(base, "#/hash"), None);
    }

    #[test]
    fn test_frontier_respects_policy_and_flags() {
        let mut seed = ExtractionResult::default();
        seed.insert(
            "jsFiles",
            Detection::regex(
                DetectionType::JsFile,
                "https://b.example.com/x.js",
                "https://a.example.com/",
            ),
        );
        seed.insert(
            "jsFiles",
            Detection::regex(
                DetectionType::JsFile,
                "https://other.org/y.js",
                "https://a.example.com/",
            ),
        );
        seed.insert(
            "urls",
            Detection::regex(
                DetectionType::Url,
                "https://a.example.com/admin",
                "https://a.example.com/",
            ),
        );

        // Subdomain policy, seeded with the host derived from the real
        // origin: the sibling host is admitted, the foreign org is not.
        let crawler = make_crawler(CrawlOptions {
            domain_policy: DomainPolicy::Subdomains,
            ..CrawlOptions::default()
        });
        let origin = "https://a.example.com/";
        let seed_host = extract_host(origin).unwrap();
        let frontier = crawler.select_frontier(&seed, origin, &seed_host);
        assert!(frontier.contains(&"https://b.example.com/x.js".to_string()));
        assert!(!frontier.iter().any(|u| u.contains("other.org")));

        // Same-origin policy admits neither JS host.
        let strict = tests_strict_crawler();
        let frontier = strict.select_frontier(&seed, "https://a.example.com/", "a.example.com");
        assert!(frontier.iter().all(|u| u.starts_with("https://a.example.com/")));

        // scan_js disabled drops JS files entirely.
        let no_js = crawler_no_js();
        let frontier = no_js.select_frontier(&seed, "https://a.example.com/", "a.example.com");
        assert!(frontier.iter().all(|u| !u.ends_with(".js")));
    }

    fn tests_strict_crawler() -> DeepCrawler {
        make_crawler(CrawlOptions::default())
    }

    fn crawler_no_js() -> DeepCrawler {
        make_crawler(CrawlOptions {
            scan_js_files: false,
            ..CrawlOptions::default()
        })
    }

    #[test]
    fn test_dispatched_once_invariant() {
        let crawler = tests_strict_crawler();
        assert!(crawler.scanned.insert("https://a/x".to_string()));
        assert!(!crawler.scanned.insert("https://a/x".to_string()));
    }

    #[test]
    fn test_content_hash_dedup() {
        let crawler = tests_strict_crawler();
        let body_a = "identical body".to_string();
        let body_b = "identical body".to_string();

        let hash_a = djb2(&body_a.chars().take(CONTENT_HASH_PREFIX).collect::<String>());
        let hash_b = djb2(&body_b.chars().take(CONTENT_HASH_PREFIX).collect::<String>());
        assert_eq!(hash_a, hash_b);
        assert!(crawler.content_hashes.insert(hash_a));
        assert!(!crawler.content_hashes.insert(hash_b));
    }

    #[test]
    fn test_url_cache_bound() {
        let crawler = tests_strict_crawler();
        {
            let mut cache = crawler.url_cache.lock().unwrap();
            for i in 0..(URL_CACHE_CAPACITY + 20) {
                cache.put(format!("https://a/{}", i), "body".to_string());
            }
            assert_eq!(cache.len(), URL_CACHE_CAPACITY);
        }
    }

    #[test]
    fn test_stop_flag() {
        let crawler = tests_strict_crawler();
        assert!(crawler.running_handle().load(Ordering::SeqCst));
        crawler.stop();
        assert!(!crawler.running_handle().load(Ordering::SeqCst));
    }
}

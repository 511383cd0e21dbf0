//! Live Vue runtime introspection through a headless browser session.
//!
//! A probe expression is evaluated in the page: it locates the Vue root by
//! bounded BFS from `document.body`, walks the known router property chains
//! (Vue 2 and Vue 3/Router 4 semantics), enumerates routes, optionally
//! clears navigation guards or flips auth meta flags, and returns the
//! findings as JSON. The framework objects are treated as opaque lookup
//! targets; serialization replaces non-plain values with tag markers and
//! never recurses past a shallow depth.

use crate::config::VueDetectorSettings;
use crate::framework::vue::sensitive_route_keyword;
use crate::types::{Result, RouteRecord, RouteSource, WebsiftError};
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Counter for generating unique browser profile directories.
static BROWSER_INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// One meta field flipped by the auth patch.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchRecord {
    pub route: String,
    pub key: String,
    pub original: serde_json::Value,
}

/// Parsed probe output.
#[derive(Debug, Clone, Default)]
pub struct VueProbeResult {
    pub detected: bool,
    pub version: Option<String>,
    pub router_found: bool,
    pub routes: Vec<RouteRecord>,
    pub patches: Vec<PatchRecord>,
    pub storage_pairs: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProbeOutput {
    detected: bool,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    router_found: bool,
    #[serde(default)]
    routes: Vec<RawRoute>,
    #[serde(default)]
    patches: Vec<PatchRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRoute {
    path: String,
    #[serde(default)]
    full_path: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    meta: serde_json::Value,
    #[serde(default)]
    has_auth: bool,
}

/// Headless-browser Vue introspector.
pub struct VueProbe {
    timeout_secs: u64,
    settings: VueDetectorSettings,
    chrome_executable: Option<PathBuf>,
}

impl VueProbe {
    pub fn new(timeout_secs: u64, settings: VueDetectorSettings) -> Self {
        Self {
            timeout_secs,
            settings,
            chrome_executable: None,
        }
    }

    pub fn with_chrome_executable(mut self, path: Option<PathBuf>) -> Self {
        self.chrome_executable = path;
        self
    }

    /// Open the target in a headless browser, run the probe, and harvest
    /// storage pairs. The browser and its profile directory are discarded
    /// afterwards.
    pub async fn probe(&self, url: &str) -> Result<VueProbeResult> {
        if !self.settings.enabled {
            return Ok(VueProbeResult::default());
        }
        info!("probing Vue runtime: {}", url);

        let instance_id = BROWSER_INSTANCE_COUNTER.fetch_add(1, Ordering::SeqCst);
        let temp_dir = std::env::temp_dir().join(format!(
            "websift-browser-{}-{}",
            std::process::id(),
            instance_id
        ));
        if let Err(e) = std::fs::create_dir_all(&temp_dir) {
            debug!("failed to create temp dir {:?}: {}", temp_dir, e);
        }

        let (browser, mut handler) = self.launch_browser(&temp_dir).await?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let outcome = self.run_probe(&browser, url).await;

        drop(browser);
        handler_task.abort();

        let temp_dir_for_cleanup = temp_dir.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Err(e) = std::fs::remove_dir_all(&temp_dir_for_cleanup) {
                debug!("failed to cleanup temp dir {:?}: {}", temp_dir_for_cleanup, e);
            }
        });

        outcome
    }

    async fn launch_browser(
        &self,
        temp_dir: &std::path::Path,
    ) -> Result<(
        Browser,
        impl futures::Stream<Item = std::result::Result<(), chromiumoxide::error::CdpError>>,
    )> {
        let chrome_exe = self
            .chrome_executable
            .clone()
            .or_else(crate::browser::resolve_chrome_executable);

        let mut builder = BrowserConfig::builder().user_data_dir(temp_dir);
        if let Some(exe) = &chrome_exe {
            builder = builder.chrome_executable(exe);
        }
        let config = builder
            .no_sandbox()
            .viewport(None)
            .build()
            .map_err(|e| WebsiftError::BrowserError(format!("browser config: {}", e)))?;

        Browser::launch(config)
            .await
            .map_err(|e| WebsiftError::BrowserError(format!("browser launch: {}", e)))
    }

    async fn run_probe(&self, browser: &Browser, url: &str) -> Result<VueProbeResult> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| WebsiftError::BrowserError(format!("new page: {}", e)))?;

        let navigate = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            page.goto(url),
        )
        .await;
        match navigate {
            Ok(Ok(_)) => debug!("navigation completed"),
            Ok(Err(e)) => warn!("navigation error (continuing): {}", e),
            Err(_) => warn!("navigation timeout (continuing with current state)"),
        }

        // Let the SPA mount before inspecting the runtime.
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        let probe_script = build_probe_script(&self.settings);
        let probe_timeout = Duration::from_millis(self.settings.timeout.max(500));

        let raw: RawProbeOutput =
            match tokio::time::timeout(probe_timeout, page.evaluate(probe_script)).await {
                Ok(Ok(evaluation)) => {
                    let json: String = evaluation.into_value().map_err(|e| {
                        WebsiftError::BrowserError(format!("probe result decode: {}", e))
                    })?;
                    serde_json::from_str(&json)?
                }
                Ok(Err(e)) => {
                    warn!("vue probe evaluation failed: {}", e);
                    return Ok(VueProbeResult::default());
                }
                Err(_) => {
                    warn!("vue probe timed out after {:?}", probe_timeout);
                    return Ok(VueProbeResult::default());
                }
            };

        let storage_pairs = self.harvest_storage(&page).await;

        let routes = raw
            .routes
            .into_iter()
            .map(|route| {
                let matched_keyword =
                    sensitive_route_keyword(&route.path, route.name.as_deref());
                RouteRecord {
                    path: route.path,
                    full_path: route.full_path,
                    name: route.name,
                    meta: route.meta,
                    has_auth: route.has_auth,
                    source: RouteSource::Runtime,
                    matched_keyword,
                }
            })
            .collect();

        Ok(VueProbeResult {
            detected: raw.detected,
            version: raw.version,
            router_found: raw.router_found,
            routes,
            patches: raw.patches,
            storage_pairs,
        })
    }

    /// Dump localStorage and sessionStorage key/value pairs.
    async fn harvest_storage(&self, page: &chromiumoxide::Page) -> Vec<(String, String)> {
        const STORAGE_SCRIPT: &str = r#"(() => {
            const out = {};
            for (const store of [localStorage, sessionStorage]) {
                try {
                    for (let i = 0; i < store.length; i++) {
                        const key = store.key(i);
                        out[key] = String(store.getItem(key)).slice(0, 2048);
                    }
                } catch (e) {}
            }
            return JSON.stringify(out);
        })()"#;

        match page.evaluate(STORAGE_SCRIPT).await {
            Ok(evaluation) => match evaluation.into_value::<String>() {
                Ok(json) => serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&json)
                    .map(|map| {
                        map.into_iter()
                            .map(|(k, v)| (k, v.as_str().unwrap_or_default().to_string()))
                            .collect()
                    })
                    .unwrap_or_default(),
                Err(e) => {
                    debug!("storage decode failed: {}", e);
                    Vec::new()
                }
            },
            Err(e) => {
                debug!("storage harvest failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// The probe expression. Framework objects are only read through well-known
/// property chains; route meta is serialized shallowly with tag markers for
/// non-plain values.
fn build_probe_script(settings: &VueDetectorSettings) -> String {
    PROBE_TEMPLATE
        .replace("__MAX_DEPTH__", &settings.max_depth.to_string())
        .replace(
            "__GUARD_PATCH__",
            if settings.enable_guard_patch { "true" } else { "false" },
        )
        .replace(
            "__AUTH_PATCH__",
            if settings.enable_auth_patch { "true" } else { "false" },
        )
}

const PROBE_TEMPLATE: &str = r#"(() => {
  const MAX_DEPTH = __MAX_DEPTH__;
  const GUARD_PATCH = __GUARD_PATCH__;
  const AUTH_PATCH = __AUTH_PATCH__;
  const AUTH_KEY = /auth|requireAuth|requiresAuth|authenticated|login|permission|role/i;

  const out = { detected: false, version: null, routerFound: false, routes: [], patches: [] };

  const isAuthTruthy = (v) => {
    if (v === true || v === 'true' || v === 1) return true;
    if (Array.isArray(v)) return v.length > 0;
    if (v && typeof v === 'object') return Object.keys(v).length > 0;
    return false;
  };

  const serializeMeta = (meta) => {
    if (!meta || typeof meta !== 'object') return {};
    const plain = {};
    for (const key of Object.keys(meta)) {
      const value = meta[key];
      if (value === null || ['string', 'number', 'boolean'].includes(typeof value)) {
        plain[key] = value;
      } else if (typeof value === 'function') {
        plain[key] = '[Function]';
      } else if (value && typeof value.then === 'function') {
        plain[key] = '[Promise]';
      } else if (Array.isArray(value)) {
        plain[key] = value.filter(x => ['string', 'number', 'boolean'].includes(typeof x));
      } else {
        plain[key] = '[Object]';
      }
    }
    return plain;
  };

  // Find the Vue root by bounded BFS from document.body.
  let root = null;
  const queue = [document.body];
  let visited = 0;
  while (queue.length && visited < MAX_DEPTH) {
    const el = queue.shift();
    if (!el) continue;
    visited++;
    if (el.__vue_app__ || el.__vue__ || el._vnode) { root = el; break; }
    for (const child of el.children || []) queue.push(child);
  }
  if (!root) return JSON.stringify(out);
  out.detected = true;

  // Version and router discovery.
  let router = null;
  if (root.__vue_app__) {
    const app = root.__vue_app__;
    out.version = app.version || '3';
    const gp = app.config && app.config.globalProperties;
    router = (gp && gp.$router)
      || (app._instance && app._instance.appContext && app._instance.appContext.config
          && app._instance.appContext.config.globalProperties
          && app._instance.appContext.config.globalProperties.$router)
      || (app._instance && app._instance.ctx && app._instance.ctx.$router)
      || null;
    if (!router && app._instance && app._instance.provides) {
      for (const sym of Object.getOwnPropertySymbols(app._instance.provides)) {
        const candidate = app._instance.provides[sym];
        if (candidate && typeof candidate.push === 'function' && candidate.options) {
          router = candidate;
          break;
        }
      }
    }
  } else {
    let vm = root.__vue__;
    out.version = (vm && vm.$root && vm.$root.$options && vm.$root.$options._base
      && vm.$root.$options._base.version) || '2';
    while (vm && !vm.$router) vm = vm.$parent;
    router = (vm && vm.$router) || null;
  }
  if (!router) return JSON.stringify(out);
  out.routerFound = true;

  // Route enumeration: getRoutes (Router 4), recursive options.routes,
  // matcher fallback, finally the currently matched records.
  const flatten = (records, parent) => {
    const collected = [];
    for (const record of records || []) {
      if (!record || typeof record.path !== 'string') continue;
      const full = record.path.startsWith('/')
        ? record.path
        : (parent.replace(/\/$/, '') + '/' + record.path);
      collected.push({ record, full });
      if (record.children) collected.push(...flatten(record.children, full));
    }
    return collected;
  };

  let pairs = [];
  if (typeof router.getRoutes === 'function') {
    pairs = router.getRoutes().map(r => ({ record: r, full: r.path }));
  } else if (router.options && Array.isArray(router.options.routes)) {
    pairs = flatten(router.options.routes, '');
  } else if (router.matcher && typeof router.matcher.getRoutes === 'function') {
    pairs = router.matcher.getRoutes().map(r => ({ record: r, full: r.path }));
  } else if (router.history && router.history.current && router.history.current.matched) {
    pairs = router.history.current.matched.map(r => ({ record: r, full: r.path }));
  }

  for (const { record, full } of pairs) {
    const meta = serializeMeta(record.meta);
    const hasAuth = Object.keys(meta).some(k => AUTH_KEY.test(k) && isAuthTruthy(meta[k]));
    out.routes.push({
      path: record.path || full,
      fullPath: full,
      name: typeof record.name === 'string' ? record.name : null,
      meta: meta,
      hasAuth: hasAuth,
    });

    if (AUTH_PATCH && record.meta && typeof record.meta === 'object') {
      for (const key of Object.keys(record.meta)) {
        if (AUTH_KEY.test(key) && isAuthTruthy(record.meta[key])) {
          out.patches.push({ route: record.path || full, key: key, original: meta[key] });
          try { record.meta[key] = false; } catch (e) {}
        }
      }
    }
  }

  if (GUARD_PATCH) {
    const noop = () => () => {};
    try { router.beforeEach = noop; } catch (e) {}
    try { router.beforeResolve = noop; } catch (e) {}
    try { router.afterEach = noop; } catch (e) {}
    for (const prop of ['beforeGuards', 'beforeResolveGuards', 'afterGuards']) {
      const guards = router[prop];
      if (Array.isArray(guards)) guards.length = 0;
      else if (guards && typeof guards.clear === 'function') {
        try { guards.clear(); } catch (e) {}
      }
    }
  }

  return JSON.stringify(out);
})()"#;

/// Detection and route records for the result schema.
pub fn probe_to_detections(
    result: &VueProbeResult,
    source_url: &str,
) -> Vec<(String, crate::types::Detection)> {
    use crate::types::{Detection, DetectionType};

    let mut out = Vec::new();

    let mut det = Detection::regex(
        DetectionType::VueDetection,
        if result.detected { "vue" } else { "none" },
        source_url,
    );
    det.confidence = if result.detected { 0.9 } else { 0.3 };
    if let Some(version) = &result.version {
        det = det.with_context("version", version.as_str());
    }
    det = det.with_context("routerFound", result.router_found);
    det = det.with_context("routeCount", result.routes.len());
    if !result.patches.is_empty() {
        det = det.with_context(
            "patches",
            serde_json::to_value(
                result
                    .patches
                    .iter()
                    .map(|p| {
                        serde_json::json!({
                            "route": p.route,
                            "key": p.key,
                            "original": p.original,
                        })
                    })
                    .collect::<Vec<_>>(),
            )
            .unwrap_or(serde_json::Value::Null),
        );
    }
    if result.detected {
        out.push(("vueDetection".to_string(), det));
    }

    for route in &result.routes {
        let mut det = Detection::regex(DetectionType::VueRoute, route.path.clone(), source_url);
        det.confidence = 0.9;
        det = det.with_context("source", "runtime");
        det = det.with_context("hasAuth", route.has_auth);
        if let Some(name) = &route.name {
            det = det.with_context("name", name.as_str());
        }
        if let Some(full) = &route.full_path {
            det = det.with_context("fullPath", full.as_str());
        }
        if let Some(keyword) = &route.matched_keyword {
            det = det.with_context("matchedKeyword", keyword.as_str());
        }
        if !route.meta.is_null() {
            det = det.with_context("meta", route.meta.clone());
        }
        out.push(("vueRoutes".to_string(), det));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_script_substitution() {
        let settings = VueDetectorSettings {
            enabled: true,
            enable_guard_patch: true,
            enable_auth_patch: false,
            timeout: 3000,
            max_depth: 500,
        };
        let script = build_probe_script(&settings);
        assert!(script.contains("const MAX_DEPTH = 500;"));
        assert!(script.contains("const GUARD_PATCH = true;"));
        assert!(script.contains("const AUTH_PATCH = false;"));
        assert!(!script.contains("__MAX_DEPTH__"));
    }

    #[test]
    fn test_raw_probe_output_parsing() {
        let json = r#"{
            "detected": true,
            "version": "3.4.0",
            "routerFound": true,
            "routes": [
                {"path": "/admin", "fullPath": "/admin", "name": "admin",
                 "meta": {"requiresAuth": true}, "hasAuth": true},
                {"path": "/open", "meta": {}, "hasAuth": false}
            ],
            "patches": [{"route": "/admin", "key": "requiresAuth", "original": true}]
        }"#;
        let raw: RawProbeOutput = serde_json::from_str(json).unwrap();
        assert!(raw.detected);
        assert_eq!(raw.routes.len(), 2);
        assert!(raw.routes[0].has_auth);
        assert_eq!(raw.patches.len(), 1);
    }

    #[test]
    fn test_probe_to_detections() {
        let result = VueProbeResult {
            detected: true,
            version: Some("3.4.0".to_string()),
            router_found: true,
            routes: vec![RouteRecord {
                path: "/admin".to_string(),
                full_path: Some("/admin".to_string()),
                name: Some("admin".to_string()),
                meta: serde_json::json!({"requiresAuth": true}),
                has_auth: true,
                source: RouteSource::Runtime,
                matched_keyword: Some("admin".to_string()),
            }],
            patches: Vec::new(),
            storage_pairs: Vec::new(),
        };

        let detections = probe_to_detections(&result, "https://a.example.com/");
        assert!(detections.iter().any(|(cat, _)| cat == "vueDetection"));
        let (_, route) = detections
            .iter()
            .find(|(cat, _)| cat == "vueRoutes")
            .unwrap();
        assert_eq!(route.value, "/admin");
        assert_eq!(route.context.get("hasAuth"), Some(&true.into()));
    }
}

use std::collections::HashMap;
use std::sync::Mutex;

use url::Url;

/// Prefix the gateway uses to serve downloaded media files.
const FILES_PREFIX: &str = "/api/files/";

/// Turns gateway attachment URLs into absolute, fetchable ones.
///
/// Resolution is pure — the same `(raw, base)` pair always yields the same
/// output — so results are memoized for the lifetime of the resolver with no
/// invalidation.
pub struct MediaResolver {
    base_url: String,
    cache: Mutex<HashMap<String, String>>,
}

impl MediaResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn resolve(&self, raw: &str) -> String {
        if let Some(hit) = self
            .cache
            .lock()
            .expect("resolver cache lock poisoned")
            .get(raw)
        {
            return hit.clone();
        }
        let resolved = resolve_url(raw, &self.base_url);
        self.cache
            .lock()
            .expect("resolver cache lock poisoned")
            .insert(raw.to_string(), resolved.clone());
        resolved
    }
}

/// Already absolute URLs pass through unchanged. Paths under the gateway's
/// file-serving prefix attach to the base directly; everything else is
/// treated as a path relative to the base.
pub fn resolve_url(raw: &str, base: &str) -> String {
    let raw = raw.trim();
    let base = base.trim_end_matches('/');
    if Url::parse(raw).is_ok() {
        return raw.to_string();
    }
    if raw.starts_with(FILES_PREFIX) {
        return format!("{base}{raw}");
    }
    format!("{base}/{}", raw.trim_start_matches('/'))
}

//! Named cache partitions mapping GET request descriptors to stored
//! responses.

use std::time::SystemTime;

use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, Method, StatusCode};
use qrm_fetch::{Request, Response};
use tracing::trace;
use url::Url;

/// A stored request/response pair.
///
/// `date` is parsed from the response `Date` header at insertion time;
/// responses without one carry no date metadata and are never
/// guessed-expired by cleanup.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Request URL.
    pub url: Url,
    /// Request method; only GET requests are ever stored.
    pub method: Method,
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
    /// Origin-reported response date, if any.
    pub date: Option<SystemTime>,
    /// When the entry was stored locally.
    pub stored_at: SystemTime,
}

impl CacheEntry {
    /// Build an entry from an intercepted request and its response.
    pub fn from_parts(request: &Request, response: &Response) -> Self {
        Self {
            url: request.url.clone(),
            method: request.method.clone(),
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            date: response.date(),
            stored_at: SystemTime::now(),
        }
    }

    /// Reconstruct a response from the stored clone.
    pub fn to_response(&self) -> Response {
        Response::new(
            self.url.clone(),
            self.status,
            self.headers.clone(),
            self.body.clone(),
        )
    }
}

/// A named cache partition.
///
/// Keys are GET request URLs. `put` is atomic per key; when two writers
/// race on the same key the last completed write wins.
#[derive(Debug, Default)]
pub struct CachePartition {
    /// Partition name.
    pub name: String,
    entries: HashMap<String, CacheEntry>,
}

impl CachePartition {
    /// Create a new partition.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Store an entry, replacing any previous value for the same URL.
    pub fn put(&mut self, entry: CacheEntry) {
        trace!(cache = %self.name, url = %entry.url, "Cache put");
        self.entries.insert(entry.url.to_string(), entry);
    }

    /// Look up an entry by URL.
    pub fn match_request(&self, url: &str) -> Option<&CacheEntry> {
        self.entries.get(url)
    }

    /// Delete an entry. Returns whether it existed.
    pub fn delete(&mut self, url: &str) -> bool {
        self.entries.remove(url).is_some()
    }

    /// All stored URLs.
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the partition is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The set of named partitions owned by the worker.
///
/// Partitions keep creation order; cross-partition lookup probes them in
/// that order, so the static partition (opened first at install) shadows
/// a dynamic copy of the same URL.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: Vec<CachePartition>,
}

impl CacheStorage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a partition, creating it if absent.
    pub fn open(&mut self, name: &str) -> &mut CachePartition {
        let pos = match self.caches.iter().position(|c| c.name == name) {
            Some(pos) => pos,
            None => {
                self.caches.push(CachePartition::new(name));
                self.caches.len() - 1
            }
        };
        &mut self.caches[pos]
    }

    /// Check if a partition exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.iter().any(|c| c.name == name)
    }

    /// Get a partition without creating it.
    pub fn get(&self, name: &str) -> Option<&CachePartition> {
        self.caches.iter().find(|c| c.name == name)
    }

    /// Delete a partition. Returns whether it existed.
    pub fn delete(&mut self, name: &str) -> bool {
        match self.caches.iter().position(|c| c.name == name) {
            Some(pos) => {
                self.caches.remove(pos);
                true
            }
            None => false,
        }
    }

    /// All partition names, in creation order.
    pub fn keys(&self) -> Vec<String> {
        self.caches.iter().map(|c| c.name.clone()).collect()
    }

    /// Look up a URL across all partitions, in creation order.
    pub fn match_request(&self, url: &str) -> Option<&CacheEntry> {
        self.caches
            .iter()
            .find_map(|cache| cache.match_request(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn entry(url: &str, body: &str) -> CacheEntry {
        let url = Url::parse(url).unwrap();
        let request = Request::get(url.clone());
        let response = Response::new(
            url,
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::from(body.to_string()),
        );
        CacheEntry::from_parts(&request, &response)
    }

    #[test]
    fn test_put_and_match() {
        let mut cache = CachePartition::new("qr-master-static-v2.0.0");
        cache.put(entry("https://example.com/index.html", "<html>"));

        assert!(cache.match_request("https://example.com/index.html").is_some());
        assert!(cache.match_request("https://example.com/other.html").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_stored_clone_is_byte_identical() {
        let mut cache = CachePartition::new("qr-master-dynamic-v2.0.0");
        cache.put(entry("https://example.com/data.json", r#"{"a":1}"#));

        let stored = cache
            .match_request("https://example.com/data.json")
            .unwrap()
            .to_response();
        assert_eq!(stored.body, Bytes::from(r#"{"a":1}"#));
        assert_eq!(stored.status, StatusCode::OK);
    }

    #[test]
    fn test_last_writer_wins() {
        let mut cache = CachePartition::new("qr-master-dynamic-v2.0.0");
        cache.put(entry("https://example.com/a", "first"));
        cache.put(entry("https://example.com/a", "second"));

        let stored = cache.match_request("https://example.com/a").unwrap();
        assert_eq!(stored.body, Bytes::from("second"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_delete() {
        let mut cache = CachePartition::new("test");
        cache.put(entry("https://example.com/a", "x"));

        assert!(cache.delete("https://example.com/a"));
        assert!(!cache.delete("https://example.com/a"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_entry_date_from_header() {
        let url = Url::parse("https://example.com/a").unwrap();
        let request = Request::get(url.clone());
        let mut headers = HeaderMap::new();
        headers.insert(
            "date",
            HeaderValue::from_static("Sun, 06 Nov 1994 08:49:37 GMT"),
        );
        let response = Response::new(url, StatusCode::OK, headers, Bytes::new());

        let entry = CacheEntry::from_parts(&request, &response);
        assert!(entry.date.is_some());
    }

    #[test]
    fn test_entry_without_date_header() {
        let e = entry("https://example.com/a", "x");
        assert!(e.date.is_none());
    }

    #[test]
    fn test_storage_open_and_delete() {
        let mut storage = CacheStorage::new();

        assert!(!storage.has("v1"));
        storage.open("v1");
        assert!(storage.has("v1"));

        assert!(storage.delete("v1"));
        assert!(!storage.has("v1"));
        assert!(!storage.delete("v1"));
    }

    #[test]
    fn test_storage_match_across_partitions() {
        let mut storage = CacheStorage::new();
        storage
            .open("qr-master-static-v2.0.0")
            .put(entry("https://example.com/", "root"));

        assert!(storage.match_request("https://example.com/").is_some());
        assert!(storage.match_request("https://example.com/missing").is_none());
    }

    #[test]
    fn test_match_prefers_earlier_opened_partition() {
        // A background refresh writes static assets into the dynamic
        // partition too; the precached copy must keep winning.
        let mut storage = CacheStorage::new();
        storage
            .open("qr-master-static-v2.0.0")
            .put(entry("https://example.com/index.html", "precached"));
        storage
            .open("qr-master-dynamic-v2.0.0")
            .put(entry("https://example.com/index.html", "refreshed"));

        let served = storage
            .match_request("https://example.com/index.html")
            .unwrap();
        assert_eq!(served.body, Bytes::from("precached"));
    }

    #[test]
    fn test_match_order_stable_across_version_names() {
        // Probe order is creation order, never the hash of the names.
        for version in ["0.0.1", "0.0.2", "0.0.7", "0.1.2", "1.0.0", "2.0.0"] {
            let mut storage = CacheStorage::new();
            storage
                .open(&format!("qr-master-static-v{version}"))
                .put(entry("https://example.com/icon-192.png", "static"));
            storage
                .open(&format!("qr-master-dynamic-v{version}"))
                .put(entry("https://example.com/icon-192.png", "dynamic"));

            let served = storage
                .match_request("https://example.com/icon-192.png")
                .unwrap();
            assert_eq!(served.body, Bytes::from("static"), "version {version}");
        }
    }

    #[test]
    fn test_entry_records_method() {
        let e = entry("https://example.com/a", "x");
        assert_eq!(e.method, Method::GET);
    }
}

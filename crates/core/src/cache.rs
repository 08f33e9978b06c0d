//! Fingerprinted response cache.
//!
//! Keys are a SHA-512 digest of a canonical rendering of the query's
//! semantic fields. Because the digest is the lookup key, every hit is
//! verified against the stored canonical key; a mismatch is treated as a
//! hash collision and served as a miss rather than wrong data.

use crate::query::{BackendQuery, QueryResponse};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use meridian_common::config::CacheSettings;
use moka::future::Cache;
use serde::Serialize;
use sha2::{Digest, Sha512};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Canonical identity of a query for caching purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFingerprint {
    canonical_key: String,
    hash: String,
}

#[derive(Serialize)]
struct CanonicalForm<'a> {
    table: &'a str,
    grain: &'a str,
    dimensions: Vec<&'a str>,
    metrics: Vec<&'a str>,
    filters: Vec<CanonicalFilter<'a>>,
    intervals: String,
}

#[derive(Serialize)]
struct CanonicalFilter<'a> {
    dimension: &'a str,
    op: &'a crate::query::FilterOp,
    values: Vec<&'a str>,
}

impl QueryFingerprint {
    /// Build the fingerprint from a backend query. Field order in the
    /// canonical form is fixed and list fields are sorted, so logically
    /// identical queries produce identical keys.
    pub fn of(query: &BackendQuery) -> Self {
        let mut dimensions: Vec<&str> = query.dimensions().iter().map(String::as_str).collect();
        dimensions.sort_unstable();
        let mut metrics: Vec<&str> = query.metrics().iter().map(String::as_str).collect();
        metrics.sort_unstable();

        let mut filters: Vec<CanonicalFilter<'_>> = query
            .filters()
            .iter()
            .map(|f| {
                let mut values: Vec<&str> = f.values.iter().map(String::as_str).collect();
                values.sort_unstable();
                CanonicalFilter {
                    dimension: &f.dimension,
                    op: &f.op,
                    values,
                }
            })
            .collect();
        filters.sort_by(|a, b| a.dimension.cmp(b.dimension));

        let form = CanonicalForm {
            table: query.data_source(),
            grain: query.grain().as_str(),
            dimensions,
            metrics,
            filters,
            intervals: query.intervals().to_string(),
        };

        // Struct serialization with fixed field order cannot fail.
        let canonical_key =
            serde_json::to_string(&form).unwrap_or_else(|_| format!("{:?}", query));
        let digest = Sha512::digest(canonical_key.as_bytes());
        let hash = STANDARD_NO_PAD.encode(digest);

        Self {
            canonical_key,
            hash,
        }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn canonical_key(&self) -> &str {
        &self.canonical_key
    }

    /// Test hook for forcing hash collisions.
    #[cfg(test)]
    pub(crate) fn from_parts(canonical_key: &str, hash: &str) -> Self {
        Self {
            canonical_key: canonical_key.to_string(),
            hash: hash.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    canonical_key: String,
    response: QueryResponse,
    expires_at: Option<DateTime<Utc>>,
}

/// In-process response cache with TTL eviction and collision verification.
pub struct ResponseCache {
    entries: Cache<String, Arc<CacheEntry>>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(settings: &CacheSettings) -> Self {
        let ttl = Duration::from_secs(settings.ttl_seconds);
        let entries = Cache::builder()
            .max_capacity(settings.max_entries)
            .time_to_live(ttl)
            .build();
        Self { entries, ttl }
    }

    /// Look up a fingerprint; a stale or colliding entry counts as a miss.
    pub async fn get(&self, fingerprint: &QueryFingerprint) -> Option<QueryResponse> {
        let entry = self.entries.get(fingerprint.hash()).await?;

        if entry.canonical_key != fingerprint.canonical_key() {
            warn!(
                target: "cache",
                hash = fingerprint.hash(),
                "hash collision detected, serving as miss"
            );
            return None;
        }

        if let Some(expires_at) = entry.expires_at {
            if expires_at <= Utc::now() {
                self.entries.invalidate(fingerprint.hash()).await;
                debug!(target: "cache", hash = fingerprint.hash(), "entry expired");
                return None;
            }
        }

        debug!(target: "cache", hash = fingerprint.hash(), "hit");
        Some(entry.response.clone())
    }

    /// Store a response. Failures to serialize or store never fail the
    /// request; the cache is an optimization layer.
    pub async fn put(&self, fingerprint: &QueryFingerprint, response: QueryResponse) {
        let expires_at = chrono::Duration::from_std(self.ttl)
            .ok()
            .map(|ttl| Utc::now() + ttl);
        let entry = Arc::new(CacheEntry {
            canonical_key: fingerprint.canonical_key().to_string(),
            response,
            expires_at,
        });
        self.entries
            .insert(fingerprint.hash().to_string(), entry)
            .await;
        debug!(target: "cache", hash = fingerprint.hash(), "stored");
    }

    pub async fn invalidate_all(&self) {
        self.entries.invalidate_all();
    }

    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }

    #[cfg(test)]
    pub(crate) async fn put_raw(
        &self,
        hash: &str,
        canonical_key: &str,
        response: QueryResponse,
    ) {
        let entry = Arc::new(CacheEntry {
            canonical_key: canonical_key.to_string(),
            response,
            expires_at: None,
        });
        self.entries.insert(hash.to_string(), entry).await;
    }
}

//! Resolution cache.
//!
//! Endpoints are keyed by `service@scheme://host:port` and built at most
//! once per key, even when several calls race for the same key.

use crate::address::ServiceAddress;
use crate::error::ClientError;
use crate::registry::ProviderUrl;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// What a service resolves to at one address.
#[derive(Debug)]
pub struct ResolvedEndpoint {
    service: String,
    address: ServiceAddress,
    /// Providers discovered through a registry, filled on first use.
    providers: OnceCell<Vec<ProviderUrl>>,
}

impl ResolvedEndpoint {
    pub fn new(service: impl Into<String>, address: ServiceAddress) -> Self {
        Self {
            service: service.into(),
            address,
            providers: OnceCell::new(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn address(&self) -> &ServiceAddress {
        &self.address
    }

    pub fn key(&self) -> String {
        cache_key(&self.service, &self.address)
    }

    /// Returns the discovered providers, running `discover` if this is the
    /// first lookup. A failed discovery is not cached.
    pub async fn providers<F, Fut>(&self, discover: F) -> Result<&[ProviderUrl], ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<ProviderUrl>, ClientError>>,
    {
        self.providers
            .get_or_try_init(discover)
            .await
            .map(Vec::as_slice)
    }

    /// Providers if discovery already ran.
    pub fn cached_providers(&self) -> Option<&[ProviderUrl]> {
        self.providers.get().map(Vec::as_slice)
    }
}

pub fn cache_key(service: &str, address: &ServiceAddress) -> String {
    format!("{}@{}", service, address.normalized())
}

/// Process-wide map of resolved endpoints.
#[derive(Debug, Default)]
pub struct ResolutionCache {
    entries: DashMap<String, Arc<ResolvedEndpoint>>,
    constructions: AtomicUsize,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the endpoint for `service` at `address`, creating it if
    /// absent. Creation happens under the shard lock, so it runs once per key.
    pub fn get_or_create(&self, service: &str, address: &ServiceAddress) -> Arc<ResolvedEndpoint> {
        let key = cache_key(service, address);
        if let Some(endpoint) = self.entries.get(&key) {
            return endpoint.clone();
        }

        self.entries
            .entry(key)
            .or_insert_with(|| {
                self.constructions.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(service, address = %address, "creating endpoint");
                Arc::new(ResolvedEndpoint::new(service, address.clone()))
            })
            .clone()
    }

    pub fn get(&self, service: &str, address: &ServiceAddress) -> Option<Arc<ResolvedEndpoint>> {
        self.entries
            .get(&cache_key(service, address))
            .map(|entry| entry.clone())
    }

    /// Drops every endpoint.
    pub fn clear(&self) {
        let dropped = self.entries.len();
        self.entries.clear();
        tracing::debug!(dropped, "resolution cache cleared");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of endpoints ever constructed.
    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct() -> ServiceAddress {
        ServiceAddress::classify("10.0.0.1").unwrap()
    }

    #[test]
    fn test_key_format() {
        let endpoint = ResolvedEndpoint::new("com.acme.Svc", direct());
        assert_eq!(endpoint.key(), "com.acme.Svc@dubbo://10.0.0.1:20880");
    }

    #[test]
    fn test_get_or_create_reuses() {
        let cache = ResolutionCache::new();
        let first = cache.get_or_create("com.acme.Svc", &direct());
        let second = cache.get_or_create("com.acme.Svc", &direct());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.constructions(), 1);

        cache.get_or_create("com.acme.Other", &direct());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.constructions(), 2);
    }

    #[test]
    fn test_clear() {
        let cache = ResolutionCache::new();
        cache.get_or_create("com.acme.Svc", &direct());
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get("com.acme.Svc", &direct()).is_none());

        cache.get_or_create("com.acme.Svc", &direct());
        assert_eq!(cache.constructions(), 2);
    }

    #[test]
    fn test_concurrent_construction_once() {
        let cache = Arc::new(ResolutionCache::new());
        let address = ServiceAddress::classify("zookeeper://127.0.0.1:2181").unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let address = address.clone();
                std::thread::spawn(move || cache.get_or_create("com.acme.Svc", &address))
            })
            .collect();
        let endpoints: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(cache.constructions(), 1);
        assert!(endpoints.iter().all(|e| Arc::ptr_eq(e, &endpoints[0])));
    }

    #[tokio::test]
    async fn test_providers_discovered_once() {
        let endpoint = ResolvedEndpoint::new("com.acme.Svc", direct());
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let providers = endpoint
                .providers(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![ProviderUrl::parse("dubbo://10.0.0.5:20880/com.acme.Svc").unwrap()])
                })
                .await
                .unwrap();
            assert_eq!(providers.len(), 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(endpoint.cached_providers().is_some());
    }

    #[tokio::test]
    async fn test_failed_discovery_retried() {
        let endpoint = ResolvedEndpoint::new("com.acme.Svc", direct());
        let failed = endpoint
            .providers(|| async { Err(ClientError::InvalidParameter("x".to_string())) })
            .await;
        assert!(failed.is_err());
        assert!(endpoint.cached_providers().is_none());
    }
}

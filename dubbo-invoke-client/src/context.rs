//! The client context: configuration, resolution cache and HTTP client,
//! shared by every invocation made through it.

use crate::address::{RegistryScheme, ServiceAddress};
use crate::cache::{ResolutionCache, ResolvedEndpoint};
use crate::config::ClientConfig;
use crate::error::{ClientError, ResolutionError};
use crate::http::HttpClient;
use crate::invoker::{Invocation, Invoker};
use crate::params;
use crate::registry::{DiscoveryQuery, RegistryClient};
use crate::result::InvocationResult;
use crate::transport;
use dubbo_invoke_protocol::Value;
use parking_lot::RwLock;
use std::sync::Arc;

/// Entry point for invocations.
///
/// A context is cheap to share behind an `Arc`; concurrent invocations only
/// contend on the resolution cache.
pub struct ClientContext {
    config: RwLock<ClientConfig>,
    cache: ResolutionCache,
    http: HttpClient,
}

impl ClientContext {
    /// Creates a context from a validated configuration.
    pub fn new(config: ClientConfig) -> Self {
        let http = HttpClient::new(config.timeouts.http_connect(), config.timeouts.http_read());
        Self {
            config: RwLock::new(config),
            cache: ResolutionCache::new(),
            http,
        }
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> ClientConfig {
        self.config.read().clone()
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Replaces the configured addresses (`None` keeps the current one) and
    /// clears the resolution cache.
    pub fn update_addresses(
        &self,
        service_address: Option<&str>,
        registry_address: Option<&str>,
    ) -> Result<(), ClientError> {
        let mut updated = self.config();
        if let Some(address) = service_address {
            updated.service_address = address.trim().to_string();
        }
        if let Some(address) = registry_address {
            updated.registry_address = address.trim().to_string();
        }
        updated.validate()?;

        *self.config.write() = updated;
        self.cache.clear();
        tracing::info!("addresses updated");
        Ok(())
    }

    /// Drops every resolved endpoint.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Classifies the address for `service` and returns its cached endpoint.
    pub fn resolve(
        &self,
        service: &str,
        address_override: Option<&str>,
    ) -> Result<Arc<ResolvedEndpoint>, ClientError> {
        let address = {
            let config = self.config.read();
            let raw = config.select_address(address_override);
            if raw.is_empty() {
                return Err(ResolutionError::InvalidAddress(
                    "no service or registry address configured".to_string(),
                )
                .into());
            }
            ServiceAddress::classify_with_port(raw, config.service_port)?
        };
        Ok(self.cache.get_or_create(service, &address))
    }

    // =========================================================================
    // Invocation
    // =========================================================================

    /// Invokes a method and reports the outcome.
    pub async fn invoke(&self, invocation: &Invocation) -> InvocationResult {
        self.try_invoke(invocation).await.into()
    }

    /// Invokes a method, returning the sanitized value or the error.
    pub async fn try_invoke(&self, invocation: &Invocation) -> Result<Value, ClientError> {
        if invocation.service.trim().is_empty() || invocation.method.trim().is_empty() {
            return Err(ClientError::InvalidParameter(
                "service and method are required".to_string(),
            ));
        }
        let endpoint = self.resolve(&invocation.service, invocation.address.as_deref())?;
        let config = self.config();
        Invoker::new(&config, &self.http)
            .invoke(&endpoint, invocation)
            .await
    }

    /// Invokes a method with JSON parameters and returns the JSON result or
    /// failure envelope.
    pub async fn invoke_json(
        &self,
        service: &str,
        method: &str,
        type_hints: &[String],
        parameters: Vec<serde_json::Value>,
        address_override: Option<&str>,
    ) -> serde_json::Value {
        let parameters = serde_json::Value::Array(parameters);
        let parameters = match params::convert_json(parameters, type_hints) {
            Ok(parameters) => parameters,
            Err(err) => return InvocationResult::from(err).to_json(),
        };

        let mut invocation = Invocation::new(service, method).with_parameters(parameters);
        if let Some(address) = address_override {
            invocation = invocation.with_address(address);
        }
        self.invoke(&invocation).await.to_json()
    }

    /// Checks that the target of `service` is reachable: the provider for a
    /// direct address, the registry otherwise.
    pub async fn test_connection(&self, service: &str, address_override: Option<&str>) -> bool {
        let endpoint = match self.resolve(service, address_override) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                tracing::warn!(error = %err, "connection test: resolution failed");
                return false;
            }
        };
        let timeouts = self.config().timeouts;

        let outcome: Result<(), ClientError> = match endpoint.address() {
            ServiceAddress::Direct { host, port } => {
                transport::check_reachable(host, *port, timeouts.connect())
                    .await
                    .map_err(Into::into)
            }
            // multicast has no server to connect to, so ask the group instead
            address @ ServiceAddress::Registry {
                scheme: RegistryScheme::Multicast,
                ..
            } => match RegistryClient::for_address(address, &timeouts, &self.http) {
                Ok(registry) => {
                    let query = DiscoveryQuery {
                        service,
                        version: "",
                        group: "",
                    };
                    registry.discover(query, &timeouts).await.map(|_| ())
                }
                Err(err) => Err(err.into()),
            },
            ServiceAddress::Registry { host, port, .. } => {
                transport::check_reachable(host, *port, timeouts.registry_connect())
                    .await
                    .map_err(Into::into)
            }
        };

        match outcome {
            Ok(()) => {
                tracing::info!(target_addr = %endpoint.address(), "connection test passed");
                true
            }
            Err(err) => {
                tracing::warn!(
                    target_addr = %endpoint.address(),
                    error = %err,
                    "connection test failed"
                );
                false
            }
        }
    }
}

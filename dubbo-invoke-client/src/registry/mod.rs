//! Provider discovery through registry centers.
//!
//! Each registry is asked for the provider URLs of one service. The raw
//! registrations are then filtered down to Dubbo providers matching the
//! requested version and group.

mod consul;
mod multicast;
mod nacos;
mod redis;
mod url;
mod zookeeper;

pub use consul::ConsulRegistry;
pub use multicast::{parse_announcement, Announcement, MulticastRegistry};
pub use nacos::NacosRegistry;
pub use redis::RedisRegistry;
pub use url::{percent_decode, percent_encode, ProviderUrl};
pub use zookeeper::ZookeeperRegistry;

use crate::address::{RegistryScheme, ServiceAddress};
use crate::config::TimeoutConfig;
use crate::error::{ClientError, ResolutionError};
use crate::http::HttpClient;
use std::time::Duration;

/// What to look up.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryQuery<'a> {
    pub service: &'a str,
    pub version: &'a str,
    pub group: &'a str,
}

/// A client for one registry center.
pub enum RegistryClient {
    Zookeeper(ZookeeperRegistry),
    Nacos(NacosRegistry),
    Consul(ConsulRegistry),
    Redis(RedisRegistry),
    Multicast(MulticastRegistry),
}

impl RegistryClient {
    /// Builds the client for a registry address.
    pub fn for_address(
        address: &ServiceAddress,
        timeouts: &TimeoutConfig,
        http: &HttpClient,
    ) -> Result<Self, ResolutionError> {
        let ServiceAddress::Registry { scheme, host, port } = address else {
            return Err(ResolutionError::InvalidAddress(format!(
                "{} is not a registry address",
                address
            )));
        };
        let (host, port) = (host.clone(), *port);

        Ok(match scheme {
            RegistryScheme::Zookeeper => {
                Self::Zookeeper(ZookeeperRegistry::new(host, port, timeouts.zookeeper_connect()))
            }
            RegistryScheme::Nacos => Self::Nacos(NacosRegistry::new(host, port, http.clone())),
            RegistryScheme::Consul => Self::Consul(ConsulRegistry::new(host, port, http.clone())),
            RegistryScheme::Redis => {
                Self::Redis(RedisRegistry::new(host, port, timeouts.registry_connect()))
            }
            RegistryScheme::Multicast => Self::Multicast(MulticastRegistry::new(
                &host,
                port,
                timeouts.multicast_wait(),
            )?),
        })
    }

    pub fn name(&self) -> String {
        let (scheme, authority) = match self {
            Self::Zookeeper(r) => ("zookeeper", r.authority()),
            Self::Nacos(r) => ("nacos", r.authority()),
            Self::Consul(r) => ("consul", r.authority()),
            Self::Redis(r) => ("redis", r.authority()),
            Self::Multicast(r) => ("multicast", r.authority()),
        };
        format!("{}://{}", scheme, authority)
    }

    /// Upper bound for one lookup.
    fn budget(&self, timeouts: &TimeoutConfig) -> Duration {
        match self {
            Self::Zookeeper(_) => timeouts.zookeeper_connect(),
            Self::Multicast(_) => timeouts.multicast_wait() + timeouts.registry_connect(),
            _ => timeouts.registry_connect(),
        }
    }

    /// Returns every registration of the service, unfiltered.
    pub async fn lookup(
        &self,
        query: DiscoveryQuery<'_>,
        timeouts: &TimeoutConfig,
    ) -> Result<Vec<ProviderUrl>, ClientError> {
        let budget = self.budget(timeouts);
        let lookup = async {
            match self {
                Self::Zookeeper(r) => r.providers(query.service).await,
                Self::Nacos(r) => r.providers(query).await,
                Self::Consul(r) => r.providers(query.service).await,
                Self::Redis(r) => r.providers(query.service).await,
                Self::Multicast(r) => r.providers(query.service).await,
            }
        };

        match tokio::time::timeout(budget, lookup).await {
            Ok(Ok(providers)) => Ok(providers),
            Ok(Err(ClientError::Transport(err))) => Err(ResolutionError::RegistryUnavailable {
                registry: self.name(),
                reason: err.to_string(),
            }
            .into()),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ResolutionError::RegistryUnavailable {
                registry: self.name(),
                reason: format!("lookup timed out after {}ms", budget.as_millis()),
            }
            .into()),
        }
    }

    /// Returns the usable providers of the service.
    ///
    /// Fails with [`ResolutionError::NoProvider`] when none match.
    pub async fn discover(
        &self,
        query: DiscoveryQuery<'_>,
        timeouts: &TimeoutConfig,
    ) -> Result<Vec<ProviderUrl>, ClientError> {
        let registered = self.lookup(query, timeouts).await?;
        let total = registered.len();
        let providers: Vec<ProviderUrl> = registered
            .into_iter()
            .filter(|p| p.matches(query.service, query.version, query.group))
            .collect();

        tracing::info!(
            registry = %self.name(),
            service = query.service,
            registered = total,
            usable = providers.len(),
            "discovered providers"
        );

        if providers.is_empty() {
            return Err(ResolutionError::NoProvider {
                service: query.service.to_string(),
                registry: self.name(),
            }
            .into());
        }
        Ok(providers)
    }
}

/// Parses raw registrations, skipping (and logging) malformed ones.
fn parse_all<I, S>(raw: I) -> Vec<ProviderUrl>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .filter_map(|entry| match ProviderUrl::parse(entry.as_ref()) {
            Ok(url) => Some(url),
            Err(err) => {
                tracing::debug!(error = %err, "skipping registration");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_skips_garbage() {
        let parsed = parse_all([
            "dubbo://10.0.0.1:20880/com.acme.Svc",
            "garbage",
            "dubbo%3A%2F%2F10.0.0.2%3A20880%2Fcom.acme.Svc",
        ]);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].host, "10.0.0.2");
    }

    #[test]
    fn test_direct_address_rejected() {
        let address = ServiceAddress::classify("10.0.0.1").unwrap();
        let http = HttpClient::new(Duration::from_secs(1), Duration::from_secs(1));
        let result = RegistryClient::for_address(&address, &TimeoutConfig::default(), &http);
        assert!(matches!(result, Err(ResolutionError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_unreachable_registry_is_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let address = ServiceAddress::classify(&format!("redis://127.0.0.1:{}", port)).unwrap();
        let timeouts = TimeoutConfig::default();
        let http = HttpClient::new(timeouts.http_connect(), timeouts.http_read());
        let registry = RegistryClient::for_address(&address, &timeouts, &http).unwrap();

        let query = DiscoveryQuery {
            service: "com.acme.Svc",
            version: "",
            group: "",
        };
        let err = registry.discover(query, &timeouts).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Resolution(ResolutionError::RegistryUnavailable { .. })
        ));
    }
}

//! Nacos naming service lookups over its v1 HTTP API.

use super::url::is_wildcard;
use super::{percent_encode, DiscoveryQuery, ProviderUrl};
use crate::address::authority;
use crate::error::{ClientError, ResolutionError};
use crate::http::HttpClient;
use serde::Deserialize;
use std::collections::BTreeMap;

pub struct NacosRegistry {
    host: String,
    port: u16,
    http: HttpClient,
}

#[derive(Debug, Deserialize)]
struct InstanceList {
    #[serde(default)]
    hosts: Vec<Instance>,
}

#[derive(Debug, Deserialize)]
struct Instance {
    ip: String,
    port: u16,
    #[serde(default = "enabled")]
    healthy: bool,
    #[serde(default = "enabled")]
    enabled: bool,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

fn enabled() -> bool {
    true
}

/// Name under which Dubbo registers providers in Nacos:
/// `providers:<service>:<version>:<group>`, with unset parts left blank.
pub fn service_name(query: DiscoveryQuery<'_>) -> String {
    let version = if is_wildcard(query.version) {
        ""
    } else {
        query.version
    };
    let group = if query.group == "*" { "" } else { query.group };
    format!("providers:{}:{}:{}", query.service, version, group)
}

impl NacosRegistry {
    pub fn new(host: String, port: u16, http: HttpClient) -> Self {
        Self { host, port, http }
    }

    pub fn authority(&self) -> String {
        authority(&self.host, self.port)
    }

    pub async fn providers(
        &self,
        query: DiscoveryQuery<'_>,
    ) -> Result<Vec<ProviderUrl>, ClientError> {
        let url = format!(
            "http://{}/nacos/v1/ns/instance/list?serviceName={}&healthyOnly=true",
            self.authority(),
            percent_encode(&service_name(query))
        );
        let (status, body) = self.http.get(&url).await?;

        match status.as_u16() {
            200..=299 => {}
            401 | 403 => {
                return Err(ResolutionError::AuthenticationRequired(format!(
                    "nacos://{} rejected the request",
                    self.authority()
                ))
                .into())
            }
            code => {
                return Err(ResolutionError::Registry(format!(
                    "nacos returned HTTP {}: {}",
                    code,
                    String::from_utf8_lossy(&body).trim()
                ))
                .into())
            }
        }

        parse_instances(&body, query.service).map_err(Into::into)
    }
}

fn parse_instances(body: &[u8], service: &str) -> Result<Vec<ProviderUrl>, ResolutionError> {
    let list: InstanceList = serde_json::from_slice(body)
        .map_err(|e| ResolutionError::Registry(format!("bad nacos instance list: {}", e)))?;

    Ok(list
        .hosts
        .into_iter()
        .filter(|instance| instance.healthy && instance.enabled)
        .map(|instance| {
            let mut params = instance.metadata;
            let protocol = params
                .remove("protocol")
                .unwrap_or_else(|| "dubbo".to_string());
            params
                .entry("interface".to_string())
                .or_insert_with(|| service.to_string());
            ProviderUrl {
                protocol,
                host: instance.ip,
                port: instance.port,
                path: service.to_string(),
                params,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query<'a>(version: &'a str, group: &'a str) -> DiscoveryQuery<'a> {
        DiscoveryQuery {
            service: "com.acme.Svc",
            version,
            group,
        }
    }

    #[test]
    fn test_service_name() {
        assert_eq!(service_name(query("", "")), "providers:com.acme.Svc::");
        assert_eq!(service_name(query("0.0.0", "*")), "providers:com.acme.Svc::");
        assert_eq!(
            service_name(query("1.0.0", "blue")),
            "providers:com.acme.Svc:1.0.0:blue"
        );
    }

    #[test]
    fn test_parse_instances() {
        let body = br#"{
            "name": "DEFAULT_GROUP@@providers:com.acme.Svc::",
            "hosts": [
                {"ip": "10.0.0.1", "port": 20880, "healthy": true, "enabled": true,
                 "metadata": {"version": "1.0.0", "side": "provider"}},
                {"ip": "10.0.0.2", "port": 20880, "healthy": false,
                 "metadata": {}},
                {"ip": "10.0.0.3", "port": 8080,
                 "metadata": {"protocol": "rest"}}
            ]
        }"#;
        let providers = parse_instances(body, "com.acme.Svc").unwrap();
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[0].host, "10.0.0.1");
        assert_eq!(providers[0].param("version"), Some("1.0.0"));
        assert!(providers[0].matches("com.acme.Svc", "1.0.0", ""));
        assert_eq!(providers[1].protocol, "rest");
        assert!(!providers[1].matches("com.acme.Svc", "", ""));
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_instances(b"<html>", "com.acme.Svc").is_err());
        assert!(parse_instances(b"{}", "com.acme.Svc").unwrap().is_empty());
    }
}

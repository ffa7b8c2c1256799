//! Consul health-API lookups.

use super::{percent_encode, ProviderUrl};
use crate::address::authority;
use crate::error::{ClientError, ResolutionError};
use crate::http::HttpClient;
use serde::Deserialize;
use std::collections::BTreeMap;

pub struct ConsulRegistry {
    host: String,
    port: u16,
    http: HttpClient,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceEntry {
    #[serde(default)]
    node: Option<Node>,
    service: AgentService,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Node {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentService {
    #[serde(default)]
    address: String,
    port: u16,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    meta: Option<BTreeMap<String, String>>,
}

impl ConsulRegistry {
    pub fn new(host: String, port: u16, http: HttpClient) -> Self {
        Self { host, port, http }
    }

    pub fn authority(&self) -> String {
        authority(&self.host, self.port)
    }

    pub async fn providers(&self, service: &str) -> Result<Vec<ProviderUrl>, ClientError> {
        let url = format!(
            "http://{}/v1/health/service/{}?passing=true",
            self.authority(),
            percent_encode(service)
        );
        let (status, body) = self.http.get(&url).await?;

        match status.as_u16() {
            200..=299 => parse_entries(&body, service).map_err(Into::into),
            401 | 403 => Err(ResolutionError::AuthenticationRequired(format!(
                "consul://{} requires an ACL token",
                self.authority()
            ))
            .into()),
            code => Err(ResolutionError::Registry(format!(
                "consul returned HTTP {}: {}",
                code,
                String::from_utf8_lossy(&body).trim()
            ))
            .into()),
        }
    }
}

fn parse_entries(body: &[u8], service: &str) -> Result<Vec<ProviderUrl>, ResolutionError> {
    let entries: Vec<ServiceEntry> = serde_json::from_slice(body)
        .map_err(|e| ResolutionError::Registry(format!("bad consul health response: {}", e)))?;

    Ok(entries
        .into_iter()
        .filter_map(|entry| {
            let host = if entry.service.address.is_empty() {
                entry.node.map(|node| node.address).unwrap_or_default()
            } else {
                entry.service.address
            };
            if host.is_empty() {
                return None;
            }

            // Dubbo publishes its URL parameters both as meta and as k=v tags
            let mut params = entry.service.meta.unwrap_or_default();
            for tag in entry.service.tags.unwrap_or_default() {
                if let Some((key, value)) = tag.split_once('=') {
                    params
                        .entry(key.to_string())
                        .or_insert_with(|| value.to_string());
                }
            }
            let protocol = params
                .remove("protocol")
                .unwrap_or_else(|| "dubbo".to_string());
            params
                .entry("interface".to_string())
                .or_insert_with(|| service.to_string());

            Some(ProviderUrl {
                protocol,
                host,
                port: entry.service.port,
                path: service.to_string(),
                params,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entries() {
        let body = br#"[
            {"Node": {"Node": "n1", "Address": "10.0.0.9"},
             "Service": {"ID": "a", "Service": "com.acme.Svc", "Address": "10.0.0.1",
                         "Port": 20880, "Tags": ["version=1.0.0", "dubbo"],
                         "Meta": {"group": "blue"}}},
            {"Node": {"Node": "n2", "Address": "10.0.0.2"},
             "Service": {"ID": "b", "Service": "com.acme.Svc", "Address": "",
                         "Port": 20881, "Tags": null, "Meta": null}}
        ]"#;
        let providers = parse_entries(body, "com.acme.Svc").unwrap();
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[0].host, "10.0.0.1");
        assert_eq!(providers[0].param("version"), Some("1.0.0"));
        assert_eq!(providers[0].param("group"), Some("blue"));
        assert_eq!(providers[1].host, "10.0.0.2");
        assert_eq!(providers[1].port, 20881);
        assert!(providers[1].matches("com.acme.Svc", "", ""));
    }

    #[test]
    fn test_parse_empty_and_garbage() {
        assert!(parse_entries(b"[]", "com.acme.Svc").unwrap().is_empty());
        assert!(parse_entries(b"{\"x\":1}", "com.acme.Svc").is_err());
    }
}

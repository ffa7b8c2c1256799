//! Target address classification.

use crate::error::ResolutionError;
use dubbo_invoke_protocol::DEFAULT_PORT;
use std::fmt;

/// Supported registry centers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryScheme {
    Zookeeper,
    Nacos,
    Consul,
    Redis,
    Multicast,
}

impl RegistryScheme {
    pub fn parse(scheme: &str) -> Option<Self> {
        match scheme {
            "zookeeper" => Some(Self::Zookeeper),
            "nacos" => Some(Self::Nacos),
            "consul" => Some(Self::Consul),
            "redis" => Some(Self::Redis),
            "multicast" => Some(Self::Multicast),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zookeeper => "zookeeper",
            Self::Nacos => "nacos",
            Self::Consul => "consul",
            Self::Redis => "redis",
            Self::Multicast => "multicast",
        }
    }

    /// Port assumed when the address omits one.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Zookeeper => 2181,
            Self::Nacos => 8848,
            Self::Consul => 8500,
            Self::Redis => 6379,
            Self::Multicast => 1234,
        }
    }
}

impl fmt::Display for RegistryScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a call goes: straight to a provider or through a registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServiceAddress {
    Direct {
        host: String,
        port: u16,
    },
    Registry {
        scheme: RegistryScheme,
        host: String,
        port: u16,
    },
}

impl ServiceAddress {
    /// Classifies an address, defaulting direct ports to 20880.
    pub fn classify(raw: &str) -> Result<Self, ResolutionError> {
        Self::classify_with_port(raw, DEFAULT_PORT)
    }

    /// Classifies an address with an explicit default port for bare hosts.
    ///
    /// Accepts `scheme://host[:port][/path][?query]` and `host[:port]`.
    /// IPv6 hosts must be bracketed when a port is given.
    pub fn classify_with_port(raw: &str, default_port: u16) -> Result<Self, ResolutionError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ResolutionError::InvalidAddress("empty address".to_string()));
        }

        let (scheme, rest) = match trimmed.split_once("://") {
            Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
            None => ("dubbo".to_string(), trimmed),
        };

        let authority = rest
            .split(|c| c == '/' || c == '?')
            .next()
            .unwrap_or_default();

        if scheme == "dubbo" {
            let (host, port) = split_host_port(authority, default_port, raw)?;
            return Ok(Self::Direct { host, port });
        }

        match RegistryScheme::parse(&scheme) {
            Some(registry) => {
                let (host, port) = split_host_port(authority, registry.default_port(), raw)?;
                Ok(Self::Registry {
                    scheme: registry,
                    host,
                    port,
                })
            }
            None => Err(ResolutionError::UnsupportedScheme(scheme)),
        }
    }

    pub fn host(&self) -> &str {
        match self {
            Self::Direct { host, .. } | Self::Registry { host, .. } => host,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Self::Direct { port, .. } | Self::Registry { port, .. } => *port,
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Direct { .. } => "dubbo",
            Self::Registry { scheme, .. } => scheme.as_str(),
        }
    }

    pub fn is_registry(&self) -> bool {
        matches!(self, Self::Registry { .. })
    }

    /// `host:port`, bracketing IPv6 hosts.
    pub fn authority(&self) -> String {
        authority(self.host(), self.port())
    }

    /// Canonical `scheme://host:port` form.
    pub fn normalized(&self) -> String {
        format!("{}://{}", self.scheme(), self.authority())
    }
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized())
    }
}

pub(crate) fn authority(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

fn split_host_port(
    authority: &str,
    default_port: u16,
    raw: &str,
) -> Result<(String, u16), ResolutionError> {
    let invalid = || ResolutionError::InvalidAddress(raw.trim().to_string());

    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, tail) = bracketed.split_once(']').ok_or_else(invalid)?;
        match tail {
            "" => (host, None),
            _ => (host, Some(tail.strip_prefix(':').ok_or_else(invalid)?)),
        }
    } else if authority.matches(':').count() > 1 {
        // unbracketed IPv6 literal, no port
        (authority, None)
    } else {
        match authority.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    if host.is_empty() {
        return Err(invalid());
    }
    let port = match port {
        Some(port) => port.parse::<u16>().map_err(|_| invalid())?,
        None => default_port,
    };
    if port == 0 {
        return Err(invalid());
    }
    Ok((host.to_string(), port))
}

//! Provider URLs as published by registries.

use crate::address::authority;
use crate::error::ResolutionError;
use dubbo_invoke_protocol::DEFAULT_SERVICE_VERSION;
use std::collections::BTreeMap;
use std::fmt;

/// A provider registration such as
/// `dubbo://10.0.0.1:20880/com.acme.Svc?version=1.0.0&group=blue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderUrl {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub params: BTreeMap<String, String>,
}

impl ProviderUrl {
    /// Parses a provider URL, percent-decoding it first when it arrives
    /// encoded (as ZooKeeper node names do).
    pub fn parse(raw: &str) -> Result<Self, ResolutionError> {
        let decoded;
        let text = if raw.contains("://") {
            raw.trim()
        } else {
            decoded = percent_decode(raw.trim());
            decoded.as_str()
        };
        let invalid = || ResolutionError::Registry(format!("malformed provider url: {}", raw));

        let (protocol, rest) = text.split_once("://").ok_or_else(invalid)?;
        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, query),
            None => (rest, ""),
        };
        let (authority, path) = match location.split_once('/') {
            Some((authority, path)) => (authority, path),
            None => (location, ""),
        };

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, tail) = bracketed.split_once("]:").ok_or_else(invalid)?;
            (host, tail)
        } else {
            authority.rsplit_once(':').ok_or_else(invalid)?
        };
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        if host.is_empty() {
            return Err(invalid());
        }

        let params = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) => (percent_decode(key), percent_decode(value)),
                None => (percent_decode(pair), String::new()),
            })
            .collect();

        Ok(Self {
            protocol: protocol.to_ascii_lowercase(),
            host: host.to_string(),
            port,
            path: path.to_string(),
            params,
        })
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// The service this provider exports.
    pub fn interface(&self) -> &str {
        self.param("interface").unwrap_or(&self.path)
    }

    /// True for Dubbo providers of `service` that match the requested
    /// version and group. Unset requirements (empty, `0.0.0` for versions,
    /// or `*`) match anything.
    pub fn matches(&self, service: &str, version: &str, group: &str) -> bool {
        if self.protocol != "dubbo" || self.interface() != service {
            return false;
        }
        let version_ok = is_wildcard(version) || self.param("version").unwrap_or("") == version;
        let group_ok =
            group.is_empty() || group == "*" || self.param("group").unwrap_or("") == group;
        version_ok && group_ok
    }

    pub fn authority(&self) -> String {
        authority(&self.host, self.port)
    }
}

impl fmt::Display for ProviderUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.protocol, self.authority(), self.path)?;
        let mut separator = '?';
        for (key, value) in &self.params {
            write!(f, "{}{}={}", separator, key, value)?;
            separator = '&';
        }
        Ok(())
    }
}

pub(crate) fn is_wildcard(version: &str) -> bool {
    version.is_empty() || version == "*" || version == DEFAULT_SERVICE_VERSION
}

/// Decodes `%XX` escapes. Malformed escapes are kept as-is.
pub fn percent_decode(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hi = (bytes[i + 1] as char).to_digit(16);
            let lo = (bytes[i + 2] as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Encodes everything outside the unreserved URL set.
pub fn percent_encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let url = ProviderUrl::parse(
            "dubbo://10.0.0.1:20880/com.acme.Svc?version=1.0.0&group=blue&anyhost=true",
        )
        .unwrap();
        assert_eq!(url.protocol, "dubbo");
        assert_eq!(url.host, "10.0.0.1");
        assert_eq!(url.port, 20880);
        assert_eq!(url.path, "com.acme.Svc");
        assert_eq!(url.param("version"), Some("1.0.0"));
        assert_eq!(url.interface(), "com.acme.Svc");
    }

    #[test]
    fn test_parse_encoded() {
        let raw = "dubbo%3A%2F%2F10.0.0.2%3A20881%2Fcom.acme.Svc%3Finterface%3Dcom.acme.Svc%26methods%3Da%2Cb";
        let url = ProviderUrl::parse(raw).unwrap();
        assert_eq!(url.host, "10.0.0.2");
        assert_eq!(url.port, 20881);
        assert_eq!(url.param("methods"), Some("a,b"));
    }

    #[test]
    fn test_parse_rejects() {
        assert!(ProviderUrl::parse("not a url").is_err());
        assert!(ProviderUrl::parse("dubbo://host/com.acme.Svc").is_err());
        assert!(ProviderUrl::parse("dubbo://:20880/x").is_err());
    }

    #[test]
    fn test_matches() {
        let url = ProviderUrl::parse("dubbo://h:1/com.acme.Svc?version=2.0&group=g1").unwrap();
        assert!(url.matches("com.acme.Svc", "", ""));
        assert!(url.matches("com.acme.Svc", "0.0.0", "*"));
        assert!(url.matches("com.acme.Svc", "2.0", "g1"));
        assert!(!url.matches("com.acme.Svc", "1.0", ""));
        assert!(!url.matches("com.acme.Svc", "2.0", "g2"));
        assert!(!url.matches("com.acme.Other", "", ""));

        let rest = ProviderUrl::parse("rest://h:8080/com.acme.Svc").unwrap();
        assert!(!rest.matches("com.acme.Svc", "", ""));
    }

    #[test]
    fn test_percent_roundtrip() {
        let text = "dubbo://h:1/a.B?x=1&y=ü";
        assert_eq!(percent_decode(&percent_encode(text)), text);
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
    }
}

//! Multicast discovery.
//!
//! Dubbo's multicast registry has no server. Providers announce
//! `register <url>` on a group address and answer `subscribe <url>`
//! announcements by repeating their registrations. A lookup joins the group,
//! subscribes, and collects what arrives within the wait window.

use super::ProviderUrl;
use crate::address::authority;
use crate::error::{ClientError, ResolutionError, TransportError};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;

const MAX_DATAGRAM: usize = 64 * 1024;

/// One line received on the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement {
    Register(String),
    Unregister(String),
    Subscribe(String),
}

/// Parses `register|unregister|subscribe <url>`. Anything else is ignored.
pub fn parse_announcement(text: &str) -> Option<Announcement> {
    let (verb, url) = text.trim().split_once(char::is_whitespace)?;
    let url = url.trim().to_string();
    if url.is_empty() {
        return None;
    }
    match verb.to_ascii_lowercase().as_str() {
        "register" => Some(Announcement::Register(url)),
        "unregister" => Some(Announcement::Unregister(url)),
        "subscribe" => Some(Announcement::Subscribe(url)),
        _ => None,
    }
}

pub struct MulticastRegistry {
    group: Ipv4Addr,
    port: u16,
    wait: Duration,
}

impl MulticastRegistry {
    /// `host` must be an IPv4 multicast group such as `224.5.6.7`.
    pub fn new(host: &str, port: u16, wait: Duration) -> Result<Self, ResolutionError> {
        let group: Ipv4Addr = host.parse().map_err(|_| {
            ResolutionError::InvalidAddress(format!("multicast group must be IPv4, got {}", host))
        })?;
        if !group.is_multicast() {
            return Err(ResolutionError::InvalidAddress(format!(
                "{} is not a multicast address (224.0.0.0 - 239.255.255.255)",
                group
            )));
        }
        Ok(Self { group, port, wait })
    }

    pub fn authority(&self) -> String {
        authority(&self.group.to_string(), self.port)
    }

    pub async fn providers(&self, service: &str) -> Result<Vec<ProviderUrl>, ClientError> {
        let socket = self.join()?;
        let target = SocketAddr::V4(SocketAddrV4::new(self.group, self.port));

        let subscribe = format!(
            "subscribe consumer://{}/{}?category=providers&check=false&interface={}",
            local_host(&socket),
            service,
            service
        );
        socket
            .send_to(subscribe.as_bytes(), target)
            .await
            .map_err(TransportError::Io)?;

        let deadline = Instant::now() + self.wait;
        let mut registered: Vec<String> = Vec::new();
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let received = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await;
            let (len, from) = match received {
                Ok(received) => received.map_err(TransportError::Io)?,
                Err(_) => break,
            };
            let text = String::from_utf8_lossy(&buf[..len]);
            for line in text.lines() {
                match parse_announcement(line) {
                    Some(Announcement::Register(url)) if url.contains(service) => {
                        tracing::debug!(%from, url = %url, "multicast register");
                        if !registered.contains(&url) {
                            registered.push(url);
                        }
                    }
                    Some(Announcement::Unregister(url)) => registered.retain(|u| *u != url),
                    _ => {}
                }
            }
        }

        if let Err(err) = socket.leave_multicast_v4(self.group, Ipv4Addr::UNSPECIFIED) {
            tracing::debug!(error = %err, "leaving multicast group failed");
        }
        Ok(super::parse_all(registered))
    }

    /// Binds the group port with address reuse so local providers can share
    /// it, and joins the group.
    fn join(&self) -> Result<UdpSocket, TransportError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        let bind = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.port));
        socket.bind(&bind.into())?;
        socket.set_multicast_loop_v4(true)?;
        socket.join_multicast_v4(&self.group, &Ipv4Addr::UNSPECIFIED)?;

        Ok(UdpSocket::from_std(socket.into())?)
    }
}

fn local_host(socket: &UdpSocket) -> String {
    match socket.local_addr() {
        Ok(addr) if !addr.ip().is_unspecified() => addr.ip().to_string(),
        _ => Ipv4Addr::LOCALHOST.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_announcement() {
        assert_eq!(
            parse_announcement("register dubbo://10.0.0.1:20880/com.acme.Svc"),
            Some(Announcement::Register(
                "dubbo://10.0.0.1:20880/com.acme.Svc".to_string()
            ))
        );
        assert_eq!(
            parse_announcement("  UNREGISTER  dubbo://h:1/x \n"),
            Some(Announcement::Unregister("dubbo://h:1/x".to_string()))
        );
        assert!(matches!(
            parse_announcement("subscribe consumer://h/x?category=providers"),
            Some(Announcement::Subscribe(_))
        ));
        assert_eq!(parse_announcement("register"), None);
        assert_eq!(parse_announcement("hello dubbo://h:1/x"), None);
        assert_eq!(parse_announcement(""), None);
    }

    #[test]
    fn test_group_must_be_multicast() {
        let wait = Duration::from_millis(10);
        assert!(MulticastRegistry::new("224.5.6.7", 1234, wait).is_ok());
        assert!(matches!(
            MulticastRegistry::new("10.0.0.1", 1234, wait),
            Err(ResolutionError::InvalidAddress(_))
        ));
        assert!(matches!(
            MulticastRegistry::new("registry.local", 1234, wait),
            Err(ResolutionError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_authority() {
        let registry =
            MulticastRegistry::new("239.1.2.3", 4321, Duration::from_millis(10)).unwrap();
        assert_eq!(registry.authority(), "239.1.2.3:4321");
    }
}

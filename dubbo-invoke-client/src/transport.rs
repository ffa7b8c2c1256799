//! One-shot socket exchange: connect, send one request frame, read one
//! response frame, close.

use crate::address::authority;
use crate::error::{ClientError, TransportError};
use bytes::Bytes;
use dubbo_invoke_protocol::{Frame, FrameHeader, HEADER_SIZE};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Connection and read timeouts for one exchange.
#[derive(Debug, Clone, Copy)]
pub struct Transport {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Transport {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout,
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sends `request` to `host:port` and returns the response frame.
    ///
    /// The socket is dropped (closed) on every exit path.
    pub async fn exchange(
        &self,
        host: &str,
        port: u16,
        request: &Frame,
    ) -> Result<Frame, ClientError> {
        let encoded = request.encode()?;
        let mut stream = connect(host, port, self.connect_timeout).await?;
        tracing::debug!(
            target_addr = %authority(host, port),
            request_id = request.request_id,
            len = encoded.len(),
            "sending request frame"
        );

        tokio::time::timeout(self.read_timeout, async {
            stream.write_all(&encoded).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| TransportError::Timeout {
            op: "write",
            timeout: self.read_timeout,
        })?
        .map_err(TransportError::Io)?;

        let response = tokio::time::timeout(self.read_timeout, read_frame(&mut stream))
            .await
            .map_err(|_| TransportError::Timeout {
                op: "read",
                timeout: self.read_timeout,
            })??;

        if response.request_id != request.request_id {
            tracing::warn!(
                sent = request.request_id,
                received = response.request_id,
                "response request id does not match"
            );
        }
        Ok(response)
    }
}

/// Reads exactly one frame. The header is validated before any body byte
/// is read.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, ClientError>
where
    R: AsyncRead + Unpin,
{
    let mut raw = [0u8; HEADER_SIZE];
    read_full(reader, &mut raw).await?;
    let header = FrameHeader::parse(&raw)?;

    if !header.status.is_ok() {
        tracing::warn!(status = %header.status, "provider returned non-OK status");
    }

    let mut body = vec![0u8; header.body_len as usize];
    read_full(reader, &mut body).await?;

    Ok(Frame {
        flags: header.flags,
        status: header.status,
        request_id: header.request_id,
        body: Bytes::from(body),
    })
}

pub(crate) async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut received = 0;
    while received < buf.len() {
        let n = reader.read(&mut buf[received..]).await?;
        if n == 0 {
            return Err(TransportError::Truncated {
                expected: buf.len(),
                received,
            });
        }
        received += n;
    }
    Ok(())
}

/// Resolves `host` and connects within `timeout`.
pub async fn connect(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<TcpStream, TransportError> {
    let target = authority(host, port);
    let addr = resolve(host, port, timeout).await?;

    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::Timeout {
            op: "connect",
            timeout,
        })?
        .map_err(|e| {
            tracing::debug!("connection to {} failed: {}", target, e);
            TransportError::connect(target.clone(), e)
        })?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

async fn resolve(host: &str, port: u16, timeout: Duration) -> Result<SocketAddr, TransportError> {
    let unknown = || TransportError::UnknownHost(host.to_string());
    let mut addrs = tokio::time::timeout(timeout, tokio::net::lookup_host((host, port)))
        .await
        .map_err(|_| TransportError::Timeout {
            op: "resolve",
            timeout,
        })?
        .map_err(|_| unknown())?;
    addrs.next().ok_or_else(unknown)
}

/// Opens and closes a TCP connection.
pub async fn check_reachable(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<(), TransportError> {
    let stream = connect(host, port, timeout).await?;
    drop(stream);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dubbo_invoke_protocol::{ProtocolError, Status};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_read_frame_from_bytes() {
        let frame = Frame::response(5, Status::OK, Bytes::from_static(&[0x91, 0x95]));
        let encoded = frame.encode().unwrap();
        let mut reader = &encoded[..];

        let read = read_frame(&mut reader).await.unwrap();
        assert_eq!(read.request_id, 5);
        assert_eq!(&read.body[..], &[0x91, 0x95]);
    }

    #[tokio::test]
    async fn test_truncated_body() {
        let frame = Frame::response(5, Status::OK, Bytes::from_static(b"abcdef"));
        let encoded = frame.encode().unwrap();
        let mut reader = &encoded[..HEADER_SIZE + 2];

        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Transport(TransportError::Truncated {
                expected: 6,
                received: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_truncated_header() {
        let mut reader: &[u8] = &[0xDA, 0xBB, 0x02];
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Transport(TransportError::Truncated {
                expected: 16,
                received: 3
            })
        ));
    }

    #[tokio::test]
    async fn test_bad_magic_before_body() {
        let mut data = vec![0x48, 0x54, 0x54, 0x50];
        data.extend_from_slice(&[0u8; 12]);
        let mut reader = &data[..];
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::BadMagic(0x4854))
        ));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = check_reachable("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectionRefused { .. }));
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
            drop(socket);
        });

        let transport = Transport::new(Duration::from_secs(2), Duration::from_millis(50));
        let request = Frame::request(Bytes::from_static(b"N"));
        let err = transport
            .exchange("127.0.0.1", port, &request)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Transport(TransportError::Timeout { op: "read", .. })
        ));
        server.abort();
    }
}

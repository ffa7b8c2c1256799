//! ZooKeeper lookups over the native jute protocol.
//!
//! A lookup is one short session: connect, `getChildren` on the providers
//! node, close. Every packet is a big-endian `i32` length followed by the
//! record.

use super::{parse_all, ProviderUrl};
use crate::address::authority;
use crate::error::{ClientError, ResolutionError, TransportError};
use crate::transport;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

const SESSION_TIMEOUT_MS: i32 = 30_000;
const OP_GET_CHILDREN: i32 = 8;
const OP_CLOSE_SESSION: i32 = -11;
const ERR_NONODE: i32 = -101;

/// Largest reply accepted (ZooKeeper's own `jute.maxbuffer` default).
const MAX_PACKET: usize = 0xFFFFF;

/// Path holding the provider registrations of a service.
pub fn providers_path(service: &str) -> String {
    format!("/dubbo/{}/providers", service)
}

pub struct ZookeeperRegistry {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl ZookeeperRegistry {
    pub fn new(host: String, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host,
            port,
            connect_timeout,
        }
    }

    pub fn authority(&self) -> String {
        authority(&self.host, self.port)
    }

    pub async fn providers(&self, service: &str) -> Result<Vec<ProviderUrl>, ClientError> {
        let children = self.children(&providers_path(service)).await?;
        Ok(parse_all(children))
    }

    /// Lists the children of `path`. A missing node has no children.
    pub async fn children(&self, path: &str) -> Result<Vec<String>, ClientError> {
        let mut stream = transport::connect(&self.host, self.port, self.connect_timeout).await?;

        write_packet(&mut stream, &connect_request()).await?;
        let mut reply = read_packet(&mut stream).await?;
        let session_id = parse_connect_response(&mut reply)?;
        tracing::debug!("zookeeper session {:#x} established", session_id);

        write_packet(&mut stream, &get_children_request(1, path)).await?;
        let mut reply = read_packet(&mut stream).await?;
        let children = parse_get_children_response(&mut reply)?;

        // best effort, the server expires the session anyway
        if write_packet(&mut stream, &close_request(2)).await.is_ok() {
            let _ = read_packet(&mut stream).await;
        }

        tracing::debug!(path, count = children.len(), "zookeeper children");
        Ok(children)
    }
}

fn connect_request() -> BytesMut {
    let mut buf = BytesMut::with_capacity(45);
    buf.put_i32(0); // protocol version
    buf.put_i64(0); // last zxid seen
    buf.put_i32(SESSION_TIMEOUT_MS);
    buf.put_i64(0); // session id
    buf.put_i32(16);
    buf.put_bytes(0, 16); // password
    buf.put_u8(0); // read only
    buf
}

fn get_children_request(xid: i32, path: &str) -> BytesMut {
    let mut buf = BytesMut::with_capacity(13 + path.len());
    buf.put_i32(xid);
    buf.put_i32(OP_GET_CHILDREN);
    put_string(&mut buf, path);
    buf.put_u8(0); // watch
    buf
}

fn close_request(xid: i32) -> BytesMut {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_i32(xid);
    buf.put_i32(OP_CLOSE_SESSION);
    buf
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_i32(s.len() as i32);
    buf.put_slice(s.as_bytes());
}

async fn write_packet<W>(writer: &mut W, record: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let mut packet = BytesMut::with_capacity(4 + record.len());
    packet.put_i32(record.len() as i32);
    packet.put_slice(record);
    writer.write_all(&packet).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_packet<R>(reader: &mut R) -> Result<Bytes, ClientError>
where
    R: AsyncRead + Unpin,
{
    let mut len = [0u8; 4];
    transport::read_full(reader, &mut len).await?;
    let len = i32::from_be_bytes(len);
    let len = usize::try_from(len)
        .ok()
        .filter(|&len| len <= MAX_PACKET)
        .ok_or_else(|| ResolutionError::Registry(format!("bad zookeeper packet length {}", len)))?;

    let mut body = vec![0u8; len];
    transport::read_full(reader, &mut body).await?;
    Ok(Bytes::from(body))
}

fn truncated() -> ResolutionError {
    ResolutionError::Registry("truncated zookeeper reply".to_string())
}

fn get_i32(buf: &mut Bytes) -> Result<i32, ResolutionError> {
    if buf.remaining() < 4 {
        return Err(truncated());
    }
    Ok(buf.get_i32())
}

fn get_i64(buf: &mut Bytes) -> Result<i64, ResolutionError> {
    if buf.remaining() < 8 {
        return Err(truncated());
    }
    Ok(buf.get_i64())
}

fn get_buffer(buf: &mut Bytes) -> Result<Bytes, ResolutionError> {
    let len = get_i32(buf)?;
    if len < 0 {
        return Ok(Bytes::new());
    }
    let len = len as usize;
    if buf.remaining() < len {
        return Err(truncated());
    }
    Ok(buf.split_to(len))
}

fn parse_connect_response(buf: &mut Bytes) -> Result<i64, ResolutionError> {
    let _protocol_version = get_i32(buf)?;
    let timeout = get_i32(buf)?;
    let session_id = get_i64(buf)?;
    let _password = get_buffer(buf)?;
    if timeout <= 0 {
        return Err(ResolutionError::Registry(
            "zookeeper rejected the session".to_string(),
        ));
    }
    Ok(session_id)
}

fn parse_get_children_response(buf: &mut Bytes) -> Result<Vec<String>, ResolutionError> {
    let _xid = get_i32(buf)?;
    let _zxid = get_i64(buf)?;
    let err = get_i32(buf)?;
    match err {
        0 => {}
        ERR_NONODE => return Ok(Vec::new()),
        code => {
            return Err(ResolutionError::Registry(format!(
                "zookeeper getChildren failed with code {}",
                code
            )))
        }
    }

    let count = get_i32(buf)?;
    if count < 0 {
        return Ok(Vec::new());
    }
    // every child carries at least its 4-byte length
    if count as usize > buf.remaining() / 4 {
        return Err(ResolutionError::Registry(format!(
            "zookeeper reply claims {} children in {} bytes",
            count,
            buf.remaining()
        )));
    }
    let mut children = Vec::with_capacity(count.clamp(0, 1024) as usize);
    for _ in 0..count {
        let name = get_buffer(buf)?;
        children.push(String::from_utf8_lossy(&name).into_owned());
    }
    Ok(children)
}

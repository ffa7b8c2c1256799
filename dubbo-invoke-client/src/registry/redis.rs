//! Redis lookups. Dubbo keeps one hash per service category whose field
//! names are the provider URLs.

use super::{parse_all, ProviderUrl};
use crate::address::authority;
use crate::error::{ClientError, ResolutionError, TransportError};
use crate::transport;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

/// Longest bulk string accepted.
const MAX_BULK: usize = 512 * 1024;

/// A RESP reply, flattened to what `HKEYS` can return.
#[derive(Debug, PartialEq)]
enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<String>),
    Array(Vec<String>),
}

pub struct RedisRegistry {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl RedisRegistry {
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
        let key = format!("/dubbo/{}/providers", service);
        let stream = transport::connect(&self.host, self.port, self.connect_timeout).await?;
        let mut stream = BufReader::new(stream);

        stream
            .get_mut()
            .write_all(&command(&["HKEYS", &key]))
            .await
            .map_err(TransportError::Io)?;

        let urls = match read_reply(&mut stream).await? {
            Reply::Array(items) => items,
            Reply::Bulk(None) => Vec::new(),
            Reply::Error(message) => return Err(reply_error(&self.authority(), message).into()),
            other => {
                return Err(ResolutionError::Registry(format!(
                    "unexpected redis reply to HKEYS: {:?}",
                    other
                ))
                .into())
            }
        };

        tracing::debug!(key = %key, count = urls.len(), "redis providers");
        Ok(parse_all(urls))
    }
}

fn reply_error(registry: &str, message: String) -> ResolutionError {
    if message.starts_with("NOAUTH") || message.starts_with("WRONGPASS") {
        ResolutionError::AuthenticationRequired(format!("redis://{}: {}", registry, message))
    } else {
        ResolutionError::Registry(format!("redis://{}: {}", registry, message))
    }
}

/// Encodes a command as a RESP array of bulk strings.
fn command(args: &[&str]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

async fn read_line<R>(reader: &mut R) -> Result<String, ClientError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .await
        .map_err(TransportError::Io)?;
    if n == 0 || !line.ends_with("\r\n") {
        return Err(TransportError::Truncated {
            expected: n + 2,
            received: n,
        }
        .into());
    }
    line.truncate(line.len() - 2);
    Ok(line)
}

/// Splits a reply line into its type character and the rest.
fn split_kind(line: &str) -> (Option<char>, &str) {
    match line.chars().next() {
        Some(kind) => (Some(kind), &line[kind.len_utf8()..]),
        None => (None, line),
    }
}

fn protocol_error(line: &str) -> ResolutionError {
    ResolutionError::Registry(format!("malformed redis reply line {:?}", line))
}

async fn read_bulk<R>(reader: &mut R, len: i64) -> Result<Option<String>, ClientError>
where
    R: AsyncBufRead + Unpin,
{
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    if len > MAX_BULK {
        return Err(ResolutionError::Registry(format!("redis bulk of {} bytes", len)).into());
    }
    let mut data = vec![0u8; len + 2];
    reader
        .read_exact(&mut data)
        .await
        .map_err(TransportError::Io)?;
    data.truncate(len);
    Ok(Some(String::from_utf8_lossy(&data).into_owned()))
}

async fn read_reply<R>(reader: &mut R) -> Result<Reply, ClientError>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_line(reader).await?;
    let (kind, rest) = split_kind(&line);
    let number = || rest.parse::<i64>().map_err(|_| protocol_error(&line));

    match kind {
        Some('+') => Ok(Reply::Simple(rest.to_string())),
        Some('-') => Ok(Reply::Error(rest.to_string())),
        Some(':') => Ok(Reply::Integer(number()?)),
        Some('$') => Ok(Reply::Bulk(read_bulk(reader, number()?).await?)),
        Some('*') => {
            let count = number()?;
            let mut items = Vec::with_capacity(count.clamp(0, 1024) as usize);
            for _ in 0..count.max(0) {
                let item = read_line(reader).await?;
                match split_kind(&item) {
                    (Some('$'), len) => {
                        let len = len.parse::<i64>().map_err(|_| protocol_error(&item))?;
                        if let Some(s) = read_bulk(reader, len).await? {
                            items.push(s);
                        }
                    }
                    (Some('+'), s) => items.push(s.to_string()),
                    _ => return Err(protocol_error(&item).into()),
                }
            }
            Ok(Reply::Array(items))
        }
        _ => Err(protocol_error(&line).into()),
    }
}

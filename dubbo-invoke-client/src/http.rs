//! HTTP plumbing for the HTTP fallback layer and HTTP-based registries.

use crate::address::authority;
use crate::error::{ClientError, TransportError};
use dubbo_invoke_protocol::{clean_string, Value};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::time::Duration;

const USER_AGENT: &str = concat!("dubbo-invoke/", env!("CARGO_PKG_VERSION"));

/// Longest response excerpt kept in error messages.
const MAX_ERROR_BODY: usize = 200;

/// A small HTTP/1 client with connect and read timeouts.
#[derive(Clone)]
pub struct HttpClient {
    client: Client<HttpConnector, Full<Bytes>>,
    read_timeout: Duration,
}

impl HttpClient {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);
        Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
            read_timeout,
        }
    }

    /// Sends a GET and returns the status and body.
    pub async fn get(&self, url: &str) -> Result<(StatusCode, Bytes), ClientError> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(url)
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
            .body(Full::new(Bytes::new()))
            .map_err(|e| ClientError::InvalidParameter(format!("bad request url {}: {}", url, e)))?;
        self.send(url, request).await
    }

    /// POSTs a JSON document and returns the status and body.
    pub async fn post_json<T: Serialize>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<(StatusCode, Bytes), ClientError> {
        let body = serde_json::to_vec(body)
            .map_err(|e| ClientError::InvalidParameter(format!("unserializable body: {}", e)))?;
        let request = Request::builder()
            .method(Method::POST)
            .uri(url)
            .header("Content-Type", "application/json; charset=UTF-8")
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| ClientError::InvalidParameter(format!("bad request url {}: {}", url, e)))?;
        self.send(url, request).await
    }

    async fn send(
        &self,
        url: &str,
        request: Request<Full<Bytes>>,
    ) -> Result<(StatusCode, Bytes), ClientError> {
        tracing::debug!("{} {}", request.method(), url);
        let timeout = self.read_timeout;
        let timed_out = || TransportError::Timeout {
            op: "http",
            timeout,
        };

        let response = tokio::time::timeout(timeout, self.client.request(request))
            .await
            .map_err(|_| timed_out())?
            .map_err(|e| classify_failure(url, &e))?;

        let status = response.status();
        let body = tokio::time::timeout(timeout, response.into_body().collect())
            .await
            .map_err(|_| timed_out())?
            .map_err(|e| TransportError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
            .to_bytes();

        tracing::debug!(status = status.as_u16(), len = body.len(), "HTTP response");
        Ok((status, body))
    }
}

/// Maps a hyper client failure onto the transport taxonomy.
fn classify_failure(url: &str, err: &hyper_util::client::legacy::Error) -> ClientError {
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            let io = std::io::Error::new(io.kind(), io.to_string());
            return TransportError::connect(url, io).into();
        }
        source = cause.source();
    }
    if err.is_connect() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, err.to_string());
        return TransportError::connect(url, io).into();
    }
    TransportError::Io(std::io::Error::new(std::io::ErrorKind::Other, err.to_string())).into()
}

/// The JSON document sent by the HTTP layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpInvocation {
    pub service: String,
    pub method: String,
    pub parameter_types: Vec<String>,
    pub parameters: Vec<serde_json::Value>,
    pub version: String,
    pub group: String,
}

/// Invokes a service through `http://host:port/` and unwraps the
/// `{result, error}` envelope.
pub async fn invoke(
    client: &HttpClient,
    host: &str,
    port: u16,
    invocation: &HttpInvocation,
) -> Result<Value, ClientError> {
    let url = format!("http://{}/", authority(host, port));
    let (status, body) = client.post_json(&url, invocation).await?;

    if !status.is_success() {
        return Err(ClientError::Http {
            status: status.as_u16(),
            message: excerpt(&body),
        });
    }
    parse_envelope(&body)
}

/// Interprets a successful HTTP body.
///
/// A JSON object with `result` or `error` is an envelope; other JSON is the
/// result itself; a non-JSON body is returned as text.
pub fn parse_envelope(body: &[u8]) -> Result<Value, ClientError> {
    let json: serde_json::Value = match serde_json::from_slice(body) {
        Ok(json) => json,
        Err(_) => return Ok(Value::String(clean_string(String::from_utf8_lossy(body).trim()))),
    };

    match json {
        serde_json::Value::Object(mut envelope)
            if envelope.contains_key("result") || envelope.contains_key("error") =>
        {
            match envelope.remove("error") {
                Some(serde_json::Value::Null) | None => {}
                Some(error) => return Err(ClientError::Application(http_exception(error))),
            }
            Ok(envelope
                .remove("result")
                .map(Value::from)
                .unwrap_or(Value::Null))
        }
        other => Ok(Value::from(other)),
    }
}

fn http_exception(error: serde_json::Value) -> Value {
    let mut info = BTreeMap::new();
    info.insert("type".to_string(), "exception".to_string());
    match error {
        serde_json::Value::String(message) => {
            info.insert("message".to_string(), message);
        }
        serde_json::Value::Object(fields) => {
            for (key, value) in fields {
                let text = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                info.insert(key, text);
            }
        }
        other => {
            info.insert("message".to_string(), other.to_string());
        }
    }
    Value::ExceptionInfo(info)
}

fn excerpt(body: &[u8]) -> String {
    let text = clean_string(String::from_utf8_lossy(body).trim());
    if text.chars().count() > MAX_ERROR_BODY {
        let cut: String = text.chars().take(MAX_ERROR_BODY).collect();
        format!("{}...", cut)
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_result() {
        let value =
            parse_envelope(br#"{"result": {"id": 1, "name": "ok"}, "error": null}"#).unwrap();
        assert_eq!(value.to_json(), json!({"id": 1, "name": "ok"}));
    }

    #[test]
    fn test_envelope_error() {
        let err = parse_envelope(br#"{"error": "no such method"}"#).unwrap_err();
        match err {
            ClientError::Application(Value::ExceptionInfo(info)) => {
                assert_eq!(info["message"], "no such method");
            }
            other => panic!("expected application error, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_bodies() {
        assert_eq!(
            parse_envelope(b"[1,2]").unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );
        assert_eq!(parse_envelope(b"pong\n").unwrap(), Value::string("pong"));
    }

    #[test]
    fn test_invocation_json_shape() {
        let invocation = HttpInvocation {
            service: "com.acme.Svc".to_string(),
            method: "find".to_string(),
            parameter_types: vec!["java.lang.Long".to_string()],
            parameters: vec![json!(7)],
            version: "1.0.0".to_string(),
            group: String::new(),
        };
        assert_eq!(
            serde_json::to_value(&invocation).unwrap(),
            json!({
                "service": "com.acme.Svc",
                "method": "find",
                "parameterTypes": ["java.lang.Long"],
                "parameters": [7],
                "version": "1.0.0",
                "group": ""
            })
        );
    }

    #[test]
    fn test_excerpt_truncates() {
        let long = "x".repeat(500);
        let cut = excerpt(long.as_bytes());
        assert_eq!(cut.len(), MAX_ERROR_BODY + 3);
    }
}

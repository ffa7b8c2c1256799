//! Invocation outcomes as handed to callers.

use crate::error::{ClientError, ErrorKind};
use dubbo_invoke_protocol::Value;
use serde_json::json;

/// The outcome of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationResult {
    Success(Value),
    Failure {
        kind: ErrorKind,
        message: String,
        cause: Option<String>,
    },
}

impl InvocationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, InvocationResult::Success(_))
    }

    /// Renders the result as JSON: the value itself on success, otherwise
    /// `{"error": true, "message": .., "type": ..}` with an optional
    /// `"cause"`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            InvocationResult::Success(value) => value.to_json(),
            InvocationResult::Failure {
                kind,
                message,
                cause,
            } => {
                let mut envelope = json!({
                    "error": true,
                    "message": message,
                    "type": kind.to_string(),
                });
                if let Some(cause) = cause {
                    envelope["cause"] = json!(cause);
                }
                envelope
            }
        }
    }
}

impl From<Result<Value, ClientError>> for InvocationResult {
    fn from(result: Result<Value, ClientError>) -> Self {
        match result {
            Ok(value) => InvocationResult::Success(value),
            Err(err) => err.into(),
        }
    }
}

impl From<ClientError> for InvocationResult {
    fn from(err: ClientError) -> Self {
        let cause = match &err {
            ClientError::Application(Value::ExceptionInfo(info)) => info.get("type").cloned(),
            ClientError::FallbackExhausted(attempts) => {
                attempts.last().map(|(layer, err)| format!("{}: {}", layer, err))
            }
            other => std::error::Error::source(other).map(|source| source.to_string()),
        };
        InvocationResult::Failure {
            kind: err.kind(),
            message: err.to_string(),
            cause,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ResolutionError, TransportError};
    use std::collections::BTreeMap;

    #[test]
    fn test_success_json() {
        let result = InvocationResult::Success(Value::Int(42));
        assert!(result.is_success());
        assert_eq!(result.to_json(), json!(42));
    }

    #[test]
    fn test_failure_envelope() {
        let err = ClientError::from(ResolutionError::NoProvider {
            service: "com.acme.Svc".to_string(),
            registry: "zookeeper://127.0.0.1:2181".to_string(),
        });
        let json = InvocationResult::from(err).to_json();
        assert_eq!(json["error"], json!(true));
        assert_eq!(json["type"], json!("ResolutionError"));
        assert!(json["message"]
            .as_str()
            .unwrap()
            .contains("no provider available for com.acme.Svc"));
    }

    #[test]
    fn test_application_cause() {
        let err = ClientError::Application(Value::ExceptionInfo(BTreeMap::from([
            ("type".to_string(), "java.lang.NullPointerException".to_string()),
            ("message".to_string(), "boom".to_string()),
        ])));
        let json = InvocationResult::from(err).to_json();
        assert_eq!(json["type"], json!("ApplicationError"));
        assert_eq!(json["cause"], json!("java.lang.NullPointerException"));
    }

    #[test]
    fn test_transport_cause() {
        let err = ClientError::from(TransportError::UnknownHost("nowhere".to_string()));
        let result = InvocationResult::from(Err::<Value, _>(err));
        match result {
            InvocationResult::Failure { kind, cause, .. } => {
                assert_eq!(kind, ErrorKind::TransportError);
                assert_eq!(cause.as_deref(), Some("unknown host: nowhere"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }
}

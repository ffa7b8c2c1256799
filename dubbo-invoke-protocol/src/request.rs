//! Invocation requests and JVM type descriptors.
//!
//! A request body is a sequence of Hessian2 values: the Dubbo version, the
//! service path, the service version, the method name, the parameter type
//! descriptor, each argument, and finally the attachment map.

use crate::error::{ProtocolError, SerializationError};
use crate::frame::Frame;
use crate::hessian::{HessianReader, HessianWriter};
use crate::value::Value;
use crate::{DEFAULT_SERVICE_VERSION, DUBBO_VERSION};
use bytes::Bytes;
use std::collections::BTreeMap;

/// Method name of a generic invocation.
pub const GENERIC_METHOD: &str = "$invoke";

/// Descriptor of `$invoke(String method, String[] types, Object[] args)`.
pub const GENERIC_DESCRIPTOR: &str = "Ljava/lang/String;[Ljava/lang/String;[Ljava/lang/Object;";

/// One remote call.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    service: String,
    version: String,
    method: String,
    descriptor: String,
    args: Vec<Value>,
    attachments: BTreeMap<String, String>,
}

impl InvocationRequest {
    /// Creates a request. The descriptor must declare exactly one parameter
    /// per argument.
    pub fn new(
        service: impl Into<String>,
        method: impl Into<String>,
        descriptor: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<Self, SerializationError> {
        let descriptor = descriptor.into();
        let declared = parse_descriptor(&descriptor)?.len();
        if declared != args.len() {
            return Err(SerializationError::InvalidDescriptor(format!(
                "{:?} declares {} parameters but {} values were given",
                descriptor,
                declared,
                args.len()
            )));
        }

        Ok(Self {
            service: service.into(),
            version: DEFAULT_SERVICE_VERSION.to_string(),
            method: method.into(),
            descriptor,
            args,
            attachments: BTreeMap::new(),
        })
    }

    /// Creates a generic `$invoke` call, which lets a provider resolve the
    /// target method from type names instead of a compiled stub.
    pub fn generic(
        service: impl Into<String>,
        version: &str,
        method: &str,
        parameter_types: &[String],
        args: Vec<Value>,
    ) -> Self {
        let service = service.into();
        let version = if version.is_empty() {
            DEFAULT_SERVICE_VERSION
        } else {
            version
        };

        let mut attachments = BTreeMap::new();
        attachments.insert("path".to_string(), service.clone());
        attachments.insert("interface".to_string(), service.clone());
        attachments.insert("version".to_string(), version.to_string());
        attachments.insert("generic".to_string(), "true".to_string());

        Self {
            service,
            version: version.to_string(),
            method: GENERIC_METHOD.to_string(),
            descriptor: GENERIC_DESCRIPTOR.to_string(),
            args: vec![
                Value::string(method),
                Value::List(parameter_types.iter().cloned().map(Value::String).collect()),
                Value::List(args),
            ],
            attachments,
        }
    }

    /// Sets the service version. An empty version keeps the default.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        let version = version.into();
        if !version.is_empty() {
            self.version = version;
        }
        self
    }

    pub fn with_attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attachments.insert(key.into(), value.into());
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn attachments(&self) -> &BTreeMap<String, String> {
        &self.attachments
    }

    pub fn is_generic(&self) -> bool {
        self.method == GENERIC_METHOD
    }

    /// Serializes the request body.
    pub fn encode_body(&self) -> Result<Bytes, SerializationError> {
        let mut w = HessianWriter::new();
        w.write_string(DUBBO_VERSION);
        w.write_string(&self.service);
        w.write_string(&self.version);
        w.write_string(&self.method);
        w.write_string(&self.descriptor);
        for arg in &self.args {
            w.write_value(arg)?;
        }
        w.write_attachments(&self.attachments);
        Ok(w.into_bytes())
    }

    /// Builds a two-way request frame with a fresh request id.
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        Ok(Frame::request(self.encode_body()?))
    }

    /// Parses a request body.
    pub fn decode_body(body: &[u8]) -> Result<Self, SerializationError> {
        let mut reader = HessianReader::new(body);

        let dubbo_version = read_string(&mut reader, "dubbo version")?;
        let service = read_string(&mut reader, "service")?;
        let version = read_string(&mut reader, "version")?;
        let method = read_string(&mut reader, "method")?;
        let descriptor = read_string(&mut reader, "descriptor")?;
        tracing::debug!(%dubbo_version, %service, %method, "decoding request body");

        let declared = parse_descriptor(&descriptor)?.len();
        let mut args = Vec::with_capacity(declared);
        for _ in 0..declared {
            args.push(reader.read_value()?);
        }

        let mut attachments = BTreeMap::new();
        if !reader.is_empty() {
            if let Value::Map(entries) = reader.read_value()? {
                for (key, value) in entries {
                    attachments.insert(key, value.to_string());
                }
            }
        }

        Ok(Self {
            service,
            version,
            method,
            descriptor,
            args,
            attachments,
        })
    }
}

fn read_string(reader: &mut HessianReader<'_>, what: &str) -> Result<String, SerializationError> {
    match reader.read_value()? {
        Value::String(s) => Ok(s),
        Value::Null => Ok(String::new()),
        other => Err(SerializationError::Unsupported(format!(
            "expected {} string, found {}",
            what,
            other.kind()
        ))),
    }
}

/// Maps a Java type name to its JVM descriptor.
///
/// Accepts primitive names, class names (boxed types keep their class
/// descriptor), `X[]` arrays and JVM array names such as
/// `[Ljava.lang.String;`.
pub fn type_descriptor(java_type: &str) -> String {
    let name = java_type.trim();
    if let Some(element) = name.strip_suffix("[]") {
        return format!("[{}", type_descriptor(element));
    }
    if name.starts_with('[') {
        return name.replace('.', "/");
    }

    let descriptor = match name {
        "int" => "I",
        "long" => "J",
        "boolean" => "Z",
        "double" => "D",
        "float" => "F",
        "byte" => "B",
        "char" => "C",
        "short" => "S",
        "String" => "Ljava/lang/String;",
        "Object" => "Ljava/lang/Object;",
        "List" => "Ljava/util/List;",
        "Map" => "Ljava/util/Map;",
        other => return format!("L{};", other.replace('.', "/")),
    };
    descriptor.to_string()
}

/// Concatenates the descriptors of a parameter list.
pub fn method_descriptor<S: AsRef<str>>(java_types: &[S]) -> String {
    java_types
        .iter()
        .map(|t| type_descriptor(t.as_ref()))
        .collect()
}

/// Splits a concatenated descriptor into one descriptor per parameter.
pub fn parse_descriptor(descriptor: &str) -> Result<Vec<String>, SerializationError> {
    let bytes = descriptor.as_bytes();
    let invalid = || SerializationError::InvalidDescriptor(descriptor.to_string());

    let mut params = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        while bytes.get(i) == Some(&b'[') {
            i += 1;
        }
        match bytes.get(i) {
            Some(b'L') => {
                let end = descriptor[i..].find(';').ok_or_else(invalid)?;
                i += end + 1;
            }
            Some(b'I' | b'J' | b'Z' | b'D' | b'F' | b'B' | b'C' | b'S') => i += 1,
            _ => return Err(invalid()),
        }
        params.push(descriptor[start..i].to_string());
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_layout() {
        let request =
            InvocationRequest::new("com.acme.Svc", "getX", "J", vec![Value::Long(5)]).unwrap();
        let body = request.encode_body().unwrap();

        let mut expected = vec![0x05];
        expected.extend_from_slice(b"2.0.2");
        expected.push(0x0C);
        expected.extend_from_slice(b"com.acme.Svc");
        expected.push(0x05);
        expected.extend_from_slice(b"0.0.0");
        expected.push(0x04);
        expected.extend_from_slice(b"getX");
        expected.push(0x01);
        expected.extend_from_slice(b"J");
        expected.extend_from_slice(&[b'L', 0, 0, 0, 0, 0, 0, 0, 5]);
        expected.extend_from_slice(b"HZ");
        assert_eq!(body.as_ref(), &expected[..]);
    }

    #[test]
    fn test_arity_mismatch_rejected() {
        let err = InvocationRequest::new("a.B", "m", "IJ", vec![Value::Int(1)]).unwrap_err();
        assert!(matches!(err, SerializationError::InvalidDescriptor(_)));
    }

    #[test]
    fn test_type_descriptors() {
        assert_eq!(type_descriptor("int"), "I");
        assert_eq!(type_descriptor("long"), "J");
        assert_eq!(type_descriptor("boolean"), "Z");
        assert_eq!(type_descriptor("char"), "C");
        assert_eq!(type_descriptor("java.lang.String"), "Ljava/lang/String;");
        assert_eq!(type_descriptor("String"), "Ljava/lang/String;");
        assert_eq!(type_descriptor("java.lang.Long"), "Ljava/lang/Long;");
        assert_eq!(type_descriptor("com.acme.Order"), "Lcom/acme/Order;");
        assert_eq!(type_descriptor("int[]"), "[I");
        assert_eq!(type_descriptor("java.lang.String[]"), "[Ljava/lang/String;");
        assert_eq!(type_descriptor("[Ljava.lang.Object;"), "[Ljava/lang/Object;");
        assert_eq!(
            method_descriptor(&["java.lang.String", "int", "java.util.List"]),
            "Ljava/lang/String;ILjava/util/List;"
        );
    }

    #[test]
    fn test_parse_descriptor() {
        assert_eq!(
            parse_descriptor(GENERIC_DESCRIPTOR).unwrap(),
            vec![
                "Ljava/lang/String;",
                "[Ljava/lang/String;",
                "[Ljava/lang/Object;"
            ]
        );
        assert_eq!(parse_descriptor("IJ[[Z").unwrap(), vec!["I", "J", "[[Z"]);
        assert!(parse_descriptor("").unwrap().is_empty());
        assert!(parse_descriptor("Ljava/lang/String").is_err());
        assert!(parse_descriptor("Q").is_err());
    }

    #[test]
    fn test_generic_request() {
        let request = InvocationRequest::generic(
            "com.acme.Svc",
            "",
            "find",
            &["java.lang.Long".to_string()],
            vec![Value::Long(9)],
        )
        .with_attachment("group", "blue");

        assert!(request.is_generic());
        assert_eq!(request.method(), GENERIC_METHOD);
        assert_eq!(request.descriptor(), GENERIC_DESCRIPTOR);
        assert_eq!(request.version(), "0.0.0");
        assert_eq!(request.attachments()["generic"], "true");
        assert_eq!(request.attachments()["interface"], "com.acme.Svc");
        assert_eq!(request.attachments()["group"], "blue");
        assert_eq!(request.args()[0], Value::string("find"));
    }

    #[test]
    fn test_decode_body() {
        let request = InvocationRequest::generic(
            "com.acme.Svc",
            "1.0.0",
            "find",
            &["java.lang.String".to_string()],
            vec![Value::string("x")],
        );
        let body = request.encode_body().unwrap();
        let decoded = InvocationRequest::decode_body(&body).unwrap();
        assert_eq!(decoded, request);
    }
}

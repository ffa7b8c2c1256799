//! Exception extraction and cleanup of undecodable bytes.

use crate::sanitize::clean_string;
use crate::value::Value;
use std::collections::BTreeMap;

/// Longest prefix shown when residue is rendered as hex.
const MAX_HEX_BYTES: usize = 100;

/// Mines free text for exception details.
///
/// A line mentioning `Exception` or `Error` becomes the message. Comma,
/// semicolon or newline separated parts mentioning `code` or
/// `message`/`msg` become `errorCode`/`errorMessage`. Text matching none of
/// these is returned as a cleaned string.
pub fn parse_exception_info(text: &str) -> Value {
    let mut info = BTreeMap::new();

    if text.contains("Exception") || text.contains("Error") {
        info.insert("type".to_string(), "exception".to_string());
        if let Some(line) = text
            .lines()
            .map(str::trim)
            .find(|line| line.contains("Exception") || line.contains("Error"))
        {
            info.insert("message".to_string(), clean_string(line));
        }
    }

    if text.contains("code") || text.contains("message") {
        for part in text.split(&[',', ';', '\n'][..]).map(str::trim) {
            let lower = part.to_lowercase();
            if lower.contains("code") {
                info.insert("errorCode".to_string(), clean_string(part));
            } else if lower.contains("message") || lower.contains("msg") {
                info.insert("errorMessage".to_string(), clean_string(part));
            }
        }
    }

    if info.is_empty() {
        let cleaned = clean_string(text);
        let trimmed = cleaned.trim();
        if trimmed.is_empty() {
            return Value::unresolved("empty body");
        }
        return Value::string(trimmed);
    }

    Value::ExceptionInfo(info)
}

/// Renders undecodable bytes for display.
///
/// Bytes are read as UTF-8 with non-printable characters shown as `?`.
/// When most of the input is unprintable the first bytes are shown as hex.
pub fn clean_binary(data: &[u8]) -> String {
    if data.is_empty() {
        return String::new();
    }

    let text = String::from_utf8_lossy(data);
    let mut replaced = 0usize;
    let mut total = 0usize;
    let cleaned: String = text
        .chars()
        .map(|c| {
            total += 1;
            if matches!(c, ' '..='~' | '\t' | '\n' | '\r')
                || ((c as u32) > 127 && c != char::REPLACEMENT_CHARACTER)
            {
                c
            } else {
                replaced += 1;
                '?'
            }
        })
        .collect();

    let cleaned = cleaned.trim();
    if cleaned.is_empty() || replaced * 2 > total {
        let shown = &data[..data.len().min(MAX_HEX_BYTES)];
        let ellipsis = if data.len() > MAX_HEX_BYTES { "..." } else { "" };
        return format!("[HEX: {}{}]", hex::encode(shown), ellipsis);
    }
    cleaned.to_string()
}

/// Builds the value for a decoded object, reducing throwables to
/// [`Value::ExceptionInfo`].
pub(crate) fn object_or_exception(class: String, fields: BTreeMap<String, Value>) -> Value {
    let throwable = class.ends_with("Exception")
        || class.ends_with("Error")
        || fields.contains_key("detailMessage");
    if !throwable {
        return Value::Object { class, fields };
    }
    Value::ExceptionInfo(throwable_info(class, fields))
}

/// Coerces the payload of an exception response into exception info.
pub(crate) fn into_exception_info(value: Value) -> Value {
    match value {
        Value::ExceptionInfo(_) => value,
        Value::Object { class, fields } => Value::ExceptionInfo(throwable_info(class, fields)),
        Value::String(text) => match parse_exception_info(&text) {
            info @ Value::ExceptionInfo(_) => info,
            _ => exception_message(clean_string(&text)),
        },
        other => exception_message(other.to_string()),
    }
}

fn exception_message(message: String) -> Value {
    Value::ExceptionInfo(BTreeMap::from([
        ("type".to_string(), "exception".to_string()),
        ("message".to_string(), message),
    ]))
}

fn throwable_info(class: String, fields: BTreeMap<String, Value>) -> BTreeMap<String, String> {
    let mut info = BTreeMap::new();
    info.insert("type".to_string(), class);
    for (name, value) in fields {
        let text = match value {
            Value::Null | Value::List(_) | Value::Map(_) | Value::Object { .. } => continue,
            Value::ExceptionInfo(inner) => match inner.get("message") {
                Some(message) => message.clone(),
                None => continue,
            },
            other => other.to_string(),
        };
        let key = if name == "detailMessage" {
            "message".to_string()
        } else {
            name
        };
        info.insert(key, clean_string(&text));
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_line_extraction() {
        let text = "header\njava.lang.IllegalArgumentException: id must be positive\n\tat x.y";
        let info = parse_exception_info(text);
        match info {
            Value::ExceptionInfo(map) => {
                assert_eq!(map["type"], "exception");
                assert_eq!(
                    map["message"],
                    "java.lang.IllegalArgumentException: id must be positive"
                );
            }
            other => panic!("expected exception info, got {:?}", other),
        }
    }

    #[test]
    fn test_code_and_message_parts() {
        let info = parse_exception_info("code=500, message=backend down");
        match info {
            Value::ExceptionInfo(map) => {
                assert_eq!(map["errorCode"], "code=500");
                assert_eq!(map["errorMessage"], "message=backend down");
                assert!(!map.contains_key("type"));
            }
            other => panic!("expected exception info, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_text_is_cleaned() {
        assert_eq!(parse_exception_info("hello\u{1} world "), Value::string("hello world"));
        assert!(matches!(parse_exception_info("\u{0}"), Value::Unresolved(_)));
    }

    #[test]
    fn test_clean_binary_text() {
        assert_eq!(clean_binary(b"user\x01name"), "user?name");
        assert_eq!(clean_binary("名字".as_bytes()), "名字");
        assert_eq!(clean_binary(b""), "");
    }

    #[test]
    fn test_clean_binary_hex() {
        assert_eq!(clean_binary(&[0x00, 0x01, 0xFF]), "[HEX: 0001ff]");

        let long = vec![0u8; 150];
        let shown = clean_binary(&long);
        assert!(shown.starts_with("[HEX: 0000"));
        assert!(shown.ends_with("...]"));
        assert_eq!(shown.len(), "[HEX: ".len() + 200 + "...]".len());
    }

    #[test]
    fn test_throwable_object() {
        let mut fields = BTreeMap::new();
        fields.insert("detailMessage".to_string(), Value::string("boom"));
        fields.insert("stackTrace".to_string(), Value::List(vec![]));
        fields.insert("code".to_string(), Value::Int(7));

        let value = object_or_exception("com.acme.BizException".to_string(), fields);
        match value {
            Value::ExceptionInfo(map) => {
                assert_eq!(map["type"], "com.acme.BizException");
                assert_eq!(map["message"], "boom");
                assert_eq!(map["code"], "7");
                assert!(!map.contains_key("stackTrace"));
            }
            other => panic!("expected exception info, got {:?}", other),
        }
    }

    #[test]
    fn test_into_exception_info() {
        let info = into_exception_info(Value::string("something failed"));
        assert_eq!(
            info,
            Value::ExceptionInfo(BTreeMap::from([
                ("message".to_string(), "something failed".to_string()),
                ("type".to_string(), "exception".to_string()),
            ]))
        );

        let object = Value::Object {
            class: "com.acme.Fault".to_string(),
            fields: BTreeMap::from([("reason".to_string(), Value::string("quota"))]),
        };
        match into_exception_info(object) {
            Value::ExceptionInfo(map) => {
                assert_eq!(map["type"], "com.acme.Fault");
                assert_eq!(map["reason"], "quota");
            }
            other => panic!("expected exception info, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_object_stays_object() {
        let value = object_or_exception("com.acme.User".to_string(), BTreeMap::new());
        assert!(matches!(value, Value::Object { .. }));
    }
}

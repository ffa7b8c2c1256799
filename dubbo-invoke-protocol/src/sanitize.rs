//! Strips transport and runtime bookkeeping from decoded results.

use crate::value::Value;

/// Keys that are dropped regardless of case.
const SYSTEM_KEYS: &[&str] = &[
    "hashcode",
    "tostring",
    "serialversionuid",
    "type",
    "ref",
    "objectref",
    "classdef",
    "typeref",
];

/// Returns true for keys that carry serialization metadata rather than data.
pub fn is_system_key(key: &str) -> bool {
    if key.starts_with("class")
        || key.starts_with('$')
        || key.starts_with('_')
        || key.starts_with("dubbo.")
    {
        return true;
    }
    if key == "@type" || key == "@class" {
        return true;
    }
    SYSTEM_KEYS.iter().any(|k| key.eq_ignore_ascii_case(k))
}

/// Drops control characters, keeping tab, newline, carriage return and any
/// non-ASCII character.
pub fn clean_string(s: &str) -> String {
    s.chars()
        .filter(|&c| matches!(c, ' '..='~' | '\t' | '\n' | '\r') || (c as u32) > 127)
        .collect()
}

/// Recursively removes system keys and cleans string leaves.
///
/// Exception info keeps its keys (`type` is meaningful there) and only has
/// its strings cleaned.
pub fn sanitize(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(clean_string(s)),
        Value::List(items) => Value::List(items.iter().map(sanitize).collect()),
        Value::Map(entries) => Value::Map(
            entries
                .iter()
                .filter(|(k, _)| !is_system_key(k))
                .map(|(k, v)| (k.clone(), sanitize(v)))
                .collect(),
        ),
        Value::Object { class, fields } => Value::Object {
            class: class.clone(),
            fields: fields
                .iter()
                .filter(|(k, _)| !is_system_key(k))
                .map(|(k, v)| (k.clone(), sanitize(v)))
                .collect(),
        },
        Value::ExceptionInfo(info) => Value::ExceptionInfo(
            info.iter()
                .map(|(k, v)| (k.clone(), clean_string(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_sanitize_drops_system_keys() {
        let value = Value::from(json!({"clazz": 0, "id": 1, "$ref": 2, "name": "ok"}));
        let mut expected = BTreeMap::new();
        expected.insert("clazz".to_string(), Value::Int(0));
        expected.insert("id".to_string(), Value::Int(1));
        expected.insert("name".to_string(), Value::string("ok"));
        assert_eq!(sanitize(&value), Value::Map(expected));
    }

    #[test]
    fn test_sanitize_class_key_map() {
        // "class" is a plain map key here, not an object tag
        let value = Value::Map(BTreeMap::from([
            ("class".to_string(), Value::string("x.Y")),
            ("id".to_string(), Value::Int(1)),
            ("$ref".to_string(), Value::Int(2)),
            ("name".to_string(), Value::string("ok")),
        ]));
        assert_eq!(sanitize(&value).to_json(), json!({"id": 1, "name": "ok"}));
    }

    #[test]
    fn test_system_key_rules() {
        assert!(is_system_key("class"));
        assert!(is_system_key("className"));
        assert!(is_system_key("$ref"));
        assert!(is_system_key("_id"));
        assert!(is_system_key("dubbo.tag"));
        assert!(is_system_key("@type"));
        assert!(is_system_key("@class"));
        assert!(is_system_key("HashCode"));
        assert!(is_system_key("serialVersionUID"));
        assert!(is_system_key("TYPE"));
        assert!(is_system_key("typeRef"));

        assert!(!is_system_key("name"));
        assert!(!is_system_key("types"));
        assert!(!is_system_key("@id"));
        assert!(!is_system_key("dubbo"));
    }

    #[test]
    fn test_clean_string() {
        assert_eq!(clean_string("a\u{0}b\u{7}c"), "abc");
        assert_eq!(clean_string("tab\there\r\n"), "tab\there\r\n");
        assert_eq!(clean_string("日本\u{7f}"), "日本");
    }

    #[test]
    fn test_sanitize_nested() {
        let value = Value::List(vec![Value::Object {
            class: "a.B".to_string(),
            fields: BTreeMap::from([
                ("_hidden".to_string(), Value::Int(1)),
                ("label".to_string(), Value::string("x\u{1}y")),
            ]),
        }]);
        let cleaned = sanitize(&value);
        assert_eq!(cleaned.to_json(), json!([{"label": "xy"}]));
    }

    #[test]
    fn test_exception_info_keeps_type() {
        let info = Value::ExceptionInfo(BTreeMap::from([
            ("type".to_string(), "java.lang.IllegalStateException".to_string()),
            ("message".to_string(), "bad\u{0}state".to_string()),
        ]));
        assert_eq!(
            sanitize(&info).to_json(),
            json!({"type": "java.lang.IllegalStateException", "message": "badstate"})
        );
    }
}

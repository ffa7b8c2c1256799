//! Hessian2 reader with bounded recursion.
//!
//! Decoding prefers a partial result over failure. Values nested too deeply,
//! unknown tags, dangling references and truncated containers all become
//! [`Value::Unresolved`] placeholders in place. Only a truncated scalar at the
//! top of a read surfaces as an error.

use crate::error::SerializationError;
use crate::exception::{clean_binary, object_or_exception, parse_exception_info};
use crate::sanitize::is_system_key;
use crate::value::Value;
use std::collections::BTreeMap;

/// Nesting depth past which a value becomes a placeholder.
pub const MAX_VALUE_DEPTH: usize = 15;

/// Nesting depth of class definitions and exception objects past which
/// their fields become placeholders.
pub const MAX_CLASS_DEPTH: usize = 8;

/// Depth up to which an over-deep subtree is still parsed to skip it.
const HARD_DEPTH_LIMIT: usize = 64;

const MAX_CLASS_FIELDS: i64 = 100;

const MAX_INFERRED_FIELDS: usize = 50;

/// Total nodes that `R`/`Q` references may copy into one body's result.
/// References past it stay unresolved.
pub const MAX_REFERENCED_NODES: usize = 100_000;

const FIELD_HINTS: &[(&str, &str)] = &[
    ("name", "name"),
    ("code", "code"),
    ("msg", "message"),
    ("message", "message"),
    ("status", "status"),
    ("result", "result"),
    ("data", "data"),
    ("success", "success"),
    ("error", "error"),
];

type ReadResult<T> = Result<T, SerializationError>;

#[derive(Debug, Clone, Copy, Default)]
struct Depth {
    value: usize,
    class: usize,
}

impl Depth {
    fn nested(self) -> Self {
        Self {
            value: self.value + 1,
            ..self
        }
    }

    fn nested_class(self) -> Self {
        Self {
            value: self.value + 1,
            class: self.class + 1,
        }
    }
}

/// A value registered for back-references, with its size in nodes.
#[derive(Debug)]
struct Referenced {
    value: Value,
    nodes: usize,
}

#[derive(Debug, Clone)]
struct ClassDef {
    name: String,
    fields: Vec<String>,
}

/// Reads Hessian2 values from a byte slice.
///
/// Class definitions and reference slots accumulate across reads, so one
/// reader should be used per body.
pub struct HessianReader<'a> {
    data: &'a [u8],
    pos: usize,
    value_limit: usize,
    class_limit: usize,
    class_defs: Vec<ClassDef>,
    refs: Vec<Option<Referenced>>,
    referenced_nodes: usize,
}

impl<'a> HessianReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            value_limit: MAX_VALUE_DEPTH,
            class_limit: MAX_CLASS_DEPTH,
            class_defs: Vec::new(),
            refs: Vec::new(),
            referenced_nodes: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Unread bytes.
    pub fn rest(&self) -> &'a [u8] {
        let data = self.data;
        &data[self.pos..]
    }

    pub fn peek_byte(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn read_byte(&mut self) -> ReadResult<u8> {
        let byte = self.peek_byte().ok_or(SerializationError::UnexpectedEof { offset: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    /// Reads the next value.
    pub fn read_value(&mut self) -> ReadResult<Value> {
        self.value(Depth::default())
    }

    fn value(&mut self, depth: Depth) -> ReadResult<Value> {
        if depth.value > self.value_limit || depth.class > self.class_limit {
            return Ok(self.skip_too_deep(depth));
        }

        let start = self.pos;
        let tag = self.read_byte()?;
        let value = match tag {
            b'N' => Value::Null,
            b'T' => Value::Bool(true),
            b'F' => Value::Bool(false),
            b'I' => Value::Int(self.read_i32()?),
            b'Y' => Value::Long(self.read_i32()? as i64),
            b'L' => Value::Long(self.read_i64()?),
            b'D' => Value::Double(f64::from_bits(self.read_i64()? as u64)),
            0x5B => Value::Double(0.0),
            0x5C => Value::Double(1.0),
            0x5D => Value::Double(self.read_byte()? as i8 as f64),
            0x5E => Value::Double(self.read_i16()? as f64),
            0x5F => Value::Double(self.read_i32()? as f64 / 1000.0),
            b'S' => {
                let len = self.read_i32()?;
                let len =
                    usize::try_from(len).map_err(|_| SerializationError::InvalidLength(len as i64))?;
                Value::String(self.read_chars(len)?)
            }
            0x00..=0x1F => Value::String(self.read_chars(tag as usize)?),
            0x30..=0x33 => {
                let len = (((tag - 0x30) as usize) << 8) | self.read_byte()? as usize;
                Value::String(self.read_chars(len)?)
            }
            0x20..=0x2F => {
                let bytes = self.take((tag - 0x20) as usize)?;
                Value::String(String::from_utf8_lossy(bytes).into_owned())
            }
            0x38..=0x3F => {
                let mid = self.read_byte()? as i64;
                let low = self.read_byte()? as i64;
                Value::Long(((tag as i64 - 0x3C) << 16) + (mid << 8) + low)
            }
            0x80..=0xD7 => Value::Int(self.compact_int(tag)?),
            0xD8..=0xEF => Value::Long(tag as i64 - 0xE0),
            0xF0..=0xFF => Value::Long(((tag as i64 - 0xF8) << 8) + self.read_byte()? as i64),
            b'H' => self.map(depth, None),
            b'M' => {
                let class = self.type_name(depth)?;
                self.map(depth, Some(class))
            }
            b'V' | 0x57 => self.list(depth, None),
            b'X' => {
                let len = self.read_int()?;
                let len =
                    usize::try_from(len).map_err(|_| SerializationError::InvalidLength(len as i64))?;
                self.list(depth, Some(len))
            }
            b'R' => {
                let index = self.read_i32()?;
                self.reference(index)
            }
            b'Q' => {
                let index = self.read_int()?;
                self.reference(index)
            }
            b'O' => {
                let index = self.read_int()?;
                self.instance_or_inferred(depth, index)
            }
            0x60..=0x6F => self.instance_or_inferred(depth, (tag - 0x60) as i32),
            b'C' => self.class_def(depth, start + 1),
            _ => stray_byte(tag),
        };
        Ok(value)
    }

    /// Parses an over-deep subtree with raised limits so the stream stays
    /// aligned, then discards it.
    fn skip_too_deep(&mut self, depth: Depth) -> Value {
        tracing::warn!(
            depth = depth.value,
            class_depth = depth.class,
            offset = self.pos,
            "recursion limit reached, skipping nested value"
        );

        if self.value_limit >= HARD_DEPTH_LIMIT {
            self.abandon(&SerializationError::RecursionLimit {
                limit: HARD_DEPTH_LIMIT,
            });
            return Value::unresolved("recursion limit");
        }

        let saved = (self.value_limit, self.class_limit);
        self.value_limit = HARD_DEPTH_LIMIT;
        self.class_limit = HARD_DEPTH_LIMIT;
        if let Err(err) = self.value(depth) {
            self.abandon(&err);
        }
        (self.value_limit, self.class_limit) = saved;

        Value::unresolved("recursion limit")
    }

    /// Gives up on the rest of the input.
    fn abandon(&mut self, err: &SerializationError) {
        tracing::warn!(error = %err, offset = self.pos, "abandoning rest of body");
        self.pos = self.data.len();
    }

    fn map(&mut self, depth: Depth, class: Option<String>) -> Value {
        let slot = self.reserve_ref();
        let mut entries = BTreeMap::new();

        loop {
            match self.peek_byte() {
                None => break,
                Some(b'Z') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => {}
            }
            match self.entry(depth) {
                Ok((key, value)) => {
                    entries.insert(key_text(key), value);
                }
                Err(err) => {
                    self.abandon(&err);
                    break;
                }
            }
        }

        let value = match class {
            Some(class) if !class.is_empty() => object_or_exception(class, entries),
            _ => Value::Map(entries),
        };
        self.fill_ref(slot, &value);
        value
    }

    fn entry(&mut self, depth: Depth) -> ReadResult<(Value, Value)> {
        let key = self.value(depth.nested())?;
        let value = if self.is_empty() {
            Value::Null
        } else {
            self.value(depth.nested())?
        };
        Ok((key, value))
    }

    fn list(&mut self, depth: Depth, len: Option<usize>) -> Value {
        let slot = self.reserve_ref();
        let mut items = Vec::with_capacity(len.unwrap_or(0).min(self.remaining()));

        loop {
            if len.is_some_and(|len| items.len() >= len) {
                break;
            }
            match self.peek_byte() {
                None => break,
                Some(b'Z') if len.is_none() => {
                    self.pos += 1;
                    break;
                }
                Some(_) => {}
            }
            match self.value(depth.nested()) {
                Ok(item) => items.push(item),
                Err(err) => {
                    items.push(Value::unresolved(err.to_string()));
                    self.abandon(&err);
                    break;
                }
            }
        }

        let value = Value::List(items);
        self.fill_ref(slot, &value);
        value
    }

    fn type_name(&mut self, depth: Depth) -> ReadResult<String> {
        match self.value(depth.nested())? {
            Value::String(name) => Ok(name),
            Value::Int(index) => Ok(format!("#{}", index)),
            other => Err(SerializationError::Unsupported(format!(
                "type name of kind {}",
                other.kind()
            ))),
        }
    }

    fn reference(&mut self, index: i32) -> Value {
        let target = usize::try_from(index)
            .ok()
            .and_then(|i| self.refs.get(i))
            .and_then(Option::as_ref);
        match target {
            Some(target) if self.referenced_nodes + target.nodes <= MAX_REFERENCED_NODES => {
                self.referenced_nodes += target.nodes;
                target.value.clone()
            }
            Some(target) => {
                tracing::warn!(
                    index,
                    nodes = target.nodes,
                    copied = self.referenced_nodes,
                    "reference budget exhausted"
                );
                Value::unresolved(format!("ref:{}", index))
            }
            None => {
                tracing::debug!(index, "unresolvable reference");
                Value::unresolved(format!("ref:{}", index))
            }
        }
    }

    fn reserve_ref(&mut self) -> usize {
        self.refs.push(None);
        self.refs.len() - 1
    }

    fn fill_ref(&mut self, slot: usize, value: &Value) {
        if let Some(entry) = self.refs.get_mut(slot) {
            *entry = Some(Referenced {
                value: value.clone(),
                nodes: node_count(value),
            });
        }
    }

    fn instance_or_inferred(&mut self, depth: Depth, index: i32) -> Value {
        let def = usize::try_from(index)
            .ok()
            .and_then(|i| self.class_defs.get(i))
            .cloned();
        match def {
            Some(def) => self.instance(depth, def),
            None => self.inferred_object(depth, index),
        }
    }

    /// Reads the field values of an object whose class definition is known.
    fn instance(&mut self, depth: Depth, def: ClassDef) -> Value {
        let slot = self.reserve_ref();
        let mut fields = BTreeMap::new();

        for name in def.fields {
            if self.is_empty() {
                break;
            }
            match self.value(depth.nested_class()) {
                Ok(value) => {
                    if !is_system_key(&name) {
                        fields.insert(name, value);
                    }
                }
                Err(err) => {
                    self.abandon(&err);
                    break;
                }
            }
        }

        let value = object_or_exception(def.name, fields);
        self.fill_ref(slot, &value);
        value
    }

    /// Reads an object without type metadata: the rest of the body is read
    /// as values whose field names are guessed from their content, and any
    /// unparseable residue is kept as cleaned text under `data`.
    fn inferred_object(&mut self, depth: Depth, type_ref: i32) -> Value {
        tracing::debug!(type_ref, "object without class definition, inferring fields");
        let slot = self.reserve_ref();
        let mut fields = BTreeMap::new();

        let mut index = 0;
        while !self.is_empty() && index < MAX_INFERRED_FIELDS {
            let start = self.pos;
            match self.value(depth.nested()) {
                Ok(Value::Null) => {}
                Ok(value) => {
                    let mut name = infer_field_name(&value, index);
                    if fields.contains_key(&name) {
                        name = format!("{}{}", name, index);
                    }
                    fields.insert(name, value);
                }
                Err(err) => {
                    tracing::debug!(error = %err, "object residue is not a value");
                    self.pos = start;
                    break;
                }
            }
            index += 1;
        }

        if !self.is_empty() {
            let residue = clean_binary(self.rest());
            self.pos = self.data.len();
            if !residue.trim().is_empty() {
                fields.insert("data".to_string(), Value::String(residue));
            }
        }

        let value = if fields.is_empty() {
            Value::unresolved("empty object")
        } else {
            Value::Object {
                class: format!("#{}", type_ref),
                fields,
            }
        };
        self.fill_ref(slot, &value);
        value
    }

    /// Reads a class definition and the instance that follows it. A
    /// structurally broken definition falls back to mining the raw bytes for
    /// exception text.
    fn class_def(&mut self, depth: Depth, start: usize) -> Value {
        match self.class_def_body(depth) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "class definition unreadable, reading raw text");
                let raw = String::from_utf8_lossy(&self.data[start..]).into_owned();
                self.pos = self.data.len();
                parse_exception_info(&raw)
            }
        }
    }

    fn class_def_body(&mut self, depth: Depth) -> ReadResult<Value> {
        let header = depth.nested();
        let name = match self.value(header)? {
            Value::String(name) => name,
            other => {
                return Err(SerializationError::Unsupported(format!(
                    "class name of kind {}",
                    other.kind()
                )))
            }
        };

        let count = self
            .value(header)?
            .as_i64()
            .ok_or_else(|| SerializationError::Unsupported("class field count".to_string()))?;
        if count < 0 {
            return Err(SerializationError::InvalidLength(count));
        }
        if count > MAX_CLASS_FIELDS {
            tracing::warn!(count, "class field count capped at {}", MAX_CLASS_FIELDS);
        }
        let count = count.min(MAX_CLASS_FIELDS) as usize;

        let mut fields = Vec::with_capacity(count);
        for i in 0..count {
            let field = match self.value(header)? {
                Value::String(field) => field,
                Value::Null => format!("field{}", i),
                other => other.to_string(),
            };
            fields.push(field);
        }

        tracing::debug!(class = %name, fields = fields.len(), "class definition");
        self.class_defs.push(ClassDef { name, fields });
        let own = self.class_defs.len() - 1;

        let index = match self.peek_byte() {
            Some(b'O') => {
                self.pos += 1;
                self.read_int()?
            }
            Some(tag @ 0x60..=0x6F) => {
                self.pos += 1;
                (tag - 0x60) as i32
            }
            _ => own as i32,
        };
        let chosen = usize::try_from(index)
            .ok()
            .filter(|i| *i < self.class_defs.len())
            .unwrap_or(own);
        let def = self.class_defs[chosen].clone();

        Ok(self.instance(depth, def))
    }

    /// Reads a Hessian int in any of its encodings.
    fn read_int(&mut self) -> ReadResult<i32> {
        let tag = self.read_byte()?;
        match tag {
            b'I' => self.read_i32(),
            0x80..=0xD7 => self.compact_int(tag),
            other => Err(SerializationError::Unsupported(format!(
                "expected int, found tag {:#04x}",
                other
            ))),
        }
    }

    fn compact_int(&mut self, tag: u8) -> ReadResult<i32> {
        let tag = tag as i32;
        match tag {
            0x80..=0xBF => Ok(tag - 0x90),
            0xC0..=0xCF => Ok(((tag - 0xC8) << 8) + self.read_byte()? as i32),
            _ => {
                let mid = self.read_byte()? as i32;
                let low = self.read_byte()? as i32;
                Ok(((tag - 0xD4) << 16) + (mid << 8) + low)
            }
        }
    }

    /// Reads `count` characters of UTF-8. Hessian string lengths count
    /// characters, so each lead byte decides how many bytes to consume.
    fn read_chars(&mut self, count: usize) -> ReadResult<String> {
        let mut out = String::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            let start = self.pos;
            let lead = self.read_byte()?;
            let width = match lead {
                0x00..=0x7F => {
                    out.push(lead as char);
                    continue;
                }
                0xC0..=0xDF => 2,
                0xE0..=0xEF => 3,
                0xF0..=0xF7 => 4,
                _ => {
                    out.push(char::REPLACEMENT_CHARACTER);
                    continue;
                }
            };
            self.take(width - 1)?;
            match std::str::from_utf8(&self.data[start..self.pos]) {
                Ok(ch) => out.push_str(ch),
                Err(_) => out.push(char::REPLACEMENT_CHARACTER),
            }
        }
        Ok(out)
    }

    fn take(&mut self, n: usize) -> ReadResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(SerializationError::UnexpectedEof {
                offset: self.data.len(),
            });
        }
        let data = self.data;
        let slice = &data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_i16(&mut self) -> ReadResult<i16> {
        let b = self.take(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn read_i32(&mut self) -> ReadResult<i32> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i64(&mut self) -> ReadResult<i64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(i64::from_be_bytes(raw))
    }
}

/// Number of values in a tree, the root included.
fn node_count(value: &Value) -> usize {
    match value {
        Value::List(items) => 1 + items.iter().map(node_count).sum::<usize>(),
        Value::Map(entries) => 1 + entries.values().map(node_count).sum::<usize>(),
        Value::Object { fields, .. } => 1 + fields.values().map(node_count).sum::<usize>(),
        _ => 1,
    }
}

fn key_text(key: Value) -> String {
    match key {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// A byte matching no tag is kept as a one-character string when it is
/// valid UTF-8 on its own.
fn stray_byte(tag: u8) -> Value {
    tracing::debug!("unknown tag {:#04x}", tag);
    match std::str::from_utf8(&[tag]) {
        Ok(ch) => Value::string(ch),
        Err(_) => Value::unresolved(format!("0x{:02x}", tag)),
    }
}

fn infer_field_name(value: &Value, index: usize) -> String {
    let text = value.to_string();
    if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
        return "id".to_string();
    }
    if text.contains('@') {
        return "email".to_string();
    }
    if looks_like_date(&text) {
        return "date".to_string();
    }

    let lower = text.to_lowercase();
    if let Some((_, name)) = FIELD_HINTS.iter().find(|(hint, _)| lower.contains(hint)) {
        return name.to_string();
    }

    match value {
        Value::Int(_) | Value::Long(_) | Value::Double(_) => format!("number{}", index),
        Value::Bool(_) => format!("flag{}", index),
        _ => format!("field{}", index),
    }
}

fn looks_like_date(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.len() >= 10
        && bytes[..10].iter().enumerate().all(|(i, b)| {
            if i == 4 || i == 7 {
                *b == b'-'
            } else {
                b.is_ascii_digit()
            }
        })
}

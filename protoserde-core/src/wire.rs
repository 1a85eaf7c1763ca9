//! # Descriptor-Driven Wire Codec
//!
//! Converts between the protobuf binary encoding and `serde_json::Value` through
//! [`DynamicMessage`], so there is no generated code involved: the descriptor picked by the
//! resolver drives both directions.
//!
//! ## JSON mapping
//!
//! The canonical protobuf JSON mapping:
//!
//! * Field names are rendered as declared; both declared and JSON (`lowerCamelCase`) names
//!   are accepted on input.
//! * 64-bit integers are rendered as strings and accepted as strings or numbers.
//! * `bytes` use standard base64.
//! * Enums are rendered by symbolic name; values without a name are rendered as numbers.
//! * `google.protobuf.Timestamp` and `Duration` are RFC 3339 and `"1.5s"` strings, and the
//!   wrapper types are their bare scalar.
//!
//! ## Defaults
//!
//! Fields without presence (proto3 singular scalars, repeated fields and maps) are always
//! rendered, with their default value when absent from the wire. Fields with presence
//! (messages, `optional`, proto2 fields, oneof members) are only rendered when present.
//! On encode, fields without presence that hold their default value are not written, so a
//! document that spells out a default and one that omits it encode to the same bytes.
//!
//! Nesting deeper than 100 messages is rejected on decode.
use prost::Message;
use prost_reflect::{
    Cardinality, DynamicMessage, FieldDescriptor, Kind, MessageDescriptor, ReflectMessage,
    SerializeOptions,
};
use serde_json::{Map, Value};
use std::fmt;

/// A malformed record, with the byte offset where decoding stopped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{reason} (at byte {offset})")]
pub struct WireError {
    pub offset: usize,
    pub reason: String,
}

/// A JSON document that does not fit the message type, with the path of the offending field
/// (e.g. `people[0].phones[1].type`).
#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    pub path: String,
    pub reason: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.reason)
        } else {
            write!(f, "field '{}': {}", self.path, self.reason)
        }
    }
}

impl std::error::Error for FieldError {}

/// Decodes `bytes` as an instance of `desc` and renders it as a JSON object.
pub fn decode_message(desc: &MessageDescriptor, bytes: &[u8]) -> Result<Value, WireError> {
    let mut message = DynamicMessage::new(desc.clone());
    let mut buf = bytes;
    message.merge(&mut buf).map_err(|e| WireError {
        offset: bytes.len() - buf.len(),
        reason: e.to_string(),
    })?;

    let options = SerializeOptions::new()
        .skip_default_fields(false)
        .use_proto_field_name(true);

    // Through text, so `float` fields keep their shortest form instead of the widened double.
    let mut out = Vec::new();
    message
        .serialize_with_options(&mut serde_json::Serializer::new(&mut out), &options)
        .map_err(|e| render_error(bytes, e))?;

    serde_json::from_slice(&out).map_err(|e| render_error(bytes, e))
}

fn render_error(bytes: &[u8], err: serde_json::Error) -> WireError {
    WireError {
        offset: bytes.len(),
        reason: err.to_string(),
    }
}

/// Encodes a JSON document as an instance of `desc`.
pub fn encode_message(desc: &MessageDescriptor, value: &Value) -> Result<Vec<u8>, FieldError> {
    if let Value::Object(object) = value {
        check_oneofs(desc, object)?;
    }

    let message = DynamicMessage::deserialize(desc.clone(), value).map_err(|e| FieldError {
        path: locate(desc, value),
        reason: e.to_string(),
    })?;

    if let Some(path) = missing_required(&message) {
        return Err(FieldError {
            path,
            reason: "required field is missing".to_string(),
        });
    }

    Ok(message.encode_to_vec())
}

fn check_oneofs(desc: &MessageDescriptor, object: &Map<String, Value>) -> Result<(), FieldError> {
    for oneof in desc.oneofs() {
        let set: Vec<String> = oneof
            .fields()
            .filter(|field| {
                [field.name(), field.json_name()]
                    .iter()
                    .any(|name| object.get(*name).is_some_and(|v| !v.is_null()))
            })
            .map(|field| field.name().to_string())
            .collect();

        if set.len() > 1 {
            return Err(FieldError {
                path: oneof.name().to_string(),
                reason: format!("more than one member of the oneof is set: {}", set.join(", ")),
            });
        }
    }
    Ok(())
}

/// The first required field (proto2) left unset, searched through nested messages.
fn missing_required(message: &DynamicMessage) -> Option<String> {
    for field in message.descriptor().fields() {
        let present = message.has_field(&field);
        if field.cardinality() == Cardinality::Required && !present {
            return Some(field.name().to_string());
        }
        if !present || !matches!(field.kind(), Kind::Message(_)) || field.is_map() {
            continue;
        }

        let value = message.get_field(&field);
        if let Some(inner) = value.as_message() {
            if let Some(path) = missing_required(inner) {
                return Some(format!("{}.{path}", field.name()));
            }
        } else if let Some(items) = value.as_list() {
            for (i, item) in items.iter().enumerate() {
                if let Some(path) = item.as_message().and_then(missing_required) {
                    return Some(format!("{}[{i}].{path}", field.name()));
                }
            }
        }
    }
    None
}

fn accepts(desc: &MessageDescriptor, key: &str, value: Value) -> bool {
    let mut single = Map::new();
    single.insert(key.to_string(), value);
    DynamicMessage::deserialize(desc.clone(), &Value::Object(single)).is_ok()
}

/// Narrows a rejected document down to the path of the field that does not fit, by
/// deserializing one entry at a time.
fn locate(desc: &MessageDescriptor, value: &Value) -> String {
    let Value::Object(object) = value else {
        return String::new();
    };

    for (key, item) in object {
        if accepts(desc, key, item.clone()) {
            continue;
        }
        let Some(field) = desc
            .get_field_by_name(key)
            .or_else(|| desc.get_field_by_json_name(key))
        else {
            return key.clone();
        };
        return format!("{key}{}", locate_field(desc, &field, key, item));
    }
    String::new()
}

fn locate_field(desc: &MessageDescriptor, field: &FieldDescriptor, key: &str, value: &Value) -> String {
    match value {
        Value::Array(items) if field.is_list() => {
            for (i, item) in items.iter().enumerate() {
                if !accepts(desc, key, Value::Array(vec![item.clone()])) {
                    return format!("[{i}]{}", locate_nested(&field.kind(), item));
                }
            }
            String::new()
        }
        Value::Object(entries) if field.is_map() => {
            let Kind::Message(entry) = field.kind() else {
                return String::new();
            };
            let value_kind = entry.map_entry_value_field().kind();
            for (k, v) in entries {
                let mut single = Map::new();
                single.insert(k.clone(), v.clone());
                if !accepts(desc, key, Value::Object(single)) {
                    return format!("[{k:?}]{}", locate_nested(&value_kind, v));
                }
            }
            String::new()
        }
        _ => locate_nested(&field.kind(), value),
    }
}

fn locate_nested(kind: &Kind, value: &Value) -> String {
    match kind {
        Kind::Message(inner)
            if value.is_object() && !inner.full_name().starts_with("google.protobuf.") =>
        {
            let path = locate(inner, value);
            if path.is_empty() {
                path
            } else {
                format!(".{path}")
            }
        }
        _ => String::new(),
    }
}

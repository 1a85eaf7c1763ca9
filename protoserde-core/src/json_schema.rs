//! JSON Schema generation for message types.
//!
//! Every reachable message type becomes an entry in `$defs` and is referenced through
//! `$ref`, so recursive types produce a finite document. Well-known types are described by
//! their JSON form instead.
use prost_reflect::{Cardinality, FieldDescriptor, Kind, MessageDescriptor};
use serde_json::{Map, Value, json};

const DIALECT: &str = "https://json-schema.org/draft/2020-12/schema";

/// A JSON Schema describing the JSON rendering of `message`.
pub fn message_schema(message: &MessageDescriptor) -> Value {
    let mut defs = Map::new();
    let mut pending = vec![message.clone()];

    while let Some(next) = pending.pop() {
        if defs.contains_key(next.full_name()) {
            continue;
        }
        let def = message_def(&next, &mut pending);
        defs.insert(next.full_name().to_string(), def);
    }

    json!({
        "$schema": DIALECT,
        "$ref": reference(message),
        "$defs": defs,
    })
}

fn reference(message: &MessageDescriptor) -> String {
    format!("#/$defs/{}", message.full_name())
}

fn message_def(message: &MessageDescriptor, pending: &mut Vec<MessageDescriptor>) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for field in message.fields() {
        properties.insert(field.name().to_string(), field_schema(&field, pending));
        if field.cardinality() == Cardinality::Required {
            required.push(Value::String(field.name().to_string()));
        }
    }

    let mut def = json!({
        "title": message.full_name(),
        "type": "object",
        "properties": properties,
        "additionalProperties": false,
    });
    if !required.is_empty() {
        def["required"] = Value::Array(required);
    }
    def
}

fn field_schema(field: &FieldDescriptor, pending: &mut Vec<MessageDescriptor>) -> Value {
    if field.is_map()
        && let Kind::Message(entry) = field.kind()
    {
        let value_schema = kind_schema(&entry.map_entry_value_field().kind(), pending);
        return json!({ "type": "object", "additionalProperties": value_schema });
    }

    let single = kind_schema(&field.kind(), pending);
    if field.is_list() {
        json!({ "type": "array", "items": single })
    } else {
        single
    }
}

fn kind_schema(kind: &Kind, pending: &mut Vec<MessageDescriptor>) -> Value {
    match kind {
        Kind::Message(message) => well_known_schema(message).unwrap_or_else(|| {
            pending.push(message.clone());
            json!({ "$ref": reference(message) })
        }),
        Kind::Enum(descriptor) => {
            let names: Vec<String> = descriptor.values().map(|v| v.name().to_string()).collect();
            json!({ "title": descriptor.full_name(), "type": "string", "enum": names })
        }
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => {
            json!({ "type": "integer", "minimum": i32::MIN, "maximum": i32::MAX })
        }
        Kind::Uint32 | Kind::Fixed32 => {
            json!({ "type": "integer", "minimum": 0, "maximum": u32::MAX })
        }
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => {
            json!({ "type": ["integer", "string"], "pattern": "^-?[0-9]+$" })
        }
        Kind::Uint64 | Kind::Fixed64 => {
            json!({ "type": ["integer", "string"], "minimum": 0, "pattern": "^[0-9]+$" })
        }
        Kind::Float | Kind::Double => json!({
            "anyOf": [
                { "type": "number" },
                { "enum": ["NaN", "Infinity", "-Infinity"] }
            ]
        }),
        Kind::Bool => json!({ "type": "boolean" }),
        Kind::String => json!({ "type": "string" }),
        Kind::Bytes => json!({ "type": "string", "contentEncoding": "base64" }),
    }
}

fn well_known_schema(message: &MessageDescriptor) -> Option<Value> {
    let schema = match message.full_name() {
        "google.protobuf.Timestamp" => json!({ "type": "string", "format": "date-time" }),
        "google.protobuf.Duration" => {
            json!({ "type": "string", "pattern": "^-?[0-9]+(\\.[0-9]+)?s$" })
        }
        "google.protobuf.FieldMask" => json!({ "type": "string" }),
        "google.protobuf.Empty" | "google.protobuf.Struct" => json!({ "type": "object" }),
        "google.protobuf.ListValue" => json!({ "type": "array" }),
        "google.protobuf.Value" => json!({}),
        "google.protobuf.DoubleValue"
        | "google.protobuf.FloatValue"
        | "google.protobuf.Int64Value"
        | "google.protobuf.UInt64Value"
        | "google.protobuf.Int32Value"
        | "google.protobuf.UInt32Value"
        | "google.protobuf.BoolValue"
        | "google.protobuf.StringValue"
        | "google.protobuf.BytesValue" => {
            let mut wrapped = kind_schema(&message.get_field(1)?.kind(), &mut Vec::new());
            wrapped["title"] = Value::String(message.full_name().to_string());
            wrapped
        }
        _ => return None,
    };
    Some(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorRegistry;
    use crate::schema::parser::parse;

    fn registry(source: &str) -> DescriptorRegistry {
        let file = parse("test.proto", source).expect("Failed to parse");
        DescriptorRegistry::build(&[file]).expect("Failed to build registry")
    }

    #[test]
    fn test_recursive_types_are_referenced() {
        let registry = registry(
            r#"
            syntax = "proto3";
            package tree;
            message Node {
              string label = 1;
              repeated Node children = 2;
              map<string, Leaf> leaves = 3;
            }
            message Leaf { Kind kind = 1; }
            enum Kind { SMALL = 0; LARGE = 1; }
            "#,
        );
        let node = registry.message_by_name("tree.Node").unwrap();

        let schema = message_schema(&node);

        assert_eq!(schema["$ref"], "#/$defs/tree.Node");
        let node = &schema["$defs"]["tree.Node"];
        assert_eq!(node["properties"]["children"]["items"]["$ref"], "#/$defs/tree.Node");
        assert_eq!(
            node["properties"]["leaves"]["additionalProperties"]["$ref"],
            "#/$defs/tree.Leaf"
        );
        assert_eq!(
            schema["$defs"]["tree.Leaf"]["properties"]["kind"]["enum"],
            json!(["SMALL", "LARGE"])
        );
        // map entry types are not separate definitions
        assert_eq!(schema["$defs"].as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_required_fields_are_listed() {
        let registry = registry(
            "syntax = \"proto2\"; message R { required string id = 1; optional int64 n = 2; }",
        );
        let desc = registry.message_by_name("R").unwrap();

        let schema = message_schema(&desc);

        let def = &schema["$defs"]["R"];
        assert_eq!(def["required"], json!(["id"]));
        assert_eq!(def["properties"]["n"]["type"], json!(["integer", "string"]));
    }

    #[test]
    fn test_well_known_types_are_described_by_their_json_form() {
        let timestamp = parse(
            "google/protobuf/timestamp.proto",
            crate::schema::well_known::source("google/protobuf/timestamp.proto").unwrap(),
        )
        .unwrap();
        let wrappers = parse(
            "google/protobuf/wrappers.proto",
            crate::schema::well_known::source("google/protobuf/wrappers.proto").unwrap(),
        )
        .unwrap();
        let event = parse(
            "event.proto",
            r#"
            syntax = "proto3";
            import "google/protobuf/timestamp.proto";
            import "google/protobuf/wrappers.proto";
            message Event {
              google.protobuf.Timestamp at = 1;
              google.protobuf.BoolValue flag = 2;
            }
            "#,
        )
        .unwrap();
        let registry = DescriptorRegistry::build(&[timestamp, wrappers, event]).unwrap();

        let schema = message_schema(&registry.message_by_name("Event").unwrap());

        let event = &schema["$defs"]["Event"]["properties"];
        assert_eq!(event["at"]["format"], "date-time");
        assert_eq!(event["flag"]["type"], "boolean");
        assert_eq!(schema["$defs"].as_object().unwrap().len(), 1);
    }
}

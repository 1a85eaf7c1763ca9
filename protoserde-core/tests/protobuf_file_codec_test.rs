use protoserde_core::codec::{MESSAGE_NAME, SCHEMA_FILE};
use protoserde_core::config::ConfigError;
use protoserde_core::prost::Message;
use protoserde_core::schema::loader::SchemaLoadError;
use protoserde_core::{
    CodecError, MessageCodec, ProtobufFileCodec, Role, TypeResolutionError,
    can_be_auto_configured,
};
use serde_json::{Value, json};
use std::path::PathBuf;

const PERSON_JSON: &str =
    r#"{ "name": "My Name", "id": 101, "email": "user1@example.com", "phones": [] }"#;

const BOOK_JSON: &str = r#"{ "version": 1, "people": [
    { "name": "My Name", "id": 102, "email": "addrBook@example.com", "phones": [] }
]}"#;

const SENSOR_JSON: &str = r#"{ "name": "My Sensor", "temperature": 20.5, "humidity": 50,
    "door": "OPEN", "lang": "EN" }"#;

fn fixture(path: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(path)
        .to_string_lossy()
        .into_owned()
}

fn address_book_path() -> String {
    fixture("protobuf-example/address-book.proto")
}

fn sensor_path() -> String {
    fixture("iot/sensor.proto")
}

fn person_bytes() -> Vec<u8> {
    let mut bytes = vec![0x0A, 0x07];
    bytes.extend_from_slice(b"My Name");
    bytes.extend_from_slice(&[0x10, 0x65, 0x1A, 0x11]);
    bytes.extend_from_slice(b"user1@example.com");
    bytes
}

fn address_book_bytes() -> Vec<u8> {
    let mut person = vec![0x0A, 0x07];
    person.extend_from_slice(b"My Name");
    person.extend_from_slice(&[0x10, 0x66, 0x1A, 0x14]);
    person.extend_from_slice(b"addrBook@example.com");

    let mut bytes = vec![0x08, 0x01, 0x12, person.len() as u8];
    bytes.extend_from_slice(&person);
    bytes
}

fn sensor_bytes() -> Vec<u8> {
    let mut bytes = vec![0x0A, 0x09];
    bytes.extend_from_slice(b"My Sensor");
    bytes.push(0x11);
    bytes.extend_from_slice(&20.5f64.to_le_bytes());
    bytes.extend_from_slice(&[0x18, 0x32, 0x28, 0x01, 0x30, 0x01]);
    bytes
}

fn assert_json_eq(expected: &str, actual: &str) {
    let expected: Value = serde_json::from_str(expected).expect("Invalid expected JSON");
    let actual: Value = serde_json::from_str(actual).expect("Invalid actual JSON");
    assert_eq!(actual, expected);
}

fn per_stream_codec() -> ProtobufFileCodec {
    ProtobufFileCodec::configure(&json!({
        "schemaSources": [address_book_path(), sensor_path()],
        "messageTypeByStream": {
            "persons": "test.Person",
            "books": "test.AddressBook",
            "sensors": "iot.Sensor"
        },
        "messageTypeForKeyByStream": { "books": "test.AddressBook" }
    }))
    .expect("Failed to configure codec")
}

fn deserialize(codec: &ProtobufFileCodec, stream: &str, role: Role, bytes: &[u8]) -> String {
    codec
        .deserializer(stream, role)
        .expect("No deserializer")
        .deserialize(bytes)
        .expect("Failed to deserialize")
        .result
}

fn serialize(codec: &ProtobufFileCodec, stream: &str, role: Role, text: &str) -> Vec<u8> {
    codec
        .serializer(stream, role)
        .expect("No serializer")
        .serialize(text)
        .expect("Failed to serialize")
}

#[test]
fn test_deserialize_by_stream_and_role() {
    let codec = per_stream_codec();

    let person = deserialize(&codec, "persons", Role::Value, &person_bytes());
    assert_json_eq(PERSON_JSON, &person);

    let book = deserialize(&codec, "books", Role::Key, &address_book_bytes());
    assert_json_eq(BOOK_JSON, &book);

    let sensor = deserialize(&codec, "sensors", Role::Value, &sensor_bytes());
    assert_json_eq(SENSOR_JSON, &sensor);
}

#[test]
fn test_deserialize_metadata_names_type_and_file() {
    let codec = per_stream_codec();

    let result = codec
        .deserializer("sensors", Role::Value)
        .unwrap()
        .deserialize(&sensor_bytes())
        .unwrap();

    assert_eq!(result.metadata[MESSAGE_NAME], "iot.Sensor");
    assert_eq!(result.metadata[SCHEMA_FILE], "sensor.proto");
}

#[test]
fn test_default_message_types() {
    let codec = ProtobufFileCodec::configure(&json!({
        "schemaSource": address_book_path(),
        "defaultMessageType": "test.Person",
        "defaultMessageTypeForKey": "test.AddressBook"
    }))
    .expect("Failed to configure codec");

    let person = deserialize(&codec, "persons", Role::Value, &person_bytes());
    assert_json_eq(PERSON_JSON, &person);

    let book = deserialize(&codec, "books", Role::Key, &address_book_bytes());
    assert_json_eq(BOOK_JSON, &book);
}

#[test]
fn test_default_value_type_applies_to_unlisted_stream() {
    let codec = ProtobufFileCodec::configure(&json!({
        "schemaSources": [fixture("iot")],
        "defaultMessageType": "iot.Sensor"
    }))
    .expect("Failed to configure codec");

    let sensor = deserialize(&codec, "sensors", Role::Value, &sensor_bytes());

    assert_json_eq(SENSOR_JSON, &sensor);
}

#[test]
fn test_serialize_is_byte_stable() {
    let codec = per_stream_codec();

    let person = serialize(
        &codec,
        "persons",
        Role::Value,
        r#"{ "name": "My Name", "id": 101, "email": "user1@example.com" }"#,
    );
    assert_eq!(person, person_bytes());

    let book = serialize(
        &codec,
        "books",
        Role::Key,
        r#"{ "version": 1, "people": [
            { "name": "My Name", "id": 102, "email": "addrBook@example.com" }
        ]}"#,
    );
    assert_eq!(book, address_book_bytes());

    let sensor = serialize(&codec, "sensors", Role::Value, SENSOR_JSON);
    assert_eq!(sensor, sensor_bytes());
}

#[test]
fn test_round_trip_normalises_defaults() {
    let codec = per_stream_codec();

    let bytes = serialize(
        &codec,
        "persons",
        Role::Value,
        r#"{"name":"My Name","id":101,"email":"user1@example.com"}"#,
    );
    let person = deserialize(&codec, "persons", Role::Value, &bytes);

    assert_json_eq(
        r#"{"name":"My Name","id":101,"email":"user1@example.com","phones":[]}"#,
        &person,
    );

    // an explicit default encodes like an omitted field
    let explicit = serialize(
        &codec,
        "persons",
        Role::Value,
        r#"{"name":"My Name","id":101,"email":"user1@example.com","phones":[]}"#,
    );
    assert_eq!(explicit, bytes);
}

#[test]
fn test_nested_and_well_known_types_round_trip() {
    let codec = per_stream_codec();
    let input = json!({
        "name": "Ann",
        "id": 7,
        "email": "",
        "phones": [
            { "number": "555-0100", "type": "WORK" },
            { "number": "555-0101", "type": "MOBILE" }
        ],
        "last_updated": "2023-11-14T22:13:20Z"
    });

    let bytes = serialize(&codec, "persons", Role::Value, &input.to_string());
    let output: Value =
        serde_json::from_str(&deserialize(&codec, "persons", Role::Value, &bytes)).unwrap();

    assert_eq!(output, input);
}

#[test]
fn test_timestamp_object_form_is_rejected() {
    let codec = per_stream_codec();

    let err = codec
        .serializer("persons", Role::Value)
        .unwrap()
        .serialize(r#"{ "name": "Ann", "last_updated": { "seconds": "1700000000", "nanos": 5 } }"#)
        .unwrap_err();

    match &err {
        CodecError::Encode { path, .. } => assert_eq!(path, "last_updated"),
        other => panic!("Unexpected error: {other}"),
    }
}

#[test]
fn test_deeply_nested_record_is_a_decode_error() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    std::fs::write(
        dir.path().join("tree.proto"),
        "syntax = \"proto3\"; package tree; message Node { Node child = 1; }",
    )
    .expect("Failed to write schema");
    let codec = ProtobufFileCodec::configure(&json!({
        "schemaSource": dir.path(),
        "defaultMessageType": "tree.Node"
    }))
    .expect("Failed to configure codec");

    // child { child { ... } }, built back to front
    let mut bytes: Vec<u8> = Vec::new();
    for _ in 0..20_000 {
        let mut header = vec![0x0A];
        protoserde_core::prost::encoding::encode_varint(bytes.len() as u64, &mut header);
        bytes.extend(header.iter().rev());
    }
    bytes.reverse();

    let err = codec
        .deserializer("trees", Role::Value)
        .unwrap()
        .deserialize(&bytes)
        .unwrap_err();

    assert!(matches!(err, CodecError::Decode { .. }), "{err}");

    // the codec is still usable afterwards
    let shallow = deserialize(&codec, "trees", Role::Value, &[0x0A, 0x00]);
    assert_json_eq(r#"{ "child": {} }"#, &shallow);
}

#[test]
fn test_auto_configuration_check() {
    assert!(!can_be_auto_configured(&json!({})));
    assert!(!can_be_auto_configured(&json!({ "schemaSources": [] })));
    assert!(can_be_auto_configured(&json!({ "schemaSource": "file.proto" })));
    assert!(can_be_auto_configured(&json!({ "schemaSources": ["file.proto"] })));
    assert!(can_be_auto_configured(&json!({
        "schemaSource": "file1.proto",
        "schemaSources": ["file2.proto"]
    })));
}

#[test]
fn test_single_source_and_source_list_are_joined() {
    let sensor_dir = fixture("iot");
    let codec = ProtobufFileCodec::configure(&json!({
        "schemaSource": address_book_path(),
        "schemaSources": [sensor_dir],
        "defaultMessageType": "test.AddressBook",
        "messageTypeByStream": {
            "persons": "test.Person",
            "books": "test.AddressBook",
            "sensors": "iot.Sensor"
        }
    }))
    .expect("Failed to configure codec");

    let person = deserialize(&codec, "persons", Role::Value, &person_bytes());
    assert_json_eq(PERSON_JSON, &person);

    let sensor = deserialize(&codec, "sensors", Role::Value, &sensor_bytes());
    assert_json_eq(SENSOR_JSON, &sensor);
}

#[test]
fn test_imports_resolve_across_explicit_directories() {
    let codec = ProtobufFileCodec::configure(&json!({
        "schemaSources": [fixture("iot-only-sensor"), fixture("iot-only-lang")],
        "defaultMessageType": "iot.Sensor",
        "messageTypeByStream": { "sensors": "iot.Sensor" }
    }))
    .expect("Failed to configure codec");

    let sensor = deserialize(&codec, "sensors", Role::Value, &sensor_bytes());

    assert_json_eq(SENSOR_JSON, &sensor);
}

#[test]
fn test_missing_dependency_is_reported() {
    let err = ProtobufFileCodec::configure(&json!({
        "schemaSource": fixture("iot-only-sensor/sensor.proto"),
        "defaultMessageType": "iot.Sensor"
    }))
    .unwrap_err();

    match err {
        ConfigError::SchemaLoad(SchemaLoadError::DependencyNotFound {
            import,
            required_by,
        }) => {
            assert_eq!(import, "lang-description.proto");
            assert_eq!(required_by, "sensor.proto");
        }
        other => panic!("Unexpected error: {other}"),
    }
}

fn assert_unknown_type(config: Value) {
    let err = ProtobufFileCodec::configure(&config).unwrap_err();

    assert!(
        matches!(
            &err,
            ConfigError::TypeResolution(TypeResolutionError::NotFound { type_name, .. })
                if type_name == "test.NotExistent"
        ),
        "{err}"
    );
    assert!(
        err.to_string()
            .contains("message type not found in schema definitions: test.NotExistent")
    );
}

#[test]
fn test_unknown_default_type_fails_fast() {
    assert_unknown_type(json!({
        "schemaSources": [address_book_path(), fixture("iot")],
        "defaultMessageType": "test.NotExistent"
    }));
}

#[test]
fn test_unknown_default_key_type_fails_fast() {
    assert_unknown_type(json!({
        "schemaSources": [address_book_path(), fixture("iot")],
        "defaultMessageType": "test.AddressBook",
        "defaultMessageTypeForKey": "test.NotExistent"
    }));
}

#[test]
fn test_unknown_stream_type_fails_fast() {
    assert_unknown_type(json!({
        "schemaSources": [address_book_path(), fixture("iot")],
        "defaultMessageType": "test.AddressBook",
        "messageTypeByStream": { "persons": "test.NotExistent" }
    }));
}

#[test]
fn test_unknown_stream_key_type_fails_fast() {
    assert_unknown_type(json!({
        "schemaSources": [address_book_path(), fixture("iot")],
        "defaultMessageType": "test.AddressBook",
        "messageTypeForKeyByStream": { "persons": "test.NotExistent" }
    }));
}

#[test]
fn test_mutually_importing_files_load() {
    let codec = ProtobufFileCodec::configure(&json!({
        "schemaSource": fixture("cyclic/node.proto"),
        "defaultMessageType": "graph.Node",
        "defaultMessageTypeForKey": "graph.Edge"
    }))
    .expect("Failed to configure codec");

    let input = json!({
        "id": "a",
        "edges": [{ "target": { "id": "b", "edges": [] }, "weight": 1.5 }]
    });
    let bytes = serialize(&codec, "graph", Role::Value, &input.to_string());
    let output: Value =
        serde_json::from_str(&deserialize(&codec, "graph", Role::Value, &bytes)).unwrap();

    assert_eq!(output, input);
    assert!(codec.can_serialize("graph", Role::Key));
}

#[test]
fn test_import_cycles_can_be_forbidden() {
    let err = ProtobufFileCodec::configure(&json!({
        "schemaSources": [fixture("cyclic")],
        "permitImportCycles": false
    }))
    .unwrap_err();

    assert!(
        matches!(err, ConfigError::SchemaLoad(SchemaLoadError::ImportCycle(_))),
        "{err}"
    );
}

#[test]
fn test_per_record_errors_do_not_poison_the_codec() {
    let codec = per_stream_codec();

    let err = codec
        .serializer("books", Role::Key)
        .unwrap()
        .serialize(r#"{ "people": [ { "phones": [ { "type": "FAX" } ] } ] }"#)
        .unwrap_err();
    match &err {
        CodecError::Encode { stream, role, path, .. } => {
            assert_eq!(stream, "books");
            assert_eq!(*role, Role::Key);
            assert_eq!(path, "people[0].phones[0].type");
        }
        other => panic!("Unexpected error: {other}"),
    }

    let err = codec
        .deserializer("persons", Role::Value)
        .unwrap()
        .deserialize(&[0x0A, 0x10, b'x'])
        .unwrap_err();
    assert!(err.to_string().contains("value of stream 'persons'"), "{err}");

    let person = deserialize(&codec, "persons", Role::Value, &person_bytes());
    assert_json_eq(PERSON_JSON, &person);
}

#[test]
fn test_descriptor_set_source() {
    use prost_types::{
        DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
        field_descriptor_proto::{Label, Type},
    };

    let field = |name: &str, number: i32, r#type: Type| FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(r#type as i32),
        ..Default::default()
    };
    let set = FileDescriptorSet {
        file: vec![FileDescriptorProto {
            name: Some("metrics.proto".to_string()),
            package: Some("metrics".to_string()),
            syntax: Some("proto3".to_string()),
            message_type: vec![DescriptorProto {
                name: Some("Gauge".to_string()),
                field: vec![field("name", 1, Type::String), field("value", 2, Type::Double)],
                ..Default::default()
            }],
            ..Default::default()
        }],
    };

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("metrics.bin");
    std::fs::write(&path, set.encode_to_vec()).expect("Failed to write descriptor set");

    let config = json!({
        "descriptorSet": path.to_string_lossy(),
        "defaultMessageType": "metrics.Gauge"
    });
    assert!(can_be_auto_configured(&config));
    let codec = ProtobufFileCodec::configure(&config).expect("Failed to configure codec");

    let bytes = serialize(&codec, "gauges", Role::Value, r#"{"name":"cpu","value":0.25}"#);
    let gauge = deserialize(&codec, "gauges", Role::Value, &bytes);

    assert_json_eq(r#"{"name":"cpu","value":0.25}"#, &gauge);
}

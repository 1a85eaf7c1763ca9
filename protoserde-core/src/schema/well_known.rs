//! Bundled sources for the `google/protobuf/*.proto` files most schemas import.
//!
//! They are the last search root, so a user-provided copy always shadows them.

const TIMESTAMP: &str = r#"
syntax = "proto3";
package google.protobuf;

message Timestamp {
  int64 seconds = 1;
  int32 nanos = 2;
}
"#;

const DURATION: &str = r#"
syntax = "proto3";
package google.protobuf;

message Duration {
  int64 seconds = 1;
  int32 nanos = 2;
}
"#;

const EMPTY: &str = r#"
syntax = "proto3";
package google.protobuf;

message Empty {}
"#;

const WRAPPERS: &str = r#"
syntax = "proto3";
package google.protobuf;

message DoubleValue { double value = 1; }
message FloatValue { float value = 1; }
message Int64Value { int64 value = 1; }
message UInt64Value { uint64 value = 1; }
message Int32Value { int32 value = 1; }
message UInt32Value { uint32 value = 1; }
message BoolValue { bool value = 1; }
message StringValue { string value = 1; }
message BytesValue { bytes value = 1; }
"#;

/// Returns the bundled source for a logical import path, if there is one.
pub(crate) fn source(path: &str) -> Option<&'static str> {
    match path {
        "google/protobuf/timestamp.proto" => Some(TIMESTAMP),
        "google/protobuf/duration.proto" => Some(DURATION),
        "google/protobuf/empty.proto" => Some(EMPTY),
        "google/protobuf/wrappers.proto" => Some(WRAPPERS),
        _ => None,
    }
}

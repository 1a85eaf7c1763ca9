//! # Codec Configuration
//!
//! Configuration reaches the codec through a [`PropertyResolver`], a read-only view over
//! whatever key-value store the host application uses. A JSON object is a resolver, which
//! is what the CLI reads from its `--config` file.
//!
//! Recognised keys:
//!
//! | Key                          | Shape                 |
//! |------------------------------|-----------------------|
//! | `schemaSource`               | path                  |
//! | `schemaSources`              | list of paths         |
//! | `descriptorSet`              | path                  |
//! | `defaultMessageType`         | type name             |
//! | `defaultMessageTypeForKey`   | type name             |
//! | `messageTypeByStream`        | stream -> type name   |
//! | `messageTypeForKeyByStream`  | stream -> type name   |
//! | `permitImportCycles`         | bool (default `true`) |
use crate::descriptor::RegistryError;
use crate::resolver::{TypeBindings, TypeResolutionError};
use crate::schema::loader::SchemaLoadError;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const SCHEMA_SOURCE: &str = "schemaSource";
pub const SCHEMA_SOURCES: &str = "schemaSources";
pub const DESCRIPTOR_SET: &str = "descriptorSet";
pub const DEFAULT_MESSAGE_TYPE: &str = "defaultMessageType";
pub const DEFAULT_MESSAGE_TYPE_FOR_KEY: &str = "defaultMessageTypeForKey";
pub const MESSAGE_TYPE_BY_STREAM: &str = "messageTypeByStream";
pub const MESSAGE_TYPE_FOR_KEY_BY_STREAM: &str = "messageTypeForKeyByStream";
pub const PERMIT_IMPORT_CYCLES: &str = "permitImportCycles";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No schema source configured: set 'schemaSource', 'schemaSources' or 'descriptorSet'")]
    NoSchemaSource,

    #[error("Invalid value for '{key}': {reason}")]
    InvalidProperty { key: String, reason: String },

    #[error(transparent)]
    SchemaLoad(#[from] SchemaLoadError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    TypeResolution(#[from] TypeResolutionError),
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidProperty {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Read-only access to the host application's configuration.
///
/// Each method returns `Ok(None)` when the key is not set and an error when it is set to a
/// value of the wrong shape.
pub trait PropertyResolver {
    fn property(&self, key: &str) -> Result<Option<String>, ConfigError>;

    fn list_property(&self, key: &str) -> Result<Option<Vec<String>>, ConfigError>;

    fn map_property(&self, key: &str) -> Result<Option<BTreeMap<String, String>>, ConfigError>;
}

impl PropertyResolver for Value {
    fn property(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(v @ (Value::Number(_) | Value::Bool(_))) => Ok(Some(v.to_string())),
            Some(_) => Err(ConfigError::invalid(key, "expected a single value")),
        }
    }

    fn list_property(&self, key: &str) -> Result<Option<Vec<String>>, ConfigError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(vec![s.clone()])),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    _ => Err(ConfigError::invalid(key, "list entries must be strings")),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            Some(_) => Err(ConfigError::invalid(key, "expected a list of strings")),
        }
    }

    fn map_property(&self, key: &str) -> Result<Option<BTreeMap<String, String>>, ConfigError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(entries)) => entries
                .iter()
                .map(|(k, v)| match v {
                    Value::String(s) => Ok((k.clone(), s.clone())),
                    _ => Err(ConfigError::invalid(key, format!("value of '{k}' must be a string"))),
                })
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(Some),
            Some(_) => Err(ConfigError::invalid(key, "expected an object of strings")),
        }
    }
}

/// Whether the codec can be enabled from `properties` at all.
///
/// Only looks at which keys are present; nothing is read from disk. Blank paths do not
/// count, so neither does a schema-source list that is empty or holds only blank entries.
pub fn can_be_auto_configured(properties: &dyn PropertyResolver) -> bool {
    let single = |key: &str| {
        properties
            .property(key)
            .ok()
            .flatten()
            .is_some_and(|s| !s.trim().is_empty())
    };

    if single(SCHEMA_SOURCE) || single(DESCRIPTOR_SET) {
        return true;
    }

    properties
        .list_property(SCHEMA_SOURCES)
        .ok()
        .flatten()
        .is_some_and(|list| list.iter().any(|s| !s.trim().is_empty()))
}

/// Typed codec configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CodecConfig {
    pub schema_source: Option<PathBuf>,
    pub schema_sources: Vec<PathBuf>,
    pub descriptor_set: Option<PathBuf>,
    pub default_message_type: Option<String>,
    pub default_message_type_for_key: Option<String>,
    pub message_type_by_stream: BTreeMap<String, String>,
    pub message_type_for_key_by_stream: BTreeMap<String, String>,
    pub permit_import_cycles: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            schema_source: None,
            schema_sources: Vec::new(),
            descriptor_set: None,
            default_message_type: None,
            default_message_type_for_key: None,
            message_type_by_stream: BTreeMap::new(),
            message_type_for_key_by_stream: BTreeMap::new(),
            permit_import_cycles: true,
        }
    }
}

impl CodecConfig {
    pub fn from_properties(properties: &dyn PropertyResolver) -> Result<Self, ConfigError> {
        let permit_import_cycles = match properties.property(PERMIT_IMPORT_CYCLES)? {
            None => true,
            Some(value) => value.trim().parse::<bool>().map_err(|_| {
                ConfigError::invalid(PERMIT_IMPORT_CYCLES, format!("'{value}' is not a boolean"))
            })?,
        };

        Ok(Self {
            schema_source: properties
                .property(SCHEMA_SOURCE)?
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            schema_sources: properties
                .list_property(SCHEMA_SOURCES)?
                .unwrap_or_default()
                .into_iter()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .collect(),
            descriptor_set: properties.property(DESCRIPTOR_SET)?.map(PathBuf::from),
            default_message_type: properties.property(DEFAULT_MESSAGE_TYPE)?,
            default_message_type_for_key: properties.property(DEFAULT_MESSAGE_TYPE_FOR_KEY)?,
            message_type_by_stream: properties
                .map_property(MESSAGE_TYPE_BY_STREAM)?
                .unwrap_or_default(),
            message_type_for_key_by_stream: properties
                .map_property(MESSAGE_TYPE_FOR_KEY_BY_STREAM)?
                .unwrap_or_default(),
            permit_import_cycles,
        })
    }

    /// `schemaSource` followed by `schemaSources`.
    pub fn sources(&self) -> Vec<PathBuf> {
        self.schema_source
            .iter()
            .chain(&self.schema_sources)
            .cloned()
            .collect()
    }

    pub fn type_bindings(&self) -> TypeBindings {
        TypeBindings {
            default_value: self.default_message_type.clone(),
            default_key: self.default_message_type_for_key.clone(),
            value_by_stream: self.message_type_by_stream.clone(),
            key_by_stream: self.message_type_for_key_by_stream.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_not_applicable_without_schema_source() {
        assert!(!can_be_auto_configured(&json!({})));
        assert!(!can_be_auto_configured(&json!({
            "defaultMessageType": "test.Person"
        })));
    }

    #[test]
    fn test_not_applicable_with_empty_source_list() {
        assert!(!can_be_auto_configured(&json!({ "schemaSources": [] })));
    }

    #[test]
    fn test_blank_source_entries_do_not_count() {
        assert!(!can_be_auto_configured(&json!({ "schemaSource": "  " })));
        assert!(!can_be_auto_configured(&json!({ "schemaSources": [""] })));
        assert!(!can_be_auto_configured(&json!({ "schemaSources": ["", " "] })));
        assert!(can_be_auto_configured(&json!({ "schemaSources": ["", "a.proto"] })));
    }

    #[test]
    fn test_blank_sources_are_dropped() {
        let config = CodecConfig::from_properties(&json!({
            "schemaSource": "",
            "schemaSources": ["", "a.proto"]
        }))
        .unwrap();

        assert_eq!(config.sources(), vec![PathBuf::from("a.proto")]);
    }

    #[test]
    fn test_applicable_with_sources() {
        assert!(can_be_auto_configured(&json!({ "schemaSource": "a.proto" })));
        assert!(can_be_auto_configured(&json!({ "schemaSources": ["a.proto", "dir"] })));
        assert!(can_be_auto_configured(&json!({ "descriptorSet": "set.bin" })));
        // no type bindings needed
        assert!(can_be_auto_configured(&json!({
            "schemaSources": ["protos"],
            "messageTypeByStream": {}
        })));
    }

    #[test]
    fn test_from_properties_joins_sources() {
        let config = CodecConfig::from_properties(&json!({
            "schemaSource": "single.proto",
            "schemaSources": ["a.proto", "dir"],
            "defaultMessageType": "test.Person",
            "messageTypeForKeyByStream": { "people": "test.PersonKey" }
        }))
        .unwrap();

        assert_eq!(
            config.sources(),
            vec![
                PathBuf::from("single.proto"),
                PathBuf::from("a.proto"),
                PathBuf::from("dir")
            ]
        );
        assert!(config.permit_import_cycles);
        assert_eq!(
            config.type_bindings().key_by_stream.get("people").map(String::as_str),
            Some("test.PersonKey")
        );
    }

    #[test]
    fn test_from_properties_rejects_wrong_shapes() {
        let err = CodecConfig::from_properties(&json!({ "messageTypeByStream": ["x"] })).unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidProperty { ref key, .. } if key == MESSAGE_TYPE_BY_STREAM)
        );

        let err = CodecConfig::from_properties(&json!({ "permitImportCycles": "maybe" })).unwrap_err();
        assert!(err.to_string().contains("not a boolean"), "{err}");
    }

    #[test]
    fn test_permit_import_cycles_accepts_bool() {
        let config = CodecConfig::from_properties(&json!({ "permitImportCycles": false })).unwrap();

        assert!(!config.permit_import_cycles);
    }

    #[test]
    fn test_deserializes_from_json() {
        let config: CodecConfig = serde_json::from_value(json!({
            "schemaSources": ["protos"],
            "defaultMessageType": "test.Person"
        }))
        .unwrap();

        assert_eq!(config.schema_sources, vec![PathBuf::from("protos")]);
        assert!(config.permit_import_cycles);
    }
}

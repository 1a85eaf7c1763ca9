//! # Protobuf File Codec
//!
//! [`ProtobufFileCodec`] is the entry point of the crate. It is configured once from a
//! [`PropertyResolver`], after which it hands out a [`Serializer`] and a [`Deserializer`]
//! per `(stream, role)` pair.
//!
//! Configuration runs the whole pipeline eagerly:
//!
//! 1. Schema sources are loaded into a dependency-closed set of schema files.
//! 2. A [`DescriptorRegistry`] is built from them.
//! 3. Every configured type name is resolved against the registry.
//!
//! Any failure aborts configuration, so a constructed codec never fails for configuration
//! reasons on the first record. Per-record failures are returned as [`CodecError`]s naming
//! the stream and role.
//!
//! ## Example
//!
//! ```rust,no_run
//! use protoserde_core::codec::{MessageCodec, ProtobufFileCodec};
//! use protoserde_core::resolver::Role;
//! use serde_json::json;
//!
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let codec = ProtobufFileCodec::configure(&json!({
//!     "schemaSource": "protos/address-book.proto",
//!     "defaultMessageType": "test.Person"
//! }))?;
//!
//! let bytes = codec
//!     .serializer("people", Role::Value)?
//!     .serialize(r#"{"name": "My Name", "id": 101}"#)?;
//! let decoded = codec.deserializer("people", Role::Value)?.deserialize(&bytes)?;
//! println!("{}", decoded.result);
//! # Ok(())
//! # }
//! ```
use crate::config::{CodecConfig, ConfigError, PropertyResolver};
use crate::descriptor::DescriptorRegistry;
use crate::json_schema::message_schema;
use crate::resolver::{Role, StreamTypeResolver, TypeResolutionError};
use crate::schema::SchemaFile;
use crate::schema::loader::{DescriptorSetLoader, ProtoFileLoader, SchemaSourceLoader};
use crate::wire::{decode_message, encode_message};
use prost_reflect::MessageDescriptor;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const MESSAGE_NAME: &str = "messageName";
pub const SCHEMA_FILE: &str = "schemaFile";

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error(
        "Failed to decode the {role} of stream '{stream}' as '{message}': {reason} (at byte {offset})"
    )]
    Decode {
        stream: String,
        role: Role,
        message: String,
        offset: usize,
        reason: String,
    },

    #[error("Failed to encode the {role} of stream '{stream}' as '{message}': {}", field_reason(.path, .reason))]
    Encode {
        stream: String,
        role: Role,
        message: String,
        path: String,
        reason: String,
    },

    #[error("Invalid JSON for the {role} of stream '{stream}': '{source}'")]
    InvalidJson {
        stream: String,
        role: Role,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Resolution(#[from] TypeResolutionError),
}

fn field_reason(path: &str, reason: &str) -> String {
    if path.is_empty() {
        reason.to_string()
    } else {
        format!("field '{path}': {reason}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Json,
}

/// The outcome of decoding one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeserializeResult {
    /// The record rendered as JSON text.
    pub result: String,
    pub kind: ResultKind,
    /// `messageName` and `schemaFile` of the type used to decode.
    pub metadata: BTreeMap<String, String>,
}

/// The schema of the type bound to a `(stream, role)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDescription {
    pub message_name: String,
    /// A JSON Schema for the decoded documents.
    pub schema: serde_json::Value,
}

pub trait Serializer: Send + Sync {
    fn serialize(&self, text: &str) -> Result<Vec<u8>, CodecError>;
}

pub trait Deserializer: Send + Sync {
    fn deserialize(&self, bytes: &[u8]) -> Result<DeserializeResult, CodecError>;
}

/// The interface shared by codec implementations a host application can choose from.
pub trait MessageCodec: Send + Sync {
    fn description(&self) -> &str;

    fn schema(&self, stream: &str, role: Role) -> Option<SchemaDescription>;

    fn can_serialize(&self, stream: &str, role: Role) -> bool;

    fn can_deserialize(&self, stream: &str, role: Role) -> bool;

    fn serializer(&self, stream: &str, role: Role) -> Result<Box<dyn Serializer>, CodecError>;

    fn deserializer(&self, stream: &str, role: Role) -> Result<Box<dyn Deserializer>, CodecError>;
}

/// Codec for records encoded with message types from `.proto` files or descriptor sets.
#[derive(Debug, Clone)]
pub struct ProtobufFileCodec {
    registry: Arc<DescriptorRegistry>,
    resolver: Arc<StreamTypeResolver>,
}

impl ProtobufFileCodec {
    /// Configures the codec from the host application's properties.
    pub fn configure(properties: &dyn PropertyResolver) -> Result<Self, ConfigError> {
        Self::from_config(CodecConfig::from_properties(properties)?)
    }

    pub fn from_config(config: CodecConfig) -> Result<Self, ConfigError> {
        let files = load_schema_files(&config)?;
        let registry = Arc::new(DescriptorRegistry::build(&files)?);
        let resolver = StreamTypeResolver::new(Arc::clone(&registry), &config.type_bindings())?;

        info!(
            files = registry.files().len(),
            messages = registry.messages().count(),
            "Configured protobuf codec"
        );

        Ok(Self {
            registry,
            resolver: Arc::new(resolver),
        })
    }

    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }

    /// The message type bound to the given role of `stream`.
    pub fn resolve(
        &self,
        stream: &str,
        role: Role,
    ) -> Result<MessageDescriptor, TypeResolutionError> {
        self.resolver.resolve(stream, role)
    }

    fn binding(&self, stream: &str, role: Role) -> Result<Binding, CodecError> {
        let message = self.resolver.resolve(stream, role)?;
        let schema_file = self
            .registry
            .origin(&message)
            .map(|origin| origin.name.clone())
            .unwrap_or_else(|| message.parent_file().name().to_string());
        Ok(Binding {
            message,
            schema_file,
            stream: stream.to_string(),
            role,
        })
    }
}

fn load_schema_files(config: &CodecConfig) -> Result<Vec<SchemaFile>, ConfigError> {
    let sources = config.sources();
    if sources.is_empty() && config.descriptor_set.is_none() {
        return Err(ConfigError::NoSchemaSource);
    }

    let mut files = Vec::new();

    if !sources.is_empty() {
        let loader =
            ProtoFileLoader::from_paths(&sources)?.permit_import_cycles(config.permit_import_cycles);
        files.extend(loader.load()?);
    }

    if let Some(path) = &config.descriptor_set {
        let mut seen: HashSet<String> = files.iter().map(|f| f.name.clone()).collect();
        for file in DescriptorSetLoader::from_file(path)?.load()? {
            if seen.insert(file.name.clone()) {
                files.push(file);
            } else {
                warn!(file = %file.name, "Descriptor set file already loaded from sources, skipping");
            }
        }
    }

    debug!(count = files.len(), "Loaded schema files");
    Ok(files)
}

impl MessageCodec for ProtobufFileCodec {
    fn description(&self) -> &str {
        "Protobuf (from .proto files or descriptor sets)"
    }

    fn schema(&self, stream: &str, role: Role) -> Option<SchemaDescription> {
        let message = self.resolver.resolve(stream, role).ok()?;
        Some(SchemaDescription {
            message_name: message.full_name().to_string(),
            schema: message_schema(&message),
        })
    }

    fn can_serialize(&self, stream: &str, role: Role) -> bool {
        self.resolver.resolve(stream, role).is_ok()
    }

    fn can_deserialize(&self, stream: &str, role: Role) -> bool {
        self.resolver.resolve(stream, role).is_ok()
    }

    fn serializer(&self, stream: &str, role: Role) -> Result<Box<dyn Serializer>, CodecError> {
        Ok(Box::new(self.binding(stream, role)?))
    }

    fn deserializer(&self, stream: &str, role: Role) -> Result<Box<dyn Deserializer>, CodecError> {
        Ok(Box::new(self.binding(stream, role)?))
    }
}

/// A message type bound to one role of one stream.
struct Binding {
    message: MessageDescriptor,
    schema_file: String,
    stream: String,
    role: Role,
}

impl Binding {
    fn message_name(&self) -> &str {
        self.message.full_name()
    }
}

impl Serializer for Binding {
    fn serialize(&self, text: &str) -> Result<Vec<u8>, CodecError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|source| CodecError::InvalidJson {
                stream: self.stream.clone(),
                role: self.role,
                source,
            })?;

        encode_message(&self.message, &value).map_err(|e| CodecError::Encode {
            stream: self.stream.clone(),
            role: self.role,
            message: self.message_name().to_string(),
            path: e.path,
            reason: e.reason,
        })
    }
}

impl Deserializer for Binding {
    fn deserialize(&self, bytes: &[u8]) -> Result<DeserializeResult, CodecError> {
        let value = decode_message(&self.message, bytes).map_err(|e| CodecError::Decode {
            stream: self.stream.clone(),
            role: self.role,
            message: self.message_name().to_string(),
            offset: e.offset,
            reason: e.reason,
        })?;

        let metadata = BTreeMap::from([
            (MESSAGE_NAME.to_string(), self.message_name().to_string()),
            (SCHEMA_FILE.to_string(), self.schema_file.clone()),
        ]);

        Ok(DeserializeResult {
            result: value.to_string(),
            kind: ResultKind::Json,
            metadata,
        })
    }
}

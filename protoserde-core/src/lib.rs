//! # Protoserde Core
//!
//! `protoserde-core` is the library powering the Protoserde CLI. It converts Protobuf-encoded
//! message broker records to JSON and back, using schemas discovered at runtime from `.proto`
//! files or descriptor sets. No code is generated for the message types.
//!
//! ## Key Components
//!
//! * **[`ProtobufFileCodec`]:** The main entry point. It loads the configured schemas, binds
//!   message types to streams and hands out serializers and deserializers.
//! * **[`schema`]:** The `.proto` parser and the schema source loaders.
//! * **[`DescriptorRegistry`]:** The `prost_reflect` descriptor pool built from the loaded
//!   schemas, and the file each message came from.
//! * **[`StreamTypeResolver`]:** Picks the message type for the key or value of a stream.
//! * **[`wire`]:** The binary <-> JSON transcoder, on top of `prost_reflect::DynamicMessage`.
//!
//! ## Auto-configuration
//!
//! [`can_be_auto_configured`] tells a host application whether the codec applies to a given
//! configuration without loading anything.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost` and `prost_reflect` to ensure consumers use compatible
//! versions of the wire primitives and descriptors.
pub mod codec;
pub mod config;
pub mod descriptor;
pub mod json_schema;
pub mod resolver;
pub mod schema;
pub mod wire;

pub use codec::{
    CodecError, DeserializeResult, Deserializer, MessageCodec, ProtobufFileCodec, ResultKind,
    SchemaDescription, Serializer,
};
pub use config::{CodecConfig, ConfigError, PropertyResolver, can_be_auto_configured};
pub use descriptor::DescriptorRegistry;
pub use resolver::{Role, StreamTypeResolver, TypeResolutionError};

// Re-exports
pub use prost;
pub use prost_reflect;

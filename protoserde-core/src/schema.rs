//! # Schema Sources
//!
//! This module holds the language-neutral representation of a parsed schema file
//! ([`SchemaFile`]) and the loaders that produce it.
//!
//! * [`parser`]: a `.proto` text parser.
//! * [`loader`]: discovery of schema sources across files and directories, with
//!   import resolution into a dependency-closed set. Two [`loader::SchemaSourceLoader`]
//!   implementations are provided: [`loader::ProtoFileLoader`] for `.proto` text trees and
//!   [`loader::DescriptorSetLoader`] for binary `FileDescriptorSet`s.
//!
//! The registry only ever sees [`SchemaFile`]s, so adding another schema language means
//! adding another loader.
pub mod loader;
pub mod parser;
pub(crate) mod well_known;

use std::path::PathBuf;

/// The syntax level a schema file was written in.
///
/// It drives field presence and the default packing of repeated scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Syntax {
    #[default]
    Proto2,
    Proto3,
}

/// One parsed schema source file.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaFile {
    /// Logical path of the file inside its search root (e.g. `iot/sensor.proto`).
    pub name: String,
    /// Where the file was read from. `None` for bundled or in-memory sources.
    pub origin: Option<PathBuf>,
    pub package: Option<String>,
    pub syntax: Syntax,
    pub imports: Vec<Import>,
    pub messages: Vec<MessageDef>,
    pub enums: Vec<EnumDef>,
}

impl SchemaFile {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: None,
            package: None,
            syntax: Syntax::default(),
            imports: Vec::new(),
            messages: Vec::new(),
            enums: Vec::new(),
        }
    }
}

/// An `import` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub path: String,
    pub public: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
    /// Names of the `oneof` groups, indexed by [`FieldDef::oneof`].
    pub oneofs: Vec<String>,
    pub messages: Vec<MessageDef>,
    pub enums: Vec<EnumDef>,
    /// Set on the synthetic entry type backing a `map<K, V>` field.
    pub map_entry: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub number: u32,
    pub label: Label,
    pub type_ref: TypeRef,
    pub oneof: Option<usize>,
    /// Explicit `[packed = ...]` option, if any.
    pub packed: Option<bool>,
    /// Explicit `[json_name = ...]` option, if any.
    pub json_name: Option<String>,
}

/// Field label as written in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    /// No label. Proto3 implicit presence, or proto2 optional.
    None,
    Optional,
    Required,
    Repeated,
}

/// The declared type of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    Scalar(ScalarType),
    /// A message or enum name, as written. Resolved by the registry.
    Named(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Fixed64,
    Sfixed32,
    Sfixed64,
    Bool,
    String,
    Bytes,
}

impl ScalarType {
    pub fn from_keyword(word: &str) -> Option<Self> {
        let scalar = match word {
            "double" => Self::Double,
            "float" => Self::Float,
            "int32" => Self::Int32,
            "int64" => Self::Int64,
            "uint32" => Self::Uint32,
            "uint64" => Self::Uint64,
            "sint32" => Self::Sint32,
            "sint64" => Self::Sint64,
            "fixed32" => Self::Fixed32,
            "fixed64" => Self::Fixed64,
            "sfixed32" => Self::Sfixed32,
            "sfixed64" => Self::Sfixed64,
            "bool" => Self::Bool,
            "string" => Self::String,
            "bytes" => Self::Bytes,
            _ => return None,
        };
        Some(scalar)
    }

    /// Only integral and string types may be used as map keys.
    pub fn is_valid_map_key(self) -> bool {
        !matches!(self, Self::Double | Self::Float | Self::Bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnumDef {
    pub name: String,
    pub values: Vec<EnumValueDef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValueDef {
    pub name: String,
    pub number: i32,
}

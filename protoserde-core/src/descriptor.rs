//! # Descriptor Registry
//!
//! The [`DescriptorRegistry`] turns a closed set of [`SchemaFile`]s into a
//! [`prost_reflect::DescriptorPool`] of named, immutable message and enum descriptors.
//!
//! Type references are resolved here, with protobuf scoping rules, before the pool is
//! built, so every field reaches the pool fully qualified. Files that import each other are
//! merged into a single pool file, since a pool only accepts an acyclic import graph.
//! Every message also remembers the schema file it was written in, for diagnostics.
//!
//! The registry is built once and never mutated afterwards. It is meant to be wrapped in an
//! `Arc` and shared by every serializer and deserializer.
use crate::schema::{EnumDef, Label, MessageDef, ScalarType, SchemaFile, Syntax, TypeRef};
use prost_reflect::{DescriptorPool, MessageDescriptor};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumOptions, EnumValueDescriptorProto,
    FieldDescriptorProto, FieldOptions, FileDescriptorProto, FileDescriptorSet, MessageOptions,
    OneofDescriptorProto,
    field_descriptor_proto::{Label as ProtoLabel, Type as ProtoType},
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Type '{name}' is defined both in '{first}' and in '{second}'")]
    DuplicateType {
        name: String,
        first: String,
        second: String,
    },

    #[error("Unknown type '{type_name}' used by field '{field}' in '{file}'")]
    UnresolvedType {
        type_name: String,
        field: String,
        file: String,
    },

    #[error(
        "Files importing each other must share package and syntax: {}",
        .files.join(", ")
    )]
    MixedImportCycle { files: Vec<String> },

    #[error("Invalid schema definitions: '{0}'")]
    Descriptor(#[from] prost_reflect::DescriptorError),
}

/// Where a descriptor was defined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaOrigin {
    /// Logical path of the schema file.
    pub name: String,
    /// Filesystem path, when the file was read from disk.
    pub path: Option<PathBuf>,
}

impl fmt::Display for SchemaOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{} ({})", self.name, path.display()),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Immutable map of fully-qualified type names to descriptors.
#[derive(Debug, Clone)]
pub struct DescriptorRegistry {
    pool: DescriptorPool,
    files: Vec<SchemaOrigin>,
    /// Message full name -> index into `files`.
    origins: HashMap<String, usize>,
}

impl DescriptorRegistry {
    /// Builds the registry from a dependency-closed set of schema files.
    ///
    /// Fails on duplicate fully-qualified names, on field types that do not resolve to any
    /// loaded message or enum, and on anything the descriptor pool rejects (duplicate field
    /// numbers, malformed map entries, ...).
    pub fn build(files: &[SchemaFile]) -> Result<Self, RegistryError> {
        let symbols = Symbols::collect(files)?;

        let mut protos = Vec::with_capacity(files.len());
        for file in files {
            protos.push(file_proto(file, &symbols)?);
        }

        let set = FileDescriptorSet {
            file: merge_import_cycles(files, protos)?,
        };
        let pool = DescriptorPool::from_file_descriptor_set(set)?;

        let origins = symbols
            .by_name
            .into_iter()
            .filter(|(_, (symbol, _))| *symbol == Symbol::Message)
            .map(|(name, (_, file))| (name, file))
            .collect();

        Ok(Self {
            pool,
            files: files
                .iter()
                .map(|f| SchemaOrigin {
                    name: f.name.clone(),
                    path: f.origin.clone(),
                })
                .collect(),
            origins,
        })
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    /// Looks a message up by fully-qualified name. A leading `.` is accepted.
    pub fn message_by_name(&self, name: &str) -> Option<MessageDescriptor> {
        let name = name.strip_prefix('.').unwrap_or(name);
        self.pool.get_message_by_name(name)
    }

    pub fn messages(&self) -> impl Iterator<Item = MessageDescriptor> + '_ {
        self.pool.all_messages()
    }

    pub fn files(&self) -> &[SchemaOrigin] {
        &self.files
    }

    /// The schema file a message was written in.
    pub fn origin(&self, message: &MessageDescriptor) -> Option<&SchemaOrigin> {
        self.origins
            .get(message.full_name())
            .and_then(|&index| self.files.get(index))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Symbol {
    Message,
    Enum,
}

/// Every type name defined by the loaded files, with the file defining it.
struct Symbols {
    by_name: HashMap<String, (Symbol, usize)>,
}

impl Symbols {
    fn collect(files: &[SchemaFile]) -> Result<Self, RegistryError> {
        let mut symbols = Self {
            by_name: HashMap::new(),
        };

        for (index, file) in files.iter().enumerate() {
            let package = file.package.as_deref().unwrap_or_default();
            for def in &file.enums {
                symbols.insert(qualify(package, &def.name), Symbol::Enum, index, files)?;
            }
            for def in &file.messages {
                symbols.insert_message(def, package, index, files)?;
            }
        }

        Ok(symbols)
    }

    fn insert(
        &mut self,
        name: String,
        symbol: Symbol,
        file: usize,
        files: &[SchemaFile],
    ) -> Result<(), RegistryError> {
        if let Some(&(_, first)) = self.by_name.get(&name) {
            return Err(RegistryError::DuplicateType {
                name,
                first: files[first].name.clone(),
                second: files[file].name.clone(),
            });
        }
        self.by_name.insert(name, (symbol, file));
        Ok(())
    }

    fn insert_message(
        &mut self,
        def: &MessageDef,
        scope: &str,
        file: usize,
        files: &[SchemaFile],
    ) -> Result<(), RegistryError> {
        let full_name = qualify(scope, &def.name);
        self.insert(full_name.clone(), Symbol::Message, file, files)?;

        for nested in &def.enums {
            self.insert(qualify(&full_name, &nested.name), Symbol::Enum, file, files)?;
        }
        for nested in &def.messages {
            self.insert_message(nested, &full_name, file, files)?;
        }
        Ok(())
    }

    /// Resolves a type reference the way protobuf scoping does: absolute names directly,
    /// relative names from the innermost enclosing scope outwards.
    fn resolve(&self, type_name: &str, scope: &str) -> Option<(String, Symbol)> {
        let lookup = |candidate: String| {
            self.by_name
                .get(&candidate)
                .map(|&(symbol, _)| (candidate, symbol))
        };

        if let Some(absolute) = type_name.strip_prefix('.') {
            return lookup(absolute.to_string());
        }

        let mut scope = scope;
        loop {
            if let Some(found) = lookup(qualify(scope, type_name)) {
                return Some(found);
            }
            if scope.is_empty() {
                return None;
            }
            scope = scope.rsplit_once('.').map_or("", |(parent, _)| parent);
        }
    }
}

fn file_proto(file: &SchemaFile, symbols: &Symbols) -> Result<FileDescriptorProto, RegistryError> {
    let package = file.package.as_deref().unwrap_or_default();

    let message_type = file
        .messages
        .iter()
        .map(|def| message_proto(def, package, file, symbols))
        .collect::<Result<_, _>>()?;

    Ok(FileDescriptorProto {
        name: Some(file.name.clone()),
        package: file.package.clone(),
        syntax: Some(
            match file.syntax {
                Syntax::Proto2 => "proto2",
                Syntax::Proto3 => "proto3",
            }
            .to_string(),
        ),
        message_type,
        enum_type: file.enums.iter().map(enum_proto).collect(),
        ..Default::default()
    })
}

fn message_proto(
    def: &MessageDef,
    scope: &str,
    file: &SchemaFile,
    symbols: &Symbols,
) -> Result<DescriptorProto, RegistryError> {
    let full_name = qualify(scope, &def.name);

    let mut oneof_decl: Vec<OneofDescriptorProto> = def
        .oneofs
        .iter()
        .map(|name| OneofDescriptorProto {
            name: Some(name.clone()),
            ..Default::default()
        })
        .collect();

    let mut fields = Vec::with_capacity(def.fields.len());
    for field in &def.fields {
        let mut proto = FieldDescriptorProto {
            name: Some(field.name.clone()),
            number: i32::try_from(field.number).ok(),
            json_name: field.json_name.clone(),
            oneof_index: field.oneof.and_then(|i| i32::try_from(i).ok()),
            options: field.packed.map(|packed| FieldOptions {
                packed: Some(packed),
                ..Default::default()
            }),
            ..Default::default()
        };

        proto.set_label(match field.label {
            Label::Required => ProtoLabel::Required,
            Label::Repeated => ProtoLabel::Repeated,
            Label::None | Label::Optional => ProtoLabel::Optional,
        });

        match &field.type_ref {
            TypeRef::Scalar(scalar) => proto.set_type(scalar_type(*scalar)),
            TypeRef::Named(type_name) => {
                let (resolved, symbol) =
                    symbols.resolve(type_name, &full_name).ok_or_else(|| {
                        RegistryError::UnresolvedType {
                            type_name: type_name.clone(),
                            field: format!("{full_name}.{}", field.name),
                            file: file.name.clone(),
                        }
                    })?;
                proto.set_type(match symbol {
                    Symbol::Message => ProtoType::Message,
                    Symbol::Enum => ProtoType::Enum,
                });
                proto.type_name = Some(format!(".{resolved}"));
            }
        }

        // proto3 `optional` is backed by a synthetic oneof, declared after the real ones.
        if file.syntax == Syntax::Proto3 && field.label == Label::Optional && field.oneof.is_none()
        {
            proto.proto3_optional = Some(true);
            proto.oneof_index = i32::try_from(oneof_decl.len()).ok();
            oneof_decl.push(OneofDescriptorProto {
                name: Some(format!("_{}", field.name)),
                ..Default::default()
            });
        }

        fields.push(proto);
    }

    Ok(DescriptorProto {
        name: Some(def.name.clone()),
        field: fields,
        nested_type: def
            .messages
            .iter()
            .map(|nested| message_proto(nested, &full_name, file, symbols))
            .collect::<Result<_, _>>()?,
        enum_type: def.enums.iter().map(enum_proto).collect(),
        oneof_decl,
        options: def.map_entry.then(|| MessageOptions {
            map_entry: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn enum_proto(def: &EnumDef) -> EnumDescriptorProto {
    let mut numbers = HashSet::new();
    let aliased = !def.values.iter().all(|v| numbers.insert(v.number));

    EnumDescriptorProto {
        name: Some(def.name.clone()),
        value: def
            .values
            .iter()
            .map(|v| EnumValueDescriptorProto {
                name: Some(v.name.clone()),
                number: Some(v.number),
                ..Default::default()
            })
            .collect(),
        options: aliased.then(|| EnumOptions {
            allow_alias: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn scalar_type(scalar: ScalarType) -> ProtoType {
    match scalar {
        ScalarType::Double => ProtoType::Double,
        ScalarType::Float => ProtoType::Float,
        ScalarType::Int32 => ProtoType::Int32,
        ScalarType::Int64 => ProtoType::Int64,
        ScalarType::Uint32 => ProtoType::Uint32,
        ScalarType::Uint64 => ProtoType::Uint64,
        ScalarType::Sint32 => ProtoType::Sint32,
        ScalarType::Sint64 => ProtoType::Sint64,
        ScalarType::Fixed32 => ProtoType::Fixed32,
        ScalarType::Fixed64 => ProtoType::Fixed64,
        ScalarType::Sfixed32 => ProtoType::Sfixed32,
        ScalarType::Sfixed64 => ProtoType::Sfixed64,
        ScalarType::Bool => ProtoType::Bool,
        ScalarType::String => ProtoType::String,
        ScalarType::Bytes => ProtoType::Bytes,
    }
}

/// Collapses every group of mutually-importing files into one file, named after the first
/// file of the group, and orders the result so dependencies come first.
///
/// `protos[i]` must be the conversion of `files[i]`.
fn merge_import_cycles(
    files: &[SchemaFile],
    protos: Vec<FileDescriptorProto>,
) -> Result<Vec<FileDescriptorProto>, RegistryError> {
    let index_by_name: HashMap<&str, usize> = files
        .iter()
        .enumerate()
        .map(|(i, f)| (f.name.as_str(), i))
        .collect();
    let graph: Vec<Vec<usize>> = files
        .iter()
        .map(|f| {
            f.imports
                .iter()
                .filter_map(|import| index_by_name.get(import.path.as_str()).copied())
                .collect()
        })
        .collect();

    let components = strongly_connected(&graph);

    let mut component_of = vec![0; files.len()];
    for (c, members) in components.iter().enumerate() {
        for &member in members {
            component_of[member] = c;
        }
    }

    let mut protos: Vec<Option<FileDescriptorProto>> = protos.into_iter().map(Some).collect();
    let mut merged = Vec::with_capacity(components.len());

    for (c, members) in components.iter().enumerate() {
        let Some(&head) = members.first() else {
            continue;
        };

        let mixed = members.iter().any(|&m| {
            files[m].package != files[head].package || files[m].syntax != files[head].syntax
        });
        if mixed {
            return Err(RegistryError::MixedImportCycle {
                files: members.iter().map(|&m| files[m].name.clone()).collect(),
            });
        }

        let Some(mut file) = protos[head].take() else {
            continue;
        };
        for &member in &members[1..] {
            if let Some(other) = protos[member].take() {
                file.message_type.extend(other.message_type);
                file.enum_type.extend(other.enum_type);
            }
        }

        let mut dependencies: Vec<(String, bool)> = Vec::new();
        for &member in members {
            for import in &files[member].imports {
                let Some(&target) = index_by_name.get(import.path.as_str()) else {
                    continue;
                };
                let target = component_of[target];
                if target == c {
                    continue;
                }
                let name = &files[components[target][0]].name;
                match dependencies.iter_mut().find(|(n, _)| n == name) {
                    Some((_, public)) => *public |= import.public,
                    None => dependencies.push((name.clone(), import.public)),
                }
            }
        }

        file.public_dependency = dependencies
            .iter()
            .enumerate()
            .filter(|(_, (_, public))| *public)
            .filter_map(|(i, _)| i32::try_from(i).ok())
            .collect();
        file.dependency = dependencies.into_iter().map(|(name, _)| name).collect();

        merged.push(file);
    }

    Ok(merged)
}

/// Tarjan's algorithm. Components come out dependencies-first, each sorted by file index.
fn strongly_connected(graph: &[Vec<usize>]) -> Vec<Vec<usize>> {
    struct State<'a> {
        graph: &'a [Vec<usize>],
        index: Vec<Option<usize>>,
        low: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        next: usize,
        components: Vec<Vec<usize>>,
    }

    fn visit(state: &mut State<'_>, node: usize) {
        state.index[node] = Some(state.next);
        state.low[node] = state.next;
        state.next += 1;
        state.stack.push(node);
        state.on_stack[node] = true;

        for &next in &state.graph[node] {
            match state.index[next] {
                None => {
                    visit(state, next);
                    state.low[node] = state.low[node].min(state.low[next]);
                }
                Some(index) if state.on_stack[next] => {
                    state.low[node] = state.low[node].min(index);
                }
                Some(_) => {}
            }
        }

        if Some(state.low[node]) == state.index[node] {
            let mut component = Vec::new();
            while let Some(member) = state.stack.pop() {
                state.on_stack[member] = false;
                component.push(member);
                if member == node {
                    break;
                }
            }
            component.sort_unstable();
            state.components.push(component);
        }
    }

    let mut state = State {
        graph,
        index: vec![None; graph.len()],
        low: vec![0; graph.len()],
        on_stack: vec![false; graph.len()],
        stack: Vec::new(),
        next: 0,
        components: Vec::new(),
    };

    for node in 0..graph.len() {
        if state.index[node].is_none() {
            visit(&mut state, node);
        }
    }

    state.components
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{scope}.{name}")
    }
}

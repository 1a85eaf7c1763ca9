//! # Schema Source Loaders
//!
//! Loaders turn configured schema locations into a dependency-closed list of [`SchemaFile`]s.
//!
//! ## `.proto` trees
//!
//! [`ProtoFileLoader`] accepts any mix of single files and directories:
//!
//! * A **file** is loaded directly and its parent directory becomes a search root.
//! * A **directory** becomes a search root and every `*.proto` file below it is loaded.
//!
//! Every `import` of every loaded file is then resolved against the search roots (in
//! configuration order, then the bundled `google/protobuf` sources) and loaded in turn,
//! until no unresolved import remains. A file is identified by its logical path inside its
//! root, so it is loaded at most once no matter how many files import it. That also makes
//! import cycles harmless; they are only reported when
//! [`ProtoFileLoader::permit_import_cycles`] is turned off.
//!
//! ## Descriptor sets
//!
//! [`DescriptorSetLoader`] reads a binary `google.protobuf.FileDescriptorSet`, as produced by
//! `protoc --descriptor_set_out --include_imports`.
use super::{
    EnumDef, EnumValueDef, FieldDef, Import, Label, MessageDef, ScalarType, SchemaFile, Syntax,
    TypeRef,
    parser::{self, ParseError},
    well_known,
};
use prost::Message;
use prost_types::{
    DescriptorProto, EnumDescriptorProto, FileDescriptorProto, FileDescriptorSet,
    field_descriptor_proto::{Label as ProtoLabel, Type as ProtoType},
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, thiserror::Error)]
pub enum SchemaLoadError {
    #[error("Schema source '{0}' does not exist")]
    SourceNotFound(PathBuf),

    #[error("Failed to read schema source '{path}': '{source}'")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to scan schema directory: '{0}'")]
    Walk(#[from] walkdir::Error),

    #[error("Failed to parse schema file: {0}")]
    Parse(#[from] ParseError),

    #[error("Schema dependency not found: '{import}' (imported by '{required_by}')")]
    DependencyNotFound { import: String, required_by: String },

    #[error("Import cycle between schema files: {}", .0.join(" -> "))]
    ImportCycle(Vec<String>),

    #[error("Failed to decode descriptor set: '{0}'")]
    DescriptorSet(#[from] prost::DecodeError),

    #[error("Invalid descriptor for '{file}': {reason}")]
    InvalidDescriptor { file: String, reason: String },
}

/// Anything that can produce a closed set of schema files.
pub trait SchemaSourceLoader {
    fn load(&self) -> Result<Vec<SchemaFile>, SchemaLoadError>;
}

/// A configured schema location: a search root, plus an optional single file inside it.
///
/// When `path` is `None` the whole root is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSourceLocation {
    pub root: PathBuf,
    pub path: Option<PathBuf>,
}

impl SchemaSourceLocation {
    pub fn new(root: impl Into<PathBuf>, path: Option<PathBuf>) -> Self {
        Self {
            root: root.into(),
            path,
        }
    }

    /// Classifies a filesystem path as a directory location or a single-file location.
    ///
    /// For a file, the parent directory is used as the search root.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SchemaLoadError> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => SchemaLoadError::SourceNotFound(path.to_path_buf()),
            _ => SchemaLoadError::Io {
                path: path.to_path_buf(),
                source,
            },
        })?;

        if metadata.is_dir() {
            return Ok(Self::new(path, None));
        }

        let root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = path
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| SchemaLoadError::SourceNotFound(path.to_path_buf()))?;

        Ok(Self::new(root, Some(file_name)))
    }
}

/// Loads `.proto` text files from a set of [`SchemaSourceLocation`]s.
#[derive(Debug, Clone)]
pub struct ProtoFileLoader {
    locations: Vec<SchemaSourceLocation>,
    permit_import_cycles: bool,
}

enum Source {
    Disk(PathBuf),
    Bundled(&'static str),
}

impl ProtoFileLoader {
    pub fn new(locations: Vec<SchemaSourceLocation>) -> Self {
        Self {
            locations,
            permit_import_cycles: true,
        }
    }

    /// Builds a loader from plain paths, each one a `.proto` file or a directory.
    pub fn from_paths<I, P>(paths: I) -> Result<Self, SchemaLoadError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let locations = paths
            .into_iter()
            .map(SchemaSourceLocation::from_path)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(locations))
    }

    /// Whether files importing each other (directly or transitively) are accepted.
    ///
    /// Defaults to `true`.
    pub fn permit_import_cycles(mut self, permit: bool) -> Self {
        self.permit_import_cycles = permit;
        self
    }

    fn search_roots(&self) -> Vec<&Path> {
        let mut roots: Vec<&Path> = Vec::new();
        for location in &self.locations {
            if !roots.contains(&location.root.as_path()) {
                roots.push(&location.root);
            }
        }
        roots
    }

    /// The files named directly by the configured locations, as `(logical name, path)`.
    fn entry_points(&self) -> Result<Vec<(String, PathBuf)>, SchemaLoadError> {
        let mut entries = Vec::new();

        for location in &self.locations {
            match &location.path {
                Some(path) => {
                    let full_path = location.root.join(path);
                    let logical = if path.is_absolute() {
                        match path.strip_prefix(&location.root) {
                            Ok(relative) => logical_name(relative),
                            Err(_) => path.file_name().map(logical_name).unwrap_or_default(),
                        }
                    } else {
                        logical_name(path)
                    };
                    entries.push((logical, full_path));
                }
                None => {
                    if !location.root.is_dir() {
                        return Err(SchemaLoadError::SourceNotFound(location.root.clone()));
                    }

                    let walker = WalkDir::new(&location.root)
                        .follow_links(true)
                        .sort_by_file_name();

                    for entry in walker {
                        let entry = entry?;
                        let path = entry.path();
                        if !entry.file_type().is_file()
                            || path.extension().is_none_or(|ext| ext != "proto")
                        {
                            continue;
                        }

                        let relative = path.strip_prefix(&location.root).unwrap_or(path);
                        entries.push((logical_name(relative), path.to_path_buf()));
                    }
                }
            }
        }

        Ok(entries)
    }

    fn resolve_import(&self, roots: &[&Path], import: &str) -> Option<Source> {
        roots
            .iter()
            .map(|root| root.join(import))
            .find(|candidate| candidate.is_file())
            .map(Source::Disk)
            .or_else(|| well_known::source(import).map(Source::Bundled))
    }
}

impl SchemaSourceLoader for ProtoFileLoader {
    fn load(&self) -> Result<Vec<SchemaFile>, SchemaLoadError> {
        let roots = self.search_roots();
        let mut files: Vec<SchemaFile> = Vec::new();
        let mut queued: HashMap<String, PathBuf> = HashMap::new();
        let mut pending: VecDeque<(String, Source)> = VecDeque::new();

        for (name, path) in self.entry_points()? {
            match queued.get(&name) {
                Some(existing) if existing != &path => {
                    tracing::warn!(
                        file = %name,
                        used = %existing.display(),
                        ignored = %path.display(),
                        "Schema file is shadowed by an earlier search root"
                    );
                }
                Some(_) => {}
                None => {
                    queued.insert(name.clone(), path.clone());
                    pending.push_back((name, Source::Disk(path)));
                }
            }
        }

        let mut bundled: HashSet<String> = HashSet::new();

        while let Some((name, source)) = pending.pop_front() {
            let file = match source {
                Source::Disk(path) => {
                    let text = std::fs::read_to_string(&path).map_err(|source| {
                        SchemaLoadError::Io {
                            path: path.clone(),
                            source,
                        }
                    })?;
                    let mut file = parser::parse(&name, &text)?;
                    file.origin = Some(path);
                    file
                }
                Source::Bundled(text) => parser::parse(&name, text)?,
            };

            tracing::debug!(file = %file.name, imports = file.imports.len(), "Loaded schema file");

            for import in &file.imports {
                if queued.contains_key(&import.path) || bundled.contains(&import.path) {
                    continue;
                }

                match self.resolve_import(&roots, &import.path) {
                    Some(Source::Disk(path)) => {
                        queued.insert(import.path.clone(), path.clone());
                        pending.push_back((import.path.clone(), Source::Disk(path)));
                    }
                    Some(Source::Bundled(text)) => {
                        bundled.insert(import.path.clone());
                        pending.push_back((import.path.clone(), Source::Bundled(text)));
                    }
                    None => {
                        return Err(SchemaLoadError::DependencyNotFound {
                            import: import.path.clone(),
                            required_by: file.name.clone(),
                        });
                    }
                }
            }

            files.push(file);
        }

        if !self.permit_import_cycles
            && let Some(cycle) = find_import_cycle(&files)
        {
            return Err(SchemaLoadError::ImportCycle(cycle));
        }

        Ok(files)
    }
}

/// `a/b/c.proto`, whatever the platform separator.
fn logical_name(path: impl AsRef<Path>) -> String {
    path.as_ref()
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Returns the first import cycle found, as the list of files along it
/// (the first file is repeated at the end).
fn find_import_cycle(files: &[SchemaFile]) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        name: &'a str,
        by_name: &HashMap<&'a str, &'a SchemaFile>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(name) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|n| *n == name)?;
                let mut cycle: Vec<String> = stack[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(name.to_string());
                return Some(cycle);
            }
            None => {}
        }

        marks.insert(name, Mark::Visiting);
        stack.push(name);

        if let Some(file) = by_name.get(name) {
            for import in &file.imports {
                if let Some(cycle) = visit(&import.path, by_name, marks, stack) {
                    return Some(cycle);
                }
            }
        }

        stack.pop();
        marks.insert(name, Mark::Done);
        None
    }

    let by_name: HashMap<&str, &SchemaFile> = files.iter().map(|f| (f.name.as_str(), f)).collect();
    let mut marks = HashMap::new();
    let mut stack = Vec::new();

    files
        .iter()
        .find_map(|file| visit(&file.name, &by_name, &mut marks, &mut stack))
}

/// Loads schema files from an encoded `FileDescriptorSet`.
#[derive(Debug, Clone)]
pub struct DescriptorSetLoader {
    bytes: Vec<u8>,
}

impl DescriptorSetLoader {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchemaLoadError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| SchemaLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_bytes(bytes))
    }
}

impl SchemaSourceLoader for DescriptorSetLoader {
    fn load(&self) -> Result<Vec<SchemaFile>, SchemaLoadError> {
        let set = FileDescriptorSet::decode(self.bytes.as_slice())?;

        let files = set
            .file
            .iter()
            .map(convert_file)
            .collect::<Result<Vec<_>, _>>()?;

        let names: HashSet<&str> = files.iter().map(|f| f.name.as_str()).collect();
        for file in &files {
            if let Some(missing) = file.imports.iter().find(|i| !names.contains(i.path.as_str())) {
                return Err(SchemaLoadError::DependencyNotFound {
                    import: missing.path.clone(),
                    required_by: file.name.clone(),
                });
            }
        }

        Ok(files)
    }
}

fn convert_file(proto: &FileDescriptorProto) -> Result<SchemaFile, SchemaLoadError> {
    let name = proto.name().to_string();
    let invalid = |reason: String| SchemaLoadError::InvalidDescriptor {
        file: name.clone(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("file has no name".to_string()));
    }

    let syntax = match proto.syntax() {
        "" | "proto2" => Syntax::Proto2,
        "proto3" => Syntax::Proto3,
        other => return Err(invalid(format!("unsupported syntax '{other}'"))),
    };

    let mut file = SchemaFile::new(name.clone());
    file.syntax = syntax;
    file.package = proto.package.clone().filter(|p| !p.is_empty());
    file.imports = proto
        .dependency
        .iter()
        .enumerate()
        .map(|(index, path)| Import {
            path: path.clone(),
            public: proto
                .public_dependency
                .iter()
                .any(|&i| usize::try_from(i) == Ok(index)),
        })
        .collect();
    file.messages = proto
        .message_type
        .iter()
        .map(|m| convert_message(m, syntax).map_err(&invalid))
        .collect::<Result<_, _>>()?;
    file.enums = proto.enum_type.iter().map(convert_enum).collect();

    Ok(file)
}

fn convert_message(proto: &DescriptorProto, syntax: Syntax) -> Result<MessageDef, String> {
    let mut fields = Vec::with_capacity(proto.field.len());

    for field in &proto.field {
        let number = u32::try_from(field.number())
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| format!("field '{}' has invalid number", field.name()))?;

        let proto3_optional = field.proto3_optional();
        let label = match field.label() {
            ProtoLabel::Repeated => Label::Repeated,
            ProtoLabel::Required => Label::Required,
            ProtoLabel::Optional if proto3_optional || syntax == Syntax::Proto2 => Label::Optional,
            ProtoLabel::Optional => Label::None,
        };

        let type_ref = if field.r#type.is_none() {
            TypeRef::Named(field.type_name().to_string())
        } else {
            match field.r#type() {
                ProtoType::Message | ProtoType::Enum => {
                    TypeRef::Named(field.type_name().to_string())
                }
                ProtoType::Group => {
                    return Err(format!("group field '{}' is not supported", field.name()));
                }
                scalar => TypeRef::Scalar(convert_scalar(scalar)),
            }
        };

        let oneof = match (proto3_optional, field.oneof_index) {
            (false, Some(index)) => Some(
                usize::try_from(index)
                    .map_err(|_| format!("field '{}' has invalid oneof index", field.name()))?,
            ),
            _ => None,
        };

        fields.push(FieldDef {
            name: field.name().to_string(),
            number,
            label,
            type_ref,
            oneof,
            packed: field.options.as_ref().and_then(|o| o.packed),
            json_name: field.json_name.clone(),
        });
    }

    Ok(MessageDef {
        name: proto.name().to_string(),
        fields,
        oneofs: proto
            .oneof_decl
            .iter()
            .map(|o| o.name().to_string())
            .collect(),
        messages: proto
            .nested_type
            .iter()
            .map(|m| convert_message(m, syntax))
            .collect::<Result<_, _>>()?,
        enums: proto.enum_type.iter().map(convert_enum).collect(),
        map_entry: proto
            .options
            .as_ref()
            .and_then(|o| o.map_entry)
            .unwrap_or(false),
    })
}

fn convert_enum(proto: &EnumDescriptorProto) -> EnumDef {
    EnumDef {
        name: proto.name().to_string(),
        values: proto
            .value
            .iter()
            .map(|v| EnumValueDef {
                name: v.name().to_string(),
                number: v.number(),
            })
            .collect(),
    }
}

fn convert_scalar(kind: ProtoType) -> ScalarType {
    match kind {
        ProtoType::Double => ScalarType::Double,
        ProtoType::Float => ScalarType::Float,
        ProtoType::Int64 => ScalarType::Int64,
        ProtoType::Uint64 => ScalarType::Uint64,
        ProtoType::Int32 => ScalarType::Int32,
        ProtoType::Fixed64 => ScalarType::Fixed64,
        ProtoType::Fixed32 => ScalarType::Fixed32,
        ProtoType::Bool => ScalarType::Bool,
        ProtoType::Bytes => ScalarType::Bytes,
        ProtoType::Uint32 => ScalarType::Uint32,
        ProtoType::Sfixed32 => ScalarType::Sfixed32,
        ProtoType::Sfixed64 => ScalarType::Sfixed64,
        ProtoType::Sint32 => ScalarType::Sint32,
        ProtoType::Sint64 => ScalarType::Sint64,
        ProtoType::String | ProtoType::Group | ProtoType::Message | ProtoType::Enum => {
            ScalarType::String
        }
    }
}

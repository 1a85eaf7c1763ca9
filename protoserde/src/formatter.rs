use colored::*;
use protoserde_core::{
    CodecError, ConfigError, DeserializeResult, DescriptorRegistry,
    prost_reflect::{Cardinality, Kind, MessageDescriptor},
};
use std::fmt::Display;

/// A wrapper struct for a formatted, colored string.
///
/// Implements `Display` so it can be printed directly.
pub struct FormattedString(pub String);

pub struct GenericError<T: Display>(pub &'static str, pub T);

/// A message type together with the registry that resolves its field types.
pub struct Message<'a>(pub &'a DescriptorRegistry, pub MessageDescriptor);

pub struct MessageList<'a>(pub &'a DescriptorRegistry);

impl std::fmt::Display for FormattedString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;
        writeln!(f, "{}", self.0)?;
        Ok(())
    }
}

impl From<serde_json::Value> for FormattedString {
    fn from(value: serde_json::Value) -> Self {
        FormattedString(serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()))
    }
}

impl From<DeserializeResult> for FormattedString {
    fn from(result: DeserializeResult) -> Self {
        let body = serde_json::from_str::<serde_json::Value>(&result.result)
            .map(|v| FormattedString::from(v).0)
            .unwrap_or(result.result);

        let mut out = String::new();
        for (key, value) in &result.metadata {
            out.push_str(&format!("{} {}\n", format!("{key}:").cyan(), value.green()));
        }
        out.push('\n');
        out.push_str(&body);
        FormattedString(out)
    }
}

impl From<ConfigError> for FormattedString {
    fn from(err: ConfigError) -> Self {
        FormattedString(format!(
            "{}\n\n'{}'",
            "Configuration Failed:".red().bold(),
            err
        ))
    }
}

impl From<CodecError> for FormattedString {
    fn from(err: CodecError) -> Self {
        let title = match err {
            CodecError::Decode { .. } => "Decode Failed:",
            CodecError::Encode { .. } | CodecError::InvalidJson { .. } => "Encode Failed:",
            CodecError::Resolution(_) => "Type Lookup Failed:",
        };
        FormattedString(format!("{}\n\n'{}'", title.red().bold(), err))
    }
}

impl From<anyhow::Error> for FormattedString {
    fn from(err: anyhow::Error) -> Self {
        FormattedString(format!("{}\n\n'{:#}'", "Error:".red().bold(), err))
    }
}

impl<T: Display> From<GenericError<T>> for FormattedString {
    fn from(GenericError(msg, err): GenericError<T>) -> Self {
        FormattedString(format!("{}:\n\n'{}'", msg.red().bold(), err))
    }
}

impl From<MessageList<'_>> for FormattedString {
    fn from(MessageList(registry): MessageList<'_>) -> Self {
        let mut names: Vec<(String, String)> = registry
            .messages()
            .filter(|m| !m.is_map_entry())
            .map(|m| {
                let file = registry
                    .origin(&m)
                    .map_or_else(|| m.parent_file().name().to_string(), |o| o.name.clone());
                (m.full_name().to_string(), file)
            })
            .collect();
        names.sort();

        if names.is_empty() {
            return FormattedString("No message types found.".yellow().to_string());
        }

        let mut out = String::new();
        out.push_str("Message Types:\n");
        for (name, file) in names {
            out.push_str(&format!("  - {} {}\n", name.green(), format!("({file})").dimmed()));
        }
        FormattedString(out.trim_end().to_string())
    }
}

fn defined_in(registry: &DescriptorRegistry, message: &MessageDescriptor) -> String {
    registry
        .origin(message)
        .map(|origin| origin.to_string())
        .unwrap_or_else(|| message.parent_file().name().to_string())
}

fn type_name(kind: &Kind) -> ColoredString {
    let name = match kind {
        Kind::Double => "double",
        Kind::Float => "float",
        Kind::Int32 => "int32",
        Kind::Int64 => "int64",
        Kind::Uint32 => "uint32",
        Kind::Uint64 => "uint64",
        Kind::Sint32 => "sint32",
        Kind::Sint64 => "sint64",
        Kind::Fixed32 => "fixed32",
        Kind::Fixed64 => "fixed64",
        Kind::Sfixed32 => "sfixed32",
        Kind::Sfixed64 => "sfixed64",
        Kind::Bool => "bool",
        Kind::String => "string",
        Kind::Bytes => "bytes",
        Kind::Message(m) => m.full_name(),
        Kind::Enum(e) => e.full_name(),
    };
    name.yellow()
}

impl From<Message<'_>> for FormattedString {
    fn from(Message(registry, message): Message<'_>) -> Self {
        let mut out = String::new();
        out.push_str(&format!(
            "{} {} {{\n",
            "message".cyan(),
            message.full_name().green()
        ));

        for field in message.fields() {
            if field.is_map()
                && let Kind::Message(entry) = field.kind()
            {
                out.push_str(&format!(
                    "  {}<{}, {}> {} = {};\n",
                    "map".cyan(),
                    type_name(&entry.map_entry_key_field().kind()),
                    type_name(&entry.map_entry_value_field().kind()),
                    field.name(),
                    field.number()
                ));
                continue;
            }

            let oneof = field.containing_oneof().filter(|o| !o.is_synthetic());

            let label = match field.cardinality() {
                Cardinality::Repeated => format!("{} ", "repeated".cyan()),
                Cardinality::Required => format!("{} ", "required".cyan()),
                Cardinality::Optional
                    if field.supports_presence()
                        && oneof.is_none()
                        && !matches!(field.kind(), Kind::Message(_)) =>
                {
                    format!("{} ", "optional".cyan())
                }
                _ => "".to_string(),
            };

            let oneof = oneof
                .map(|o| format!(" {}", format!("// oneof {}", o.name()).dimmed()))
                .unwrap_or_default();

            out.push_str(&format!(
                "  {}{}{} {} = {};{}\n",
                label,
                type_name(&field.kind()),
                " ".normal(), // Reset color
                field.name(),
                field.number(),
                oneof
            ));
        }
        out.push('}');
        out.push_str(&format!(
            "\n{}",
            format!("// defined in {}", defined_in(registry, &message)).dimmed()
        ));
        FormattedString(out)
    }
}

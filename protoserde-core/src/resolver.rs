//! # Stream Type Resolution
//!
//! Decides which message type governs the key or the value of a record on a given stream.
//!
//! For a `(stream, role)` pair, the first match wins:
//!
//! 1. The per-stream override for that role.
//! 2. The default type for that role.
//!
//! Every configured type name is looked up when the resolver is built, so a typo in the
//! configuration is reported before any record is processed. Resolved bindings are memoized.
use crate::descriptor::DescriptorRegistry;
use parking_lot::RwLock;
use prost_reflect::MessageDescriptor;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// The part of a record a message type applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Key,
    Value,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Key => f.write_str("key"),
            Role::Value => f.write_str("value"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TypeResolutionError {
    #[error("message type not found in schema definitions: {type_name} (configured by '{setting}')")]
    NotFound { type_name: String, setting: String },

    #[error("No message type configured for the {role} of stream '{stream}'")]
    NotConfigured { stream: String, role: Role },
}

/// Type names, by role, as they appear in the configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeBindings {
    pub default_value: Option<String>,
    pub default_key: Option<String>,
    pub value_by_stream: BTreeMap<String, String>,
    pub key_by_stream: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct RoleBindings {
    default: Option<MessageDescriptor>,
    by_stream: HashMap<String, MessageDescriptor>,
}

#[derive(Debug)]
pub struct StreamTypeResolver {
    registry: Arc<DescriptorRegistry>,
    key: RoleBindings,
    value: RoleBindings,
    cache: RwLock<HashMap<(String, Role), MessageDescriptor>>,
}

impl StreamTypeResolver {
    /// Resolves every type name in `bindings` against the registry.
    ///
    /// # Errors
    ///
    /// Returns [`TypeResolutionError::NotFound`] for the first name that is not defined.
    pub fn new(
        registry: Arc<DescriptorRegistry>,
        bindings: &TypeBindings,
    ) -> Result<Self, TypeResolutionError> {
        let lookup = |type_name: &str, setting: String| {
            registry
                .message_by_name(type_name)
                .ok_or_else(|| TypeResolutionError::NotFound {
                    type_name: type_name.to_string(),
                    setting,
                })
        };

        let value = RoleBindings {
            default: bindings
                .default_value
                .as_deref()
                .map(|name| lookup(name, "defaultMessageType".to_string()))
                .transpose()?,
            by_stream: bindings
                .value_by_stream
                .iter()
                .map(|(stream, name)| {
                    lookup(name, format!("messageTypeByStream.{stream}"))
                        .map(|desc| (stream.clone(), desc))
                })
                .collect::<Result<_, _>>()?,
        };

        let key = RoleBindings {
            default: bindings
                .default_key
                .as_deref()
                .map(|name| lookup(name, "defaultMessageTypeForKey".to_string()))
                .transpose()?,
            by_stream: bindings
                .key_by_stream
                .iter()
                .map(|(stream, name)| {
                    lookup(name, format!("messageTypeForKeyByStream.{stream}"))
                        .map(|desc| (stream.clone(), desc))
                })
                .collect::<Result<_, _>>()?,
        };

        Ok(Self {
            registry,
            key,
            value,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> &Arc<DescriptorRegistry> {
        &self.registry
    }

    /// The message type bound to the given role of `stream`.
    pub fn resolve(
        &self,
        stream: &str,
        role: Role,
    ) -> Result<MessageDescriptor, TypeResolutionError> {
        let cache_key = (stream.to_string(), role);

        if let Some(desc) = self.cache.read().get(&cache_key) {
            return Ok(desc.clone());
        }

        let bindings = match role {
            Role::Key => &self.key,
            Role::Value => &self.value,
        };

        let desc = bindings
            .by_stream
            .get(stream)
            .or(bindings.default.as_ref())
            .cloned()
            .ok_or_else(|| TypeResolutionError::NotConfigured {
                stream: stream.to_string(),
                role,
            })?;

        debug!(
            stream,
            %role,
            message = desc.full_name(),
            "Resolved message type"
        );

        // A concurrent first lookup may have won the race; both computed the same descriptor.
        Ok(self.cache.write().entry(cache_key).or_insert(desc).clone())
    }

    /// Whether any message type is configured for the role, on any stream.
    pub fn has_bindings(&self, role: Role) -> bool {
        let bindings = match role {
            Role::Key => &self.key,
            Role::Value => &self.value,
        };
        bindings.default.is_some() || !bindings.by_stream.is_empty()
    }
}

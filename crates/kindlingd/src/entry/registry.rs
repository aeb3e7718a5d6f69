//! Entry-point registry and alias table.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

use super::{EntryPoint, EntryPointResolver};

/// Errors raised while building or mutating the registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Two entry points share an identity.
    #[error("entry point '{identity}' is already registered")]
    DuplicateIdentity {
        /// The repeated identity.
        identity: String,
    },
    /// An alias or default names an identity that is not registered.
    #[error("no entry point is registered as '{identity}'")]
    UnknownIdentity {
        /// The missing identity.
        identity: String,
    },
    /// An alias name is empty or contains whitespace.
    #[error("invalid alias name '{name}'")]
    InvalidAliasName {
        /// The rejected name.
        name: String,
    },
}

impl RegistryError {
    fn unknown(identity: impl Into<String>) -> Self {
        Self::UnknownIdentity {
            identity: identity.into(),
        }
    }
}

/// A short command name bound to an entry-point identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    name: String,
    identity: String,
    description: String,
}

impl Alias {
    /// Creates an alias.
    pub fn new(
        name: impl Into<String>,
        identity: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            identity: identity.into(),
            description: description.into(),
        }
    }

    /// The command name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The entry-point identity it resolves to.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Free-form description shown by the alias listing.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Registered entry points plus a runtime-mutable alias table.
///
/// Entry points are registered while the server is being assembled; aliases
/// may also be added while sessions are running.
pub struct Registry {
    entries: BTreeMap<String, Arc<dyn EntryPoint>>,
    aliases: RwLock<BTreeMap<String, Alias>>,
    allow_direct_lookup: bool,
    default_identity: Option<String>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Registry")
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .field("allow_direct_lookup", &self.allow_direct_lookup)
            .field("default_identity", &self.default_identity)
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(allow_direct_lookup: bool) -> Self {
        Self {
            entries: BTreeMap::new(),
            aliases: RwLock::new(BTreeMap::new()),
            allow_direct_lookup,
            default_identity: None,
        }
    }

    /// Registers an entry point under its identity.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateIdentity`] when the identity is
    /// taken.
    pub fn register(&mut self, entry: Arc<dyn EntryPoint>) -> Result<(), RegistryError> {
        let identity = entry.identity().to_owned();
        if self.entries.contains_key(&identity) {
            return Err(RegistryError::DuplicateIdentity { identity });
        }
        self.entries.insert(identity, entry);
        Ok(())
    }

    /// Adds or replaces an alias.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidAliasName`] for blank names or names
    /// containing whitespace and [`RegistryError::UnknownIdentity`] when the
    /// target is not registered.
    pub fn add_alias(&self, alias: Alias) -> Result<(), RegistryError> {
        if alias.name.is_empty() || alias.name.chars().any(char::is_whitespace) {
            return Err(RegistryError::InvalidAliasName { name: alias.name });
        }
        if !self.entries.contains_key(&alias.identity) {
            return Err(RegistryError::unknown(alias.identity));
        }
        self.aliases
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(alias.name.clone(), alias);
        Ok(())
    }

    /// All aliases, sorted by name.
    #[must_use]
    pub fn aliases(&self) -> Vec<Alias> {
        self.aliases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Sets the fallback entry point.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownIdentity`] when `identity` is not
    /// registered.
    pub fn set_default(&mut self, identity: &str) -> Result<(), RegistryError> {
        if !self.entries.contains_key(identity) {
            return Err(RegistryError::unknown(identity));
        }
        self.default_identity = Some(identity.to_owned());
        Ok(())
    }

    /// Looks up an entry point by identity, ignoring aliases and the direct
    /// lookup setting.
    #[must_use]
    pub fn entry(&self, identity: &str) -> Option<Arc<dyn EntryPoint>> {
        self.entries.get(identity).cloned()
    }

    /// Registered identities, sorted.
    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl EntryPointResolver for Registry {
    fn resolve(&self, command: &str) -> Option<Arc<dyn EntryPoint>> {
        let aliased = self
            .aliases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(command)
            .map(|alias| alias.identity.clone());
        if let Some(identity) = aliased {
            return self.entry(&identity);
        }
        if self.allow_direct_lookup {
            return self.entry(command);
        }
        None
    }

    fn default_entry_point(&self) -> Option<Arc<dyn EntryPoint>> {
        self.default_identity
            .as_deref()
            .and_then(|identity| self.entry(identity))
    }
}

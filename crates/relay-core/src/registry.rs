//! Command registry.
//!
//! Commands are pluggable modules implementing [`Command`]. The registry
//! holds one [`CommandDescriptor`] per command, addressed by name or alias.
//! Descriptors are shared as `Arc`s and replaced whole, so a dispatch that
//! already resolved a descriptor keeps using it while new dispatches see the
//! replacement.

use crate::connection::{Connection, DeliveryError};
use crate::context::Context;
use crate::hooks::HookSpec;
use async_trait::async_trait;
use dashmap::DashMap;
use relay_protocol::Payload;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

/// Registry errors. Only raised while loading commands.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A command with this name or alias already exists.
    #[error("Duplicate command: {0}")]
    DuplicateCommand(String),

    /// An alias collides with another command's name or alias.
    #[error("Alias '{alias}' of command '{command}' collides with an existing command")]
    AliasCollision { alias: String, command: String },

    /// A replacement descriptor does not carry the name it replaces.
    #[error("Cannot replace '{expected}' with a descriptor named '{found}'")]
    NameMismatch { expected: String, found: String },

    /// A command's `init` failed.
    #[error("Failed to initialize '{command}': {source}")]
    Init {
        command: String,
        #[source]
        source: CommandError,
    },
}

/// Command handler errors. Logged server-side, never shown to the client.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{0}")]
    Failed(String),

    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Descriptive metadata for a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandInfo {
    pub name: String,
    pub aliases: Vec<String>,
    pub description: String,
    pub usage: String,
}

impl CommandInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| (*a).to_string()).collect();
        self
    }

    #[must_use]
    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = usage.into();
        self
    }
}

/// A command module.
#[async_trait]
pub trait Command: Send + Sync {
    /// Name, aliases, and help text.
    fn info(&self) -> CommandInfo;

    /// Fields that must be present in the payload.
    fn required_fields(&self) -> &[&str] {
        &[]
    }

    /// Hooks this module contributes. Collected once per load.
    fn hooks(&self) -> Vec<HookSpec> {
        Vec::new()
    }

    /// One-time setup after registration.
    async fn init(&self, _ctx: &Context) -> Result<(), CommandError> {
        Ok(())
    }

    /// Execute the command.
    async fn run(
        &self,
        ctx: &Context,
        conn: &Arc<Connection>,
        payload: Payload,
    ) -> Result<(), CommandError>;
}

/// A registered command.
pub struct CommandDescriptor {
    pub name: String,
    pub aliases: Vec<String>,
    pub required_fields: Vec<String>,
    pub description: String,
    pub usage: String,
    pub handler: Arc<dyn Command>,
    pub hook_specs: Vec<HookSpec>,
}

impl CommandDescriptor {
    /// Build a descriptor from a command module.
    #[must_use]
    pub fn from_command(handler: Arc<dyn Command>) -> Self {
        let info = handler.info();
        let required_fields = handler
            .required_fields()
            .iter()
            .map(|f| (*f).to_string())
            .collect();
        let hook_specs = handler.hooks();
        Self {
            name: info.name,
            aliases: info.aliases,
            required_fields,
            description: info.description,
            usage: info.usage,
            handler,
            hook_specs,
        }
    }
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("required_fields", &self.required_fields)
            .field("hook_specs", &self.hook_specs)
            .finish_non_exhaustive()
    }
}

/// Commands addressed by name or alias.
pub struct CommandRegistry {
    commands: DashMap<String, Arc<CommandDescriptor>>,
    /// Alias -> command name.
    aliases: DashMap<String, String>,
    /// Serializes writers so collision checks and inserts are atomic.
    write_lock: Mutex<()>,
}

impl CommandRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            commands: DashMap::new(),
            aliases: DashMap::new(),
            write_lock: Mutex::new(()),
        }
    }

    fn is_taken(&self, key: &str, except: Option<&str>) -> bool {
        let owner = if self.commands.contains_key(key) {
            Some(key.to_string())
        } else {
            self.aliases.get(key).map(|name| name.value().clone())
        };
        match (owner, except) {
            (Some(owner), Some(except)) => owner != except,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    fn check_aliases(
        &self,
        descriptor: &CommandDescriptor,
        except: Option<&str>,
    ) -> Result<(), RegistryError> {
        for (i, alias) in descriptor.aliases.iter().enumerate() {
            let repeated = alias == &descriptor.name || descriptor.aliases[..i].contains(alias);
            if repeated || self.is_taken(alias, except) {
                return Err(RegistryError::AliasCollision {
                    alias: alias.clone(),
                    command: descriptor.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Register a new command.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or an alias is already taken.
    pub fn register(
        &self,
        descriptor: CommandDescriptor,
    ) -> Result<Arc<CommandDescriptor>, RegistryError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if self.is_taken(&descriptor.name, None) {
            return Err(RegistryError::DuplicateCommand(descriptor.name));
        }
        self.check_aliases(&descriptor, None)?;

        let descriptor = Arc::new(descriptor);
        for alias in &descriptor.aliases {
            self.aliases.insert(alias.clone(), descriptor.name.clone());
        }
        self.commands
            .insert(descriptor.name.clone(), Arc::clone(&descriptor));

        debug!(command = %descriptor.name, aliases = ?descriptor.aliases, "Command registered");
        Ok(descriptor)
    }

    /// Swap the descriptor registered under `name` for `descriptor`.
    ///
    /// Registers it fresh if `name` is unknown. Returns the previous
    /// descriptor, which stays valid for anyone still holding it.
    ///
    /// # Errors
    ///
    /// Returns an error if the names differ or a new alias is taken by
    /// another command.
    pub fn replace(
        &self,
        name: &str,
        descriptor: CommandDescriptor,
    ) -> Result<Option<Arc<CommandDescriptor>>, RegistryError> {
        if descriptor.name != name {
            return Err(RegistryError::NameMismatch {
                expected: name.to_string(),
                found: descriptor.name,
            });
        }

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if self.aliases.contains_key(name) {
            return Err(RegistryError::DuplicateCommand(name.to_string()));
        }
        self.check_aliases(&descriptor, Some(name))?;

        let descriptor = Arc::new(descriptor);
        let previous = self
            .commands
            .insert(name.to_string(), Arc::clone(&descriptor));

        if let Some(previous) = &previous {
            for alias in &previous.aliases {
                if !descriptor.aliases.contains(alias) {
                    self.aliases.remove(alias);
                }
            }
        }
        for alias in &descriptor.aliases {
            self.aliases.insert(alias.clone(), name.to_string());
        }

        info!(command = %name, "Command replaced");
        Ok(previous)
    }

    /// Look up a command by name or alias. Case-sensitive.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Arc<CommandDescriptor>> {
        if let Some(descriptor) = self.commands.get(name) {
            return Some(Arc::clone(descriptor.value()));
        }
        let target = self.aliases.get(name).map(|entry| entry.value().clone())?;
        self.commands
            .get(&target)
            .map(|descriptor| Arc::clone(descriptor.value()))
    }

    /// All descriptors, sorted by name.
    #[must_use]
    pub fn descriptors(&self) -> Vec<Arc<CommandDescriptor>> {
        let mut all: Vec<_> = self
            .commands
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// All command names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.descriptors().iter().map(|d| d.name.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named {
        info: CommandInfo,
    }

    #[async_trait]
    impl Command for Named {
        fn info(&self) -> CommandInfo {
            self.info.clone()
        }

        async fn run(
            &self,
            _ctx: &Context,
            _conn: &Arc<Connection>,
            _payload: Payload,
        ) -> Result<(), CommandError> {
            Ok(())
        }
    }

    fn descriptor(name: &str, aliases: &[&str], description: &str) -> CommandDescriptor {
        CommandDescriptor::from_command(Arc::new(Named {
            info: CommandInfo::new(name, description).with_aliases(aliases),
        }))
    }

    #[test]
    fn test_resolve_by_name_and_alias() {
        let registry = CommandRegistry::new();
        registry.register(descriptor("whisper", &["w"], "")).unwrap();

        assert_eq!(registry.resolve("whisper").unwrap().name, "whisper");
        assert_eq!(registry.resolve("w").unwrap().name, "whisper");
        assert!(registry.resolve("Whisper").is_none());
        assert!(registry.resolve("nope").is_none());
    }

    #[test]
    fn test_duplicate_name() {
        let registry = CommandRegistry::new();
        registry.register(descriptor("chat", &[], "")).unwrap();
        assert!(matches!(
            registry.register(descriptor("chat", &[], "")),
            Err(RegistryError::DuplicateCommand(_))
        ));
    }

    #[test]
    fn test_alias_collisions() {
        let registry = CommandRegistry::new();
        registry.register(descriptor("whisper", &["w"], "")).unwrap();

        // Alias equal to an existing name.
        assert!(matches!(
            registry.register(descriptor("msg", &["whisper"], "")),
            Err(RegistryError::AliasCollision { .. })
        ));
        // Alias equal to an existing alias.
        assert!(matches!(
            registry.register(descriptor("write", &["w"], "")),
            Err(RegistryError::AliasCollision { .. })
        ));
        // Name equal to an existing alias.
        assert!(matches!(
            registry.register(descriptor("w", &[], "")),
            Err(RegistryError::DuplicateCommand(_))
        ));
        // Alias repeating its own name.
        assert!(matches!(
            registry.register(descriptor("me", &["me"], "")),
            Err(RegistryError::AliasCollision { .. })
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_replace_swaps_whole_descriptor() {
        let registry = CommandRegistry::new();
        registry.register(descriptor("help", &["h"], "old")).unwrap();
        let in_flight = registry.resolve("help").unwrap();

        let previous = registry
            .replace("help", descriptor("help", &["?"], "new"))
            .unwrap()
            .unwrap();

        assert_eq!(previous.description, "old");
        assert_eq!(in_flight.description, "old");
        assert_eq!(registry.resolve("help").unwrap().description, "new");
        assert_eq!(registry.resolve("?").unwrap().description, "new");
        assert!(registry.resolve("h").is_none());
    }

    #[test]
    fn test_replace_checks_other_commands() {
        let registry = CommandRegistry::new();
        registry.register(descriptor("whisper", &["w"], "")).unwrap();
        registry.register(descriptor("help", &[], "")).unwrap();

        assert!(matches!(
            registry.replace("help", descriptor("help", &["w"], "")),
            Err(RegistryError::AliasCollision { .. })
        ));
        assert!(matches!(
            registry.replace("help", descriptor("helper", &[], "")),
            Err(RegistryError::NameMismatch { .. })
        ));
        // Keeping an alias across a replace is fine.
        assert!(registry
            .replace("whisper", descriptor("whisper", &["w"], "v2"))
            .is_ok());
        assert_eq!(registry.names(), vec!["help", "whisper"]);
    }
}

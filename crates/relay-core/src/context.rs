//! The explicit context handed to every command and hook.

use crate::dispatch::DispatchPolicy;
use crate::hooks::{HookPipeline, HookSpec};
use crate::police::{Police, PoliceConfig};
use crate::registry::{Command, CommandDescriptor, CommandRegistry, RegistryError};
use crate::router::ConnectionRouter;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::sync::Arc;
use tracing::info;

/// Typed values shared between command modules.
///
/// One value per type; modules look them up by the type they expect.
#[derive(Default)]
pub struct SharedState {
    values: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl SharedState {
    /// Store `value`, replacing any previous value of the same type.
    pub fn insert<T: Any + Send + Sync>(&self, value: T) {
        self.values.insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Fetch the value of type `T`.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let value = self
            .values
            .get(&TypeId::of::<T>())
            .map(|entry| Arc::clone(entry.value()))?;
        value.downcast::<T>().ok()
    }
}

/// Context configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextConfig {
    pub police: PoliceConfig,
    pub policy: DispatchPolicy,
}

/// Registry, hooks, router, rate limiter, and shared state.
pub struct Context {
    registry: CommandRegistry,
    hooks: HookPipeline,
    router: ConnectionRouter,
    police: Police,
    state: SharedState,
    pub(crate) policy: DispatchPolicy,
}

impl Context {
    /// Create a context with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ContextConfig::default())
    }

    /// Create a context with custom configuration.
    #[must_use]
    pub fn with_config(config: ContextConfig) -> Self {
        info!("Creating context with config: {:?}", config);
        Self {
            registry: CommandRegistry::new(),
            hooks: HookPipeline::new(),
            router: ConnectionRouter::new(),
            police: Police::with_config(config.police),
            state: SharedState::default(),
            policy: config.policy,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    #[must_use]
    pub fn hooks(&self) -> &HookPipeline {
        &self.hooks
    }

    #[must_use]
    pub fn router(&self) -> &ConnectionRouter {
        &self.router
    }

    #[must_use]
    pub fn police(&self) -> &Police {
        &self.police
    }

    #[must_use]
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Register a command module, its hooks, and run its `init`.
    ///
    /// # Errors
    ///
    /// Returns an error on a name/alias collision or a failed `init`. Both
    /// indicate a packaging defect; callers should abort startup.
    pub async fn load(&self, module: Arc<dyn Command>) -> Result<(), RegistryError> {
        let descriptor = self
            .registry
            .register(CommandDescriptor::from_command(Arc::clone(&module)))?;
        self.install(&descriptor.name, &descriptor.hook_specs, module)
            .await
    }

    /// Replace a loaded module with a new version.
    ///
    /// The old module's hooks are removed before the new ones are added, so
    /// reloading the same module any number of times leaves one set of hooks.
    ///
    /// # Errors
    ///
    /// Returns an error on an alias collision or a failed `init`.
    pub async fn reload(&self, module: Arc<dyn Command>) -> Result<(), RegistryError> {
        let descriptor = CommandDescriptor::from_command(Arc::clone(&module));
        let name = descriptor.name.clone();
        let hook_specs = descriptor.hook_specs.clone();

        self.registry.replace(&name, descriptor)?;
        self.hooks.unregister_owner(&name);
        self.install(&name, &hook_specs, module).await?;

        info!(command = %name, "Command reloaded");
        Ok(())
    }

    async fn install(
        &self,
        name: &str,
        hook_specs: &[HookSpec],
        module: Arc<dyn Command>,
    ) -> Result<(), RegistryError> {
        for spec in hook_specs.iter().cloned() {
            self.hooks.register_spec(name, spec);
        }
        module
            .init(self)
            .await
            .map_err(|source| RegistryError::Init {
                command: name.to_string(),
                source,
            })
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

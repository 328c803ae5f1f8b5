//! # Application Builder
//!
//! Collects providers, controllers, plugins and resolvers, then freezes
//! them into a [`Dispatcher`].
//!
//! ```ignore
//! let dispatcher = App::new()
//!     .provider::<UserRepository>()
//!     .controller(users_controller())
//!     .plugin(RequestIdPlugin::new())
//!     .build()?;
//! ```
//!
//! Every provider and controller is constructed during [`App::build`], so
//! dependency cycles and failing constructors surface at startup.

use crate::config::AppConfig;
use crate::container::{ContainerBuilder, Injectable};
use crate::controller::{ControllerDef, HandlerTable};
use crate::database::Database;
use crate::dispatcher::{DispatchSettings, Dispatcher};
use crate::error::Result;
use crate::injection::{CustomResolver, InjectionResolver};
use crate::metadata::{MetadataRegistry, TypeKey};
use crate::plugin::{Plugin, PluginChain};
use crate::router::Router;
use crate::server::{Server, ServerConfig};
use std::sync::Arc;
use tracing::info;

/// Application under construction
#[derive(Default)]
pub struct App {
    config: AppConfig,
    registry: MetadataRegistry,
    providers: ContainerBuilder,
    eager: Vec<TypeKey>,
    controllers: Vec<TypeKey>,
    handlers: HandlerTable,
    plugins: PluginChain,
    param_resolvers: Vec<CustomResolver>,
    prop_resolvers: Vec<CustomResolver>,
    database: Option<Database>,
}

impl App {
    /// Empty application with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the configuration
    #[must_use]
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    /// Connect the database named in the configuration, if any
    ///
    /// # Errors
    ///
    /// `Error::Database` when the connection cannot be established.
    pub async fn connect_database(self) -> Result<Self> {
        let Some(db) = self.config.database.clone() else {
            return Ok(self);
        };
        let database = Database::connect(&db.url, db.max_connections).await?;
        Ok(self.database(database))
    }

    /// Use `database` for table and database injection
    #[must_use]
    pub fn database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }

    /// Register an injectable singleton
    #[must_use]
    pub fn provider<T: Injectable>(mut self) -> Self {
        self.providers.provide::<T>(&mut self.registry);
        self.remember(TypeKey::of::<T>());
        self
    }

    /// Register a ready-made singleton
    #[must_use]
    pub fn instance<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.providers.instance(&mut self.registry, value);
        self.remember(TypeKey::of::<T>());
        self
    }

    /// Register a controller and its routes
    #[must_use]
    pub fn controller<C: Injectable>(mut self, def: ControllerDef<C>) -> Self {
        let key = def.key();
        self.providers.provide::<C>(&mut self.registry);
        def.register(&mut self.registry, &mut self.handlers);
        self.remember(key);
        if !self.controllers.contains(&key) {
            self.controllers.push(key);
        }
        self
    }

    /// Append a plugin to the chain
    #[must_use]
    pub fn plugin<P: Plugin>(mut self, plugin: P) -> Self {
        self.plugins.add(plugin);
        self
    }

    /// Add a resolver for custom parameter kinds
    #[must_use]
    pub fn param_resolver(mut self, resolver: CustomResolver) -> Self {
        self.param_resolvers.push(resolver);
        self
    }

    /// Add a resolver for custom property kinds
    #[must_use]
    pub fn prop_resolver(mut self, resolver: CustomResolver) -> Self {
        self.prop_resolvers.push(resolver);
        self
    }

    fn remember(&mut self, key: TypeKey) {
        if !self.eager.contains(&key) {
            self.eager.push(key);
        }
    }

    /// Construct every singleton and mount every controller
    ///
    /// # Errors
    ///
    /// `Error::CycleDetected` or `Error::Resolution` from the container,
    /// `Error::Resolution` when a controller has no base path.
    pub fn build(self) -> Result<Dispatcher> {
        let registry = Arc::new(self.registry);
        let container = Arc::new(self.providers.build(registry.clone()));
        for key in &self.eager {
            container.register(*key)?;
        }

        let router = Router::from_registry(&registry, &self.controllers)?;

        let mut injector = InjectionResolver::new(self.database);
        for resolver in self.param_resolvers {
            injector.add_param_resolver(resolver);
        }
        for resolver in self.prop_resolvers {
            injector.add_prop_resolver(resolver);
        }

        info!(
            controllers = router.len(),
            singletons = container.len(),
            plugins = self.plugins.len(),
            base_path = %self.config.base_path,
            "Application built"
        );

        Ok(Dispatcher::new(
            registry,
            container,
            router,
            self.handlers,
            injector,
            self.plugins,
            DispatchSettings {
                base_path: self.config.base_path,
                method_not_allowed_code: self.config.method_not_allowed_code,
            },
        ))
    }

    /// Build a server without starting it
    ///
    /// # Errors
    ///
    /// Same as [`App::build`].
    pub fn into_server(self) -> Result<Server> {
        let config = ServerConfig::from(&self.config);
        Ok(Server::new(config, self.build()?))
    }

    /// Build and serve until shutdown
    ///
    /// # Errors
    ///
    /// Build errors, or `Error::Io` from the listener.
    pub async fn serve(self) -> Result<()> {
        self.into_server()?.serve().await
    }
}

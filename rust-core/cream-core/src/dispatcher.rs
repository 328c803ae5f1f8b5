//! # Dispatcher
//!
//! Request lifecycle:
//!
//! ```text
//! PLUGIN_CHAIN → ROUTE_RESOLUTION → INJECTION → INVOCATION → RESPONSE
//!       └──────────────┴─────────────────┴────────────┴──→ ERROR(code, msg)
//! ```
//!
//! A plugin may jump straight to RESPONSE. Every request yields exactly one
//! response; plugins then see it in reverse order and the CORS headers are
//! attached last.

use crate::container::Container;
use crate::controller::{HandlerTable, Instance};
use crate::error::{Error, Result};
use crate::injection::{Args, InjectionResolver, PropValues};
use crate::metadata::{MetadataRegistry, TypeKey};
use crate::plugin::{PluginChain, PluginOutcome};
use crate::request::Request;
use crate::response::{Cors, Reply, Response};
use crate::route::Method;
use crate::router::{normalize_base, Router};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Result a route resolves to for `OPTIONS` preflight requests
pub const PREFLIGHT_REPLY: &str = "ok";

/// Lifecycle stage, used to label failures in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Plugins run before routing
    PluginChain,
    /// Path → controller → route
    RouteResolution,
    /// Bindings → arguments and properties
    Injection,
    /// Handler call
    Invocation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PluginChain => "PLUGIN_CHAIN",
            Self::RouteResolution => "ROUTE_RESOLUTION",
            Self::Injection => "INJECTION",
            Self::Invocation => "INVOCATION",
        })
    }
}

/// Dispatch settings taken from the configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Prefix every route lives under (`/` for none)
    pub base_path: String,
    /// Envelope code for a verb the route does not accept
    pub method_not_allowed_code: u16,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            base_path: "/".to_string(),
            method_not_allowed_code: 503,
        }
    }
}

/// Immutable request pipeline built by [`crate::App::build`]
pub struct Dispatcher {
    registry: Arc<MetadataRegistry>,
    container: Arc<Container>,
    router: Router,
    handlers: HandlerTable,
    injector: InjectionResolver,
    plugins: PluginChain,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub(crate) fn new(
        registry: Arc<MetadataRegistry>,
        container: Arc<Container>,
        router: Router,
        handlers: HandlerTable,
        injector: InjectionResolver,
        plugins: PluginChain,
        mut settings: DispatchSettings,
    ) -> Self {
        settings.base_path = normalize_base(&settings.base_path);
        Self {
            registry,
            container,
            router,
            handlers,
            injector,
            plugins,
            settings,
        }
    }

    /// The singleton container
    #[must_use]
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// The metadata registry
    #[must_use]
    pub fn registry(&self) -> &MetadataRegistry {
        &self.registry
    }

    /// Database used for table and database injection
    #[must_use]
    pub const fn database(&self) -> Option<&crate::database::Database> {
        self.injector.database()
    }

    /// Active settings
    #[must_use]
    pub const fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Run one request through the pipeline
    pub async fn dispatch(&self, mut request: Request) -> Response {
        let started = Instant::now();
        let path = request.path().to_string();

        let mut response = match self.run(&mut request).await {
            Ok(reply) => Response::from_reply(reply),
            Err((stage, err)) => {
                log_failure(stage, &path, &err);
                Response::from_error(&err)
            }
        };

        self.plugins.run_after(&request, &mut response);
        Cors.apply(&mut response);

        info!(
            method = %request.method_name(),
            path = %path,
            query = request.query_string().unwrap_or(""),
            client_ip = request.client_ip().as_deref().unwrap_or("-"),
            status = response.status,
            elapsed_ms = millis(started.elapsed()),
            "request"
        );
        response
    }

    async fn run(&self, request: &mut Request) -> std::result::Result<Reply, (Stage, Error)> {
        match self.plugins.run_before(request).await {
            PluginOutcome::Continue => {}
            PluginOutcome::Respond(reply) => {
                debug!(path = %request.path(), "plugin answered request");
                return Ok(reply);
            }
            PluginOutcome::Fail(err) => return Err((Stage::PluginChain, err)),
        }

        let routed_path =
            strip_prefix(&self.settings.base_path, request.path()).ok_or_else(|| {
                (
                    Stage::RouteResolution,
                    Error::RouteNotFound {
                        path: request.path().to_string(),
                    },
                )
            })?;
        let matched = self
            .router
            .resolve(&routed_path)
            .map_err(|e| (Stage::RouteResolution, e))?;

        let method = request.method();
        if method == Some(Method::Options) {
            return Ok(Reply::value(PREFLIGHT_REPLY));
        }
        if !method.is_some_and(|m| matched.allows(m)) {
            return Err((
                Stage::RouteResolution,
                Error::MethodNotAllowed {
                    path: routed_path,
                    method: request.method_name().to_string(),
                    code: self.settings.method_not_allowed_code,
                },
            ));
        }

        let controller = matched.controller;
        let handler_key = matched.handler_key();
        let (instance, props, args) = self
            .inject(request, controller, handler_key)
            .map_err(|e| (Stage::Injection, e))?;

        let method = self
            .handlers
            .get(controller, handler_key)
            .ok_or_else(|| {
                (
                    Stage::Invocation,
                    Error::Resolution {
                        type_name: controller.name().to_string(),
                        reason: format!("no handler registered for {handler_key}"),
                    },
                )
            })?
            .clone();

        method(instance, props, args)
            .await
            .map_err(|e| (Stage::Invocation, e))
    }

    fn inject(
        &self,
        request: &Request,
        controller: TypeKey,
        handler_key: &str,
    ) -> Result<(Instance, PropValues, Args)> {
        let args = self.injector.resolve_params(
            request,
            self.registry.params(controller, handler_key),
            self.registry.required(controller, handler_key),
        )?;
        let instance = self.container.resolve_key(controller)?;
        let props = self
            .injector
            .resolve_props(request, self.registry.props(controller));
        Ok((instance, props, args))
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("controllers", &self.router.len())
            .field("handlers", &self.handlers.len())
            .field("plugins", &self.plugins)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

fn log_failure(stage: Stage, path: &str, err: &Error) {
    match err.code() {
        Some(code) if code < 500 => {
            warn!(stage = %stage, path, code, error = %err, "request rejected");
        }
        _ => error!(stage = %stage, path, error = %err, "request failed"),
    }
}

/// Path relative to `prefix`, `None` when it lies outside
/// Whole milliseconds, saturating at `u64::MAX`
fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

fn strip_prefix(prefix: &str, path: &str) -> Option<String> {
    if prefix == "/" {
        return Some(path.to_string());
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some("/".to_string())
    } else if rest.starts_with('/') {
        Some(rest.to_string())
    } else {
        None
    }
}

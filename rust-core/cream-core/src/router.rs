//! # Router
//!
//! Two-level path resolution: request path → controller → route.
//!
//! 1. The path is split into `/`-separated segments and prefixes are tried
//!    from the shortest (`/`) to the longest (`/a/b/...`). The first prefix
//!    that is a registered controller base path wins.
//! 2. The remaining segments form the suffix (`/` when nothing remains). The
//!    suffix is looked up in the controller's route table: an exact key
//!    first, then every key compiled as `^(?:key)/?$` and tested against
//!    `suffix + "/"` in registration order.
//!
//! Route tables are compiled once when a controller is mounted and are
//! read-only afterwards.

use crate::error::{Error, Result};
use crate::metadata::{MetadataRegistry, TypeKey};
use crate::route::{Method, RouteEntry, RouteTable};
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

/// Compiled routes of one controller
#[derive(Debug)]
struct ControllerRoutes {
    controller: TypeKey,
    table: RouteTable,
    /// Route keys as anchored patterns, in registration order
    patterns: Vec<(Regex, String)>,
}

impl ControllerRoutes {
    fn compile(controller: TypeKey, table: RouteTable) -> Self {
        let patterns = table
            .iter()
            .filter_map(|(key, _)| match Regex::new(&format!("^(?:{key})/?$")) {
                Ok(re) => Some((re, key.to_string())),
                Err(e) => {
                    // Keys that are not valid patterns can still match literally.
                    debug!(controller = %controller, key, error = %e, "route key is not a pattern");
                    None
                }
            })
            .collect();

        Self {
            controller,
            table,
            patterns,
        }
    }

    /// Exact key first, then patterns in registration order
    fn lookup(&self, suffix: &str) -> Option<(&str, &RouteEntry)> {
        if let Some(hit) = self.table.get_key_value(suffix) {
            return Some(hit);
        }

        let probe = format!("{suffix}/");
        self.patterns
            .iter()
            .find(|(re, _)| re.is_match(&probe))
            .and_then(|(_, key)| self.table.get(key).map(|entry| (key.as_str(), entry)))
    }
}

/// A resolved route
#[derive(Debug)]
pub struct RouteMatch<'a> {
    /// Owning controller
    pub controller: TypeKey,
    /// Base path the controller was mounted under
    pub base_path: &'a str,
    /// Route key that matched
    pub route_key: &'a str,
    /// The matched entry
    pub entry: &'a RouteEntry,
    /// Path remainder that was matched against the route table
    pub suffix: String,
}

impl RouteMatch<'_> {
    /// Handler name within the controller
    #[must_use]
    pub fn handler_key(&self) -> &str {
        &self.entry.handler_key
    }

    /// Whether the matched route accepts `method`
    #[must_use]
    pub fn allows(&self, method: Method) -> bool {
        self.entry.accepts(method)
    }
}

/// Controller-prefix router
#[derive(Debug, Default)]
pub struct Router {
    controllers: HashMap<String, ControllerRoutes>,
}

impl Router {
    /// Create a new empty router
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a router for `controllers` from their registered metadata
    ///
    /// # Errors
    ///
    /// See [`Router::mount`].
    pub fn from_registry(registry: &MetadataRegistry, controllers: &[TypeKey]) -> Result<Self> {
        let mut router = Self::new();
        for &controller in controllers {
            router.mount(registry, controller)?;
        }
        Ok(router)
    }

    /// Mount one controller under its declared base path
    ///
    /// A later controller with the same base path replaces the earlier one.
    ///
    /// # Errors
    ///
    /// `Error::Resolution` when the type has no declared base path.
    pub fn mount(&mut self, registry: &MetadataRegistry, controller: TypeKey) -> Result<()> {
        let base = registry
            .controller_path(controller)
            .ok_or_else(|| Error::Resolution {
                type_name: controller.name().to_string(),
                reason: "no controller path declared".to_string(),
            })?;
        let base = normalize_base(base);
        let table = registry.routes(controller).cloned().unwrap_or_default();

        debug!(controller = %controller, base = %base, routes = table.len(), "mounting controller");
        self.controllers
            .insert(base, ControllerRoutes::compile(controller, table));
        Ok(())
    }

    /// Resolve a request path to a controller and route
    ///
    /// # Errors
    ///
    /// `Error::RouteNotFound` when no controller prefix or no route key
    /// matches.
    pub fn resolve(&self, path: &str) -> Result<RouteMatch<'_>> {
        let not_found = || Error::RouteNotFound {
            path: path.to_string(),
        };

        let segments: Vec<&str> = path
            .split('/')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        let mut prefix = String::from("/");
        let mut mounted = None;
        for consumed in 0..=segments.len() {
            if consumed > 0 {
                if prefix.len() > 1 {
                    prefix.push('/');
                }
                prefix.push_str(segments[consumed - 1]);
            }
            if let Some((base, routes)) = self.controllers.get_key_value(&prefix) {
                mounted = Some((base.as_str(), routes, consumed));
                break;
            }
        }

        let (base_path, routes, consumed) = mounted.ok_or_else(not_found)?;
        let suffix = format!("/{}", segments[consumed..].join("/"));
        let (route_key, entry) = routes.lookup(&suffix).ok_or_else(not_found)?;

        debug!(path, base = base_path, route = route_key, "route resolved");
        Ok(RouteMatch {
            controller: routes.controller,
            base_path,
            route_key,
            entry,
            suffix,
        })
    }

    /// Controller mounted at exactly `base`
    #[must_use]
    pub fn controller_at(&self, base: &str) -> Option<TypeKey> {
        self.controllers
            .get(&normalize_base(base))
            .map(|routes| routes.controller)
    }

    /// Number of mounted controllers
    #[must_use]
    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    /// Whether nothing is mounted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}

/// `users/` → `/users`, `` → `/`
pub(crate) fn normalize_base(base: &str) -> String {
    let trimmed = base.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}

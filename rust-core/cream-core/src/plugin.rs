//! # Plugin System
//!
//! Request interception ahead of routing.
//!
//! Plugins run in registration order before the route is resolved. Each one
//! returns a [`PluginOutcome`]: continue with the next plugin, answer the
//! request right away, or fail it. After the response is built every plugin
//! gets an `after_response` call in reverse order.

use crate::error::Error;
use crate::request::Request;
use crate::response::{Reply, Response};
use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

/// What a plugin decided about a request
#[derive(Debug)]
pub enum PluginOutcome {
    /// Hand over to the next plugin (or routing)
    Continue,
    /// Answer with this result; routing and the handler are skipped
    Respond(Reply),
    /// Fail the request with this error
    Fail(Error),
}

/// Request/response interceptor
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Called before routing; may annotate the request
    async fn before_request(&self, _req: &mut Request) -> PluginOutcome {
        PluginOutcome::Continue
    }

    /// Called after the response is built; may add headers
    fn after_response(&self, _req: &Request, _res: &mut Response) {}

    /// Plugin name for logging
    fn name(&self) -> &'static str {
        "Unknown"
    }
}

/// Ordered plugin list
#[derive(Default, Clone)]
pub struct PluginChain {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginChain {
    /// Create a new empty chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a plugin
    pub fn add<P: Plugin>(&mut self, plugin: P) {
        self.plugins.push(Arc::new(plugin));
    }

    /// Run `before_request` in order until one does not continue
    pub async fn run_before(&self, req: &mut Request) -> PluginOutcome {
        for plugin in &self.plugins {
            match plugin.before_request(req).await {
                PluginOutcome::Continue => continue,
                outcome => return outcome,
            }
        }
        PluginOutcome::Continue
    }

    /// Run `after_response` in reverse order
    pub fn run_after(&self, req: &Request, res: &mut Response) {
        for plugin in self.plugins.iter().rev() {
            plugin.after_response(req, res);
        }
    }

    /// Plugin names in order
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Get the number of plugins
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Check if chain is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl std::fmt::Debug for PluginChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Bearer JWT check for protected path prefixes
///
/// Valid claims are stored on the request for handlers and resolvers.
pub struct BearerAuthPlugin {
    decoding_key: DecodingKey,
    validation: Validation,
    protected: Vec<String>,
}

impl BearerAuthPlugin {
    /// HS256 check with a shared secret
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            protected: Vec::new(),
        }
    }

    /// Require a token for paths under `prefix`
    #[must_use]
    pub fn protect(mut self, prefix: &str) -> Self {
        self.protected.push(prefix.to_string());
        self
    }

    fn guards(&self, path: &str) -> bool {
        self.protected.iter().any(|prefix| {
            path == prefix
                || path
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/') || prefix.ends_with('/'))
        })
    }
}

#[async_trait]
impl Plugin for BearerAuthPlugin {
    async fn before_request(&self, req: &mut Request) -> PluginOutcome {
        if !self.guards(req.path()) {
            return PluginOutcome::Continue;
        }

        let Some(token) = req
            .header("authorization")
            .and_then(|h| h.strip_prefix("Bearer "))
        else {
            return PluginOutcome::Fail(Error::Unauthorized {
                reason: "missing bearer token".to_string(),
            });
        };

        match decode::<Value>(token, &self.decoding_key, &self.validation) {
            Ok(data) => {
                req.claims = Some(data.claims);
                PluginOutcome::Continue
            }
            Err(e) => {
                warn!(path = %req.path(), error = %e, "JWT validation failed");
                PluginOutcome::Fail(Error::Unauthorized {
                    reason: e.to_string(),
                })
            }
        }
    }

    fn name(&self) -> &'static str {
        "BearerAuthPlugin"
    }
}

/// Tags every request with an `x-request-id` and echoes it on the response
#[derive(Debug, Default)]
pub struct RequestIdPlugin {
    counter: AtomicUsize,
}

impl RequestIdPlugin {
    /// Create the plugin
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let counter = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{:x}-{:x}", now.as_nanos(), counter)
    }
}

#[async_trait]
impl Plugin for RequestIdPlugin {
    async fn before_request(&self, req: &mut Request) -> PluginOutcome {
        if req.header("x-request-id").is_none() {
            let id = self.next_id();
            req.set_header("x-request-id", &id);
        }
        PluginOutcome::Continue
    }

    fn after_response(&self, req: &Request, res: &mut Response) {
        if let Some(id) = req.header("x-request-id") {
            res.set_header("x-request-id", id);
        }
    }

    fn name(&self) -> &'static str {
        "RequestIdPlugin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::Method;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;
    use std::sync::Mutex;

    const SECRET: &str = "test-secret";

    fn token(secret: &str) -> String {
        let claims = json!({"sub": "amy", "exp": 4_102_444_800_u64});
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        outcome: fn() -> PluginOutcome,
    }

    #[async_trait]
    impl Plugin for Recorder {
        async fn before_request(&self, _req: &mut Request) -> PluginOutcome {
            self.log
                .lock()
                .unwrap()
                .push(format!("before:{}", self.name));
            (self.outcome)()
        }

        fn after_response(&self, _req: &Request, _res: &mut Response) {
            self.log
                .lock()
                .unwrap()
                .push(format!("after:{}", self.name));
        }

        fn name(&self) -> &'static str {
            self.name
        }
    }

    #[tokio::test]
    async fn test_chain_order_and_short_circuit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = PluginChain::new();
        chain.add(Recorder {
            name: "a",
            log: log.clone(),
            outcome: || PluginOutcome::Continue,
        });
        chain.add(Recorder {
            name: "b",
            log: log.clone(),
            outcome: || PluginOutcome::Respond(Reply::value("cached")),
        });
        chain.add(Recorder {
            name: "c",
            log: log.clone(),
            outcome: || PluginOutcome::Continue,
        });

        let mut req = Request::new(Method::Get, "/");
        let outcome = chain.run_before(&mut req).await;
        assert!(matches!(outcome, PluginOutcome::Respond(_)));

        let mut res = Response::from_reply(Reply::value("cached"));
        chain.run_after(&req, &mut res);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["before:a", "before:b", "after:c", "after:b", "after:a"]
        );
        assert_eq!(chain.names(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_bearer_unprotected_path_passes() {
        let plugin = BearerAuthPlugin::new(SECRET).protect("/admin");
        let mut req = Request::new(Method::Get, "/public/list");
        assert!(matches!(
            plugin.before_request(&mut req).await,
            PluginOutcome::Continue
        ));
    }

    #[tokio::test]
    async fn test_bearer_missing_token() {
        let plugin = BearerAuthPlugin::new(SECRET).protect("/admin");
        let mut req = Request::new(Method::Get, "/admin/users");
        match plugin.before_request(&mut req).await {
            PluginOutcome::Fail(err) => assert_eq!(err.envelope_code(), 401),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bearer_valid_token_sets_claims() {
        let plugin = BearerAuthPlugin::new(SECRET).protect("/admin");
        let mut req = Request::new(Method::Get, "/admin")
            .with_header("Authorization", &format!("Bearer {}", token(SECRET)));
        assert!(matches!(
            plugin.before_request(&mut req).await,
            PluginOutcome::Continue
        ));
        assert_eq!(req.claims.unwrap()["sub"], json!("amy"));
    }

    #[tokio::test]
    async fn test_bearer_wrong_secret() {
        let plugin = BearerAuthPlugin::new(SECRET).protect("/admin");
        let mut req = Request::new(Method::Get, "/admin/x")
            .with_header("Authorization", &format!("Bearer {}", token("other")));
        assert!(matches!(
            plugin.before_request(&mut req).await,
            PluginOutcome::Fail(Error::Unauthorized { .. })
        ));
    }

    #[test]
    fn test_bearer_prefix_matching() {
        let plugin = BearerAuthPlugin::new(SECRET).protect("/admin");
        assert!(plugin.guards("/admin"));
        assert!(plugin.guards("/admin/users"));
        assert!(!plugin.guards("/administrator"));
    }

    #[tokio::test]
    async fn test_request_id_round_trip() {
        let plugin = RequestIdPlugin::new();
        let mut req = Request::new(Method::Get, "/");
        plugin.before_request(&mut req).await;
        let id = req.header("x-request-id").unwrap().to_string();

        let mut res = Response::from_reply(Reply::value(1));
        plugin.after_response(&req, &mut res);
        assert_eq!(res.header("x-request-id"), Some(id.as_str()));
    }
}

//! # Controllers
//!
//! Declaration surface for controllers and their routes.
//!
//! A [`ControllerDef`] names the base path, the injected properties and the
//! routes of one controller type. Registering it writes the declarations to
//! the [`MetadataRegistry`] and the type-erased handler functions to a
//! [`HandlerTable`]:
//!
//! ```ignore
//! ControllerDef::<Users>::new("/users")
//!     .prop("users", PropKind::Table, "users")
//!     .route(RouteDef::post("/create").field("name").required("name"), "create",
//!         |scope, args| async move {
//!             let name = args.str(0).unwrap_or_default().to_string();
//!             Ok(Reply::value(name))
//!         });
//! ```

use crate::database::{Database, Table};
use crate::error::{Error, Result};
use crate::injection::{Args, Injected, PropValues};
use crate::metadata::{
    MetadataKind, MetadataRegistry, MetadataValue, ParamBinding, ParamKind, PropBinding, PropKind,
    SubjectKey, TypeKey,
};
use crate::response::Reply;
use crate::route::{Method, RouteEntry, RouteTable};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::ops::Deref;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed handler future
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Type-erased controller instance
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Type-erased handler: controller instance, injected properties, arguments
pub type RouteMethod =
    Arc<dyn Fn(Instance, PropValues, Args) -> BoxFuture<Result<Reply>> + Send + Sync>;

/// Per-request view of a controller
///
/// Derefs to the shared singleton; injected properties live beside it and
/// never mutate the shared instance.
pub struct ControllerScope<C> {
    instance: Arc<C>,
    props: PropValues,
}

impl<C> ControllerScope<C> {
    /// Create a scope
    #[must_use]
    pub const fn new(instance: Arc<C>, props: PropValues) -> Self {
        Self { instance, props }
    }

    /// The shared controller instance
    #[must_use]
    pub const fn instance(&self) -> &Arc<C> {
        &self.instance
    }

    /// Injected property by name
    #[must_use]
    pub fn prop(&self, name: &str) -> Option<&Injected> {
        self.props.get(name)
    }

    /// Injected table accessor by property name
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.prop(name).and_then(Injected::as_table)
    }

    /// Injected database handle by property name
    #[must_use]
    pub fn database(&self, name: &str) -> Option<&Database> {
        self.prop(name).and_then(Injected::as_database)
    }
}

impl<C> Deref for ControllerScope<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.instance
    }
}

/// One route declaration: path, verbs, bindings, required names
#[derive(Debug, Clone)]
pub struct RouteDef {
    path: String,
    methods: Vec<Method>,
    params: Vec<ParamBinding>,
    required: Vec<String>,
}

impl RouteDef {
    /// Route accepting `methods`
    pub fn new(path: impl Into<String>, methods: &[Method]) -> Self {
        Self {
            path: path.into(),
            methods: methods.to_vec(),
            params: Vec::new(),
            required: Vec::new(),
        }
    }

    /// GET route
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(path, &[Method::Get])
    }

    /// POST route
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(path, &[Method::Post])
    }

    /// Binding at an explicit position
    #[must_use]
    pub fn param_at(mut self, index: usize, kind: ParamKind, key: impl Into<String>) -> Self {
        self.params.push(ParamBinding {
            index,
            kind,
            key: key.into(),
        });
        self
    }

    /// Binding one past the highest position declared so far
    #[must_use]
    pub fn param(self, kind: ParamKind, key: impl Into<String>) -> Self {
        let index = self.params.iter().map(|p| p.index + 1).max().unwrap_or(0);
        self.param_at(index, kind, key)
    }

    /// Next argument: one query entry
    #[must_use]
    pub fn query(self, key: &str) -> Self {
        self.param(ParamKind::Query, key)
    }

    /// Next argument: one body field
    #[must_use]
    pub fn field(self, key: &str) -> Self {
        self.param(ParamKind::Field, key)
    }

    /// Next argument: one uploaded file
    #[must_use]
    pub fn file(self, key: &str) -> Self {
        self.param(ParamKind::File, key)
    }

    /// Next argument: all body fields
    #[must_use]
    pub fn fields(self) -> Self {
        self.param(ParamKind::Fields, "")
    }

    /// Next argument: all query entries
    #[must_use]
    pub fn query_map(self) -> Self {
        self.param(ParamKind::QueryMap, "")
    }

    /// Next argument: all uploaded files
    #[must_use]
    pub fn files(self) -> Self {
        self.param(ParamKind::Files, "")
    }

    /// Next argument: accessor for table `name`
    #[must_use]
    pub fn table(self, name: &str) -> Self {
        self.param(ParamKind::Table, name)
    }

    /// Next argument: the database handle
    #[must_use]
    pub fn database(self) -> Self {
        self.param(ParamKind::Database, "")
    }

    /// Next argument: asked of the custom resolver chain
    #[must_use]
    pub fn custom(self, kind: &str, key: &str) -> Self {
        self.param(ParamKind::Custom(kind.to_string()), key)
    }

    /// Require `key` to be present and non-empty
    #[must_use]
    pub fn required(mut self, key: &str) -> Self {
        self.required.push(key.to_string());
        self
    }

    /// Route path key
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Declaration of one controller type
pub struct ControllerDef<C> {
    base_path: String,
    props: Vec<PropBinding>,
    routes: Vec<(RouteDef, String, RouteMethod)>,
    _marker: PhantomData<fn() -> C>,
}

impl<C: Send + Sync + 'static> ControllerDef<C> {
    /// Controller mounted at `base_path`
    pub fn new(base_path: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            props: Vec::new(),
            routes: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Inject a property into every request scope
    #[must_use]
    pub fn prop(mut self, name: &str, kind: PropKind, key: &str) -> Self {
        self.props.push(PropBinding {
            name: name.to_string(),
            kind,
            key: key.to_string(),
        });
        self
    }

    /// Declare a route served by `handler`
    #[must_use]
    pub fn route<F, Fut>(mut self, def: RouteDef, handler_key: &str, handler: F) -> Self
    where
        F: Fn(ControllerScope<C>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply>> + Send + 'static,
    {
        let method: RouteMethod = Arc::new(
            move |instance: Instance, props: PropValues, args: Args| -> BoxFuture<Result<Reply>> {
                let Ok(instance) = instance.downcast::<C>() else {
                    let type_name = std::any::type_name::<C>();
                    return Box::pin(async move {
                        Err(Error::Resolution {
                            type_name: type_name.to_string(),
                            reason: "controller instance has a different type".to_string(),
                        })
                    });
                };
                Box::pin(handler(ControllerScope::new(instance, props), args))
            },
        );
        self.routes.push((def, handler_key.to_string(), method));
        self
    }

    /// Controller type key
    #[must_use]
    pub fn key(&self) -> TypeKey {
        TypeKey::of::<C>()
    }

    /// Write the declarations to `registry` and the handlers to `handlers`
    ///
    /// Routes declared earlier for the same type are kept; a repeated path
    /// key replaces the earlier route in place.
    pub fn register(self, registry: &mut MetadataRegistry, handlers: &mut HandlerTable) {
        let owner = TypeKey::of::<C>();
        let subject = SubjectKey::of_type(owner);

        registry.define(
            subject.clone(),
            MetadataKind::ControllerPath,
            MetadataValue::ControllerPath(self.base_path),
        );

        let mut props = registry.props(owner).to_vec();
        props.extend(self.props);
        registry.define(
            subject.clone(),
            MetadataKind::PropBindings,
            MetadataValue::Props(props),
        );

        let mut table = registry.routes(owner).cloned().unwrap_or_default();
        let mut declared = RouteTable::new();
        for (def, handler_key, method) in self.routes {
            declared.insert(def.path, RouteEntry::new(&def.methods, handler_key.clone()));
            registry.define(
                SubjectKey::of_member(owner, handler_key.clone()),
                MetadataKind::ParamBindings,
                MetadataValue::Params(def.params),
            );
            registry.define(
                SubjectKey::of_member(owner, handler_key.clone()),
                MetadataKind::RequiredParams,
                MetadataValue::Required(def.required),
            );
            handlers.insert(owner, handler_key, method);
        }
        table.merge(declared);
        registry.define(subject, MetadataKind::Routes, MetadataValue::Routes(table));
    }
}

/// Handler functions by (controller, handler key)
#[derive(Default, Clone)]
pub struct HandlerTable {
    methods: HashMap<(TypeKey, String), RouteMethod>,
}

impl HandlerTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a handler, replacing an earlier one with the same key
    pub fn insert(&mut self, owner: TypeKey, handler_key: String, method: RouteMethod) {
        self.methods.insert((owner, handler_key), method);
    }

    /// Handler for `(owner, handler_key)`
    #[must_use]
    pub fn get(&self, owner: TypeKey, handler_key: &str) -> Option<&RouteMethod> {
        self.methods.get(&(owner, handler_key.to_string()))
    }

    /// Number of handlers
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("handlers", &self.methods.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Users {
        greeting: String,
    }

    fn users_def() -> ControllerDef<Users> {
        ControllerDef::<Users>::new("/users")
            .prop("store", PropKind::Table, "users")
            .route(
                RouteDef::post("/create").field("name").required("name"),
                "create",
                |scope: ControllerScope<Users>, args: Args| async move {
                    let name = args.str(0).unwrap_or_default().to_string();
                    Ok(Reply::value(format!("{} {name}", scope.greeting)))
                },
            )
            .route(RouteDef::get("/list"), "list", |_, _| async {
                Ok(Reply::value(json!([])))
            })
    }

    #[test]
    fn test_register_defines_metadata() {
        let mut registry = MetadataRegistry::new();
        let mut handlers = HandlerTable::new();
        users_def().register(&mut registry, &mut handlers);

        let users = TypeKey::of::<Users>();
        assert_eq!(registry.controller_path(users), Some("/users"));
        assert_eq!(registry.routes(users).map(RouteTable::len), Some(2));
        assert_eq!(registry.required(users, "create"), ["name".to_string()]);
        assert_eq!(registry.params(users, "create")[0].kind, ParamKind::Field);
        assert_eq!(registry.props(users)[0].name, "store");
        assert_eq!(handlers.len(), 2);
    }

    #[test]
    fn test_route_tables_merge_across_registrations() {
        let mut registry = MetadataRegistry::new();
        let mut handlers = HandlerTable::new();
        users_def().register(&mut registry, &mut handlers);
        ControllerDef::<Users>::new("/users")
            .route(
                RouteDef::new("/list", &[Method::Get, Method::Post]),
                "list2",
                |_, _| async { Ok(Reply::value(1)) },
            )
            .route(RouteDef::get("/extra"), "extra", |_, _| async {
                Ok(Reply::value(2))
            })
            .register(&mut registry, &mut handlers);

        let table = registry.routes(TypeKey::of::<Users>()).unwrap();
        let keys: Vec<_> = table.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["/create", "/list", "/extra"]);
        assert_eq!(table.get("/list").unwrap().handler_key, "list2");
    }

    #[test]
    fn test_positional_helpers_count_up() {
        let def = RouteDef::get("/x")
            .query("a")
            .fields()
            .param_at(7, ParamKind::Query, "z");
        let indexes: Vec<_> = def.params.iter().map(|p| p.index).collect();
        assert_eq!(indexes, vec![0, 1, 7]);
    }

    #[test]
    fn test_positional_helpers_follow_explicit_index() {
        let def = RouteDef::get("/x")
            .param_at(1, ParamKind::Query, "b")
            .query("c");
        let indexes: Vec<_> = def.params.iter().map(|p| p.index).collect();
        assert_eq!(indexes, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_handler_receives_scope_and_args() {
        let mut registry = MetadataRegistry::new();
        let mut handlers = HandlerTable::new();
        users_def().register(&mut registry, &mut handlers);

        let method = handlers
            .get(TypeKey::of::<Users>(), "create")
            .unwrap()
            .clone();
        let instance: Instance = Arc::new(Users {
            greeting: "hello".to_string(),
        });
        let reply = method(
            instance,
            PropValues::new(),
            Args::new(vec![Injected::from(json!("amy"))]),
        )
        .await
        .unwrap();
        assert_eq!(reply, Reply::value("hello amy"));
    }

    #[tokio::test]
    async fn test_wrong_instance_type_is_resolution_error() {
        let mut handlers = HandlerTable::new();
        users_def().register(&mut MetadataRegistry::new(), &mut handlers);
        let method = handlers.get(TypeKey::of::<Users>(), "list").unwrap();

        let wrong: Instance = Arc::new(5_u8);
        let err = method(wrong, PropValues::new(), Args::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
    }

    #[test]
    fn test_scope_reads_props() {
        let mut props = PropValues::new();
        props.insert("title".to_string(), Injected::from(json!("x")));
        let scope = ControllerScope::new(
            Arc::new(Users {
                greeting: "hi".to_string(),
            }),
            props,
        );
        assert_eq!(scope.greeting, "hi");
        assert_eq!(scope.prop("title").and_then(Injected::as_str), Some("x"));
        assert!(scope.table("title").is_none());
    }
}

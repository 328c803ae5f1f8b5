//! # Injection Resolver
//!
//! Turns parameter and property bindings into runtime values.
//!
//! Built-in kinds read from the parsed [`Request`] or the configured
//! [`Database`]; any other kind is offered to an ordered chain of custom
//! resolvers where the first answer wins. Parameter and property chains are
//! separate. After parameters are resolved the handler's required names are
//! checked; property values never take part in that check.

use crate::database::{Database, Table};
use crate::error::{Error, Result};
use crate::metadata::{ParamBinding, ParamKind, PropBinding, PropKind};
use crate::request::{Request, UploadedFile};
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// One resolved parameter or property value
#[derive(Clone, Default)]
pub enum Injected {
    /// The source had no entry for the key
    #[default]
    Missing,
    /// Explicit null (no database, no resolver answered)
    Null,
    /// Query entry, body field or mapped object
    Json(Value),
    /// One uploaded file
    File(UploadedFile),
    /// All uploaded files by field name
    Files(BTreeMap<String, UploadedFile>),
    /// Table-scoped database accessor
    Table(Table),
    /// Whole database handle
    Database(Database),
    /// Value produced by a custom resolver
    Custom(Arc<dyn Any + Send + Sync>),
}

impl Injected {
    /// Wrap a custom value
    pub fn custom<T: Send + Sync + 'static>(value: T) -> Self {
        Self::Custom(Arc::new(value))
    }

    /// Whether the value is absent
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Missing, null or an empty string
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Missing | Self::Null | Self::Json(Value::Null) => true,
            Self::Json(Value::String(s)) => s.is_empty(),
            _ => false,
        }
    }

    /// JSON value, if any
    #[must_use]
    pub const fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// String value, if any
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(Value::as_str)
    }

    /// Uploaded file, if any
    #[must_use]
    pub const fn as_file(&self) -> Option<&UploadedFile> {
        match self {
            Self::File(file) => Some(file),
            _ => None,
        }
    }

    /// Table accessor, if any
    #[must_use]
    pub const fn as_table(&self) -> Option<&Table> {
        match self {
            Self::Table(table) => Some(table),
            _ => None,
        }
    }

    /// Database handle, if any
    #[must_use]
    pub const fn as_database(&self) -> Option<&Database> {
        match self {
            Self::Database(db) => Some(db),
            _ => None,
        }
    }

    /// Custom value of type `T`, if any
    #[must_use]
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        match self {
            Self::Custom(value) => value.clone().downcast::<T>().ok(),
            _ => None,
        }
    }

    fn answered(&self) -> bool {
        !matches!(self, Self::Missing | Self::Null | Self::Json(Value::Null))
    }
}

impl fmt::Debug for Injected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("Missing"),
            Self::Null => f.write_str("Null"),
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::File(file) => f.debug_tuple("File").field(&file.filename).finish(),
            Self::Files(files) => f.debug_tuple("Files").field(&files.keys()).finish(),
            Self::Table(table) => f.debug_tuple("Table").field(&table.name()).finish(),
            Self::Database(db) => f.debug_tuple("Database").field(&db.backend()).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl From<Value> for Injected {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// Positional handler arguments
#[derive(Debug, Clone, Default)]
pub struct Args(Vec<Injected>);

static MISSING: Injected = Injected::Missing;

impl Args {
    /// Wrap resolved values
    #[must_use]
    pub const fn new(values: Vec<Injected>) -> Self {
        Self(values)
    }

    /// Argument `index`; out of range reads as missing
    #[must_use]
    pub fn get(&self, index: usize) -> &Injected {
        self.0.get(index).unwrap_or(&MISSING)
    }

    /// Argument `index` as a string
    #[must_use]
    pub fn str(&self, index: usize) -> Option<&str> {
        self.get(index).as_str()
    }

    /// Argument `index` as JSON
    #[must_use]
    pub fn json(&self, index: usize) -> Option<&Value> {
        self.get(index).as_json()
    }

    /// Argument `index` as a JSON object
    #[must_use]
    pub fn object(&self, index: usize) -> Option<&Map<String, Value>> {
        self.json(index).and_then(Value::as_object)
    }

    /// Argument `index` as a table accessor
    #[must_use]
    pub fn table(&self, index: usize) -> Option<&Table> {
        self.get(index).as_table()
    }

    /// Argument `index` as an uploaded file
    #[must_use]
    pub fn file(&self, index: usize) -> Option<&UploadedFile> {
        self.get(index).as_file()
    }

    /// Number of arguments
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no arguments
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in positional order
    pub fn iter(&self) -> impl Iterator<Item = &Injected> {
        self.0.iter()
    }
}

/// Injected property values by property name
pub type PropValues = HashMap<String, Injected>;

/// What a custom resolver is asked for
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    /// Current request
    pub request: &'a Request,
    /// Binding kind name
    pub kind: &'a str,
    /// Binding key
    pub key: &'a str,
}

/// Fallback resolver for custom kinds; `None` passes to the next one
pub type CustomResolver = Arc<dyn Fn(&ResolveContext<'_>) -> Option<Injected> + Send + Sync>;

/// Produces handler arguments and controller properties for a request
#[derive(Clone, Default)]
pub struct InjectionResolver {
    database: Option<Database>,
    param_resolvers: Vec<CustomResolver>,
    prop_resolvers: Vec<CustomResolver>,
}

impl InjectionResolver {
    /// Resolver backed by an optional database
    #[must_use]
    pub fn new(database: Option<Database>) -> Self {
        Self {
            database,
            param_resolvers: Vec::new(),
            prop_resolvers: Vec::new(),
        }
    }

    /// Append a custom parameter resolver
    pub fn add_param_resolver(&mut self, resolver: CustomResolver) {
        self.param_resolvers.push(resolver);
    }

    /// Append a custom property resolver
    pub fn add_prop_resolver(&mut self, resolver: CustomResolver) {
        self.prop_resolvers.push(resolver);
    }

    /// Configured database, if any
    #[must_use]
    pub const fn database(&self) -> Option<&Database> {
        self.database.as_ref()
    }

    /// Resolve the parameters of a handler and enforce its required names
    ///
    /// Argument `i` holds the value of the binding declared at index `i`;
    /// positions without a binding read as missing. When two bindings share
    /// an index the later declaration wins.
    ///
    /// # Errors
    ///
    /// `Error::MissingRequiredParameter` for the first required name whose
    /// value is missing, null or an empty string.
    pub fn resolve_params(
        &self,
        request: &Request,
        bindings: &[ParamBinding],
        required: &[String],
    ) -> Result<Args> {
        let slots = bindings.iter().map(|b| b.index + 1).max().unwrap_or(0);
        let mut values = vec![Injected::Missing; slots];
        let mut owners: Vec<Option<&ParamBinding>> = vec![None; slots];
        for binding in bindings {
            values[binding.index] = self.resolve_param(request, binding);
            owners[binding.index] = Some(binding);
        }

        for key in required {
            let bound = owners
                .iter()
                .position(|owner| owner.is_some_and(|binding| &binding.key == key));
            let blank = match bound {
                Some(slot) => values[slot].is_blank(),
                None => fallback_value(request, key).is_blank(),
            };
            if blank {
                return Err(Error::MissingRequiredParameter { key: key.clone() });
            }
        }

        Ok(Args::new(values))
    }

    /// Resolve the property bindings of a controller
    #[must_use]
    pub fn resolve_props(&self, request: &Request, bindings: &[PropBinding]) -> PropValues {
        bindings
            .iter()
            .map(|binding| {
                let value = match &binding.kind {
                    PropKind::Table => self.table(&binding.key),
                    PropKind::Database => self.whole_database(),
                    PropKind::Custom(kind) => {
                        ask_chain(&self.prop_resolvers, request, kind, &binding.key)
                    }
                };
                (binding.name.clone(), value)
            })
            .collect()
    }

    fn resolve_param(&self, request: &Request, binding: &ParamBinding) -> Injected {
        let key = binding.key.as_str();
        match &binding.kind {
            ParamKind::Query => request.query(key).map_or(Injected::Missing, |v| {
                Injected::Json(Value::String(v.to_string()))
            }),
            ParamKind::Field => request
                .field(key)
                .map_or(Injected::Missing, |v| Injected::Json(v.clone())),
            ParamKind::File => request
                .file(key)
                .map_or(Injected::Missing, |f| Injected::File(f.clone())),
            ParamKind::Files => Injected::Files(
                request
                    .files()
                    .iter()
                    .map(|f| (f.field_name.clone(), f.clone()))
                    .collect(),
            ),
            ParamKind::Fields => Injected::Json(Value::Object(request.fields().clone())),
            ParamKind::QueryMap => Injected::Json(Value::Object(
                request
                    .query_map()
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            )),
            ParamKind::Table => self.table(key),
            ParamKind::Database => self.whole_database(),
            ParamKind::Custom(kind) => ask_chain(&self.param_resolvers, request, kind, key),
        }
    }

    fn table(&self, name: &str) -> Injected {
        self.database
            .as_ref()
            .map_or(Injected::Null, |db| Injected::Table(db.table(name)))
    }

    fn whole_database(&self) -> Injected {
        self.database
            .as_ref()
            .map_or(Injected::Null, |db| Injected::Database(db.clone()))
    }
}

impl fmt::Debug for InjectionResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectionResolver")
            .field("database", &self.database.as_ref().map(Database::backend))
            .field("param_resolvers", &self.param_resolvers.len())
            .field("prop_resolvers", &self.prop_resolvers.len())
            .finish()
    }
}

/// First resolver answer with a non-null value, else null
fn ask_chain(chain: &[CustomResolver], request: &Request, kind: &str, key: &str) -> Injected {
    let ctx = ResolveContext { request, kind, key };
    chain
        .iter()
        .find_map(|resolver| resolver(&ctx).filter(Injected::answered))
        .unwrap_or(Injected::Null)
}

/// Required names without a binding: body fields, then the query
fn fallback_value(request: &Request, key: &str) -> Injected {
    if let Some(value) = request.field(key) {
        return Injected::Json(value.clone());
    }
    request.query(key).map_or(Injected::Missing, |v| {
        Injected::Json(Value::String(v.to_string()))
    })
}

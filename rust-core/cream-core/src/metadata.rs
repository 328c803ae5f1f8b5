//! # Metadata Registry
//!
//! Side-table of declaration metadata, keyed by declaration site and kind.
//!
//! Controllers, routes, bindings and constructor dependencies are declared
//! through explicit registration calls at startup (see
//! [`crate::controller::ControllerDef`] and [`crate::container::Injectable`]).
//! Each call ends up as a [`MetadataRegistry::define`]. Nothing is validated
//! here; consumers validate when they read.

use crate::route::RouteTable;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of a registered type
///
/// Equality and hashing use the `TypeId` only; the name is kept for
/// diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// Key for `T`
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The underlying `TypeId`
    #[must_use]
    pub const fn id(&self) -> TypeId {
        self.id
    }

    /// Full type name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Declaration site: a type, optionally narrowed to one of its members
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubjectKey {
    owner: TypeKey,
    member: Option<String>,
}

impl SubjectKey {
    /// The type itself
    #[must_use]
    pub const fn of_type(owner: TypeKey) -> Self {
        Self {
            owner,
            member: None,
        }
    }

    /// A member (handler) of the type
    pub fn of_member(owner: TypeKey, member: impl Into<String>) -> Self {
        Self {
            owner,
            member: Some(member.into()),
        }
    }

    /// Owning type
    #[must_use]
    pub const fn owner(&self) -> TypeKey {
        self.owner
    }

    /// Member name, if any
    #[must_use]
    pub fn member(&self) -> Option<&str> {
        self.member.as_deref()
    }
}

/// What a metadata value describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataKind {
    /// Controller base path
    ControllerPath,
    /// Route table of a controller
    Routes,
    /// Parameter bindings of a handler
    ParamBindings,
    /// Property bindings of a controller
    PropBindings,
    /// Required parameter names of a handler
    RequiredParams,
    /// Constructor dependency list of a type
    Dependencies,
}

/// Source of a parameter value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKind {
    /// One query-string entry
    Query,
    /// One body field
    Field,
    /// One uploaded file
    File,
    /// All body fields as an object
    Fields,
    /// All query entries as an object
    QueryMap,
    /// All uploaded files
    Files,
    /// Table-scoped database accessor
    Table,
    /// Whole database handle
    Database,
    /// Delegated to the custom resolver chain
    Custom(String),
}

impl ParamKind {
    /// Kind name handed to custom resolvers and used in logs
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Query => "query",
            Self::Field => "field",
            Self::File => "file",
            Self::Fields => "fields",
            Self::QueryMap => "queryMap",
            Self::Files => "files",
            Self::Table => "table",
            Self::Database => "database",
            Self::Custom(name) => name,
        }
    }
}

/// Rule producing one positional argument of a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamBinding {
    /// Argument position
    pub index: usize,
    /// Value source
    pub kind: ParamKind,
    /// Lookup key (field name, table name, custom key)
    pub key: String,
}

/// Source of a property value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropKind {
    /// Table-scoped database accessor
    Table,
    /// Whole database handle
    Database,
    /// Delegated to the custom property resolver chain
    Custom(String),
}

impl PropKind {
    /// Kind name handed to custom resolvers and used in logs
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Table => "table",
            Self::Database => "database",
            Self::Custom(name) => name,
        }
    }
}

/// Rule producing one injected property of a controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropBinding {
    /// Property name the handler reads
    pub name: String,
    /// Value source
    pub kind: PropKind,
    /// Lookup key (table name, custom key)
    pub key: String,
}

/// A metadata value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    /// Controller base path
    ControllerPath(String),
    /// Route table
    Routes(RouteTable),
    /// Parameter bindings, in declaration order
    Params(Vec<ParamBinding>),
    /// Property bindings, in declaration order
    Props(Vec<PropBinding>),
    /// Required parameter names
    Required(Vec<String>),
    /// Constructor dependencies, in constructor order
    Dependencies(Vec<TypeKey>),
}

/// Declaration metadata keyed by (subject, kind)
///
/// Written during startup only; shared read-only afterwards.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    entries: HashMap<(SubjectKey, MetadataKind), MetadataValue>,
}

impl MetadataRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` for `(subject, kind)`, replacing any earlier value
    pub fn define(&mut self, subject: SubjectKey, kind: MetadataKind, value: MetadataValue) {
        self.entries.insert((subject, kind), value);
    }

    /// Read the value for `(subject, kind)`
    #[must_use]
    pub fn get(&self, subject: &SubjectKey, kind: MetadataKind) -> Option<&MetadataValue> {
        // Keys are owned tuples; clone the subject for the probe.
        self.entries.get(&(subject.clone(), kind))
    }

    /// Base path declared for a controller type
    #[must_use]
    pub fn controller_path(&self, owner: TypeKey) -> Option<&str> {
        match self.get(&SubjectKey::of_type(owner), MetadataKind::ControllerPath) {
            Some(MetadataValue::ControllerPath(path)) => Some(path),
            _ => None,
        }
    }

    /// Route table declared for a controller type
    #[must_use]
    pub fn routes(&self, owner: TypeKey) -> Option<&RouteTable> {
        match self.get(&SubjectKey::of_type(owner), MetadataKind::Routes) {
            Some(MetadataValue::Routes(table)) => Some(table),
            _ => None,
        }
    }

    /// Parameter bindings of a handler (empty when undeclared)
    #[must_use]
    pub fn params(&self, owner: TypeKey, handler: &str) -> &[ParamBinding] {
        match self.get(
            &SubjectKey::of_member(owner, handler),
            MetadataKind::ParamBindings,
        ) {
            Some(MetadataValue::Params(params)) => params,
            _ => &[],
        }
    }

    /// Property bindings of a controller (empty when undeclared)
    #[must_use]
    pub fn props(&self, owner: TypeKey) -> &[PropBinding] {
        match self.get(&SubjectKey::of_type(owner), MetadataKind::PropBindings) {
            Some(MetadataValue::Props(props)) => props,
            _ => &[],
        }
    }

    /// Required parameter names of a handler (empty when undeclared)
    #[must_use]
    pub fn required(&self, owner: TypeKey, handler: &str) -> &[String] {
        match self.get(
            &SubjectKey::of_member(owner, handler),
            MetadataKind::RequiredParams,
        ) {
            Some(MetadataValue::Required(names)) => names,
            _ => &[],
        }
    }

    /// Constructor dependencies of a type, `None` when never declared
    #[must_use]
    pub fn dependencies(&self, owner: TypeKey) -> Option<&[TypeKey]> {
        match self.get(&SubjectKey::of_type(owner), MetadataKind::Dependencies) {
            Some(MetadataValue::Dependencies(deps)) => Some(deps),
            _ => None,
        }
    }

    /// Number of stored entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been defined
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

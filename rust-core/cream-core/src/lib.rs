//! # Cream Core
//!
//! Core runtime library for the Cream micro web framework.
//! Controllers declare routes and injection bindings as metadata; the
//! runtime resolves requests against that metadata and answers with a
//! uniform JSON envelope.
//!
//! ## Architecture
//!
//! Startup is a builder phase ([`App`]) that fills a [`MetadataRegistry`],
//! constructs every singleton in the [`Container`] and mounts controllers
//! in the [`Router`]. The result is an immutable [`Dispatcher`] that the
//! [`Server`] shares across connections.
//!
//! ## Modules
//!
//! - `metadata` - Typed declaration store keyed by (type, member, kind)
//! - `container` - Singleton dependency container with cycle detection
//! - `controller` - Controller and route declarations
//! - `route` - Route table entries and HTTP verbs
//! - `router` - Controller-prefix router with literal and pattern keys
//! - `injection` - Parameter and property resolution from requests
//! - `dispatcher` - Request lifecycle state machine
//! - `plugin` - Before/after request interception
//! - `query` - Condition-list to SQL compiler
//! - `database` - SQLx pools (SQLite, PostgreSQL) and table operations
//! - `request` - HTTP request with query, body and upload parsing
//! - `response` - Results, envelopes and HTTP responses
//! - `json` - JSON parsing with simd-json
//! - `config` - `config.json` loading
//! - `server` - HTTP server built on Hyper
//! - `app` - Application builder
//! - `error` - Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod app;
pub mod config;
pub mod container;
pub mod controller;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod injection;
pub mod json;
pub mod metadata;
pub mod plugin;
pub mod query;
pub mod request;
pub mod response;
pub mod route;
pub mod router;
pub mod server;

pub use app::App;
pub use config::{AppConfig, DatabaseConfig};
pub use container::{Container, ContainerBuilder, Dependencies, Injectable};
pub use controller::{ControllerDef, ControllerScope, HandlerTable, RouteDef};
pub use database::{Ack, Database, DbValue, QueryOutput, Table};
pub use dispatcher::{DispatchSettings, Dispatcher, Stage};
pub use error::{Error, Result};
pub use injection::{
    Args, CustomResolver, Injected, InjectionResolver, PropValues, ResolveContext,
};
pub use json::{parse_json, to_json_vec};
pub use metadata::{MetadataRegistry, ParamKind, PropKind, TypeKey};
pub use plugin::{BearerAuthPlugin, Plugin, PluginChain, PluginOutcome, RequestIdPlugin};
pub use query::{Condition, QueryCompiler, Statement};
pub use request::{Request, UploadedFile};
pub use response::{Envelope, Reply, Response};
pub use route::Method;
pub use router::Router;
pub use server::{Server, ServerConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

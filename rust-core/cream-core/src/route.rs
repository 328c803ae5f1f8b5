//! # Route Metadata
//!
//! Route entries and the per-controller route table.
//!
//! A route table maps path keys to [`RouteEntry`] values. Keys keep their
//! registration position: the router scans regex keys in that order.

use std::collections::HashMap;
use std::fmt;

/// HTTP methods understood by the route tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// HTTP GET
    Get,
    /// HTTP POST
    Post,
    /// HTTP PUT
    Put,
    /// HTTP DELETE
    Delete,
    /// HTTP PATCH
    Patch,
    /// HTTP HEAD
    Head,
    /// HTTP OPTIONS
    Options,
}

impl Method {
    /// Map a hyper method; unknown extension methods are `None`
    #[must_use]
    pub fn from_hyper(method: &hyper::Method) -> Option<Self> {
        match *method {
            hyper::Method::GET => Some(Self::Get),
            hyper::Method::POST => Some(Self::Post),
            hyper::Method::PUT => Some(Self::Put),
            hyper::Method::DELETE => Some(Self::Delete),
            hyper::Method::PATCH => Some(Self::Patch),
            hyper::Method::HEAD => Some(Self::Head),
            hyper::Method::OPTIONS => Some(Self::Options),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
            Self::Patch => write!(f, "PATCH"),
            Self::Head => write!(f, "HEAD"),
            Self::Options => write!(f, "OPTIONS"),
        }
    }
}

/// One declared route: the verbs it accepts and the handler it runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    /// Accepted methods
    pub methods: Vec<Method>,
    /// Name of the handler within the owning controller
    pub handler_key: String,
}

impl RouteEntry {
    /// Create an entry
    pub fn new(methods: &[Method], handler_key: impl Into<String>) -> Self {
        Self {
            methods: methods.to_vec(),
            handler_key: handler_key.into(),
        }
    }

    /// Whether the entry accepts `method`
    #[must_use]
    pub fn accepts(&self, method: Method) -> bool {
        self.methods.contains(&method)
    }
}

/// Path key → route entry, in registration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTable {
    entries: Vec<(String, RouteEntry)>,
    index: HashMap<String, usize>,
}

impl RouteTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a route; an existing key is replaced in place
    pub fn insert(&mut self, key: impl Into<String>, entry: RouteEntry) {
        let key = key.into();
        if let Some(&slot) = self.index.get(&key) {
            self.entries[slot].1 = entry;
        } else {
            self.index.insert(key.clone(), self.entries.len());
            self.entries.push((key, entry));
        }
    }

    /// Merge another table into this one, later entries winning
    pub fn merge(&mut self, other: Self) {
        for (key, entry) in other.entries {
            self.insert(key, entry);
        }
    }

    /// Exact key lookup
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&RouteEntry> {
        self.index.get(key).map(|&slot| &self.entries[slot].1)
    }

    /// Exact key lookup returning the stored key
    #[must_use]
    pub fn get_key_value(&self, key: &str) -> Option<(&str, &RouteEntry)> {
        self.index
            .get(key)
            .map(|&slot| (self.entries[slot].0.as_str(), &self.entries[slot].1))
    }

    /// Iterate in registration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RouteEntry)> {
        self.entries.iter().map(|(k, e)| (k.as_str(), e))
    }

    /// Number of routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

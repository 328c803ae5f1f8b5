//! # Error Handling
//!
//! Centralized error types for Cream core.
//! Uses `thiserror` for ergonomic error definitions.
//!
//! Every variant knows how it is rendered in the failure envelope:
//! [`Error::code`] is the numeric code (if the error carries one) and
//! [`Error::public_message`] is the text exposed to clients.

use thiserror::Error;

/// Result type alias for Cream operations
pub type Result<T> = std::result::Result<T, Error>;

/// Code used in the failure envelope when an error carries none.
pub const DEFAULT_FAILURE_CODE: u16 = 404;

/// Message used in the failure envelope when an error carries none.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Request Error";

/// Core error types for the Cream runtime
#[derive(Error, Debug)]
pub enum Error {
    /// Server failed to bind to the specified address
    #[error("Failed to bind server to {address}: {source}")]
    BindError {
        /// The address we tried to bind to
        address: String,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// No controller prefix or no route key matched the path
    #[error("No route found for path: {path}")]
    RouteNotFound {
        /// The path that wasn't matched
        path: String,
    },

    /// The route exists but does not accept the request method
    #[error("Method {method} not allowed for path: {path}")]
    MethodNotAllowed {
        /// The matched path
        path: String,
        /// The rejected HTTP method
        method: String,
        /// Envelope code reported for the rejection
        code: u16,
    },

    /// A required parameter resolved to nothing
    #[error("Require param: {key}")]
    MissingRequiredParameter {
        /// The missing key
        key: String,
    },

    /// The container could not construct a type
    #[error("Cannot resolve dependency {type_name}: {reason}")]
    Resolution {
        /// Name of the type that failed
        type_name: String,
        /// Why it failed
        reason: String,
    },

    /// The declared constructor dependencies form a cycle
    #[error("Circular dependency detected: {cycle}")]
    CycleDetected {
        /// The cycle, rendered as `A -> B -> A`
        cycle: String,
    },

    /// A soft delete without any condition was refused
    #[error("Unsafe delete on table {table}: no conditions given")]
    UnsafeDelete {
        /// Target table
        table: String,
    },

    /// An insert or update without any column was refused
    #[error("Empty entity for table {table}")]
    EmptyEntity {
        /// Target table
        table: String,
    },

    /// A database statement failed
    #[error("SQL Error while executing statement: {statement}\nargs:{args}\n{message}")]
    Statement {
        /// The statement text
        statement: String,
        /// Bound arguments, comma separated
        args: String,
        /// Driver error message
        message: String,
    },

    /// Database connection or pool error
    #[error("Database error: {message}")]
    Database {
        /// Error message from database
        message: String,
    },

    /// An error raised by application code with an explicit code
    #[error("{message} ({code})")]
    Request {
        /// Envelope code
        code: u16,
        /// Envelope message
        message: String,
    },

    /// Authentication failed
    #[error("Unauthorized: {reason}")]
    Unauthorized {
        /// Why the credentials were rejected
        reason: String,
    },

    /// Configuration could not be loaded
    #[error("Invalid configuration {path}: {reason}")]
    Config {
        /// Path of the configuration file
        path: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Request payload too large
    #[error("Payload too large: limit={limit} bytes, received={actual} bytes")]
    PayloadTooLarge {
        /// Max allowed size
        limit: usize,
        /// Actual size
        actual: usize,
    },

    /// Malformed request body
    #[error("Malformed body: {reason}")]
    Body {
        /// Parser message
        reason: String,
    },

    /// HTTP protocol error
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for an application error with its own code
    pub fn request(code: u16, message: impl Into<String>) -> Self {
        Self::Request {
            code,
            message: message.into(),
        }
    }

    /// Numeric envelope code carried by this error, if any
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::RouteNotFound { .. } => Some(404),
            Self::MethodNotAllowed { code, .. } | Self::Request { code, .. } => Some(*code),
            Self::MissingRequiredParameter { .. } => Some(400),
            Self::Unauthorized { .. } => Some(401),
            Self::PayloadTooLarge { .. } => Some(413),
            Self::Resolution { .. } | Self::CycleDetected { .. } => Some(500),
            _ => None,
        }
    }

    /// Message exposed in the failure envelope
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::RouteNotFound { .. } => "Not Found".to_string(),
            Self::MethodNotAllowed { .. } => "Forbidden".to_string(),
            Self::MissingRequiredParameter { key } => format!("Require param: {key}"),
            Self::Request { message, .. } => message.clone(),
            Self::Unauthorized { .. } => "Unauthorized".to_string(),
            Self::PayloadTooLarge { .. } => "Payload Too Large".to_string(),
            Self::Resolution { .. } | Self::CycleDetected { .. } => {
                "Internal Server Error".to_string()
            }
            _ => DEFAULT_FAILURE_MESSAGE.to_string(),
        }
    }

    /// Envelope code with the default applied
    #[must_use]
    pub fn envelope_code(&self) -> u16 {
        self.code().unwrap_or(DEFAULT_FAILURE_CODE)
    }
}

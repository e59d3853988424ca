use std::error::Error;
use std::fmt;

use tabula::{StorageError, TabularError};
use tabula_lttb::LttbError;

/// Errors raised while sending a task to the remote compute service.
///
/// These never reach callers of [`TaskDispatcher::dispatch`](crate::TaskDispatcher::dispatch);
/// they are logged and the call yields no result.
#[derive(Debug)]
pub enum DispatchError {
    /// The request could not be sent or its response could not be read.
    TransportFailure(Box<dyn Error + Send + Sync>),
    /// The response did not have the shape expected for the task type.
    InvalidResponse(String),
    /// The task arguments could not be serialised, or the response was not JSON.
    Serialization(serde_json::Error),
}

impl DispatchError {
    pub fn transport<E>(err: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        DispatchError::TransportFailure(Box::new(err))
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::TransportFailure(e) => write!(f, "transport failure: {e}"),
            DispatchError::InvalidResponse(msg) => write!(f, "invalid response from server: {msg}"),
            DispatchError::Serialization(e) => write!(f, "serialization error: {e}"),
        }
    }
}

impl Error for DispatchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DispatchError::TransportFailure(e) => Some(e.as_ref()),
            DispatchError::Serialization(e) => Some(e),
            DispatchError::InvalidResponse(_) => None,
        }
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Serialization(err)
    }
}

/// Errors raised while producing downsampled data.
#[derive(Debug)]
pub enum DownsampleError {
    /// The task arguments are inconsistent.
    InvalidArgs(String),
    /// The source table could not be read or the output table could not be written.
    Tabular(TabularError),
    /// Decimation failed.
    Lttb(LttbError),
    /// A cache document could not be read or written.
    Cache(StorageError),
    /// A cache document is not valid JSON.
    Serialization(serde_json::Error),
    /// The resource catalog failed.
    Catalog(Box<dyn Error + Send + Sync>),
    /// The resource has no column without independent variables.
    NoIndependentColumn { resource_id: String },
}

impl DownsampleError {
    pub fn catalog<E>(err: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        DownsampleError::Catalog(Box::new(err))
    }
}

impl fmt::Display for DownsampleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownsampleError::InvalidArgs(msg) => write!(f, "invalid downsampling arguments: {msg}"),
            DownsampleError::Tabular(e) => write!(f, "{e}"),
            DownsampleError::Lttb(e) => write!(f, "{e}"),
            DownsampleError::Cache(e) => write!(f, "cache error: {e}"),
            DownsampleError::Serialization(e) => write!(f, "invalid cache document: {e}"),
            DownsampleError::Catalog(e) => write!(f, "resource catalog error: {e}"),
            DownsampleError::NoIndependentColumn { resource_id } => {
                write!(f, "resource {resource_id} has no independent column")
            }
        }
    }
}

impl Error for DownsampleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DownsampleError::Tabular(e) => Some(e),
            DownsampleError::Lttb(e) => Some(e),
            DownsampleError::Cache(e) => Some(e),
            DownsampleError::Serialization(e) => Some(e),
            DownsampleError::Catalog(e) => Some(e.as_ref()),
            DownsampleError::InvalidArgs(_) | DownsampleError::NoIndependentColumn { .. } => None,
        }
    }
}

impl From<TabularError> for DownsampleError {
    fn from(err: TabularError) -> Self {
        DownsampleError::Tabular(err)
    }
}

impl From<LttbError> for DownsampleError {
    fn from(err: LttbError) -> Self {
        DownsampleError::Lttb(err)
    }
}

impl From<StorageError> for DownsampleError {
    fn from(err: StorageError) -> Self {
        DownsampleError::Cache(err)
    }
}

impl From<serde_json::Error> for DownsampleError {
    fn from(err: serde_json::Error) -> Self {
        DownsampleError::Serialization(err)
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required environment variable is not set.
    MissingVariable(&'static str),
    /// A URL could not be parsed.
    InvalidUrl { value: String, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingVariable(name) => write!(f, "environment variable {name} is not set"),
            ConfigError::InvalidUrl { value, reason } => write!(f, "invalid URL '{value}': {reason}"),
        }
    }
}

impl Error for ConfigError {}

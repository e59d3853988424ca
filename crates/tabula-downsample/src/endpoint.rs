//! Request handling for the remote downsampling service.
//!
//! The handler is transport agnostic: it takes the decoded request parameters and returns a
//! status code with an optional JSON body.

use std::sync::Arc;

use log::{error, warn};
use serde_json::Value;
use tabula::{StorageEngine, StorageError};
use tabula_lttb::Point;

use crate::DownsamplingTaskArgs;
use crate::downsample::downsample;

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_INTERNAL_SERVER_ERROR: u16 = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct EndpointResponse {
    pub status: u16,
    /// One series per requested y column. Only set for successful requests.
    pub body: Option<Vec<Vec<Point>>>,
}

impl EndpointResponse {
    fn empty(status: u16) -> Self {
        Self { status, body: None }
    }

    pub fn content_type(&self) -> Option<&'static str> {
        self.body.as_ref().map(|_| "application/json")
    }

    /// Serialises the body, if any.
    pub fn body_json(&self) -> Option<String> {
        self.body.as_ref().and_then(|body| serde_json::to_string(body).ok())
    }
}

/// Handles a downsampling request.
///
/// Only the `input` and `threshold` parameters are considered; anything else the transport
/// added is ignored. Invalid parameters yield 400. `engine_for` receives the table's storage
/// prefix and returns the engine to read it from. Failures while reading or decimating yield
/// 500.
pub async fn handle_downsample_request<F>(params: &Value, engine_for: F) -> EndpointResponse
where
    F: FnOnce(&str) -> Result<Arc<dyn StorageEngine>, StorageError>,
{
    let params = serde_json::json!({
        "input": params.get("input"),
        "threshold": params.get("threshold"),
    });

    let args = match serde_json::from_value::<DownsamplingTaskArgs>(params) {
        Ok(args) if args.validate().is_ok() => args,
        _ => {
            warn!("Received invalid request parameters.");
            return EndpointResponse::empty(STATUS_BAD_REQUEST);
        }
    };

    let engine = match engine_for(&args.input.prefix) {
        Ok(engine) => engine,
        Err(e) => {
            error!("{e}");
            return EndpointResponse::empty(STATUS_INTERNAL_SERVER_ERROR);
        }
    };

    match downsample(engine.as_ref(), &args).await {
        Ok(series) => EndpointResponse {
            status: STATUS_OK,
            body: Some(series),
        },
        Err(e) => {
            error!("{e}");
            EndpointResponse::empty(STATUS_INTERNAL_SERVER_ERROR)
        }
    }
}

/// Returns an object storage engine for `prefix`, configured from the `S3_*` environment
/// variables.
#[cfg(feature = "s3")]
pub fn s3_engine(prefix: &str) -> Result<Arc<dyn StorageEngine>, StorageError> {
    let mut config = tabula::S3Config::from_env()?;
    config.prefix = Some(prefix.to_string());
    Ok(Arc::new(tabula::S3StorageEngine::new(config)))
}

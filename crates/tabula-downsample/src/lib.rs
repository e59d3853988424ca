//! # tabula-downsample
//!
//! Produces downsampled views of stored tables for charts.
//!
//! - [`downsample`] and [`downsample_to_table`] run a [`DownsamplingTaskArgs`] task in process:
//!   the table is streamed from a storage engine through the LTTB decimator, one series per
//!   dependent column.
//! - [`TaskDispatcher`] posts tasks to a remote compute service instead. Identical tasks are
//!   sent only once while in flight or completed; failures are logged and yield no result.
//! - [`handle_downsample_request`] is the request handler of that remote service.
//! - [`Downsampling`] ties it together for resources: it answers graph requests from its
//!   caches, or dispatches a task in the background and publishes a [`DownsampleReady`] event
//!   when the graph is stored.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tabula::FileSystemStorageEngine;
//! use tabula_downsample::{DownsamplingTaskArgs, downsample};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = FileSystemStorageEngine::new("/var/lib/tabula");
//! let args: DownsamplingTaskArgs = serde_json::from_str(
//!     r#"{
//!         "input": {
//!             "prefix": "lab",
//!             "path": "resources/abc.rtd",
//!             "numberRows": 100000,
//!             "numberColumns": 3,
//!             "columns": { "x": 0, "y": [1, 2] }
//!         },
//!         "threshold": 150
//!     }"#,
//! )?;
//!
//! let series = downsample(&engine, &args).await?;
//! assert_eq!(series.len(), 2);
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all, clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod args;
mod cache;
pub mod catalog;
mod config;
pub mod dispatcher;
mod downsample;
pub mod endpoint;
mod error;
pub mod history;
pub mod service;

pub use args::{DownsamplingTaskArgs, TaskColumns, TaskInput};
pub use cache::JsonCache;
pub use catalog::{ColumnDescription, ColumnType, Resource, ResourceCatalog};
pub use config::{BASE_URL_VARIABLE, RemoteServicesConfig};
pub use dispatcher::{
    DownsampleTask, ReqwestTransport, Task, TaskDispatcher, TaskTransport, TransportResponse, dispatch_key,
};
pub use downsample::{downsample, downsample_to_table};
pub use endpoint::{EndpointResponse, handle_downsample_request};
pub use error::{ConfigError, DispatchError, DownsampleError};
pub use history::{Clock, DispatchHistory, DispatchState, EvictionPolicy, SystemClock};
pub use service::{
    DownsampleReady, DownsampledColumn, DownsampledData, DownsampledXColumn, Downsampling, DownsamplingBuilder,
    DownsamplingOptions, GraphResult, MergeOptions,
};

//! Downsampled graphs of stored resources.
//!
//! [`Downsampling::request_graph`] answers from the caches when it can. Otherwise it starts a
//! background task that dispatches the decimation to the remote service, stores the result and
//! publishes a [`DownsampleReady`] event, and reports the graph as pending in the meantime.
//!
//! Results go through two caches keyed by `<resource>_<datapoints>_<key indicator mode>`:
//!
//! - the short-term cache is only consulted for key indicator graphs, which are requested in
//!   bulk for resource lists;
//! - the long-term cache holds every finished graph and permanent error.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::try_join_all;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use tabula::{StorageEngine, StorageError, TabularData, TabularError};
use tabula_lttb::Point;
use tokio::sync::broadcast;

use crate::args::{TaskColumns, TaskInput};
use crate::cache::JsonCache;
use crate::catalog::{ColumnType, Resource, ResourceCatalog};
use crate::dispatcher::{DownsampleTask, ReqwestTransport, TaskDispatcher, TaskTransport};
use crate::{DownsampleError, DownsamplingTaskArgs};

const DEFAULT_EVENT_CAPACITY: usize = 64;

const NO_ROWS_MESSAGE: &str =
    "This resource does not contain any rows. Therefore, it is not possible to display a chart.";
const NO_DEPENDENT_COLUMNS_MESSAGE: &str = "This resource does not contain any dependent columns (y-axis). \
     Therefore, it is not possible to display a chart.";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownsamplingOptions {
    pub resource_id: String,
    /// Number of points per series.
    pub datapoints: usize,
    /// Selects a single relevant column and keeps results in the short-term cache.
    #[serde(default)]
    pub key_indicator_mode: bool,
}

impl DownsamplingOptions {
    pub fn new(resource_id: impl Into<String>, datapoints: usize) -> Self {
        Self {
            resource_id: resource_id.into(),
            datapoints,
            key_indicator_mode: false,
        }
    }

    pub fn key_indicator(mut self) -> Self {
        self.key_indicator_mode = true;
        self
    }

    fn cache_key(&self) -> String {
        format!("{}_{}_{}", self.resource_id, self.datapoints, self.key_indicator_mode)
    }
}

/// Options of [`Downsampling::request_graph_merged`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOptions {
    pub resource_ids: Vec<String>,
    pub datapoints: usize,
    /// Shifts every datetime series so that it starts at 0.
    #[serde(default)]
    pub align_start: bool,
    /// Added to the x values of the datetime series with the same index.
    #[serde(default)]
    pub offsets: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownsampledXColumn {
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub label: String,
    pub unit: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownsampledColumn {
    pub device_id: Option<String>,
    pub resource_id: String,
    pub label: String,
    pub unit: String,
    /// `None` where a merged graph has no value for an x value.
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownsampledData {
    pub x: DownsampledXColumn,
    pub y: Vec<DownsampledColumn>,
}

/// Outcome of a graph request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphResult {
    Data(DownsampledData),
    /// Downsampling cannot succeed for this resource. Cached.
    PermanentError { message: String },
    /// Downsampling failed this time. Not cached.
    TemporaryError,
    /// Downsampling is running.
    #[serde(rename = "downsampling_pending")]
    Pending,
}

impl GraphResult {
    fn permanent(message: &str) -> Self {
        GraphResult::PermanentError {
            message: message.to_string(),
        }
    }

    /// True for results that are final and served from the caches.
    pub fn is_final(&self) -> bool {
        matches!(self, GraphResult::Data(_) | GraphResult::PermanentError { .. })
    }
}

/// Published when a graph has been stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownsampleReady {
    pub resource_id: String,
    pub datapoints: usize,
    pub single_column: bool,
}

/// Builder for [`Downsampling`].
pub struct DownsamplingBuilder<T = ReqwestTransport> {
    catalog: Arc<dyn ResourceCatalog>,
    data: Arc<dyn StorageEngine>,
    dispatcher: Arc<TaskDispatcher<T>>,
    long_term: JsonCache,
    short_term: Option<JsonCache>,
    repository: String,
    event_capacity: usize,
}

impl<T: TaskTransport> DownsamplingBuilder<T> {
    /// Name of the repository, sent to the remote service as the storage prefix of each table.
    pub fn repository(mut self, name: impl Into<String>) -> Self {
        self.repository = name.into();
        self
    }

    /// Enables the short-term cache for key indicator graphs.
    pub fn short_term_cache(mut self, engine: Arc<dyn StorageEngine>) -> Self {
        self.short_term = Some(JsonCache::new(engine));
        self
    }

    /// Number of events a slow subscriber may fall behind.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> Arc<Downsampling<T>> {
        let (events, _) = broadcast::channel(self.event_capacity);
        Arc::new(Downsampling {
            catalog: self.catalog,
            data: self.data,
            dispatcher: self.dispatcher,
            long_term: self.long_term,
            short_term: self.short_term,
            repository: self.repository,
            pending: Mutex::new(HashSet::new()),
            events,
        })
    }
}

/// Produces and caches downsampled graphs of resources.
pub struct Downsampling<T = ReqwestTransport> {
    catalog: Arc<dyn ResourceCatalog>,
    /// Storage of the resources' tables.
    data: Arc<dyn StorageEngine>,
    dispatcher: Arc<TaskDispatcher<T>>,
    long_term: JsonCache,
    short_term: Option<JsonCache>,
    repository: String,
    /// Cache keys of running tasks.
    pending: Mutex<HashSet<String>>,
    events: broadcast::Sender<DownsampleReady>,
}

impl<T: TaskTransport + 'static> Downsampling<T> {
    /// `data` holds the resources' tables, `long_term_cache` the finished graphs.
    pub fn builder(
        catalog: Arc<dyn ResourceCatalog>,
        data: Arc<dyn StorageEngine>,
        dispatcher: Arc<TaskDispatcher<T>>,
        long_term_cache: Arc<dyn StorageEngine>,
    ) -> DownsamplingBuilder<T> {
        DownsamplingBuilder {
            catalog,
            data,
            dispatcher,
            long_term: JsonCache::new(long_term_cache),
            short_term: None,
            repository: String::new(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Returns a receiver for [`DownsampleReady`] events.
    pub fn subscribe(&self) -> broadcast::Receiver<DownsampleReady> {
        self.events.subscribe()
    }

    /// Returns true while a task for `options` is running.
    ///
    /// Tasks that failed stay pending until the service is recreated, so that work that is
    /// bound to fail again is not repeated.
    pub fn is_pending(&self, options: &DownsamplingOptions) -> bool {
        self.lock_pending().contains(&options.cache_key())
    }

    /// Returns the cached graph for `options`, or starts downsampling and returns
    /// [`GraphResult::Pending`].
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn request_graph(
        self: &Arc<Self>,
        options: DownsamplingOptions,
    ) -> Result<GraphResult, DownsampleError> {
        if let Some(cached) = self.cached(&options).await? {
            debug!("Returning cached downsampled data for {}", options.resource_id);
            return Ok(cached);
        }

        let key = options.cache_key();
        if !self.lock_pending().insert(key.clone()) {
            info!("Downsampling already in progress for {}", options.resource_id);
            return Ok(GraphResult::Pending);
        }

        let service = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = service.create_task(&options, &key).await {
                error!(
                    "Downsampling failed: {e} resource_id={} datapoints={}",
                    options.resource_id, options.datapoints
                );
            }
        });
        Ok(GraphResult::Pending)
    }

    /// Requests the graphs of several resources and merges those with a datetime x axis into a
    /// single graph.
    ///
    /// The merged graph comes first, followed by the graphs with other x axes unchanged.
    /// Resources that are not downsampled yet are left out.
    pub async fn request_graph_merged(
        self: &Arc<Self>,
        options: &MergeOptions,
    ) -> Result<Vec<DownsampledData>, DownsampleError> {
        if options.resource_ids.is_empty() {
            return Ok(Vec::new());
        }

        let results = try_join_all(
            options
                .resource_ids
                .iter()
                .map(|id| self.request_graph(DownsamplingOptions::new(id.clone(), options.datapoints))),
        )
        .await?;

        let (mut dates, others): (Vec<_>, Vec<_>) = results
            .into_iter()
            .filter_map(|result| match result {
                GraphResult::Data(data) => Some(data),
                _ => None,
            })
            .partition(|data| data.x.column_type == ColumnType::Datetime);

        if dates.is_empty() {
            return Ok(others);
        }

        if options.align_start || !options.offsets.is_empty() {
            for (index, data) in dates.iter_mut().enumerate() {
                let alignment = if options.align_start {
                    data.x.values.first().copied().unwrap_or(0.0)
                } else {
                    0.0
                };
                let offset = options.offsets.get(index).copied().unwrap_or(0.0);
                for value in &mut data.x.values {
                    *value = *value - alignment + offset;
                }
            }
        }

        let mut merged = vec![merge_datetime_axes(&dates)];
        merged.extend(others);
        Ok(merged)
    }

    async fn cached(
        &self,
        options: &DownsamplingOptions,
    ) -> Result<Option<GraphResult>, DownsampleError> {
        let key = options.cache_key();
        let short_term = self.short_term.as_ref().filter(|_| options.key_indicator_mode);

        if let Some(cache) = short_term {
            let result = cache.get::<GraphResult>(&key).await?;
            if let Some(result) = result.filter(GraphResult::is_final) {
                return Ok(Some(result));
            }
        }

        match self.long_term.get::<GraphResult>(&key).await? {
            Some(result) if result.is_final() => {
                debug!("Downsampling cache: HIT key={key}");
                if let Some(cache) = short_term {
                    cache.set(&key, &result).await?;
                }
                Ok(Some(result))
            }
            _ => {
                debug!("Downsampling cache: MISS key={key}");
                Ok(None)
            }
        }
    }

    async fn create_task(
        &self,
        options: &DownsamplingOptions,
        key: &str,
    ) -> Result<GraphResult, DownsampleError> {
        let resource = self.catalog.resource(&options.resource_id).await?;
        let table =
            TabularData::open(Arc::clone(&self.data), resource.path.clone(), resource.columns.len()).await?;
        let number_rows = match table.num_rows()? {
            n if n < 0 => {
                return Err(TabularError::from(StorageError::FileNotFound(resource.path.clone())).into());
            }
            n => n as usize,
        };

        if number_rows == 0 {
            info!("No rows found for resource {}", options.resource_id);
            let result = GraphResult::permanent(NO_ROWS_MESSAGE);
            self.finish(options, key, &result).await?;
            return Ok(result);
        }

        let x = resource
            .independent_column()
            .ok_or_else(|| DownsampleError::NoIndependentColumn {
                resource_id: resource.id.clone(),
            })?;
        let y = if options.key_indicator_mode {
            vec![resource.key_indicator_column(x)]
        } else {
            resource.dependent_columns()
        };

        if y.is_empty() {
            info!("No y-axis columns found for resource {}", options.resource_id);
            let result = GraphResult::permanent(NO_DEPENDENT_COLUMNS_MESSAGE);
            self.finish(options, key, &result).await?;
            return Ok(result);
        }

        let args = DownsamplingTaskArgs {
            input: TaskInput {
                prefix: self.repository.clone(),
                path: resource.path.clone(),
                number_rows,
                number_columns: table.num_columns(),
                columns: TaskColumns { x, y: y.clone() },
            },
            threshold: options.datapoints,
        };

        let Some(series) = self.dispatcher.dispatch::<DownsampleTask>(&args).await else {
            return Ok(GraphResult::TemporaryError);
        };

        let result = GraphResult::Data(graph_data(&resource, options, x, &y, &series));
        info!("Downsampling task finished. Writing into cache key={key}");
        self.finish(options, key, &result).await?;
        Ok(result)
    }

    /// Stores a final result, notifies subscribers and ends the task.
    async fn finish(
        &self,
        options: &DownsamplingOptions,
        key: &str,
        result: &GraphResult,
    ) -> Result<(), DownsampleError> {
        if let Some(cache) = self.short_term.as_ref().filter(|_| options.key_indicator_mode) {
            cache.set(key, result).await?;
        }
        self.long_term.set(key, result).await?;

        self.lock_pending().remove(key);

        let event = DownsampleReady {
            resource_id: options.resource_id.clone(),
            datapoints: options.datapoints,
            single_column: options.key_indicator_mode,
        };
        if self.events.send(event).is_err() {
            debug!("No subscribers for downsampled data of {}", options.resource_id);
        }
        Ok(())
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builds a graph from the dispatched series. Series with a descending x axis are reversed.
fn graph_data(
    resource: &Resource,
    options: &DownsamplingOptions,
    x: usize,
    y: &[usize],
    series: &[Vec<Point>],
) -> DownsampledData {
    let mut x_values: Vec<f64> = series
        .first()
        .map(|points| points.iter().map(|p| p[0]).collect())
        .unwrap_or_default();
    let descending =
        matches!((x_values.first(), x_values.last()), (Some(first), Some(last)) if first > last);
    if descending {
        x_values.reverse();
    }

    let x_column = &resource.columns[x];
    DownsampledData {
        x: DownsampledXColumn {
            column_type: x_column.column_type,
            label: x_column.title.clone(),
            unit: x_column.unit_label(),
            values: x_values,
        },
        y: y
            .iter()
            .zip(series)
            .map(|(&index, points)| {
                let column = &resource.columns[index];
                let mut values: Vec<Option<f64>> = points.iter().map(|p| Some(p[1])).collect();
                if descending {
                    values.reverse();
                }
                DownsampledColumn {
                    device_id: column.device_id.clone(),
                    resource_id: options.resource_id.clone(),
                    label: column.title.clone(),
                    unit: column.unit_label(),
                    values,
                }
            })
            .collect(),
    }
}

/// Merges the x axes of several graphs. Every y column gets a value for each merged x value,
/// `None` where its graph has no such x value.
fn merge_datetime_axes(graphs: &[DownsampledData]) -> DownsampledData {
    let mut merged_x: Vec<f64> = graphs.iter().flat_map(|g| g.x.values.iter().copied()).collect();
    merged_x.sort_by(f64::total_cmp);
    merged_x.dedup_by(|a, b| a.total_cmp(b).is_eq());

    let mut y = Vec::new();
    for graph in graphs {
        let positions: Vec<Option<usize>> = merged_x
            .iter()
            .map(|x| graph.x.values.iter().position(|v| v.total_cmp(x).is_eq()))
            .collect();
        for column in &graph.y {
            y.push(DownsampledColumn {
                device_id: column.device_id.clone(),
                resource_id: column.resource_id.clone(),
                label: column.label.clone(),
                unit: column.unit.clone(),
                values: positions
                    .iter()
                    .map(|position| position.and_then(|i| column.values.get(i).copied().flatten()))
                    .collect(),
            });
        }
    }

    let first = &graphs[0].x;
    DownsampledData {
        x: DownsampledXColumn {
            column_type: first.column_type,
            label: first.label.clone(),
            unit: first.unit.clone(),
            values: merged_x,
        },
        y,
    }
}

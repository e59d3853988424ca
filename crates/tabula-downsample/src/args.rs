//! Arguments of a downsampling task.
//!
//! The JSON form is shared by the dispatcher, which posts it to the remote service, and the
//! endpoint handler that receives it:
//!
//! ```json
//! {
//!   "input": {
//!     "prefix": "repository",
//!     "path": "resources/abc.rtd",
//!     "numberRows": 1000,
//!     "numberColumns": 3,
//!     "columns": { "x": 0, "y": [1, 2] }
//!   },
//!   "threshold": 100
//! }
//! ```

use serde::{Deserialize, Serialize};
use tabula_lttb::ColumnPair;

use crate::DownsampleError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DownsamplingTaskArgs {
    pub input: TaskInput,
    /// Number of points per output series.
    pub threshold: usize,
}

/// The table to downsample.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TaskInput {
    /// Storage prefix (repository name) of the table.
    pub prefix: String,
    /// Path of the table below `prefix`.
    pub path: String,
    pub number_rows: usize,
    pub number_columns: usize,
    pub columns: TaskColumns,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskColumns {
    /// Index of the shared independent column.
    pub x: usize,
    /// Indices of the dependent columns, one output series each.
    pub y: Vec<usize>,
}

impl TaskColumns {
    /// Returns one x/y pair per dependent column.
    pub fn pairs(&self) -> Vec<ColumnPair> {
        self.y.iter().map(|&y| ColumnPair::new(self.x, y)).collect()
    }
}

impl DownsamplingTaskArgs {
    /// Checks that the column selection fits the table and that the threshold is usable.
    pub fn validate(&self) -> Result<(), DownsampleError> {
        let input = &self.input;
        let invalid = |msg: String| Err(DownsampleError::InvalidArgs(msg));

        if input.path.is_empty() {
            return invalid("input path is empty".to_string());
        }
        if input.columns.y.is_empty() {
            return invalid("no dependent columns selected".to_string());
        }
        if let Some(column) = std::iter::once(input.columns.x)
            .chain(input.columns.y.iter().copied())
            .find(|&c| c >= input.number_columns)
        {
            return invalid(format!(
                "column {column} is out of range for a table with {} columns",
                input.number_columns
            ));
        }
        if matches!(self.threshold, 1 | 2) {
            return invalid(format!("threshold must be greater than 2, got {}", self.threshold));
        }
        Ok(())
    }
}

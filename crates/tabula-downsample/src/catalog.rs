//! Resource metadata needed to build downsampling tasks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::DownsampleError;

/// Title of the column preferred for key indicator graphs.
pub const KEY_INDICATOR_TITLE: &str = "Reaktor";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Number,
    Datetime,
}

/// Description of one column of a stored table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescription {
    pub title: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// `None` for unitless columns.
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    /// Indices of the columns this column depends on. Empty for independent columns.
    #[serde(default)]
    pub independent_variables: Vec<usize>,
}

impl ColumnDescription {
    pub fn is_independent(&self) -> bool {
        self.independent_variables.is_empty()
    }

    pub(crate) fn unit_label(&self) -> String {
        self.unit.clone().unwrap_or_else(|| "Unitless".to_string())
    }
}

/// A resource whose attachment is a stored table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    /// Path of the table in the repository's storage.
    pub path: String,
    pub columns: Vec<ColumnDescription>,
}

impl Resource {
    /// Index of the first column without independent variables.
    pub fn independent_column(&self) -> Option<usize> {
        self.columns.iter().position(ColumnDescription::is_independent)
    }

    /// Indices of all columns that depend on another column.
    pub fn dependent_columns(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, column)| !column.is_independent())
            .map(|(index, _)| index)
            .collect()
    }

    /// The single column shown in key indicator graphs.
    ///
    /// That is the column titled [`KEY_INDICATOR_TITLE`] if there is one, else the last column,
    /// else the first column if the last one is `x`.
    pub fn key_indicator_column(&self, x: usize) -> usize {
        if let Some(index) = self.columns.iter().position(|c| c.title == KEY_INDICATOR_TITLE) {
            return index;
        }
        let last = self.columns.len().saturating_sub(1);
        if last == x { 0 } else { last }
    }
}

/// Looks up resources by id.
#[async_trait]
pub trait ResourceCatalog: Send + Sync {
    async fn resource(&self, id: &str) -> Result<Resource, DownsampleError>;
}

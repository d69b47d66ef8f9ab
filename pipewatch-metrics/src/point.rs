use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

/// Maximum number of dimensions on a single point.
pub const MAX_DIMENSIONS: usize = 30;

/// The unit of a metric value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MetricUnit {
    /// Time in seconds.
    Seconds,
    /// A plain count.
    Count,
    /// A percentage between 0 and 100.
    Percent,
    /// A value without unit, such as a cost.
    #[default]
    None,
}

impl MetricUnit {
    /// Returns the backend name of this unit.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Seconds => "Seconds",
            Self::Count => "Count",
            Self::Percent => "Percent",
            Self::None => "None",
        }
    }
}

impl fmt::Display for MetricUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error returned when parsing an unknown [`MetricUnit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown metric unit")]
pub struct ParseMetricUnitError;

impl FromStr for MetricUnit {
    type Err = ParseMetricUnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Seconds" => Self::Seconds,
            "Count" => Self::Count,
            "Percent" => Self::Percent,
            "None" => Self::None,
            _ => return Err(ParseMetricUnitError),
        })
    }
}

pipewatch_common::impl_str_serde!(MetricUnit, "a metric unit");

/// An error returned for invalid dimensions.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DimensionError {
    /// A dimension name occurs twice on one point.
    #[error("duplicate dimension '{0}'")]
    Duplicate(String),
    /// A point has more than [`MAX_DIMENSIONS`] dimensions.
    #[error("more than {MAX_DIMENSIONS} dimensions")]
    TooMany,
    /// A dimension name or value is empty.
    #[error("empty name or value for dimension '{0}'")]
    Empty(String),
    /// A metric was emitted with a different set of dimension names than before.
    #[error("metric '{metric}' emitted with dimensions {found:?}, expected {expected:?}")]
    Inconsistent {
        /// The metric name.
        metric: String,
        /// Dimension names of the first emission.
        expected: Vec<String>,
        /// Dimension names of the rejected emission.
        found: Vec<String>,
    },
}

/// A single named tag on a metric point.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Dimension {
    /// The dimension name, such as `JobName`.
    pub name: String,
    /// The dimension value.
    pub value: String,
}

/// An ordered set of dimensions with unique names.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Dimensions(Vec<Dimension>);

impl Dimensions {
    /// Creates an empty set of dimensions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a dimension, rejecting duplicate names, empty strings and more than
    /// [`MAX_DIMENSIONS`] entries.
    pub fn push(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), DimensionError> {
        let name = name.into();
        let value = value.into();

        if name.is_empty() || value.is_empty() {
            return Err(DimensionError::Empty(name));
        }
        if self.get(&name).is_some() {
            return Err(DimensionError::Duplicate(name));
        }
        if self.0.len() >= MAX_DIMENSIONS {
            return Err(DimensionError::TooMany);
        }

        self.0.push(Dimension { name, value });
        Ok(())
    }

    /// Builder variant of [`push`](Self::push).
    pub fn with(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, DimensionError> {
        self.push(name, value)?;
        Ok(self)
    }

    /// Returns the value of a dimension.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|dimension| dimension.name == name)
            .map(|dimension| dimension.value.as_str())
    }

    /// Iterates dimension names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|dimension| dimension.name.as_str())
    }

    /// Returns the number of dimensions.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no dimensions.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates all dimensions.
    pub fn iter(&self) -> std::slice::Iter<'_, Dimension> {
        self.0.iter()
    }
}

/// A named, dimensioned numeric value.
///
/// Serializes to the `MetricData` entry format of the ingestion backend. The timestamp is written
/// as seconds since the UNIX epoch and omitted if absent, in which case the backend uses the time
/// of receipt.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricPoint {
    /// The metric name.
    #[serde(rename = "MetricName")]
    pub name: String,
    /// The value.
    pub value: f64,
    /// The unit of the value.
    pub unit: MetricUnit,
    /// Dimensions, omitted from the payload when empty.
    #[serde(skip_serializing_if = "Dimensions::is_empty")]
    pub dimensions: Dimensions,
    /// Explicit timestamp of the value.
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_epoch"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

fn serialize_epoch<S>(timestamp: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match timestamp {
        Some(timestamp) => serializer.serialize_i64(timestamp.timestamp()),
        None => serializer.serialize_none(),
    }
}

impl MetricPoint {
    /// Creates a point without dimensions or timestamp.
    pub fn new(name: impl Into<String>, value: f64, unit: MetricUnit) -> Self {
        Self {
            name: name.into(),
            value,
            unit,
            dimensions: Dimensions::new(),
            timestamp: None,
        }
    }

    /// Sets the dimensions of this point.
    pub fn with_dimensions(mut self, dimensions: Dimensions) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Sets an explicit timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

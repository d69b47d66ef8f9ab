use std::collections::HashMap;

use indexmap::IndexMap;
use indexmap::map::Entry;
use serde::Serialize;

use crate::{DimensionError, Dimensions, MetricPoint};

/// Upper bound of points the ingestion backend accepts in a single call.
pub const MAX_POINTS_PER_CALL: usize = 1000;

/// Identity of a point within a batch.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PointKey {
    name: String,
    dimensions: Dimensions,
}

/// A deduplicating, insertion-ordered batch of points for one namespace.
///
/// Pushing a point with the name and dimensions of an earlier point replaces the earlier value in
/// place, so every series appears at most once per batch.
#[derive(Clone, Debug, Serialize)]
pub struct MetricBatch {
    namespace: String,
    #[serde(serialize_with = "serialize_points")]
    points: IndexMap<PointKey, MetricPoint>,
    #[serde(skip)]
    schemas: HashMap<String, Vec<String>>,
}

fn serialize_points<S>(
    points: &IndexMap<PointKey, MetricPoint>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_seq(points.values())
}

impl MetricBatch {
    /// Creates an empty batch.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            points: IndexMap::new(),
            schemas: HashMap::new(),
        }
    }

    /// Returns the namespace of all points in this batch.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Adds a point.
    ///
    /// Returns `true` if the point replaced an earlier one of the same series. Fails if the
    /// dimension names differ from earlier points with the same metric name.
    pub fn push(&mut self, point: MetricPoint) -> Result<bool, DimensionError> {
        let names: Vec<String> = point.dimensions.names().map(str::to_owned).collect();
        match self.schemas.get(&point.name) {
            Some(expected) if *expected != names => {
                return Err(DimensionError::Inconsistent {
                    metric: point.name,
                    expected: expected.clone(),
                    found: names,
                });
            }
            Some(_) => (),
            None => {
                self.schemas.insert(point.name.clone(), names);
            }
        }

        let key = PointKey {
            name: point.name.clone(),
            dimensions: point.dimensions.clone(),
        };

        match self.points.entry(key) {
            Entry::Occupied(mut entry) => {
                entry.insert(point);
                Ok(true)
            }
            Entry::Vacant(entry) => {
                entry.insert(point);
                Ok(false)
            }
        }
    }

    /// Moves all points of `other` into this batch.
    pub fn extend(&mut self, other: MetricBatch) -> Result<(), DimensionError> {
        for point in other.points.into_values() {
            self.push(point)?;
        }
        Ok(())
    }

    /// Returns the number of distinct series.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns `true` if the batch holds no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Iterates points in insertion order.
    pub fn points(&self) -> impl ExactSizeIterator<Item = &MetricPoint> {
        self.points.values()
    }

    /// Splits the batch into consecutive chunks of at most `max_per_call` points.
    ///
    /// The split is deterministic and keeps insertion order. A limit of zero is treated as one.
    pub fn chunks(&self, max_per_call: usize) -> Vec<Vec<&MetricPoint>> {
        let max_per_call = max_per_call.max(1);
        let mut chunks = Vec::with_capacity(self.len().div_ceil(max_per_call));
        let mut current = Vec::with_capacity(max_per_call.min(self.len()));

        for point in self.points.values() {
            current.push(point);
            if current.len() == max_per_call {
                chunks.push(std::mem::replace(
                    &mut current,
                    Vec::with_capacity(max_per_call),
                ));
            }
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
    }
}

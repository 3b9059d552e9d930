//! Contract between the sensor operations and the time-series store.
//!
//! The store owns every series. The operations only see this narrow trait,
//! which keeps them independent of the wire protocol and lets tests swap in a
//! mock or an in-memory store.

use crate::key::{FormattedPoint, SeriesKey};
use async_trait::async_trait;
use thiserror::Error;

/// Errors reported by a store backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Store unreachable: {0}")]
    Unavailable(String),

    #[error("Key does not exist: {0}")]
    KeyAbsent(String),

    #[error("Store responded with an error: {0}")]
    Response(String),

    #[error("Unexpected store reply: {0}")]
    UnexpectedReply(String),
}

/// Per-point acknowledgment of a batch write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteAck {
    /// Point stored at the given timestamp
    Stored(i64),
    /// The store returned something other than a timestamp
    Rejected(String),
}

impl WriteAck {
    pub fn is_stored(&self) -> bool {
        matches!(self, WriteAck::Stored(_))
    }
}

/// Most recent point of a series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatestPoint {
    pub timestamp_ms: i64,
}

/// Series metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeriesInfo {
    /// Number of points in the series
    pub total_samples: i64,
}

/// Averaged buckets over a time range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeAggregate {
    /// Inclusive start, `None` for the earliest point
    pub from_ms: Option<i64>,
    /// Inclusive end, `None` for the latest point
    pub to_ms: Option<i64>,
    /// Bucket width in milliseconds, buckets aligned at epoch 0
    pub bucket_ms: i64,
}

impl RangeAggregate {
    /// Query covering the whole series
    pub fn whole_series(bucket_ms: i64) -> Self {
        Self {
            from_ms: None,
            to_ms: None,
            bucket_ms,
        }
    }
}

/// One bucket of a range aggregate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatedBucket {
    pub timestamp_ms: i64,
    pub value: f64,
}

/// Time-series store consumed by the sensor operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SeriesStore: Send + Sync {
    /// Append all points as one atomic unit, returning one ack per point
    async fn write_batch(&self, points: &[FormattedPoint]) -> Result<Vec<WriteAck>, StoreError>;

    /// Latest point of a series, [`StoreError::KeyAbsent`] if there is none
    async fn get_latest(&self, key: &SeriesKey) -> Result<LatestPoint, StoreError>;

    /// Series metadata
    async fn get_info(&self, key: &SeriesKey) -> Result<SeriesInfo, StoreError>;

    /// Per-bucket average over a range of the series
    async fn get_range_aggregate(
        &self,
        key: &SeriesKey,
        query: &RangeAggregate,
    ) -> Result<Vec<AggregatedBucket>, StoreError>;

    /// Remove a series, returning whether it existed
    async fn delete(&self, key: &SeriesKey) -> Result<bool, StoreError>;

    /// Liveness probe
    async fn ping(&self) -> Result<bool, StoreError>;
}

/// In-memory store with the same semantics as the Redis backend
#[cfg(test)]
pub mod memory {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemorySeriesStore {
        series: Mutex<BTreeMap<SeriesKey, BTreeMap<i64, f64>>>,
    }

    impl MemorySeriesStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn len(&self, key: &SeriesKey) -> usize {
            self.series
                .lock()
                .unwrap()
                .get(key)
                .map(|points| points.len())
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl SeriesStore for MemorySeriesStore {
        async fn write_batch(
            &self,
            points: &[FormattedPoint],
        ) -> Result<Vec<WriteAck>, StoreError> {
            let mut series = self.series.lock().unwrap();
            let acks = points
                .iter()
                .map(|point| {
                    // RedisTimeSeries refuses the command but still applies the rest
                    if point.timestamp_ms < 0 {
                        return WriteAck::Rejected("TSDB: invalid timestamp".to_string());
                    }
                    series
                        .entry(point.key.clone())
                        .or_default()
                        .insert(point.timestamp_ms, point.value);
                    WriteAck::Stored(point.timestamp_ms)
                })
                .collect();
            Ok(acks)
        }

        async fn get_latest(&self, key: &SeriesKey) -> Result<LatestPoint, StoreError> {
            let series = self.series.lock().unwrap();
            series
                .get(key)
                .and_then(|points| points.iter().next_back())
                .map(|(&timestamp_ms, _)| LatestPoint { timestamp_ms })
                .ok_or_else(|| StoreError::KeyAbsent(key.to_string()))
        }

        async fn get_info(&self, key: &SeriesKey) -> Result<SeriesInfo, StoreError> {
            let series = self.series.lock().unwrap();
            let points = series
                .get(key)
                .ok_or_else(|| StoreError::KeyAbsent(key.to_string()))?;
            Ok(SeriesInfo {
                total_samples: points.len() as i64,
            })
        }

        async fn get_range_aggregate(
            &self,
            key: &SeriesKey,
            query: &RangeAggregate,
        ) -> Result<Vec<AggregatedBucket>, StoreError> {
            let series = self.series.lock().unwrap();
            let points = series
                .get(key)
                .ok_or_else(|| StoreError::KeyAbsent(key.to_string()))?;

            let mut buckets: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
            for (&ts, &value) in points {
                if query.from_ms.is_some_and(|from| ts < from)
                    || query.to_ms.is_some_and(|to| ts > to)
                {
                    continue;
                }
                let bucket = ts.div_euclid(query.bucket_ms) * query.bucket_ms;
                buckets.entry(bucket).or_default().push(value);
            }

            Ok(buckets
                .into_iter()
                .map(|(timestamp_ms, values)| AggregatedBucket {
                    timestamp_ms,
                    value: values.iter().sum::<f64>() / values.len() as f64,
                })
                .collect())
        }

        async fn delete(&self, key: &SeriesKey) -> Result<bool, StoreError> {
            Ok(self.series.lock().unwrap().remove(key).is_some())
        }

        async fn ping(&self) -> Result<bool, StoreError> {
            Ok(true)
        }
    }
}

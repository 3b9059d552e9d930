//! Whole-lifetime statistics for a sensor series.
//!
//! A statistic is composed from three independent store reads: the latest
//! point, the series metadata (for the point count) and a range aggregate
//! (for the average). They do not run inside a store transaction, so an
//! ingest landing between them can make `count` and `avg` disagree by the
//! points it added. Callers get eventually consistent numbers.
//!
//! The store has no whole-series average, so the average comes from a
//! bucketed range aggregate whose single bucket is wider than the series'
//! lifetime.

use crate::error::{Result, SensorError};
use crate::key::SeriesKey;
use crate::store::{RangeAggregate, SeriesStore, StoreError};
use crate::timestamp::canonical_from_millis;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

/// Headroom factor applied to the latest timestamp when sizing the
/// aggregation bucket, so points appended after the latest-point read still
/// fall in the first bucket
pub const BUCKET_HEADROOM: i64 = 10;

/// Summary of a sensor's series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorStatistic {
    /// Canonical timestamp of the most recent point
    pub last_measurement: Option<String>,
    /// Number of points
    pub count: i64,
    /// Average over all points
    pub avg: f64,
}

impl SensorStatistic {
    /// Result for a sensor with no series
    pub fn empty() -> Self {
        Self {
            last_measurement: None,
            count: 0,
            avg: 0.0,
        }
    }
}

/// Bucket width covering every point from epoch 0 up to and past `latest_ms`
pub fn whole_series_bucket(latest_ms: i64) -> i64 {
    latest_ms.max(1).saturating_mul(BUCKET_HEADROOM)
}

/// Compute latest point, count and average for a sensor
#[instrument(skip(store))]
pub async fn get_statistics(store: &dyn SeriesStore, sensor_id: &str) -> Result<SensorStatistic> {
    metrics::counter!("sensor.stats.queries").increment(1);

    let key = SeriesKey::for_sensor(sensor_id);

    let latest = match store.get_latest(&key).await {
        Ok(latest) => latest,
        Err(StoreError::KeyAbsent(_)) => {
            debug!(key = %key, "No series for sensor");
            return Ok(SensorStatistic::empty());
        }
        Err(e) => return Err(SensorError::from_query(e)),
    };

    let last_measurement = canonical_from_millis(latest.timestamp_ms).ok_or_else(|| {
        SensorError::StoreQueryFailed(format!(
            "latest timestamp {} is out of range",
            latest.timestamp_ms
        ))
    })?;

    let info = match store.get_info(&key).await {
        Ok(info) => info,
        Err(StoreError::KeyAbsent(_)) => return Ok(deleted_concurrently(&key)),
        Err(e) => return Err(SensorError::from_query(e)),
    };

    let query = RangeAggregate::whole_series(whole_series_bucket(latest.timestamp_ms));

    let buckets = match store.get_range_aggregate(&key, &query).await {
        Ok(buckets) => buckets,
        Err(StoreError::KeyAbsent(_)) => return Ok(deleted_concurrently(&key)),
        Err(e) => return Err(SensorError::from_query(e)),
    };

    let avg = match buckets.as_slice() {
        [bucket] => bucket.value,
        [] => return Ok(deleted_concurrently(&key)),
        _ => {
            return Err(SensorError::StoreQueryFailed(format!(
                "expected one aggregation bucket for {}, got {}",
                key,
                buckets.len()
            )))
        }
    };

    Ok(SensorStatistic {
        last_measurement: Some(last_measurement),
        count: info.total_samples,
        avg,
    })
}

fn deleted_concurrently(key: &SeriesKey) -> SensorStatistic {
    warn!(key = %key, "Series removed while computing statistics");
    SensorStatistic::empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{ingest, Measurement};
    use crate::store::memory::MemorySeriesStore;
    use crate::store::{AggregatedBucket, LatestPoint, MockSeriesStore, SeriesInfo};
    use crate::timestamp::TimestampNormalizer;

    const LATEST_MS: i64 = 1_704_067_800_000;

    fn mock_with_latest() -> MockSeriesStore {
        let mut mock = MockSeriesStore::new();
        mock.expect_get_latest().returning(|_| {
            Ok(LatestPoint {
                timestamp_ms: LATEST_MS,
            })
        });
        mock
    }

    #[test]
    fn test_bucket_covers_series() {
        assert_eq!(whole_series_bucket(LATEST_MS), LATEST_MS * 10);
        assert_eq!(whole_series_bucket(0), 10);
        assert!(whole_series_bucket(i64::MAX) > 0);
    }

    #[tokio::test]
    async fn test_two_point_scenario() {
        let store = MemorySeriesStore::new();
        let batch = vec![
            Measurement::new("A", "2024-01-01T00:00:00.000000+00:00", 10.0),
            Measurement::new("A", "2024-01-01T00:10:00.000000+00:00", 20.0),
        ];
        ingest(&store, &TimestampNormalizer::default(), &batch)
            .await
            .unwrap();

        let stats = get_statistics(&store, "A").await.unwrap();
        assert_eq!(
            stats,
            SensorStatistic {
                last_measurement: Some("2024-01-01T00:10:00.000000+00:00".to_string()),
                count: 2,
                avg: 15.0,
            }
        );
    }

    #[tokio::test]
    async fn test_single_point_average_is_its_value() {
        let store = MemorySeriesStore::new();
        let batch = vec![Measurement::new("solo", "2024-03-05T12:30:00+01:00", 7.25)];
        ingest(&store, &TimestampNormalizer::default(), &batch)
            .await
            .unwrap();

        let stats = get_statistics(&store, "solo").await.unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.avg, 7.25);
        assert_eq!(
            stats.last_measurement.as_deref(),
            Some("2024-03-05T11:30:00.000000+00:00")
        );
    }

    #[tokio::test]
    async fn test_duplicate_timestamps_collapse() {
        let store = MemorySeriesStore::new();
        let batch = vec![
            Measurement::new("A", "2024-01-01T00:00:00Z", 1.0),
            Measurement::new("A", "2024-01-01T01:00:00+01:00", 3.0),
            Measurement::new("A", "2024-01-01T00:05:00Z", 5.0),
        ];
        ingest(&store, &TimestampNormalizer::default(), &batch)
            .await
            .unwrap();

        let stats = get_statistics(&store, "A").await.unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.avg, 4.0);
    }

    #[tokio::test]
    async fn test_unknown_sensor_is_empty() {
        let store = MemorySeriesStore::new();
        let stats = get_statistics(&store, "never-seen").await.unwrap();
        assert_eq!(stats, SensorStatistic::empty());
    }

    #[tokio::test]
    async fn test_latest_fault_is_surfaced() {
        let mut mock = MockSeriesStore::new();
        mock.expect_get_latest()
            .returning(|_| Err(StoreError::Response("WRONGTYPE".to_string())));
        mock.expect_get_info().never();

        let result = get_statistics(&mock, "A").await;
        assert!(matches!(result, Err(SensorError::StoreQueryFailed(_))));
    }

    #[tokio::test]
    async fn test_count_fault_is_not_zeroed() {
        let mut mock = mock_with_latest();
        mock.expect_get_info()
            .returning(|_| Err(StoreError::Unavailable("timed out".to_string())));
        mock.expect_get_range_aggregate().never();

        let result = get_statistics(&mock, "A").await;
        assert!(matches!(result, Err(SensorError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_average_fault_is_not_zeroed() {
        let mut mock = mock_with_latest();
        mock.expect_get_info().returning(|_| {
            Ok(SeriesInfo { total_samples: 2 })
        });
        mock.expect_get_range_aggregate()
            .returning(|_, _| Err(StoreError::UnexpectedReply("garbage".to_string())));

        let result = get_statistics(&mock, "A").await;
        assert!(matches!(result, Err(SensorError::StoreQueryFailed(_))));
    }

    #[tokio::test]
    async fn test_range_query_uses_oversized_bucket() {
        let mut mock = mock_with_latest();
        mock.expect_get_info().returning(|_| {
            Ok(SeriesInfo { total_samples: 2 })
        });
        mock.expect_get_range_aggregate()
            .withf(|key, query| {
                key.as_str() == "A:ts"
                    && query.from_ms.is_none()
                    && query.to_ms.is_none()
                    && query.bucket_ms == LATEST_MS * BUCKET_HEADROOM
            })
            .returning(|_, _| {
                Ok(vec![AggregatedBucket {
                    timestamp_ms: 0,
                    value: 15.0,
                }])
            });

        let stats = get_statistics(&mock, "A").await.unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.avg, 15.0);
    }

    #[tokio::test]
    async fn test_multiple_buckets_fail() {
        let mut mock = mock_with_latest();
        mock.expect_get_info().returning(|_| Ok(SeriesInfo::default()));
        mock.expect_get_range_aggregate().returning(|_, _| {
            Ok(vec![
                AggregatedBucket { timestamp_ms: 0, value: 1.0 },
                AggregatedBucket { timestamp_ms: 10, value: 2.0 },
            ])
        });

        let result = get_statistics(&mock, "A").await;
        assert!(matches!(result, Err(SensorError::StoreQueryFailed(_))));
    }

    #[tokio::test]
    async fn test_pre_epoch_point_never_splits_the_average() {
        let store = MemorySeriesStore::new();
        let batch = vec![
            Measurement::new("A", "1969-12-31T23:59:59Z", 1.0),
            Measurement::new("A", "2024-01-01T00:00:00Z", 3.0),
        ];
        let result = ingest(&store, &TimestampNormalizer::default(), &batch).await;
        assert!(matches!(result, Err(SensorError::InvalidTimestamp(_))));

        ingest(&store, &TimestampNormalizer::default(), &batch[1..])
            .await
            .unwrap();
        let stats = get_statistics(&store, "A").await.unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.avg, 3.0);
    }

    #[tokio::test]
    async fn test_delete_between_reads_yields_empty() {
        let mut mock = mock_with_latest();
        mock.expect_get_info()
            .returning(|key| Err(StoreError::KeyAbsent(key.to_string())));

        let stats = get_statistics(&mock, "A").await.unwrap();
        assert_eq!(stats, SensorStatistic::empty());
    }
}

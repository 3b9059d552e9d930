use crate::error::{Result, SensorError};
use crate::ingest::{self, IngestReport, Measurement};
use crate::key::SeriesKey;
use crate::statistics::{self, SensorStatistic};
use crate::store::SeriesStore;
use crate::timestamp::TimestampNormalizer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Acknowledgment of a delete request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteAck {
    /// Whether a series existed and was removed
    pub removed: bool,
}

/// Sensor operations over a shared store handle
///
/// Holds no per-sensor state, so one instance can serve any number of
/// concurrent requests.
#[derive(Clone)]
pub struct SensorService {
    store: Arc<dyn SeriesStore>,
    normalizer: TimestampNormalizer,
}

impl SensorService {
    pub fn new(store: Arc<dyn SeriesStore>, normalizer: TimestampNormalizer) -> Self {
        Self { store, normalizer }
    }

    /// Ingest a batch of measurements atomically
    pub async fn ingest(&self, batch: &[Measurement]) -> Result<IngestReport> {
        ingest::ingest(self.store.as_ref(), &self.normalizer, batch).await
    }

    /// Latest point, count and average for a sensor
    pub async fn statistics(&self, sensor_id: &str) -> Result<SensorStatistic> {
        statistics::get_statistics(self.store.as_ref(), sensor_id).await
    }

    /// Remove a sensor's series; removing an unknown sensor succeeds
    #[instrument(skip(self))]
    pub async fn delete(&self, sensor_id: &str) -> Result<DeleteAck> {
        let key = SeriesKey::for_sensor(sensor_id);
        let removed = self
            .store
            .delete(&key)
            .await
            .map_err(SensorError::from_write)?;

        if removed {
            metrics::counter!("sensor.series.deleted").increment(1);
            info!(key = %key, "Series deleted");
        }

        Ok(DeleteAck { removed })
    }

    /// Whether the store answers; any store error counts as unavailable
    pub async fn ping(&self) -> Result<bool> {
        match self.store.ping().await {
            Ok(alive) => Ok(alive),
            Err(e) => {
                warn!(error = %e, "Store ping failed");
                Err(SensorError::StoreUnavailable(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemorySeriesStore;
    use crate::store::{MockSeriesStore, StoreError};

    fn service() -> SensorService {
        SensorService::new(
            Arc::new(MemorySeriesStore::new()),
            TimestampNormalizer::default(),
        )
    }

    #[tokio::test]
    async fn test_delete_unknown_sensor_succeeds() {
        let ack = service().delete("A").await.unwrap();
        assert_eq!(ack, DeleteAck { removed: false });
    }

    #[tokio::test]
    async fn test_delete_then_statistics_is_empty() {
        let service = service();
        service
            .ingest(&[
                Measurement::new("A", "2024-01-01T00:00:00Z", 10.0),
                Measurement::new("A", "2024-01-01T00:10:00Z", 20.0),
            ])
            .await
            .unwrap();
        assert_eq!(service.statistics("A").await.unwrap().count, 2);

        assert!(service.delete("A").await.unwrap().removed);
        assert_eq!(
            service.statistics("A").await.unwrap(),
            SensorStatistic::empty()
        );
    }

    #[tokio::test]
    async fn test_count_grows_by_distinct_timestamps() {
        let service = service();
        service
            .ingest(&[Measurement::new("A", "2024-01-01T00:00:00Z", 1.0)])
            .await
            .unwrap();
        let before = service.statistics("A").await.unwrap().count;

        service
            .ingest(&[
                Measurement::new("A", "2024-01-02T00:00:00Z", 2.0),
                Measurement::new("A", "2024-01-03T00:00:00Z", 3.0),
                Measurement::new("A", "2024-01-03T00:00:00Z", 4.0),
            ])
            .await
            .unwrap();

        assert_eq!(service.statistics("A").await.unwrap().count, before + 2);
    }

    #[tokio::test]
    async fn test_sensors_are_isolated() {
        let service = service();
        service
            .ingest(&[
                Measurement::new("A", "2024-01-01T00:00:00Z", 1.0),
                Measurement::new("B", "2024-01-01T00:00:00Z", 9.0),
            ])
            .await
            .unwrap();

        service.delete("A").await.unwrap();
        assert_eq!(service.statistics("B").await.unwrap().avg, 9.0);
    }

    #[tokio::test]
    async fn test_ping_surfaces_unavailable_store() {
        let mut mock = MockSeriesStore::new();
        mock.expect_ping()
            .returning(|| Err(StoreError::Unavailable("connection refused".to_string())));

        let service = SensorService::new(Arc::new(mock), TimestampNormalizer::default());
        assert!(matches!(
            service.ping().await,
            Err(SensorError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_ping_error_reply_is_unavailable() {
        let mut mock = MockSeriesStore::new();
        mock.expect_ping().returning(|| {
            Err(StoreError::Response(
                "LOADING Redis is loading the dataset in memory".to_string(),
            ))
        });

        let service = SensorService::new(Arc::new(mock), TimestampNormalizer::default());
        assert!(matches!(
            service.ping().await,
            Err(SensorError::StoreUnavailable(_))
        ));
    }
}

use crate::error::{Result, SensorError};
use crate::key::{format_point, FormattedPoint};
use crate::store::SeriesStore;
use crate::timestamp::TimestampNormalizer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, error, instrument, trace};
use uuid::Uuid;

/// Measurement as submitted by a sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Sensor identifier
    #[serde(rename = "sensor", alias = "sensor_id")]
    pub sensor_id: String,
    /// Free-form timestamp
    pub timestamp: String,
    /// Measured value
    pub value: f64,
}

impl Measurement {
    pub fn new(sensor_id: impl Into<String>, timestamp: impl Into<String>, value: f64) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            timestamp: timestamp.into(),
            value,
        }
    }
}

/// Outcome of a committed batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Points acknowledged by the store
    pub points_written: usize,
    /// Distinct series the batch appended to
    pub series_touched: usize,
}

/// Normalize and format every entry, failing on the first bad timestamp
pub fn prepare_batch(
    normalizer: &TimestampNormalizer,
    batch: &[Measurement],
) -> Result<Vec<FormattedPoint>> {
    batch
        .iter()
        .map(|entry| {
            let timestamp = normalizer.normalize(&entry.timestamp)?;
            Ok(format_point(&entry.sensor_id, &timestamp, entry.value))
        })
        .collect()
}

/// Write a batch of measurements as one atomic unit
///
/// Nothing reaches the store unless every timestamp parses. Every point must
/// be acknowledged; a missing or non-timestamp acknowledgment fails the call
/// even though the store accepted the batch.
#[instrument(skip_all, fields(batch_id = %Uuid::new_v4(), entries = batch.len()))]
pub async fn ingest(
    store: &dyn SeriesStore,
    normalizer: &TimestampNormalizer,
    batch: &[Measurement],
) -> Result<IngestReport> {
    if batch.is_empty() {
        return Err(SensorError::EmptyBatch);
    }

    let points = prepare_batch(normalizer, batch).inspect_err(|_| {
        metrics::counter!("sensor.batches.rejected").increment(1);
    })?;

    for point in &points {
        trace!(key = %point.key, payload = %point.payload_json(), "Prepared point");
    }

    let acks = store
        .write_batch(&points)
        .await
        .map_err(SensorError::from_write)?;

    if acks.len() != points.len() {
        error!(
            expected = points.len(),
            received = acks.len(),
            "Store acknowledged a different number of writes"
        );
        return Err(SensorError::StoreWriteFailed(format!(
            "expected {} acknowledgments, got {}",
            points.len(),
            acks.len()
        )));
    }

    if let Some((point, ack)) = points.iter().zip(&acks).find(|(_, ack)| !ack.is_stored()) {
        error!(key = %point.key, timestamp_ms = point.timestamp_ms, ack = ?ack, "Write not acknowledged");
        return Err(SensorError::StoreWriteFailed(format!(
            "{} at {} was not acknowledged: {:?}",
            point.key, point.timestamp_ms, ack
        )));
    }

    let series_touched = points
        .iter()
        .map(|point| &point.key)
        .collect::<BTreeSet<_>>()
        .len();

    metrics::counter!("sensor.points.ingested").increment(points.len() as u64);

    debug!(points = points.len(), series_touched, "Batch ingested");

    Ok(IngestReport {
        points_written: points.len(),
        series_touched,
    })
}

//! Sensor Statistics Service
//!
//! Stateless façade over RedisTimeSeries for sensor measurements. Sensors
//! submit `(sensor, timestamp, value)` measurements; the service normalizes
//! the timestamps, appends each point to the sensor's series in one atomic
//! batch, and answers per-sensor statistics (latest measurement, count,
//! average) and deletion requests.
//!
//! ## Features
//!
//! - **Permissive timestamps**: RFC 3339, RFC 2822 and common human-readable
//!   formats, canonicalized to UTC with microsecond precision
//! - **Atomic batches**: a batch is written in one `MULTI`/`EXEC` and every
//!   point's acknowledgment is checked
//! - **Store-side aggregation**: averages are computed by the store, never by
//!   pulling points into the service
//! - **Fail-closed health check** for orchestration
//!
//! ## Architecture
//!
//! ```text
//!  POST /data              GET|DELETE /statistics/{id}
//!      │                              │
//!      ▼                              ▼
//! ┌──────────────┐            ┌──────────────┐
//! │ Timestamp    │            │ Statistics   │
//! │ Normalizer   │            │ Aggregator   │
//! └──────────────┘            └──────────────┘
//!      │                              │
//!      ▼                              │
//! ┌──────────────┐                    │
//! │ Key          │                    │
//! │ Formatter    │                    │
//! └──────────────┘                    │
//!      │                              │
//!      ▼                              ▼
//! ┌──────────────┐            ┌──────────────┐
//! │ Ingestion    │───────────▶│ SeriesStore  │──▶ RedisTimeSeries
//! │ Pipeline     │            │              │
//! └──────────────┘            └──────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod key;
pub mod redis_store;
pub mod service;
pub mod statistics;
pub mod store;
pub mod timestamp;

pub use api::{create_router, AppState, ErrorResponse, MeasurementBatch};
pub use config::Config;
pub use error::SensorError;
pub use ingest::{IngestReport, Measurement};
pub use key::{format_point, FormattedPoint, SeriesKey};
pub use redis_store::RedisTimeSeriesStore;
pub use service::{DeleteAck, SensorService};
pub use statistics::SensorStatistic;
pub use store::{SeriesStore, StoreError};
pub use timestamp::{NaiveTimestampPolicy, NormalizeOptions, NormalizedTimestamp, TimestampNormalizer};

use crate::config::StoreConfig;
use crate::key::{FormattedPoint, SeriesKey};
use crate::store::{
    AggregatedBucket, LatestPoint, RangeAggregate, SeriesInfo, SeriesStore, StoreError, WriteAck,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{Client, IntoConnectionInfo, RedisError, Value};
use tracing::{debug, info, instrument};

/// Marker in RedisTimeSeries replies for a missing series
const KEY_ABSENT_MARKER: &str = "key does not exist";

/// RedisTimeSeries-backed series store
///
/// Holds a single multiplexed connection manager. Every operation takes its
/// own handle for the duration of the call and drops it afterwards, so no
/// connection is built per request and failures never leak a handle.
#[derive(Clone)]
pub struct RedisTimeSeriesStore {
    manager: ConnectionManager,
}

impl RedisTimeSeriesStore {
    /// Connect to the configured Redis instance
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let mut info = config
            .url
            .as_str()
            .into_connection_info()
            .context("Invalid store URL")?;

        if let Some(username) = &config.username {
            info.redis.username = Some(username.clone());
        }
        if let Some(password) = &config.password {
            info.redis.password = Some(password.clone());
        }

        let client = Client::open(info).context("Failed to create Redis client")?;

        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(config.connect_timeout())
            .set_response_timeout(config.response_timeout());

        let manager = client
            .get_connection_manager_with_config(manager_config)
            .await
            .context("Failed to connect to Redis")?;

        info!(url = %config.redacted_url(), "Connected to RedisTimeSeries");

        Ok(Self { manager })
    }

    /// Scoped connection handle, released when dropped
    fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl SeriesStore for RedisTimeSeriesStore {
    #[instrument(skip(self, points), fields(points = points.len()))]
    async fn write_batch(&self, points: &[FormattedPoint]) -> Result<Vec<WriteAck>, StoreError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for point in points {
            pipe.cmd("TS.ADD")
                .arg(point.key.as_str())
                .arg(point.timestamp_ms)
                .arg(point.value)
                .arg("ON_DUPLICATE")
                .arg("LAST");
        }

        let mut conn = self.connection();
        let replies: Vec<Value> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| classify_error(e, "batch"))?;

        debug!(replies = replies.len(), "Batch committed");

        Ok(replies.iter().map(parse_write_ack).collect())
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn get_latest(&self, key: &SeriesKey) -> Result<LatestPoint, StoreError> {
        let mut conn = self.connection();
        let reply: Value = redis::cmd("TS.GET")
            .arg(key.as_str())
            .query_async(&mut conn)
            .await
            .map_err(|e| classify_error(e, key.as_str()))?;

        parse_latest(&reply, key)
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn get_info(&self, key: &SeriesKey) -> Result<SeriesInfo, StoreError> {
        let mut conn = self.connection();
        let reply: Value = redis::cmd("TS.INFO")
            .arg(key.as_str())
            .query_async(&mut conn)
            .await
            .map_err(|e| classify_error(e, key.as_str()))?;

        parse_info(&reply)
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn get_range_aggregate(
        &self,
        key: &SeriesKey,
        query: &RangeAggregate,
    ) -> Result<Vec<AggregatedBucket>, StoreError> {
        let from = query.from_ms.map_or_else(|| "-".to_string(), |ts| ts.to_string());
        let to = query.to_ms.map_or_else(|| "+".to_string(), |ts| ts.to_string());

        let mut conn = self.connection();
        let reply: Value = redis::cmd("TS.RANGE")
            .arg(key.as_str())
            .arg(from)
            .arg(to)
            .arg("AGGREGATION")
            .arg("avg")
            .arg(query.bucket_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify_error(e, key.as_str()))?;

        parse_buckets(&reply)
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn delete(&self, key: &SeriesKey) -> Result<bool, StoreError> {
        let mut conn = self.connection();
        let removed: i64 = redis::cmd("DEL")
            .arg(key.as_str())
            .query_async(&mut conn)
            .await
            .map_err(|e| classify_error(e, key.as_str()))?;

        Ok(removed > 0)
    }

    async fn ping(&self) -> Result<bool, StoreError> {
        let mut conn = self.connection();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| classify_error(e, "ping"))?;

        Ok(pong.eq_ignore_ascii_case("PONG"))
    }
}

/// Sort a client error into transport faults, missing keys and everything else
fn classify_error(err: RedisError, key: &str) -> StoreError {
    if err.is_io_error()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
    {
        return StoreError::Unavailable(err.to_string());
    }

    if err.to_string().contains(KEY_ABSENT_MARKER) {
        return StoreError::KeyAbsent(key.to_string());
    }

    StoreError::Response(err.to_string())
}

fn parse_write_ack(reply: &Value) -> WriteAck {
    match reply {
        Value::Int(ts) => WriteAck::Stored(*ts),
        other => WriteAck::Rejected(format!("{other:?}")),
    }
}

fn parse_latest(reply: &Value, key: &SeriesKey) -> Result<LatestPoint, StoreError> {
    match reply {
        // an existing but empty series has no latest point
        Value::Nil => Err(StoreError::KeyAbsent(key.to_string())),
        Value::Array(items) if items.is_empty() => Err(StoreError::KeyAbsent(key.to_string())),
        Value::Array(items) if items.len() == 2 => Ok(LatestPoint {
            timestamp_ms: value_to_i64(&items[0])?,
        }),
        other => Err(StoreError::UnexpectedReply(format!("TS.GET: {other:?}"))),
    }
}

fn parse_info(reply: &Value) -> Result<SeriesInfo, StoreError> {
    let pairs: Vec<(&Value, &Value)> = match reply {
        Value::Array(items) => items
            .chunks_exact(2)
            .map(|pair| (&pair[0], &pair[1]))
            .collect(),
        Value::Map(entries) => entries.iter().map(|(k, v)| (k, v)).collect(),
        other => return Err(StoreError::UnexpectedReply(format!("TS.INFO: {other:?}"))),
    };

    let (_, total) = pairs
        .into_iter()
        .find(|(name, _)| value_to_string(name).as_deref() == Some("totalSamples"))
        .ok_or_else(|| {
            StoreError::UnexpectedReply("TS.INFO reply has no totalSamples".to_string())
        })?;

    Ok(SeriesInfo {
        total_samples: value_to_i64(total)?,
    })
}

fn parse_buckets(reply: &Value) -> Result<Vec<AggregatedBucket>, StoreError> {
    let Value::Array(rows) = reply else {
        return Err(StoreError::UnexpectedReply(format!("TS.RANGE: {reply:?}")));
    };

    rows.iter()
        .map(|row| match row {
            Value::Array(pair) if pair.len() == 2 => Ok(AggregatedBucket {
                timestamp_ms: value_to_i64(&pair[0])?,
                value: value_to_f64(&pair[1])?,
            }),
            other => Err(StoreError::UnexpectedReply(format!("TS.RANGE row: {other:?}"))),
        })
        .collect()
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => String::from_utf8(bytes.clone()).ok(),
        Value::SimpleString(s) => Some(s.clone()),
        Value::VerbatimString { text, .. } => Some(text.clone()),
        _ => None,
    }
}

fn value_to_i64(value: &Value) -> Result<i64, StoreError> {
    match value {
        Value::Int(i) => Ok(*i),
        other => value_to_string(other)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| StoreError::UnexpectedReply(format!("expected integer, got {other:?}"))),
    }
}

fn value_to_f64(value: &Value) -> Result<f64, StoreError> {
    match value {
        Value::Double(d) => Ok(*d),
        Value::Int(i) => Ok(*i as f64),
        other => value_to_string(other)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| StoreError::UnexpectedReply(format!("expected number, got {other:?}"))),
    }
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, SystemTimeError, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy { timestamp: String },
    Unhealthy { error: String },
}

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("System clock is before the UNIX epoch: {0}")]
    ClockBeforeEpoch(#[from] SystemTimeError),
    #[error("System time of {0}s since the epoch is out of range")]
    OutOfRange(u64),
}

/// Liveness probe. It touches no shared state, so it answers even while every
/// detector session is busy.
pub async fn healthcheck() -> Response {
    health_response(probe(SystemTime::now()))
}

fn probe(now: SystemTime) -> Result<HealthStatus, ProbeError> {
    let since_epoch = now.duration_since(UNIX_EPOCH)?;
    let secs = i64::try_from(since_epoch.as_secs())
        .map_err(|_| ProbeError::OutOfRange(since_epoch.as_secs()))?;
    let timestamp = DateTime::<Utc>::from_timestamp(secs, since_epoch.subsec_nanos())
        .ok_or(ProbeError::OutOfRange(since_epoch.as_secs()))?;

    Ok(HealthStatus::Healthy {
        timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
    })
}

fn health_response(result: Result<HealthStatus, ProbeError>) -> Response {
    match result {
        Ok(status) => {
            tracing::debug!("Health check status: {:?}", status);
            (StatusCode::OK, Json(status)).into_response()
        }
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            let status = HealthStatus::Unhealthy {
                error: e.to_string(),
            };
            (StatusCode::SERVICE_UNAVAILABLE, Json(status)).into_response()
        }
    }
}

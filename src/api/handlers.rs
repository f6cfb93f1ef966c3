use crate::api::ApiState;
use crate::api::responses::{
    ActivateRequest, ActivationResponse, CommandAcceptedResponse, CommandHistoryResponse,
    DelayRequest, ErrorCode, ErrorResponse, EventsQuery, EventsSuccessResponse, HealthStatus,
    HealthSuccessResponse, HistoryQuery, PowerResponse, PowerState, RangeSuccessResponse,
};
use crate::bridge::{PollContext, PollController, SENSOR_LIST};
use crate::engine::MeasurementEngine;
use crate::engine::attributes;
use crate::engine::history::HISTORY_CAPACITY;
use crate::error::AppError;
use crate::sensor::RangeReading;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;
use std::time::{Duration, SystemTime};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, warn};

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

pub const DEFAULT_EVENTS_PER_POLL: usize = 1;
pub const MAX_EVENTS_PER_POLL: usize = 16;
pub const DEFAULT_EVENTS_WAIT: Duration = Duration::from_secs(5);
pub const MAX_EVENTS_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug)]
enum TimestampError {
    Format(time::error::Format),
}

impl fmt::Display for TimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampError::Format(err) => write!(f, "timestamp format error: {err}"),
        }
    }
}

pub enum ApiResponse<T> {
    Success { status: StatusCode, body: T },
    Error {
        status: StatusCode,
        body: ErrorResponse,
    },
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        match self {
            ApiResponse::Success { status, body } => (status, Json(body)).into_response(),
            ApiResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub async fn get_health(State(state): State<ApiState>) -> impl IntoResponse {
    build_health_response(&state.engine, SystemTime::now())
}

pub async fn get_range(State(state): State<ApiState>) -> impl IntoResponse {
    build_range_response(&state.engine, SystemTime::now()).await
}

pub async fn get_last_range(State(state): State<ApiState>) -> impl IntoResponse {
    build_last_range_response(&state.engine, SystemTime::now())
}

pub async fn post_command(State(state): State<ApiState>, body: Bytes) -> impl IntoResponse {
    build_command_response(&state.engine, &body, SystemTime::now())
}

pub async fn get_commands(
    State(state): State<ApiState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    build_history_response(&state.engine, query.len, SystemTime::now())
}

pub async fn get_events(
    State(state): State<ApiState>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    let wait = query
        .wait_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_EVENTS_WAIT);
    build_events_response(&state.poll, query.max, wait).await
}

pub async fn put_activate(
    State(state): State<ApiState>,
    Json(request): Json<ActivateRequest>,
) -> impl IntoResponse {
    build_activate_response(&state.controller, request, SystemTime::now())
}

pub async fn put_delay(
    State(state): State<ApiState>,
    Json(request): Json<DelayRequest>,
) -> impl IntoResponse {
    build_delay_response(&state.controller, request, SystemTime::now())
}

pub async fn post_suspend(State(state): State<ApiState>) -> impl IntoResponse {
    build_power_response(state.engine.suspend(), PowerState::Suspended, SystemTime::now())
}

pub async fn post_resume(State(state): State<ApiState>) -> impl IntoResponse {
    build_power_response(state.engine.resume(), PowerState::Resumed, SystemTime::now())
}

pub async fn show_current_value(State(state): State<ApiState>) -> Response {
    plain_text(attributes::show_current_value(&state.engine).await)
}

pub async fn store_current_value(State(state): State<ApiState>, body: String) -> Response {
    plain_text(attributes::store_current_value(&state.engine, &body).to_string())
}

pub async fn show_cyclic(State(state): State<ApiState>) -> Response {
    plain_text(attributes::show_cyclic(&state.engine))
}

pub async fn store_cyclic(State(state): State<ApiState>, body: String) -> Response {
    build_store_cyclic_response(&state.engine, &body, SystemTime::now())
}

fn build_health_response(
    engine: &MeasurementEngine,
    now: SystemTime,
) -> ApiResponse<HealthSuccessResponse> {
    let status = match engine.probe() {
        Ok(_) => HealthStatus::Ok,
        Err(err) => {
            warn!(error = %err, "Health probe failed");
            HealthStatus::Degraded
        }
    };
    success(StatusCode::OK, now, |timestamp| HealthSuccessResponse {
        status,
        mode: engine.mode(),
        last_reading: engine.last_reading_raw(),
        device_open: engine.is_device_open(),
        events_emitted: engine.emitter().emitted(),
        sensors: &SENSOR_LIST,
        timestamp,
    })
}

async fn build_range_response(
    engine: &MeasurementEngine,
    now: SystemTime,
) -> ApiResponse<RangeSuccessResponse> {
    match engine.read_once().await {
        Ok(reading) => range_success(engine, reading, now),
        Err(err) => error_response(&err, now),
    }
}

fn build_last_range_response(
    engine: &MeasurementEngine,
    now: SystemTime,
) -> ApiResponse<RangeSuccessResponse> {
    match engine.read_last() {
        Ok(reading) => range_success(engine, reading, now),
        Err(err) => error_response(&err, now),
    }
}

fn range_success(
    engine: &MeasurementEngine,
    reading: RangeReading,
    now: SystemTime,
) -> ApiResponse<RangeSuccessResponse> {
    success(StatusCode::OK, now, |timestamp| RangeSuccessResponse {
        distance: reading.value(),
        unit: engine.settings().unit.as_str(),
        within_sensor_range: reading.is_within_sensor_range(),
        timestamp,
    })
}

fn build_command_response(
    engine: &MeasurementEngine,
    body: &[u8],
    now: SystemTime,
) -> ApiResponse<CommandAcceptedResponse> {
    let written = engine
        .open_device()
        .and_then(|device| device.write(body));
    match written {
        Ok(bytes_written) => success(StatusCode::ACCEPTED, now, |timestamp| {
            CommandAcceptedResponse {
                bytes_written,
                timestamp,
            }
        }),
        Err(err) => error_response(&err, now),
    }
}

fn build_history_response(
    engine: &MeasurementEngine,
    len: Option<usize>,
    now: SystemTime,
) -> ApiResponse<CommandHistoryResponse> {
    let history = engine
        .open_device()
        .and_then(|device| device.read(len.unwrap_or(HISTORY_CAPACITY)));
    match history {
        Ok(bytes) => success(StatusCode::OK, now, |timestamp| CommandHistoryResponse {
            length: bytes.len(),
            bytes,
            timestamp,
        }),
        Err(err) => error_response(&err, now),
    }
}

/// Long-poll the bridge. An expired wait answers with an empty event list.
async fn build_events_response(
    poll: &AsyncMutex<PollContext>,
    max: Option<usize>,
    wait: Duration,
) -> ApiResponse<EventsSuccessResponse> {
    let capacity = max
        .unwrap_or(DEFAULT_EVENTS_PER_POLL)
        .min(MAX_EVENTS_PER_POLL);
    let wait = wait.min(MAX_EVENTS_WAIT);

    let mut context = poll.lock().await;
    let events = match tokio::time::timeout(wait, context.read_events(capacity)).await {
        Ok(Ok(events)) => events,
        Ok(Err(err)) => return error_response(&err, SystemTime::now()),
        Err(_elapsed) => Vec::new(),
    };
    drop(context);

    success(StatusCode::OK, SystemTime::now(), |timestamp| {
        EventsSuccessResponse { events, timestamp }
    })
}

fn build_activate_response(
    controller: &PollController,
    request: ActivateRequest,
    now: SystemTime,
) -> ApiResponse<ActivationResponse> {
    match controller.activate(request.handle, request.enabled) {
        Ok(()) => success(StatusCode::OK, now, |timestamp| ActivationResponse {
            handle: request.handle,
            enabled: request.enabled,
            timestamp,
        }),
        Err(err) => error_response(&err, now),
    }
}

/// The sampling cadence is fixed, so every delay request is refused.
fn build_delay_response(
    controller: &PollController,
    request: DelayRequest,
    now: SystemTime,
) -> ApiResponse<()> {
    let Err(err) = controller.set_delay(request.handle, request.delay_ns);
    error_response(&err, now)
}

fn build_power_response(
    result: Result<(), AppError>,
    state: PowerState,
    now: SystemTime,
) -> ApiResponse<PowerResponse> {
    match result {
        Ok(()) => success(StatusCode::OK, now, |timestamp| PowerResponse { state, timestamp }),
        Err(err) => error_response(&err, now),
    }
}

fn build_store_cyclic_response(engine: &MeasurementEngine, body: &str, now: SystemTime) -> Response {
    match attributes::store_cyclic(engine, body) {
        Ok(count) => plain_text(count.to_string()),
        Err(err) => error_response::<()>(&err, now).into_response(),
    }
}

fn plain_text(body: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

fn success<T>(
    status: StatusCode,
    now: SystemTime,
    body: impl FnOnce(String) -> T,
) -> ApiResponse<T> {
    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::Success {
            status,
            body: body(timestamp),
        },
        Err(_) => internal_error("timestamp formatting failure"),
    }
}

fn error_response<T>(err: &AppError, now: SystemTime) -> ApiResponse<T> {
    let (status, error_code) = match err {
        AppError::Busy => (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::Busy),
        AppError::BadLength(_) => (StatusCode::BAD_REQUEST, ErrorCode::BadLength),
        AppError::BusTransactionFailed(_) | AppError::I2c(_) => {
            (StatusCode::BAD_GATEWAY, ErrorCode::BusError)
        }
        AppError::NotSupported(_) => (StatusCode::NOT_IMPLEMENTED, ErrorCode::NotSupported),
        AppError::Disabled => (StatusCode::CONFLICT, ErrorCode::Disabled),
        AppError::InvalidInput(_) => (StatusCode::BAD_REQUEST, ErrorCode::InvalidInput),
        AppError::UnknownHandle(_) => (StatusCode::NOT_FOUND, ErrorCode::UnknownHandle),
        AppError::ChannelClosed => (StatusCode::GONE, ErrorCode::ChannelClosed),
        AppError::Runtime(_) | AppError::StateLock => {
            return internal_error(&err.to_string());
        }
    };
    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::Error {
            status,
            body: ErrorResponse {
                error_code,
                error_message: err.to_string(),
                status_code: err.status_code(),
                timestamp,
            },
        },
        Err(_) => internal_error("timestamp formatting failure"),
    }
}

fn internal_error<T>(message: &str) -> ApiResponse<T> {
    error!(message = message, "Internal error while handling API request");
    let formatted = format_timestamp(SystemTime::now()).unwrap_or_else(|err| {
        error!(error = %err, "Failed to format internal error timestamp");
        OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
    });
    ApiResponse::Error {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: ErrorResponse {
            error_code: ErrorCode::InternalError,
            error_message: INTERNAL_ERROR_MESSAGE.to_string(),
            status_code: AppError::StateLock.status_code(),
            timestamp: formatted,
        },
    }
}

fn format_timestamp(timestamp: SystemTime) -> Result<String, TimestampError> {
    let datetime = OffsetDateTime::from(timestamp);
    datetime.format(&Rfc3339).map_err(TimestampError::Format)
}

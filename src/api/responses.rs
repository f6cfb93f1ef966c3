use crate::bridge::{SensorDescriptor, SensorEvent};
use crate::engine::MeasurementMode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthSuccessResponse {
    pub status: HealthStatus,
    pub mode: MeasurementMode,
    pub last_reading: i32,
    pub device_open: bool,
    pub events_emitted: u64,
    pub sensors: &'static [SensorDescriptor],
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RangeSuccessResponse {
    pub distance: u16,
    pub unit: &'static str,
    pub within_sensor_range: bool,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CommandAcceptedResponse {
    pub bytes_written: usize,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CommandHistoryResponse {
    pub length: usize,
    pub bytes: Vec<u8>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct EventsSuccessResponse {
    pub events: Vec<SensorEvent>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ActivationResponse {
    pub handle: i32,
    pub enabled: bool,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct PowerResponse {
    pub state: PowerState,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Suspended,
    Resumed,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ErrorResponse {
    pub error_code: ErrorCode,
    pub error_message: String,
    /// Negative errno-style status of the failed operation.
    pub status_code: i32,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Busy,
    BadLength,
    BusError,
    NotSupported,
    Disabled,
    InvalidInput,
    UnknownHandle,
    ChannelClosed,
    InternalError,
}

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    #[serde(default)]
    pub handle: i32,
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct DelayRequest {
    #[serde(default)]
    pub handle: i32,
    pub delay_ns: i64,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub len: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub max: Option<usize>,
    pub wait_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_uses_screaming_snake_case_code() -> Result<(), serde_json::Error> {
        let body = ErrorResponse {
            error_code: ErrorCode::UnknownHandle,
            error_message: "unknown sensor handle 3".to_string(),
            status_code: -22,
            timestamp: "1970-01-01T00:00:00Z".to_string(),
        };

        let json = serde_json::to_value(&body)?;

        assert_eq!(json["error_code"], "UNKNOWN_HANDLE");
        assert_eq!(json["status_code"], -22);
        Ok(())
    }

    #[test]
    fn activate_request_defaults_to_proximity_handle() -> Result<(), serde_json::Error> {
        let request: ActivateRequest = serde_json::from_str(r#"{"enabled": true}"#)?;

        assert_eq!(request.handle, 0);
        assert!(request.enabled);
        Ok(())
    }
}

//! Text entry points behind the two device attributes.
//!
//! `srf02value` triggers a fresh one-shot measurement on every read.
//! `value_now` reports the continuous-mode cell and switches continuous mode on write.

use super::MeasurementEngine;
use crate::error::AppError;
use tracing::{debug, info, warn};

pub const CURRENT_VALUE_ATTR: &str = "srf02value";
pub const CYCLIC_ATTR: &str = "value_now";

/// Decimal reading plus newline, or an empty string when the bus is busy or failing.
pub async fn show_current_value(engine: &MeasurementEngine) -> String {
    match engine.read_once().await {
        Ok(reading) => format!("{reading}\n"),
        Err(AppError::Busy) => {
            info!("Bus busy, current value measurement skipped");
            String::new()
        }
        Err(err) => {
            warn!(error = %err, "Current value measurement failed");
            String::new()
        }
    }
}

/// Accepts any input; reads back the latched result registers without ranging.
pub fn store_current_value(engine: &MeasurementEngine, input: &str) -> usize {
    match engine.read_latched() {
        Ok(reading) => debug!(
            input = input.trim(),
            latched = reading.value(),
            "Write to current value ignored"
        ),
        Err(err) => debug!(error = %err, "Latched result read failed"),
    }
    input.len()
}

/// Last continuous reading, `-1` while continuous mode is off.
pub fn show_cyclic(engine: &MeasurementEngine) -> String {
    format!("{}\n", engine.last_reading_raw())
}

/// Positive integer enables continuous mode, `0` disables it.
pub fn store_cyclic(engine: &MeasurementEngine, input: &str) -> Result<usize, AppError> {
    let value: u64 = input.trim().parse().map_err(|_| {
        AppError::InvalidInput(format!("expected a non-negative integer, got {input:?}"))
    })?;
    if value > 0 {
        engine.enable_continuous()?;
    } else {
        engine.disable_continuous()?;
    }
    Ok(input.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DEFAULT_SETTLE_INTERVAL, EngineSettings};
    use crate::sensor::mock::{MockBus, MockBusBehavior};
    use std::time::Duration;

    fn engine_with(bus: &MockBus) -> MeasurementEngine {
        MeasurementEngine::new(bus.clone(), EngineSettings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn current_value_is_newline_terminated() {
        let bus = MockBus::with_readings([556]);
        let engine = engine_with(&bus);

        assert_eq!(show_current_value(&engine).await, "556\n");
    }

    #[tokio::test(start_paused = true)]
    async fn current_value_is_empty_on_bus_failure() {
        let bus = MockBus::new(MockBusBehavior::fail_write());
        let engine = engine_with(&bus);

        assert_eq!(show_current_value(&engine).await, "");
    }

    #[tokio::test(start_paused = true)]
    async fn current_value_is_empty_while_bus_is_busy() {
        let bus = MockBus::with_readings([556]);
        let engine = engine_with(&bus);

        let token = engine.inner.command_lock.lock();
        let shown = show_current_value(&engine).await;
        drop(token);

        assert_eq!(shown, "");
        assert!(bus.ops().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cyclic_write_switches_continuous_mode() -> Result<(), AppError> {
        let bus = MockBus::with_readings([42]);
        let engine = engine_with(&bus);
        assert_eq!(show_cyclic(&engine), "-1\n");

        assert_eq!(store_cyclic(&engine, "1\n")?, 2);
        assert_eq!(show_cyclic(&engine), "0\n");

        tokio::time::sleep(DEFAULT_SETTLE_INTERVAL * 2 + Duration::from_millis(50)).await;
        assert_eq!(show_cyclic(&engine), "42\n");

        store_cyclic(&engine, "0")?;
        assert_eq!(show_cyclic(&engine), "-1\n");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn cyclic_write_rejects_garbage() {
        let bus = MockBus::new(MockBusBehavior::ok());
        let engine = engine_with(&bus);

        let result = store_cyclic(&engine, "on");

        assert!(matches!(result, Err(AppError::InvalidInput(_))));
        assert_eq!(show_cyclic(&engine), "-1\n");
    }

    #[test]
    fn current_value_store_reads_latched_registers_only() {
        let bus = MockBus::with_readings([77]);
        let engine = engine_with(&bus);

        assert_eq!(store_current_value(&engine, "5\n"), 2);
        assert_eq!(bus.ranging_commands(), 0);
        assert_eq!(bus.ops().len(), 2);
    }
}

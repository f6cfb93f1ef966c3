//! Poll context handed to the sensor framework.
//!
//! The framework's polling task calls [`PollContext::read_events`] in a loop and
//! expects it to park until a distance sample is available. Control calls arrive
//! from other tasks; [`WakeHandle`] lets them interrupt a parked poll.

use crate::engine::MeasurementEngine;
use crate::error::AppError;
use crate::events::{ChannelId, DistanceEvent, EventReceiver, PROXIMITY_CHANNEL};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tracing::{debug, info};

pub mod proximity;

use proximity::ProximityChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorType {
    Proximity,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorDescriptor {
    pub name: &'static str,
    pub vendor: &'static str,
    pub version: i32,
    pub handle: ChannelId,
    pub sensor_type: SensorType,
    pub max_range: f32,
    pub resolution: f32,
    pub power_ma: f32,
    pub min_delay_us: i32,
}

pub const SENSOR_LIST: [SensorDescriptor; 1] = [SensorDescriptor {
    name: "Proximity Sensor",
    vendor: "SRF",
    version: 1,
    handle: PROXIMITY_CHANNEL,
    sensor_type: SensorType::Proximity,
    max_range: 700.0,
    resolution: 1.0,
    power_ma: 0.23,
    min_delay_us: 10_000_000,
}];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorEvent {
    pub handle: ChannelId,
    pub sensor_type: SensorType,
    pub distance: f32,
    pub timestamp_ns: u64,
    pub sequence: u64,
}

impl From<DistanceEvent> for SensorEvent {
    fn from(event: DistanceEvent) -> Self {
        Self {
            handle: event.channel,
            sensor_type: SensorType::Proximity,
            distance: f32::from(event.distance),
            timestamp_ns: u64::try_from(event.timestamp.as_nanos()).unwrap_or(u64::MAX),
            sequence: event.sequence,
        }
    }
}

/// Switches the producer of the distance stream on and off.
pub trait ContinuousControl: Send + Sync {
    fn enable_continuous(&self) -> Result<(), AppError>;
    fn disable_continuous(&self) -> Result<(), AppError>;
}

impl ContinuousControl for MeasurementEngine {
    fn enable_continuous(&self) -> Result<(), AppError> {
        MeasurementEngine::enable_continuous(self)
    }

    fn disable_continuous(&self) -> Result<(), AppError> {
        MeasurementEngine::disable_continuous(self)
    }
}

/// Interrupts a parked [`PollContext::read_events`]. Cheap to clone.
#[derive(Clone, Default)]
pub struct WakeHandle {
    shared: Arc<WakeShared>,
}

#[derive(Default)]
struct WakeShared {
    notify: Notify,
    shutdown: AtomicBool,
}

impl WakeHandle {
    /// Make a parked poll re-check its channels. A wake with no waiter is kept for the next wait.
    pub fn wake(&self) {
        self.shared.notify.notify_one();
    }

    /// Make the current and every later poll return without waiting.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.notify.notify_one();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    fn notified(&self) -> Notified<'_> {
        self.shared.notify.notified()
    }
}

pub struct PollContext {
    proximity: ProximityChannel,
    controller: PollController,
}

impl PollContext {
    pub fn new(control: Arc<dyn ContinuousControl>, events: EventReceiver) -> Self {
        Self {
            proximity: ProximityChannel::new(events),
            controller: PollController {
                inner: Arc::new(ControllerInner {
                    control,
                    proximity_enabled: AtomicBool::new(false),
                    wake: WakeHandle::default(),
                }),
            },
        }
    }

    pub fn for_engine(engine: &MeasurementEngine) -> Self {
        Self::new(Arc::new(engine.clone()), engine.subscribe())
    }

    /// Handle for control calls made while this context is parked in a poll.
    pub fn controller(&self) -> PollController {
        self.controller.clone()
    }

    pub fn waker(&self) -> WakeHandle {
        self.controller.waker()
    }

    pub fn sensor_list(&self) -> &'static [SensorDescriptor] {
        &SENSOR_LIST
    }

    pub fn has_pending_events(&self) -> bool {
        self.proximity.has_pending_event()
    }

    /// Return up to `capacity` pending events, parking until at least one is available.
    ///
    /// A zero capacity never parks. A wake signal only makes the poll re-check;
    /// the result is empty only after [`WakeHandle::shutdown`].
    pub async fn read_events(&mut self, capacity: usize) -> Result<Vec<SensorEvent>, AppError> {
        let mut events = Vec::new();
        if capacity == 0 {
            return Ok(events);
        }
        let wake = &self.controller.inner.wake;
        loop {
            if let Some(event) = self.proximity.take_pending() {
                events.push(event);
            }
            if !events.is_empty() || wake.is_shutdown() {
                return Ok(events);
            }

            tokio::select! {
                changed = self.proximity.changed() => changed?,
                _ = wake.notified() => {
                    debug!("Poll wait interrupted by wake signal");
                }
            }
        }
    }

    pub fn activate(&self, handle: ChannelId, enabled: bool) -> Result<(), AppError> {
        self.controller.activate(handle, enabled)
    }

    pub fn is_active(&self, handle: ChannelId) -> Result<bool, AppError> {
        self.controller.is_active(handle)
    }

    pub fn set_delay(&self, handle: ChannelId, delay_ns: i64) -> Result<Infallible, AppError> {
        self.controller.set_delay(handle, delay_ns)
    }

    pub fn batch(&self, handle: ChannelId, period_ns: i64, timeout_ns: i64) -> Result<(), AppError> {
        self.controller.batch(handle, period_ns, timeout_ns)
    }

    pub fn flush(&self, handle: ChannelId) -> Result<(), AppError> {
        self.controller.flush(handle)
    }

    /// Release the context. Controllers and wake handles outliving it become inert.
    pub fn close(self) {
        self.controller.inner.wake.shutdown();
        info!("Poll context closed");
    }
}

/// Control half of a [`PollContext`]. Cheap to clone and usable from any task.
#[derive(Clone)]
pub struct PollController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    control: Arc<dyn ContinuousControl>,
    proximity_enabled: AtomicBool,
    wake: WakeHandle,
}

impl PollController {
    pub fn waker(&self) -> WakeHandle {
        self.inner.wake.clone()
    }

    pub fn sensor_list(&self) -> &'static [SensorDescriptor] {
        &SENSOR_LIST
    }

    pub fn activate(&self, handle: ChannelId, enabled: bool) -> Result<(), AppError> {
        check_handle(handle)?;
        if enabled {
            self.inner.control.enable_continuous()?;
        } else {
            self.inner.control.disable_continuous()?;
        }
        self.inner.proximity_enabled.store(enabled, Ordering::Release);
        info!(handle = handle, enabled = enabled, "Sensor activation changed");
        self.inner.wake.wake();
        Ok(())
    }

    pub fn is_active(&self, handle: ChannelId) -> Result<bool, AppError> {
        check_handle(handle)?;
        Ok(self.inner.proximity_enabled.load(Ordering::Acquire))
    }

    /// The sampling cadence is fixed by the ranging settle interval.
    pub fn set_delay(&self, handle: ChannelId, delay_ns: i64) -> Result<Infallible, AppError> {
        check_handle(handle)?;
        debug!(handle = handle, delay_ns = delay_ns, "Rejected sampling delay change");
        Err(AppError::NotSupported("sampling delay is fixed by the sensor"))
    }

    /// Accepted and ignored: there is no hardware FIFO to batch into.
    pub fn batch(&self, handle: ChannelId, period_ns: i64, timeout_ns: i64) -> Result<(), AppError> {
        check_handle(handle)?;
        debug!(
            handle = handle,
            period_ns = period_ns,
            timeout_ns = timeout_ns,
            "Batch request ignored"
        );
        Ok(())
    }

    pub fn flush(&self, handle: ChannelId) -> Result<(), AppError> {
        check_handle(handle)
    }
}

fn check_handle(handle: ChannelId) -> Result<(), AppError> {
    if SENSOR_LIST.iter().any(|sensor| sensor.handle == handle) {
        Ok(())
    } else {
        Err(AppError::UnknownHandle(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineSettings;
    use crate::events::EventEmitter;
    use crate::sensor::RangeReading;
    use crate::sensor::mock::MockBus;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingControl {
        calls: Mutex<Vec<bool>>,
    }

    impl ContinuousControl for RecordingControl {
        fn enable_continuous(&self) -> Result<(), AppError> {
            self.calls.lock().map_err(|_| AppError::StateLock)?.push(true);
            Ok(())
        }

        fn disable_continuous(&self) -> Result<(), AppError> {
            self.calls.lock().map_err(|_| AppError::StateLock)?.push(false);
            Ok(())
        }
    }

    fn context(emitter: &EventEmitter) -> (PollContext, Arc<RecordingControl>) {
        let control = Arc::new(RecordingControl::default());
        let context = PollContext::new(control.clone(), emitter.subscribe());
        (context, control)
    }

    #[tokio::test(start_paused = true)]
    async fn zero_capacity_returns_immediately() -> Result<(), AppError> {
        let emitter = EventEmitter::default();
        let (mut context, _control) = context(&emitter);

        assert!(context.read_events(0).await?.is_empty());

        emitter.emit(RangeReading::new(100));
        assert!(context.read_events(0).await?.is_empty());
        assert!(context.has_pending_events());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn pending_event_is_returned_and_cleared() -> Result<(), AppError> {
        let emitter = EventEmitter::default();
        let (mut context, _control) = context(&emitter);
        emitter.emit(RangeReading::new(250));

        let events = context.read_events(4).await?;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].distance, 250.0);
        assert_eq!(events[0].handle, PROXIMITY_CHANNEL);
        assert!(!context.has_pending_events());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn mailbox_keeps_only_newest_sample() -> Result<(), AppError> {
        let emitter = EventEmitter::default();
        let (mut context, _control) = context(&emitter);
        for distance in [100, 110, 120] {
            emitter.emit(RangeReading::new(distance));
        }

        let events = context.read_events(10).await?;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].distance, 120.0);
        assert_eq!(events[0].sequence, 3);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn read_parks_until_an_event_arrives() -> Result<(), AppError> {
        let emitter = EventEmitter::default();
        let (mut context, _control) = context(&emitter);

        let reader = tokio::spawn(async move { context.read_events(1).await });
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!reader.is_finished());

        emitter.emit(RangeReading::new(333));
        let events = reader
            .await
            .map_err(|err| AppError::Runtime(err.to_string()))??;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].distance, 333.0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn wake_rechecks_without_returning_empty() -> Result<(), AppError> {
        let emitter = EventEmitter::default();
        let (mut context, _control) = context(&emitter);
        let waker = context.waker();

        let reader = tokio::spawn(async move { context.read_events(1).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        waker.wake();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!reader.is_finished());

        emitter.emit(RangeReading::new(42));
        let events = reader
            .await
            .map_err(|err| AppError::Runtime(err.to_string()))??;
        assert_eq!(events.len(), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_releases_parked_reader_with_no_events() -> Result<(), AppError> {
        let emitter = EventEmitter::default();
        let (mut context, _control) = context(&emitter);
        let waker = context.waker();

        let reader = tokio::spawn(async move { context.read_events(1).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        waker.shutdown();

        let events = reader
            .await
            .map_err(|err| AppError::Runtime(err.to_string()))??;
        assert!(events.is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_poll_receives_engine_ticks() -> Result<(), AppError> {
        let bus = MockBus::with_readings([120, 135]);
        let engine = MeasurementEngine::new(bus.clone(), EngineSettings::default());
        let mut context = PollContext::for_engine(&engine);

        context.activate(PROXIMITY_CHANNEL, true)?;
        let first = tokio::time::timeout(Duration::from_secs(1), context.read_events(4))
            .await
            .map_err(|err| AppError::Runtime(err.to_string()))??;
        let second = tokio::time::timeout(Duration::from_secs(1), context.read_events(4))
            .await
            .map_err(|err| AppError::Runtime(err.to_string()))??;

        assert_eq!(first.len(), 1);
        assert_eq!(first[0].distance, 120.0);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].distance, 135.0);
        assert!(!context.has_pending_events());
        context.activate(PROXIMITY_CHANNEL, false)?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn final_sample_is_delivered_before_channel_closes() -> Result<(), AppError> {
        let emitter = EventEmitter::default();
        let (mut context, _control) = context(&emitter);
        emitter.emit(RangeReading::new(410));
        drop(emitter);

        assert!(context.has_pending_events());
        let events = context.read_events(1).await?;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].distance, 410.0);

        let result = context.read_events(1).await;
        assert!(matches!(result, Err(AppError::ChannelClosed)));
        Ok(())
    }

    #[test]
    fn samples_before_subscription_are_not_pending() {
        let emitter = EventEmitter::default();
        emitter.emit(RangeReading::new(90));

        let (context, _control) = context(&emitter);

        assert!(!context.has_pending_events());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_producer_closes_the_channel() {
        let emitter = EventEmitter::default();
        let (mut context, _control) = context(&emitter);
        drop(emitter);

        let result = context.read_events(1).await;

        assert!(matches!(result, Err(AppError::ChannelClosed)));
    }

    #[test]
    fn activate_routes_to_control() -> Result<(), AppError> {
        let emitter = EventEmitter::default();
        let (context, control) = context(&emitter);

        context.activate(PROXIMITY_CHANNEL, true)?;
        assert!(context.is_active(PROXIMITY_CHANNEL)?);
        context.activate(PROXIMITY_CHANNEL, false)?;

        let calls = control.calls.lock().map_err(|_| AppError::StateLock)?.clone();
        assert_eq!(calls, vec![true, false]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn controller_activates_while_poll_is_parked() -> Result<(), AppError> {
        let emitter = EventEmitter::default();
        let (mut context, control) = context(&emitter);
        let controller = context.controller();

        let reader = tokio::spawn(async move { context.read_events(1).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.activate(PROXIMITY_CHANNEL, true)?;
        assert!(controller.is_active(PROXIMITY_CHANNEL)?);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!reader.is_finished());

        controller.waker().shutdown();
        let events = reader
            .await
            .map_err(|err| AppError::Runtime(err.to_string()))??;
        assert!(events.is_empty());
        let calls = control.calls.lock().map_err(|_| AppError::StateLock)?.clone();
        assert_eq!(calls, vec![true]);
        Ok(())
    }

    #[test]
    fn set_delay_is_not_supported() {
        let emitter = EventEmitter::default();
        let (context, _control) = context(&emitter);

        let result = context.set_delay(PROXIMITY_CHANNEL, 20_000_000);

        assert!(matches!(result, Err(AppError::NotSupported(_))));
    }

    #[test]
    fn unknown_handle_is_rejected() {
        let emitter = EventEmitter::default();
        let (context, control) = context(&emitter);

        assert!(matches!(
            context.activate(7, true),
            Err(AppError::UnknownHandle(7))
        ));
        assert!(matches!(context.flush(7), Err(AppError::UnknownHandle(7))));
        assert!(context.batch(PROXIMITY_CHANNEL, 0, 0).is_ok());
        assert!(control.calls.lock().map(|calls| calls.is_empty()).unwrap_or(false));
    }

    #[test]
    fn sensor_list_describes_the_ranger() {
        let emitter = EventEmitter::default();
        let (context, _control) = context(&emitter);

        let list = context.sensor_list();

        assert_eq!(list.len(), 1);
        assert_eq!(list[0].vendor, "SRF");
        assert_eq!(list[0].max_range, 700.0);
        assert_eq!(list[0].sensor_type, SensorType::Proximity);
    }
}

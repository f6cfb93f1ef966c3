use crate::error::AppError;
use crate::events::{EventEmitter, EventReceiver, PROXIMITY_CHANNEL};
use crate::sensor::{
    COMMAND_REGISTER, RANGE_HIGH_REGISTER, RANGE_LOW_REGISTER, RangeBus, RangeReading, RangeUnit,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

pub mod attributes;
mod continuous;
pub mod device;
pub mod history;

use continuous::TaskControl;
use history::{COMMAND_LEN, CommandHistory};

pub const DEFAULT_SETTLE_INTERVAL: Duration = Duration::from_millis(100);

/// Value of the last-reading cell while continuous mode is off.
pub const LAST_READING_DISABLED: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementMode {
    Idle,
    OneShot,
    Continuous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Delay between the ranging command and a valid result, and between ticks.
    pub settle_interval: Duration,
    pub unit: RangeUnit,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            settle_interval: DEFAULT_SETTLE_INTERVAL,
            unit: RangeUnit::Centimeters,
        }
    }
}

/// Per-device measurement context. Cloning yields another handle to the same device.
#[derive(Clone)]
pub struct MeasurementEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    bus: Mutex<Box<dyn RangeBus>>,
    /// Serializes ranging command issuance only; never held across the settle wait.
    command_lock: Mutex<()>,
    settings: EngineSettings,
    last_reading: AtomicI32,
    schedule: Mutex<Schedule>,
    history: Mutex<CommandHistory>,
    device_open: AtomicBool,
    one_shots: AtomicUsize,
    emitter: EventEmitter,
}

#[derive(Default)]
struct Schedule {
    task: Option<Arc<TaskControl>>,
    next_task_id: u64,
    suspended: bool,
    resume_on_wake: bool,
}

impl Schedule {
    fn arm(&mut self) -> Arc<TaskControl> {
        self.next_task_id += 1;
        let control = Arc::new(TaskControl::new(self.next_task_id));
        self.task = Some(Arc::clone(&control));
        control
    }

    fn cancel(&mut self) -> bool {
        match self.task.take() {
            Some(control) => {
                control.disarm();
                true
            }
            None => false,
        }
    }
}

impl MeasurementEngine {
    pub fn new(bus: impl RangeBus + 'static, settings: EngineSettings) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                bus: Mutex::new(Box::new(bus)),
                command_lock: Mutex::new(()),
                settings,
                last_reading: AtomicI32::new(LAST_READING_DISABLED),
                schedule: Mutex::new(Schedule::default()),
                history: Mutex::new(CommandHistory::new()),
                device_open: AtomicBool::new(false),
                one_shots: AtomicUsize::new(0),
                emitter: EventEmitter::new(PROXIMITY_CHANNEL),
            }),
        }
    }

    pub fn settings(&self) -> EngineSettings {
        self.inner.settings
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.inner.emitter.subscribe()
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.inner.emitter
    }

    /// Read the software revision register to confirm the sensor answers.
    pub fn probe(&self) -> Result<u8, AppError> {
        let revision = self
            .inner
            .with_bus(|bus| bus.read_register(COMMAND_REGISTER))?;
        debug!(revision = revision, "SRF02 responded to probe");
        Ok(revision)
    }

    /// Run one ranging transaction on demand.
    ///
    /// Fails with [`AppError::Busy`] without touching the bus when another
    /// caller is issuing a ranging command. The lock is released before the
    /// settle wait, so an adversarially timed second caller may restart the
    /// ranging cycle before this caller reads its result.
    pub async fn read_once(&self) -> Result<RangeReading, AppError> {
        let _in_flight = OneShotGuard::enter(&self.inner.one_shots);
        let reading = self.inner.transact().await?;
        debug!(
            distance = reading.value(),
            unit = self.inner.settings.unit.as_str(),
            "One-shot measurement"
        );
        Ok(reading)
    }

    /// Latched result registers, read without starting a new ranging cycle.
    pub fn read_latched(&self) -> Result<RangeReading, AppError> {
        self.inner.read_result()
    }

    pub fn enable_continuous(&self) -> Result<(), AppError> {
        let runtime = Handle::try_current().map_err(|err| AppError::Runtime(err.to_string()))?;
        let mut schedule = self.inner.lock_schedule()?;
        if schedule.task.is_some() || (schedule.suspended && schedule.resume_on_wake) {
            debug!("Continuous measurement already enabled");
            return Ok(());
        }
        self.inner.last_reading.store(0, Ordering::Release);
        if schedule.suspended {
            schedule.resume_on_wake = true;
            info!("Continuous measurement enabled, deferred until resume");
            return Ok(());
        }
        let control = schedule.arm();
        drop(schedule);

        info!(
            task_id = control.id(),
            interval_ms = self.inner.settings.settle_interval.as_millis(),
            "Continuous measurement enabled"
        );
        continuous::spawn(&runtime, Arc::clone(&self.inner), control);
        Ok(())
    }

    pub fn disable_continuous(&self) -> Result<(), AppError> {
        let mut schedule = self.inner.lock_schedule()?;
        let cancelled = schedule.cancel();
        schedule.resume_on_wake = false;
        self.inner
            .last_reading
            .store(LAST_READING_DISABLED, Ordering::Release);
        drop(schedule);

        if cancelled {
            info!("Continuous measurement disabled");
        } else {
            debug!("Continuous measurement was not running");
        }
        Ok(())
    }

    pub fn read_last(&self) -> Result<RangeReading, AppError> {
        let raw = self.last_reading_raw();
        u16::try_from(raw)
            .map(RangeReading::new)
            .map_err(|_| AppError::Disabled)
    }

    /// The last-reading cell as stored: `-1` while disabled.
    pub fn last_reading_raw(&self) -> i32 {
        self.inner.last_reading.load(Ordering::Acquire)
    }

    pub fn mode(&self) -> MeasurementMode {
        let continuous = self
            .inner
            .schedule
            .lock()
            .map(|schedule| schedule.task.is_some())
            .unwrap_or(false);
        if continuous {
            MeasurementMode::Continuous
        } else if self.inner.one_shots.load(Ordering::Acquire) > 0 {
            MeasurementMode::OneShot
        } else {
            MeasurementMode::Idle
        }
    }

    /// Log a raw command record and forward it to the bus as register/value.
    pub fn append_command(&self, record: [u8; COMMAND_LEN]) -> Result<(), AppError> {
        self.inner
            .history
            .lock()
            .map_err(|_| AppError::StateLock)?
            .append(record);
        let [register, value] = record;
        self.inner
            .with_bus(|bus| bus.write_register(register, value))
            .inspect_err(|err| {
                warn!(
                    register = format_args!("{register:#04x}"),
                    value = format_args!("{value:#04x}"),
                    error = %err,
                    "Raw command write failed"
                );
            })
    }

    pub fn read_command_history(&self, max_len: usize) -> Result<Vec<u8>, AppError> {
        let history = self.inner.history.lock().map_err(|_| AppError::StateLock)?;
        Ok(history.read(max_len))
    }

    /// Stop the background poll for a system suspend, remembering whether to re-arm it.
    pub fn suspend(&self) -> Result<(), AppError> {
        let mut schedule = self.inner.lock_schedule()?;
        if schedule.suspended {
            return Ok(());
        }
        schedule.suspended = true;
        schedule.resume_on_wake = schedule.cancel();
        info!(rearm = schedule.resume_on_wake, "Measurement engine suspended");
        Ok(())
    }

    pub fn resume(&self) -> Result<(), AppError> {
        let runtime = Handle::try_current().map_err(|err| AppError::Runtime(err.to_string()))?;
        let mut schedule = self.inner.lock_schedule()?;
        if !schedule.suspended {
            return Ok(());
        }
        schedule.suspended = false;
        if !std::mem::take(&mut schedule.resume_on_wake) {
            info!("Measurement engine resumed");
            return Ok(());
        }
        let control = schedule.arm();
        drop(schedule);
        info!(task_id = control.id(), "Measurement engine resumed, continuous measurement re-armed");
        continuous::spawn(&runtime, Arc::clone(&self.inner), control);
        Ok(())
    }

    /// Tear down on device removal.
    pub fn detach(&self) -> Result<(), AppError> {
        self.disable_continuous()?;
        info!("Measurement engine detached");
        Ok(())
    }
}

struct OneShotGuard<'a>(&'a AtomicUsize);

impl<'a> OneShotGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for OneShotGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl EngineInner {
    fn lock_schedule(&self) -> Result<MutexGuard<'_, Schedule>, AppError> {
        self.schedule.lock().map_err(|_| AppError::StateLock)
    }

    fn with_bus<T>(
        &self,
        op: impl FnOnce(&mut Box<dyn RangeBus>) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let mut bus = self.bus.lock().map_err(|_| AppError::StateLock)?;
        op(&mut bus)
    }

    /// Issue the ranging command under the non-blocking command lock.
    fn start_ranging(&self) -> Result<(), AppError> {
        let _token = match self.command_lock.try_lock() {
            Ok(token) => token,
            Err(TryLockError::WouldBlock) => return Err(AppError::Busy),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        let command = self.settings.unit.ranging_command();
        self.with_bus(|bus| bus.write_register(COMMAND_REGISTER, command))
    }

    fn read_result(&self) -> Result<RangeReading, AppError> {
        self.with_bus(|bus| {
            let high = bus.read_register(RANGE_HIGH_REGISTER)?;
            let low = bus.read_register(RANGE_LOW_REGISTER)?;
            Ok(RangeReading::from_registers(high, low))
        })
    }

    /// Both bus phases run on the blocking pool; only the settle wait stays on the runtime.
    async fn transact(self: &Arc<Self>) -> Result<RangeReading, AppError> {
        let inner = Arc::clone(self);
        run_blocking(move || inner.start_ranging()).await?;
        tokio::time::sleep(self.settings.settle_interval).await;
        let inner = Arc::clone(self);
        run_blocking(move || inner.read_result()).await
    }
}

async fn run_blocking<T: Send + 'static>(
    op: impl FnOnce() -> Result<T, AppError> + Send + 'static,
) -> Result<T, AppError> {
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|err| AppError::Runtime(err.to_string()))?
}

use super::EngineInner;
use crate::error::AppError;
use crate::sensor::RangeReading;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Armed/cancelled state shared between the schedule and one running task.
pub(super) struct TaskControl {
    id: u64,
    armed: AtomicBool,
    cancel: Notify,
}

impl TaskControl {
    pub(super) fn new(id: u64) -> Self {
        Self {
            id,
            armed: AtomicBool::new(true),
            cancel: Notify::new(),
        }
    }

    pub(super) fn id(&self) -> u64 {
        self.id
    }

    fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Must be called with the schedule lock held so publishing cannot race it.
    pub(super) fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
        self.cancel.notify_one();
    }
}

pub(super) fn spawn(runtime: &Handle, inner: Arc<EngineInner>, control: Arc<TaskControl>) {
    runtime.spawn(run(inner, control));
}

async fn run(inner: Arc<EngineInner>, control: Arc<TaskControl>) {
    let mut consecutive_failures: u32 = 0;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(inner.settings.settle_interval) => {}
            _ = control.cancel.notified() => break,
        }
        if !control.is_armed() {
            break;
        }

        // A tick in flight finishes its bus transaction even if cancelled meanwhile.
        match inner.transact().await {
            Ok(reading) => {
                consecutive_failures = 0;
                inner.publish(&control, reading);
            }
            Err(AppError::Busy) => {
                debug!(task_id = control.id, "Bus busy, skipping continuous tick");
            }
            Err(err) => {
                consecutive_failures = consecutive_failures.saturating_add(1);
                warn!(
                    task_id = control.id,
                    consecutive_failures = consecutive_failures,
                    error = %err,
                    "Continuous measurement failed, rescheduling"
                );
            }
        }

        if !control.is_armed() {
            break;
        }
    }
    debug!(task_id = control.id, "Continuous measurement task stopped");
}

impl EngineInner {
    fn publish(&self, control: &TaskControl, reading: RangeReading) {
        let Ok(_schedule) = self.schedule.lock() else {
            warn!("Schedule lock poisoned, dropping continuous reading");
            return;
        };
        if !control.is_armed() {
            return;
        }
        self.last_reading
            .store(i32::from(reading.value()), Ordering::Release);
        let event = self.emitter.emit(reading);

        if !reading.is_within_sensor_range() {
            debug!(
                distance = reading.value(),
                sequence = event.sequence,
                "Reading outside documented sensor range"
            );
        }
    }
}

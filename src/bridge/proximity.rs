use crate::bridge::SensorEvent;
use crate::error::AppError;
use crate::events::EventReceiver;

/// Consumer end of the distance mailbox: at most one undelivered event at a time.
///
/// Delivery is tracked by event sequence rather than the receiver's seen flag,
/// so a sample observed while waiting, or left behind by a dropped producer,
/// is still handed out once.
pub struct ProximityChannel {
    receiver: EventReceiver,
    delivered: u64,
}

impl ProximityChannel {
    /// Samples emitted before subscription are not pending.
    pub fn new(receiver: EventReceiver) -> Self {
        let delivered = receiver.borrow().as_ref().map_or(0, |event| event.sequence);
        Self {
            receiver,
            delivered,
        }
    }

    pub fn has_pending_event(&self) -> bool {
        self.receiver
            .borrow()
            .as_ref()
            .is_some_and(|event| event.sequence > self.delivered)
    }

    /// Copy out the pending event and mark it delivered.
    pub fn take_pending(&mut self) -> Option<SensorEvent> {
        let event = (*self.receiver.borrow_and_update())?;
        if event.sequence <= self.delivered {
            return None;
        }
        self.delivered = event.sequence;
        Some(SensorEvent::from(event))
    }

    pub async fn changed(&mut self) -> Result<(), AppError> {
        self.receiver
            .changed()
            .await
            .map_err(|_| AppError::ChannelClosed)
    }
}

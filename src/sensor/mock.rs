use crate::error::AppError;
use crate::sensor::{COMMAND_REGISTER, RANGE_HIGH_REGISTER, RANGE_LOW_REGISTER, RangeBus};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

pub const MOCK_SOFTWARE_REVISION: u8 = 6;

#[derive(Debug, Clone, Copy)]
pub struct MockBusBehavior {
    pub write_ok: bool,
    pub read_ok: bool,
    pub revision: u8,
}

impl MockBusBehavior {
    pub fn ok() -> Self {
        Self {
            write_ok: true,
            read_ok: true,
            revision: MOCK_SOFTWARE_REVISION,
        }
    }

    pub fn fail_write() -> Self {
        Self {
            write_ok: false,
            read_ok: true,
            revision: MOCK_SOFTWARE_REVISION,
        }
    }

    pub fn fail_read() -> Self {
        Self {
            write_ok: true,
            read_ok: false,
            revision: MOCK_SOFTWARE_REVISION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOp {
    Write { register: u8, value: u8 },
    Read { register: u8 },
}

/// Simulated SRF02 on a shared handle: clones observe the same registers and op log.
#[derive(Clone)]
pub struct MockBus {
    inner: Arc<Mutex<MockBusInner>>,
    gate: Arc<WriteGate>,
}

struct MockBusInner {
    behavior: MockBusBehavior,
    pending: VecDeque<u16>,
    latched: u16,
    ops: Vec<BusOp>,
    looping: bool,
}

impl MockBusInner {
    fn record(&mut self, op: BusOp) {
        if !self.looping {
            self.ops.push(op);
        }
    }
}

#[derive(Default)]
struct WriteGate {
    state: Mutex<GateState>,
    released: Condvar,
}

#[derive(Default)]
struct GateState {
    held: bool,
    waiting: usize,
}

impl MockBus {
    pub fn new(behavior: MockBusBehavior) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockBusInner {
                behavior,
                pending: VecDeque::new(),
                latched: 0,
                ops: Vec::new(),
                looping: false,
            })),
            gate: Arc::new(WriteGate::default()),
        }
    }

    /// Each ranging command latches the next value; the last one repeats once exhausted.
    pub fn with_readings(readings: impl IntoIterator<Item = u16>) -> Self {
        let bus = Self::new(MockBusBehavior::ok());
        bus.lock().pending.extend(readings);
        bus
    }

    /// Endless replay of `readings` for running without hardware. Keeps no op log.
    pub fn looping(readings: impl IntoIterator<Item = u16>) -> Self {
        let bus = Self::new(MockBusBehavior::ok());
        {
            let mut inner = bus.lock();
            inner.pending.extend(readings);
            inner.looping = true;
        }
        bus
    }

    pub fn set_behavior(&self, behavior: MockBusBehavior) {
        self.lock().behavior = behavior;
    }

    pub fn ops(&self) -> Vec<BusOp> {
        self.lock().ops.clone()
    }

    pub fn writes(&self) -> Vec<(u8, u8)> {
        self.lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                BusOp::Write { register, value } => Some((*register, *value)),
                BusOp::Read { .. } => None,
            })
            .collect()
    }

    pub fn ranging_commands(&self) -> usize {
        self.writes()
            .iter()
            .filter(|(register, value)| *register == COMMAND_REGISTER && is_ranging(*value))
            .count()
    }

    /// Block every writer inside `write_register` until `release_writes`.
    pub fn hold_writes(&self) {
        self.gate_state().held = true;
    }

    pub fn release_writes(&self) {
        self.gate_state().held = false;
        self.gate.released.notify_all();
    }

    pub fn waiting_writers(&self) -> usize {
        self.gate_state().waiting
    }

    fn lock(&self) -> MutexGuard<'_, MockBusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn gate_state(&self) -> MutexGuard<'_, GateState> {
        self.gate.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_at_gate(&self) {
        let mut state = self.gate_state();
        if !state.held {
            return;
        }
        state.waiting += 1;
        while state.held {
            state = self
                .gate
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.waiting -= 1;
    }
}

fn is_ranging(value: u8) -> bool {
    (0x50..=0x52).contains(&value)
}

impl RangeBus for MockBus {
    fn write_register(&mut self, register: u8, value: u8) -> Result<(), AppError> {
        {
            let mut inner = self.lock();
            inner.record(BusOp::Write { register, value });
            if !inner.behavior.write_ok {
                return Err(AppError::BusTransactionFailed(
                    "mock write failed".to_string(),
                ));
            }
            if register == COMMAND_REGISTER
                && is_ranging(value)
                && let Some(next) = inner.pending.pop_front()
            {
                inner.latched = next;
                if inner.looping {
                    inner.pending.push_back(next);
                }
            }
        }
        self.wait_at_gate();
        Ok(())
    }

    fn read_register(&mut self, register: u8) -> Result<u8, AppError> {
        let mut inner = self.lock();
        inner.record(BusOp::Read { register });
        if !inner.behavior.read_ok {
            return Err(AppError::BusTransactionFailed(
                "mock read failed".to_string(),
            ));
        }
        let [high, low] = inner.latched.to_be_bytes();
        Ok(match register {
            COMMAND_REGISTER => inner.behavior.revision,
            RANGE_HIGH_REGISTER => high,
            RANGE_LOW_REGISTER => low,
            _ => 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looping_bus_replays_readings_without_logging() -> Result<(), AppError> {
        let mut bus = MockBus::looping([10, 20]);

        let mut seen = Vec::new();
        for _ in 0..3 {
            bus.write_register(COMMAND_REGISTER, 0x51)?;
            let high = bus.read_register(RANGE_HIGH_REGISTER)?;
            let low = bus.read_register(RANGE_LOW_REGISTER)?;
            seen.push(u16::from_be_bytes([high, low]));
        }

        assert_eq!(seen, vec![10, 20, 10]);
        assert!(bus.ops().is_empty());
        Ok(())
    }

    #[test]
    fn ranging_command_latches_next_reading() -> Result<(), AppError> {
        let mut bus = MockBus::with_readings([556, 40]);

        bus.write_register(COMMAND_REGISTER, 0x51)?;
        assert_eq!(bus.read_register(RANGE_HIGH_REGISTER)?, 2);
        assert_eq!(bus.read_register(RANGE_LOW_REGISTER)?, 44);

        bus.write_register(COMMAND_REGISTER, 0x51)?;
        bus.write_register(COMMAND_REGISTER, 0x51)?;
        assert_eq!(bus.read_register(RANGE_LOW_REGISTER)?, 40);
        assert_eq!(bus.ranging_commands(), 3);
        Ok(())
    }

    #[test]
    fn read_can_fail() {
        let mut bus = MockBus::new(MockBusBehavior::fail_read());

        let err = bus.read_register(RANGE_HIGH_REGISTER).unwrap_err();

        assert_eq!(err.to_string(), "bus transaction failed: mock read failed");
        assert_eq!(bus.ops(), vec![BusOp::Read { register: 0x02 }]);
    }

    #[test]
    fn non_ranging_write_does_not_latch() -> Result<(), AppError> {
        let mut bus = MockBus::with_readings([300]);

        bus.write_register(0x05, 0x51)?;

        assert_eq!(bus.read_register(RANGE_LOW_REGISTER)?, 0);
        assert_eq!(bus.writes(), vec![(0x05, 0x51)]);
        Ok(())
    }
}

pub const HISTORY_CAPACITY: usize = 64;
pub const COMMAND_LEN: usize = 2;

/// Circular log of raw 2-byte command records written through the device node.
#[derive(Debug, Clone)]
pub struct CommandHistory {
    buffer: [u8; HISTORY_CAPACITY],
    offset: usize,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self {
            buffer: [0; HISTORY_CAPACITY],
            offset: 0,
        }
    }

    /// Next write position. Always even, wraps to 0 exactly at capacity.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn append(&mut self, record: [u8; COMMAND_LEN]) {
        self.buffer[self.offset..self.offset + COMMAND_LEN].copy_from_slice(&record);
        self.offset = (self.offset + COMMAND_LEN) % HISTORY_CAPACITY;
    }

    /// Copy up to `max_len` bytes (capped at capacity).
    ///
    /// When more bytes are requested than have been written since the last
    /// wrap, the result is the written prefix followed by the matching tail
    /// from the end of the buffer.
    pub fn read(&self, max_len: usize) -> Vec<u8> {
        let len = max_len.min(HISTORY_CAPACITY);
        if len <= self.offset {
            return self.buffer[..len].to_vec();
        }
        let tail = len - self.offset;
        let mut out = Vec::with_capacity(len);
        out.extend_from_slice(&self.buffer[..self.offset]);
        out.extend_from_slice(&self.buffer[HISTORY_CAPACITY - tail..]);
        out
    }
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: usize) -> [u8; COMMAND_LEN] {
        [index as u8, 0x80 | index as u8]
    }

    #[test]
    fn sequential_writes_read_back_in_order() {
        let mut history = CommandHistory::new();
        for index in 1..=5 {
            history.append(record(index));
        }

        let expected: Vec<u8> = (1..=5).flat_map(record).collect();
        assert_eq!(history.read(10), expected);
        assert_eq!(history.offset(), 10);
    }

    #[test]
    fn offset_wraps_exactly_at_capacity() {
        let mut history = CommandHistory::new();
        for index in 0..HISTORY_CAPACITY / COMMAND_LEN {
            history.append(record(index));
        }
        assert_eq!(history.offset(), 0);

        let full = history.read(HISTORY_CAPACITY);
        let expected: Vec<u8> = (0..HISTORY_CAPACITY / COMMAND_LEN).flat_map(record).collect();
        assert_eq!(full, expected);
    }

    #[test]
    fn wrapped_read_overwrites_oldest_bytes() {
        let mut history = CommandHistory::new();
        // 35 records = 70 bytes against a 64-byte buffer.
        for index in 1..=35 {
            history.append(record(index));
        }
        assert_eq!(history.offset(), 6);

        let read = history.read(HISTORY_CAPACITY);

        let newest: Vec<u8> = (33..=35).flat_map(record).collect();
        let survivors: Vec<u8> = (4..=32).flat_map(record).collect();
        assert_eq!(&read[..6], newest.as_slice());
        assert_eq!(&read[6..], survivors.as_slice());
        for overwritten in 1..=3 {
            assert!(!read.chunks(COMMAND_LEN).any(|chunk| chunk == record(overwritten)));
        }
    }

    #[test]
    fn read_is_capped_at_capacity() {
        let mut history = CommandHistory::new();
        history.append(record(1));

        let read = history.read(1000);

        assert_eq!(read.len(), HISTORY_CAPACITY);
        assert_eq!(&read[..2], &record(1));
        assert!(read[2..].iter().all(|byte| *byte == 0));
    }

    #[test]
    fn zero_length_read_is_empty() {
        let mut history = CommandHistory::new();
        history.append(record(1));
        assert!(history.read(0).is_empty());
    }
}

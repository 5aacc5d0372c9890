use binary_heap_plus::{BinaryHeap, MinComparator};
use nanoserde::{DeBin, DeBinErr, SerBin};
use std::cmp::Ordering;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum EventType {
    /// End of the visible part of a scanline (cycle 960 of 1232).
    HBlankStart = 0,
    /// End of a full scanline, which is also the start of the next one.
    ScanlineEnd = 1,
    ApuSample = 2,
    Timer0Overflow = 3,
    Timer1Overflow = 4,
    Timer2Overflow = 5,
    Timer3Overflow = 6,
    Dma0Activate = 7,
    Dma1Activate = 8,
    Dma2Activate = 9,
    Dma3Activate = 10,
}

impl EventType {
    pub fn timer_overflow(id: usize) -> EventType {
        match id {
            0 => EventType::Timer0Overflow,
            1 => EventType::Timer1Overflow,
            2 => EventType::Timer2Overflow,
            3 => EventType::Timer3Overflow,
            _ => panic!("There are only four timers, got id: {}", id),
        }
    }

    pub fn dma_activate(channel: usize) -> EventType {
        match channel {
            0 => EventType::Dma0Activate,
            1 => EventType::Dma1Activate,
            2 => EventType::Dma2Activate,
            3 => EventType::Dma3Activate,
            _ => panic!("There are only four DMA channels, got: {}", channel),
        }
    }

    fn from_u8(value: u8) -> EventType {
        match value {
            0 => EventType::HBlankStart,
            1 => EventType::ScanlineEnd,
            2 => EventType::ApuSample,
            3 => EventType::Timer0Overflow,
            4 => EventType::Timer1Overflow,
            5 => EventType::Timer2Overflow,
            6 => EventType::Timer3Overflow,
            7 => EventType::Dma0Activate,
            8 => EventType::Dma1Activate,
            9 => EventType::Dma2Activate,
            10 => EventType::Dma3Activate,
            _ => panic!("Corrupt event type in save state: {}", value),
        }
    }
}

impl SerBin for EventType {
    fn ser_bin(&self, output: &mut Vec<u8>) {
        (*self as u8).ser_bin(output);
    }
}

impl DeBin for EventType {
    fn de_bin(offset: &mut usize, bytes: &[u8]) -> Result<Self, DeBinErr> {
        Ok(EventType::from_u8(u8::de_bin(offset, bytes)?))
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Event {
    pub timestamp: u64,
    pub event_type: EventType,
    /// Insertion order, used to break ties between events with equal timestamps.
    sequence: u64,
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then(self.sequence.cmp(&other.sequence))
    }
}

#[derive(Debug)]
pub struct Scheduler {
    // Want the smallest timestamp first, so MinComparator
    event_queue: BinaryHeap<Event, MinComparator>,
    pub current_time: u64,
    next_sequence: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            event_queue: BinaryHeap::with_capacity_min(64),
            current_time: 0,
            next_sequence: 0,
        }
    }

    /// Pop the earliest event, provided its timestamp is at or below `horizon`.
    pub fn pop_due(&mut self, horizon: u64) -> Option<Event> {
        if let Some(event) = self.event_queue.peek() {
            if event.timestamp <= horizon {
                return self.event_queue.pop();
            }
        }
        None
    }

    /// Add a new event to the `Scheduler` at an absolute timestamp.
    pub fn push_event(&mut self, event_type: EventType, timestamp: u64) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.event_queue.push(Event {
            timestamp,
            event_type,
            sequence,
        });
    }

    pub fn push_relative(&mut self, event_type: EventType, relative_timestamp: u64) {
        self.push_event(event_type, self.current_time + relative_timestamp);
    }

    /// Drop all pending events of the given type.
    ///
    /// Used whenever a timer or DMA channel is reprogrammed. A linear rebuild of the
    /// heap is plenty, the queue holds a few dozen entries at most.
    pub fn remove_event_type(&mut self, event_type: EventType) {
        self.event_queue = BinaryHeap::from_vec(
            self.event_queue
                .clone()
                .into_iter()
                .filter(|e| e.event_type != event_type)
                .collect(),
        );
    }

    /// The timestamp of the earliest pending event, or `u64::MAX` when the queue is empty.
    pub fn next_event_time(&self) -> u64 {
        self.event_queue.peek().map_or(u64::MAX, |e| e.timestamp)
    }

    /// Jump `current_time` forward to the next pending event.
    ///
    /// This is how a halted CPU passes time: nothing but events can advance the clock.
    pub fn skip_to_next_event(&mut self) {
        let next = self.next_event_time();
        if next != u64::MAX && next > self.current_time {
            self.current_time = next;
        }
    }

    #[inline]
    pub fn add_cycles(&mut self, delta_cycles: u64) {
        self.current_time += delta_cycles;
    }
}

impl SerBin for Scheduler {
    fn ser_bin(&self, output: &mut Vec<u8>) {
        self.current_time.ser_bin(output);
        self.next_sequence.ser_bin(output);
        let events = self.event_queue.clone().into_vec();
        events.len().ser_bin(output);
        for event in events {
            event.timestamp.ser_bin(output);
            event.event_type.ser_bin(output);
            event.sequence.ser_bin(output);
        }
    }
}

impl DeBin for Scheduler {
    fn de_bin(offset: &mut usize, bytes: &[u8]) -> Result<Self, DeBinErr> {
        let current_time = u64::de_bin(offset, bytes)?;
        let next_sequence = u64::de_bin(offset, bytes)?;
        let len = usize::de_bin(offset, bytes)?;
        let mut events = Vec::with_capacity(len);
        for _ in 0..len {
            events.push(Event {
                timestamp: u64::de_bin(offset, bytes)?,
                event_type: EventType::de_bin(offset, bytes)?,
                sequence: u64::de_bin(offset, bytes)?,
            });
        }
        Ok(Scheduler {
            event_queue: BinaryHeap::from_vec(events),
            current_time,
            next_sequence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_order() {
        let mut scheduler = Scheduler::new();
        scheduler.push_event(EventType::ScanlineEnd, 1232);
        scheduler.push_event(EventType::HBlankStart, 960);
        scheduler.push_event(EventType::ApuSample, 512);

        scheduler.current_time = 2000;

        assert_eq!(scheduler.pop_due(2000).unwrap().event_type, EventType::ApuSample);
        assert_eq!(scheduler.pop_due(2000).unwrap().event_type, EventType::HBlankStart);
        assert_eq!(scheduler.pop_due(2000).unwrap().event_type, EventType::ScanlineEnd);
        assert!(scheduler.pop_due(2000).is_none());
    }

    #[test]
    fn test_ties_broken_by_insertion_order() {
        let mut scheduler = Scheduler::new();
        scheduler.push_event(EventType::Timer1Overflow, 100);
        scheduler.push_event(EventType::Timer0Overflow, 100);
        scheduler.push_event(EventType::Timer2Overflow, 100);

        assert_eq!(scheduler.pop_due(100).unwrap().event_type, EventType::Timer1Overflow);
        assert_eq!(scheduler.pop_due(100).unwrap().event_type, EventType::Timer0Overflow);
        assert_eq!(scheduler.pop_due(100).unwrap().event_type, EventType::Timer2Overflow);
    }

    #[test]
    fn test_nothing_due_before_horizon() {
        let mut scheduler = Scheduler::new();
        scheduler.push_event(EventType::HBlankStart, 960);

        assert!(scheduler.pop_due(959).is_none());
        assert_eq!(scheduler.next_event_time(), 960);
    }

    #[test]
    fn test_remove_event_type() {
        let mut scheduler = Scheduler::new();
        scheduler.push_event(EventType::Timer0Overflow, 10);
        scheduler.push_event(EventType::HBlankStart, 20);
        scheduler.push_event(EventType::Timer0Overflow, 30);

        scheduler.remove_event_type(EventType::Timer0Overflow);

        assert_eq!(scheduler.pop_due(u64::MAX).unwrap().event_type, EventType::HBlankStart);
        assert!(scheduler.pop_due(u64::MAX).is_none());
    }

    #[test]
    fn test_skip_to_next_event() {
        let mut scheduler = Scheduler::new();
        scheduler.push_event(EventType::ApuSample, 380);
        scheduler.skip_to_next_event();

        assert_eq!(scheduler.current_time, 380);

        // Skipping never moves the clock backwards.
        scheduler.current_time = 500;
        scheduler.skip_to_next_event();
        assert_eq!(scheduler.current_time, 500);
    }
}

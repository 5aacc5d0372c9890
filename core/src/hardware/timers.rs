use crate::io::interrupts::{InterruptFlags, Interrupts};
use crate::scheduler::{EventType, Scheduler};
use nanoserde::{DeBin, DeBinErr, SerBin};
use num_integer::Integer;
use tinyvec::ArrayVec;

/// Prescaler selections as a shift amount: /1, /64, /256, /1024.
const RATE_SHIFTS: [u32; 4] = [0, 6, 8, 10];
/// A timer starts counting two cycles after its enable bit is set.
const STARTUP_DELAY: u64 = 2;

#[derive(Debug, Default, Clone, Copy, SerBin, DeBin)]
pub struct Timer {
    /// One bit wider than the register so a cascade increment can observe the wrap.
    counter: u32,
    reload: u16,
    control: u16,
    /// Timestamp the counter was last synchronised against the scheduler clock.
    set_time: u64,
}

impl Timer {
    fn rate_shift(&self) -> u32 {
        RATE_SHIFTS[(self.control & 0x3) as usize]
    }

    pub fn countup(&self) -> bool {
        self.control & 0x04 != 0
    }

    fn irq_enabled(&self) -> bool {
        self.control & 0x40 != 0
    }

    pub fn enabled(&self) -> bool {
        self.control & 0x80 != 0
    }
}

/// The four cascadable 16 bit timers.
///
/// Running timers do not tick anywhere: the overflow moment is computed up
/// front and parked in the scheduler, and the counter value is only
/// materialised when software actually reads it.
#[derive(Debug, Default, Clone)]
pub struct Timers {
    timers: [Timer; 4],
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads of `TM*CNT_L` return the counter as it stands *now*.
    pub fn read_counter(&mut self, id: usize, scheduler: &Scheduler) -> u16 {
        self.synchronise(id, scheduler.current_time);
        self.timers[id].counter as u16
    }

    pub fn read_control(&self, id: usize) -> u16 {
        self.timers[id].control
    }

    /// Writes to `TM*CNT_L` set the reload value, not the live counter.
    pub fn write_reload(&mut self, id: usize, value: u16) {
        self.timers[id].reload = value;
    }

    pub fn reload(&self, id: usize) -> u16 {
        self.timers[id].reload
    }

    pub fn write_control(&mut self, id: usize, value: u16, scheduler: &mut Scheduler) {
        let was_enabled = self.timers[id].enabled();
        // Bring the counter up to date under the *old* prescaler first.
        self.synchronise(id, scheduler.current_time);

        self.timers[id].control = value & 0x00C7;

        if !was_enabled && self.timers[id].enabled() {
            self.timers[id].counter = self.timers[id].reload as u32;
            self.timers[id].set_time = scheduler.current_time + STARTUP_DELAY;
        }
        self.reschedule(id, scheduler);
    }

    /// Catch the counter up with elapsed prescaler ticks since the last sync.
    fn synchronise(&mut self, id: usize, now: u64) {
        let timer = &mut self.timers[id];
        if !timer.enabled() || timer.countup() {
            timer.set_time = now;
            return;
        }
        // Inside the startup delay `set_time` still lies in the future.
        if now <= timer.set_time {
            return;
        }
        let shift = timer.rate_shift();
        timer.counter += ((now >> shift) - (timer.set_time >> shift)) as u32;
        timer.set_time = now;
    }

    /// Drop and re-create the pending overflow event for this timer.
    ///
    /// The overflow fires at `set_time + ((0x10000 - counter) << prescaler)`,
    /// snapped down to a prescaler boundary.
    fn reschedule(&mut self, id: usize, scheduler: &mut Scheduler) {
        scheduler.remove_event_type(EventType::timer_overflow(id));

        let timer = &self.timers[id];
        if !timer.enabled() || timer.countup() {
            return;
        }
        let shift = timer.rate_shift();
        let ticks_left = (0x1_0000 - timer.counter) as u64;
        let overflow_time = (timer.set_time + (ticks_left << shift)).prev_multiple_of(&(1u64 << shift));
        scheduler.push_event(EventType::timer_overflow(id), overflow_time);
    }

    /// Handle a scheduled overflow of timer `id`. Returns every timer index
    /// that overflowed (the countup chain can ripple several deep), so the
    /// caller can drive the audio FIFOs.
    pub fn handle_overflow(
        &mut self,
        id: usize,
        scheduler: &mut Scheduler,
        interrupts: &mut Interrupts,
    ) -> ArrayVec<[u8; 4]> {
        let mut overflowed = ArrayVec::new();
        self.reload_timer(id, scheduler, interrupts, &mut overflowed);
        overflowed
    }

    fn reload_timer(
        &mut self,
        id: usize,
        scheduler: &mut Scheduler,
        interrupts: &mut Interrupts,
        overflowed: &mut ArrayVec<[u8; 4]>,
    ) {
        self.timers[id].counter = self.timers[id].reload as u32;
        self.timers[id].set_time = scheduler.current_time;
        self.reschedule(id, scheduler);

        if self.timers[id].irq_enabled() {
            interrupts.raise(InterruptFlags::timer(id));
        }
        overflowed.push(id as u8);

        if id + 1 < 4 && self.timers[id + 1].enabled() && self.timers[id + 1].countup() {
            self.timers[id + 1].counter += 1;
            if self.timers[id + 1].counter == 0x1_0000 {
                self.reload_timer(id + 1, scheduler, interrupts, overflowed);
            }
        }
    }
}

impl SerBin for Timers {
    fn ser_bin(&self, output: &mut Vec<u8>) {
        for timer in &self.timers {
            timer.ser_bin(output);
        }
    }
}

impl DeBin for Timers {
    fn de_bin(offset: &mut usize, bytes: &[u8]) -> Result<Self, DeBinErr> {
        let mut timers = Timers::default();
        for timer in &mut timers.timers {
            *timer = Timer::de_bin(offset, bytes)?;
        }
        Ok(timers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_due_overflows(timers: &mut Timers, scheduler: &mut Scheduler, interrupts: &mut Interrupts) {
        let horizon = scheduler.current_time;
        while let Some(event) = scheduler.pop_due(horizon) {
            scheduler.current_time = event.timestamp;
            let id = match event.event_type {
                EventType::Timer0Overflow => 0,
                EventType::Timer1Overflow => 1,
                EventType::Timer2Overflow => 2,
                EventType::Timer3Overflow => 3,
                _ => unreachable!(),
            };
            timers.handle_overflow(id, scheduler, interrupts);
        }
        scheduler.current_time = horizon;
    }

    #[test]
    fn test_overflow_event_time_formula() {
        let mut timers = Timers::new();
        let mut scheduler = Scheduler::new();
        scheduler.current_time = 123;

        timers.write_reload(0, 0xC000);
        // Enable with /64 prescaler.
        timers.write_control(0, 0x0081, &mut scheduler);

        let set_time = 123 + STARTUP_DELAY;
        let expected = (set_time + ((0x1_0000 - 0xC000) << 6)) & !63;
        assert_eq!(scheduler.next_event_time(), expected);
    }

    #[test]
    fn test_counter_read_counts_elapsed_time() {
        let mut timers = Timers::new();
        let mut scheduler = Scheduler::new();

        timers.write_reload(0, 0);
        timers.write_control(0, 0x0080, &mut scheduler);

        scheduler.current_time = STARTUP_DELAY + 100;
        assert_eq!(timers.read_counter(0, &scheduler), 100);
    }

    #[test]
    fn test_countup_cascade() {
        let mut timers = Timers::new();
        let mut scheduler = Scheduler::new();
        let mut interrupts = Interrupts::default();
        interrupts.write_ie(InterruptFlags::TIMER1.bits());

        // Timer 0: reload 0xFFFF, /1, enabled. Timer 1: countup, reload 0xFFFE, IRQ.
        timers.write_reload(0, 0xFFFF);
        timers.write_control(0, 0x0080, &mut scheduler);
        timers.write_reload(1, 0xFFFE);
        timers.write_control(1, 0x00C4, &mut scheduler);

        // Countup timers never schedule their own overflow event.
        assert_eq!(scheduler.next_event_time(), STARTUP_DELAY + 1);

        scheduler.current_time = 3;
        run_due_overflows(&mut timers, &mut scheduler, &mut interrupts);
        assert_eq!(timers.timers[1].counter, 0xFFFF);
        assert!(!interrupts.flags.contains(InterruptFlags::TIMER1));

        // Timer 0 overflows again at t=4 (wrapping timer 1, which reloads and
        // raises its IRQ) and once more at t=5.
        scheduler.current_time = 5;
        run_due_overflows(&mut timers, &mut scheduler, &mut interrupts);
        assert_eq!(timers.timers[1].counter, 0xFFFF);
        assert!(interrupts.flags.contains(InterruptFlags::TIMER1));
    }

    #[test]
    fn test_reprogramming_replaces_pending_event() {
        let mut timers = Timers::new();
        let mut scheduler = Scheduler::new();

        timers.write_reload(2, 0xFF00);
        timers.write_control(2, 0x0080, &mut scheduler);
        let first = scheduler.next_event_time();

        // Disabling drops the event entirely.
        timers.write_control(2, 0x0000, &mut scheduler);
        assert_eq!(scheduler.next_event_time(), u64::MAX);

        // Re-enabling schedules a fresh one.
        timers.write_control(2, 0x0080, &mut scheduler);
        assert_eq!(scheduler.next_event_time(), first);
    }
}

use crate::scheduler::{EventType, Scheduler};
use log::*;
use nanoserde::{DeBin, DeBinErr, SerBin};

/// When a channel's enable bit rises with immediate timing, the transfer
/// begins after a short startup delay.
const STARTUP_DELAY: u64 = 2;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum StartTiming {
    Immediate,
    VBlank,
    HBlank,
    /// Audio FIFO refill for channels 1/2, video capture for channel 3.
    Special,
}

#[derive(Debug, Default, Clone, Copy, SerBin, DeBin)]
pub struct DmaChannel {
    /// The raw source/destination/count registers as last written.
    pub src: u32,
    pub dst: u32,
    pub count: u16,
    pub control: u16,
    /// Shadow copies latched when the enable bit rises; the visible
    /// registers can be rewritten while a repeating transfer is armed.
    internal_src: u32,
    internal_dst: u32,
    internal_count: u32,
    /// Armed and waiting to be serviced.
    pub pending: bool,
    /// This trigger came from an audio FIFO drain: fixed destination,
    /// four words, no count reload.
    pub fifo_mode: bool,
}

impl DmaChannel {
    pub fn enabled(&self) -> bool {
        self.control & 0x8000 != 0
    }

    pub fn irq_on_complete(&self) -> bool {
        self.control & 0x4000 != 0
    }

    pub fn timing(&self) -> StartTiming {
        match (self.control >> 12) & 0x3 {
            0 => StartTiming::Immediate,
            1 => StartTiming::VBlank,
            2 => StartTiming::HBlank,
            _ => StartTiming::Special,
        }
    }

    pub fn word_transfer(&self) -> bool {
        self.control & 0x0400 != 0
    }

    pub fn repeat(&self) -> bool {
        self.control & 0x0200 != 0
    }

    /// 0 increment, 1 decrement, 2 fixed.
    pub fn src_mode(&self) -> u16 {
        (self.control >> 7) & 0x3
    }

    /// 0 increment, 1 decrement, 2 fixed, 3 increment-and-reload.
    pub fn dst_mode(&self) -> u16 {
        (self.control >> 5) & 0x3
    }

    pub fn internal_src(&self) -> u32 {
        self.internal_src
    }

    pub fn internal_dst(&self) -> u32 {
        self.internal_dst
    }

    pub fn internal_count(&self) -> u32 {
        self.internal_count
    }
}

/// The four DMA channels. Channel 0 has the highest priority, 3 the lowest.
///
/// Actual transfers are executed by the bus (they are nothing but a burst of
/// bus accesses); this struct owns the registers, the trigger logic and the
/// latch/repeat bookkeeping around them.
#[derive(Debug, Default, Clone)]
pub struct DmaController {
    pub channels: [DmaChannel; 4],
}

impl DmaController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Halfword write anywhere in the `0x0400_00B0..=0x0400_00DE` block.
    pub fn write_register(&mut self, offset: u32, value: u16, scheduler: &mut Scheduler) {
        let channel = (offset / 12) as usize;
        let reg = offset % 12;
        match reg {
            0x0 => self.channels[channel].src = (self.channels[channel].src & 0xFFFF_0000) | value as u32,
            0x2 => self.channels[channel].src = (self.channels[channel].src & 0xFFFF) | ((value as u32) << 16),
            0x4 => self.channels[channel].dst = (self.channels[channel].dst & 0xFFFF_0000) | value as u32,
            0x6 => self.channels[channel].dst = (self.channels[channel].dst & 0xFFFF) | ((value as u32) << 16),
            0x8 => self.channels[channel].count = value,
            0xA => self.write_control(channel, value, scheduler),
            _ => unreachable!(),
        }
    }

    pub fn read_register(&self, offset: u32) -> u16 {
        let channel = (offset / 12) as usize;
        if offset % 12 == 0xA {
            self.channels[channel].control
        } else {
            // Source, destination and count are write-only.
            0
        }
    }

    fn write_control(&mut self, channel: usize, value: u16, scheduler: &mut Scheduler) {
        let was_enabled = self.channels[channel].enabled();
        self.channels[channel].control = value & 0xFFE0;

        if !was_enabled && self.channels[channel].enabled() {
            self.latch(channel);
            trace!(
                "DMA{} armed: {:08X} -> {:08X} x{} ({:?})",
                channel,
                self.channels[channel].internal_src,
                self.channels[channel].internal_dst,
                self.channels[channel].internal_count,
                self.channels[channel].timing()
            );
            if self.channels[channel].timing() == StartTiming::Immediate {
                scheduler.push_relative(EventType::dma_activate(channel), STARTUP_DELAY);
            }
        } else if was_enabled && !self.channels[channel].enabled() {
            self.channels[channel].pending = false;
            self.channels[channel].fifo_mode = false;
            scheduler.remove_event_type(EventType::dma_activate(channel));
        }
    }

    /// Copy the visible registers into the internal shadow copies.
    fn latch(&mut self, channel: usize) {
        let ch = &mut self.channels[channel];
        ch.internal_src = ch.src & if channel == 0 { 0x07FF_FFFF } else { 0x0FFF_FFFF };
        ch.internal_dst = ch.dst & if channel == 3 { 0x0FFF_FFFF } else { 0x07FF_FFFF };
        ch.internal_count = Self::masked_count(channel, ch.count);
    }

    fn masked_count(channel: usize, count: u16) -> u32 {
        let max = if channel == 3 { 0x1_0000 } else { 0x4000 };
        let masked = count as u32 & (max - 1);
        if masked == 0 {
            max
        } else {
            masked
        }
    }

    /// Arm every enabled channel waiting on the given start condition.
    pub fn trigger(&mut self, timing: StartTiming) {
        for channel in self.channels.iter_mut() {
            if channel.enabled() && channel.timing() == timing {
                channel.pending = true;
            }
        }
    }

    /// Arm channel 1 or 2 for an audio FIFO refill.
    pub fn trigger_fifo(&mut self, channel: usize) {
        debug_assert!(channel == 1 || channel == 2);
        let ch = &mut self.channels[channel];
        if ch.enabled() && ch.timing() == StartTiming::Special {
            ch.pending = true;
            ch.fifo_mode = true;
        }
    }

    /// Arm channel 3 for the per-scanline video capture transfer.
    pub fn trigger_video_capture(&mut self) {
        let ch = &mut self.channels[3];
        if ch.enabled() && ch.timing() == StartTiming::Special {
            ch.pending = true;
        }
    }

    pub fn highest_pending(&self) -> Option<usize> {
        self.channels.iter().position(|ch| ch.pending)
    }

    pub fn any_pending(&self) -> bool {
        self.channels.iter().any(|ch| ch.pending)
    }

    /// Bookkeeping after the bus ran a transfer to completion. Returns `true`
    /// when the channel wants an end-of-transfer IRQ.
    pub fn complete(&mut self, channel: usize, new_src: u32, new_dst: u32) -> bool {
        let fifo_mode = self.channels[channel].fifo_mode;
        let ch = &mut self.channels[channel];
        ch.pending = false;
        ch.fifo_mode = false;
        ch.internal_src = new_src;

        if ch.repeat() && ch.timing() != StartTiming::Immediate {
            if fifo_mode {
                // FIFO transfers keep their destination and implicit count.
            } else {
                ch.internal_dst = if ch.dst_mode() == 3 {
                    ch.dst & if channel == 3 { 0x0FFF_FFFF } else { 0x07FF_FFFF }
                } else {
                    new_dst
                };
                ch.internal_count = Self::masked_count(channel, ch.count);
            }
        } else {
            ch.internal_dst = new_dst;
            ch.control &= !0x8000;
        }
        ch.irq_on_complete()
    }
}

impl SerBin for DmaController {
    fn ser_bin(&self, output: &mut Vec<u8>) {
        for channel in &self.channels {
            channel.ser_bin(output);
        }
    }
}

impl DeBin for DmaController {
    fn de_bin(offset: &mut usize, bytes: &[u8]) -> Result<Self, DeBinErr> {
        let mut controller = DmaController::default();
        for channel in &mut controller.channels {
            *channel = DmaChannel::de_bin(offset, bytes)?;
        }
        Ok(controller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enable_edge_latches_and_schedules() {
        let mut dma = DmaController::new();
        let mut scheduler = Scheduler::new();

        dma.write_register(0x0, 0x0000, &mut scheduler);
        dma.write_register(0x2, 0x0200, &mut scheduler);
        dma.write_register(0x4, 0x0000, &mut scheduler);
        dma.write_register(0x6, 0x0300, &mut scheduler);
        dma.write_register(0x8, 0x0100, &mut scheduler);
        dma.write_register(0xA, 0x8000, &mut scheduler);

        assert_eq!(dma.channels[0].internal_src(), 0x0200_0000);
        assert_eq!(dma.channels[0].internal_dst(), 0x0300_0000);
        assert_eq!(dma.channels[0].internal_count(), 0x100);
        assert_eq!(scheduler.next_event_time(), STARTUP_DELAY);
    }

    #[test]
    fn test_zero_count_means_full_length() {
        assert_eq!(DmaController::masked_count(0, 0), 0x4000);
        assert_eq!(DmaController::masked_count(3, 0), 0x1_0000);
    }

    #[test]
    fn test_disable_cancels_pending() {
        let mut dma = DmaController::new();
        let mut scheduler = Scheduler::new();

        // VBlank timing, enabled.
        dma.write_register(0x8, 0x0010, &mut scheduler);
        dma.write_register(0xA, 0x9000, &mut scheduler);
        dma.trigger(StartTiming::VBlank);
        assert!(dma.any_pending());

        dma.write_register(0xA, 0x1000, &mut scheduler);
        assert!(!dma.any_pending());
    }

    #[test]
    fn test_priority_order() {
        let mut dma = DmaController::new();
        let mut scheduler = Scheduler::new();
        dma.write_register(12 * 3 + 0xA, 0x9000, &mut scheduler);
        dma.write_register(12 * 1 + 0xA, 0x9000, &mut scheduler);
        dma.trigger(StartTiming::VBlank);

        assert_eq!(dma.highest_pending(), Some(1));
    }

    #[test]
    fn test_repeat_keeps_channel_enabled() {
        let mut dma = DmaController::new();
        let mut scheduler = Scheduler::new();

        dma.write_register(0x8, 0x0004, &mut scheduler);
        // HBlank timing + repeat.
        dma.write_register(0xA, 0xA200, &mut scheduler);
        dma.trigger(StartTiming::HBlank);

        dma.complete(0, 0x0200_0010, 0x0300_0010);
        assert!(dma.channels[0].enabled());
        assert_eq!(dma.channels[0].internal_count(), 4);

        // Without repeat the enable bit clears.
        dma.write_register(0xA, 0x8000, &mut scheduler);
        dma.channels[0].pending = true;
        dma.complete(0, 0, 0);
        assert!(!dma.channels[0].enabled());
    }
}

use nanoserde::{DeBin, DeBinErr, SerBin};
use tinyvec::ArrayVec;

pub const FIFO_CAPACITY: usize = 32;
/// A draining FIFO asks its DMA channel for more data at this depth.
pub const FIFO_REFILL_THRESHOLD: usize = 16;
/// Interleaved stereo f32 samples buffered before `samples_full` is raised,
/// i.e. one audio callback's worth for the frontend.
pub const SAMPLE_BUFFER_LEN: usize = 2048;
/// Master clock frequency, used to derive the sample event period.
pub const CLOCK_FREQUENCY: u64 = 16_777_216;

/// The two direct-sound channels of the APU and the host-facing sample
/// buffer. The PSG channels are not modelled and contribute silence; the
/// register file still accepts their writes like any other I/O.
#[derive(Debug, Clone)]
pub struct Apu {
    fifo_a: ArrayVec<[u8; FIFO_CAPACITY]>,
    fifo_b: ArrayVec<[u8; FIFO_CAPACITY]>,
    /// The most recently popped FIFO sample per channel, held until the
    /// feeding timer overflows again.
    latch_a: i8,
    latch_b: i8,
    soundcnt_h: u16,
    soundbias: u16,
    master_enable: bool,
    pub sample_buf: Vec<f32>,
    pub samples_full: bool,
    cycles_per_sample: u64,
}

impl Apu {
    pub fn new(sample_rate: u32) -> Self {
        Apu {
            fifo_a: ArrayVec::new(),
            fifo_b: ArrayVec::new(),
            latch_a: 0,
            latch_b: 0,
            soundcnt_h: 0,
            soundbias: 0x0200,
            master_enable: false,
            sample_buf: Vec::with_capacity(SAMPLE_BUFFER_LEN * 2),
            samples_full: false,
            cycles_per_sample: CLOCK_FREQUENCY / sample_rate as u64,
        }
    }

    pub fn cycles_per_sample(&self) -> u64 {
        self.cycles_per_sample
    }

    /// `SOUNDCNT_H`. Bits 11 and 15 are the FIFO reset strobes and never read
    /// back as set.
    pub fn write_soundcnt_h(&mut self, value: u16) {
        if value & 0x0800 != 0 {
            self.fifo_a.clear();
        }
        if value & 0x8000 != 0 {
            self.fifo_b.clear();
        }
        self.soundcnt_h = value & 0x770F;
    }

    pub fn read_soundcnt_h(&self) -> u16 {
        self.soundcnt_h
    }

    /// `SOUNDCNT_X`. Only the master enable bit is writable; the PSG status
    /// bits read as zero since those channels are silent here.
    pub fn write_soundcnt_x(&mut self, value: u16) {
        self.master_enable = value & 0x0080 != 0;
    }

    pub fn read_soundcnt_x(&self) -> u16 {
        (self.master_enable as u16) << 7
    }

    pub fn write_soundbias(&mut self, value: u16) {
        self.soundbias = value;
    }

    pub fn read_soundbias(&self) -> u16 {
        self.soundbias
    }

    /// Which timer (0 or 1) feeds channel A.
    pub fn timer_source_a(&self) -> usize {
        ((self.soundcnt_h >> 10) & 1) as usize
    }

    pub fn timer_source_b(&self) -> usize {
        ((self.soundcnt_h >> 14) & 1) as usize
    }

    /// Append bytes written to `FIFO_A`/`FIFO_B`. Overfilling is silently
    /// dropped, as on hardware.
    pub fn push_fifo(&mut self, channel_b: bool, data: &[u8]) {
        let fifo = if channel_b { &mut self.fifo_b } else { &mut self.fifo_a };
        for &byte in data {
            if fifo.len() == FIFO_CAPACITY {
                break;
            }
            fifo.push(byte);
        }
    }

    pub fn fifo_len(&self, channel_b: bool) -> usize {
        if channel_b {
            self.fifo_b.len()
        } else {
            self.fifo_a.len()
        }
    }

    /// A feeding timer overflowed: pop the next sample into the channel
    /// latch. Returns `true` when the FIFO has drained far enough that its
    /// DMA channel should be asked for a refill.
    pub fn timer_overflowed(&mut self, channel_b: bool) -> bool {
        let fifo = if channel_b { &mut self.fifo_b } else { &mut self.fifo_a };
        if !fifo.is_empty() {
            let sample = fifo.remove(0) as i8;
            if channel_b {
                self.latch_b = sample;
            } else {
                self.latch_a = sample;
            }
        }
        fifo.len() <= FIFO_REFILL_THRESHOLD
    }

    /// Mix one stereo output sample from the current channel latches.
    pub fn sample(&mut self) {
        let (mut left, mut right) = (0f32, 0f32);
        if self.master_enable {
            // Volume bit: 0 = 50%, 1 = 100%.
            let vol_a = if self.soundcnt_h & 0x0004 != 0 { 1.0 } else { 0.5 };
            let vol_b = if self.soundcnt_h & 0x0008 != 0 { 1.0 } else { 0.5 };
            let sample_a = self.latch_a as f32 / 128.0 * vol_a;
            let sample_b = self.latch_b as f32 / 128.0 * vol_b;

            if self.soundcnt_h & 0x0200 != 0 {
                left += sample_a;
            }
            if self.soundcnt_h & 0x0100 != 0 {
                right += sample_a;
            }
            if self.soundcnt_h & 0x2000 != 0 {
                left += sample_b;
            }
            if self.soundcnt_h & 0x1000 != 0 {
                right += sample_b;
            }
        }

        #[cfg(feature = "apu-logging")]
        log::trace!("APU sample: {} / {}", left, right);

        self.sample_buf.push((left * 0.5).max(-1.0).min(1.0));
        self.sample_buf.push((right * 0.5).max(-1.0).min(1.0));
        if self.sample_buf.len() >= SAMPLE_BUFFER_LEN * 2 {
            self.samples_full = true;
        }
    }

    pub fn get_audio_buffer(&self) -> &[f32] {
        &self.sample_buf
    }

    pub fn clear_audio_buffer(&mut self) {
        self.sample_buf.clear();
        self.samples_full = false;
    }
}

impl SerBin for Apu {
    fn ser_bin(&self, output: &mut Vec<u8>) {
        self.fifo_a.as_slice().to_vec().ser_bin(output);
        self.fifo_b.as_slice().to_vec().ser_bin(output);
        self.latch_a.ser_bin(output);
        self.latch_b.ser_bin(output);
        self.soundcnt_h.ser_bin(output);
        self.soundbias.ser_bin(output);
        self.master_enable.ser_bin(output);
        self.cycles_per_sample.ser_bin(output);
    }
}

impl DeBin for Apu {
    fn de_bin(offset: &mut usize, bytes: &[u8]) -> Result<Self, DeBinErr> {
        let fifo_a_bytes = Vec::<u8>::de_bin(offset, bytes)?;
        let fifo_b_bytes = Vec::<u8>::de_bin(offset, bytes)?;
        let mut fifo_a = ArrayVec::new();
        let mut fifo_b = ArrayVec::new();
        fifo_a.extend(fifo_a_bytes.into_iter().take(FIFO_CAPACITY));
        fifo_b.extend(fifo_b_bytes.into_iter().take(FIFO_CAPACITY));
        Ok(Apu {
            fifo_a,
            fifo_b,
            latch_a: i8::de_bin(offset, bytes)?,
            latch_b: i8::de_bin(offset, bytes)?,
            soundcnt_h: u16::de_bin(offset, bytes)?,
            soundbias: u16::de_bin(offset, bytes)?,
            master_enable: bool::de_bin(offset, bytes)?,
            sample_buf: Vec::new(),
            samples_full: false,
            cycles_per_sample: u64::de_bin(offset, bytes)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_drain_requests_refill() {
        let mut apu = Apu::new(44_100);
        apu.push_fifo(false, &[0x10; 20]);

        for _ in 0..3 {
            assert!(!apu.timer_overflowed(false));
        }
        // Down to 16 entries: time to ask DMA 1 for more.
        assert!(apu.timer_overflowed(false));
        assert_eq!(apu.fifo_len(false), 16);
    }

    #[test]
    fn test_fifo_reset_bits_clear() {
        let mut apu = Apu::new(44_100);
        apu.push_fifo(false, &[1, 2, 3, 4]);
        apu.push_fifo(true, &[5, 6]);

        apu.write_soundcnt_h(0x8800);

        assert_eq!(apu.fifo_len(false), 0);
        assert_eq!(apu.fifo_len(true), 0);
        // The strobes themselves never read back.
        assert_eq!(apu.read_soundcnt_h() & 0x8800, 0);
    }

    #[test]
    fn test_silence_when_master_disabled() {
        let mut apu = Apu::new(44_100);
        apu.push_fifo(false, &[0x40]);
        apu.timer_overflowed(false);
        apu.sample();

        assert_eq!(apu.get_audio_buffer(), &[0.0, 0.0]);
    }

    #[test]
    fn test_sample_mixes_enabled_sides() {
        let mut apu = Apu::new(44_100);
        apu.write_soundcnt_x(0x0080);
        // Channel A: full volume, left only.
        apu.write_soundcnt_h(0x0204);
        apu.push_fifo(false, &[0x40]);
        apu.timer_overflowed(false);

        apu.sample();

        let buffer = apu.get_audio_buffer();
        assert!((buffer[0] - 0.25).abs() < 1e-6);
        assert_eq!(buffer[1], 0.0);
    }
}

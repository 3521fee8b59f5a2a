//! Blocking device sinks.

use std::time::{Duration, Instant};

use crate::audio::Sample;

use super::OutputError;

/// A blocking audio device: accepts interleaved frames at a fixed rate.
pub trait AudioSink: Send + 'static {
    /// Open the device at the given format.
    ///
    /// # Errors
    /// Device unavailable or format unsupported.
    fn open(samplerate: u32, channels: u8) -> Result<Self, OutputError>
    where
        Self: Sized;

    /// Write interleaved frames; blocks until the device accepted them.
    ///
    /// # Errors
    /// Device failure; the mixer thread exits on error.
    fn write(&mut self, samples: &[Sample]) -> Result<(), OutputError>;
}

/// Clock-paced sink without hardware: consumes frames in real time. Used
/// for headless hosts and tests.
pub struct NullSink {
    samplerate: u32,
    channels: u8,
    started: Instant,
    consumed_frames: u64,
}

impl AudioSink for NullSink {
    fn open(samplerate: u32, channels: u8) -> Result<Self, OutputError> {
        if samplerate == 0 || channels == 0 {
            return Err(OutputError::BadFormat);
        }
        Ok(Self {
            samplerate,
            channels,
            started: Instant::now(),
            consumed_frames: 0,
        })
    }

    fn write(&mut self, samples: &[Sample]) -> Result<(), OutputError> {
        self.consumed_frames += (samples.len() / usize::from(self.channels)) as u64;

        let due = Duration::from_micros(
            self.consumed_frames * 1_000_000 / u64::from(self.samplerate),
        );
        let elapsed = self.started.elapsed();
        if due > elapsed {
            std::thread::sleep(due - elapsed);
        }
        Ok(())
    }
}

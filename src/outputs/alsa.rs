//! ALSA sink.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};

use crate::audio::Sample;

use super::OutputError;
use super::sink::AudioSink;

/// Blocking ALSA playback device.
pub struct AlsaSink {
    pcm: PCM,
}

fn sample_format() -> Format {
    if cfg!(feature = "float-samples") {
        Format::FloatLE
    } else {
        Format::s16()
    }
}

impl AudioSink for AlsaSink {
    fn open(samplerate: u32, channels: u8) -> Result<Self, OutputError> {
        let pcm = PCM::new("default", Direction::Playback, false)
            .map_err(|e| OutputError::Device(e.to_string()))?;

        {
            let hwp = HwParams::any(&pcm).map_err(|e| OutputError::Device(e.to_string()))?;
            hwp.set_channels(u32::from(channels))
                .map_err(|e| OutputError::Device(e.to_string()))?;
            hwp.set_rate(samplerate, ValueOr::Nearest)
                .map_err(|e| OutputError::Device(e.to_string()))?;
            hwp.set_format(sample_format())
                .map_err(|e| OutputError::Device(e.to_string()))?;
            hwp.set_access(Access::RWInterleaved)
                .map_err(|e| OutputError::Device(e.to_string()))?;
            pcm.hw_params(&hwp)
                .map_err(|e| OutputError::Device(e.to_string()))?;
        }

        Ok(Self { pcm })
    }

    fn write(&mut self, samples: &[Sample]) -> Result<(), OutputError> {
        let io = self
            .pcm
            .io_checked::<Sample>()
            .map_err(|e| OutputError::Device(e.to_string()))?;

        match io.writei(samples) {
            Ok(_) => Ok(()),
            Err(e) => {
                // Underruns are recoverable
                self.pcm
                    .try_recover(e, true)
                    .map_err(|e| OutputError::Device(e.to_string()))?;
                io.writei(samples)
                    .map(|_| ())
                    .map_err(|e| OutputError::Device(e.to_string()))
            }
        }
    }
}

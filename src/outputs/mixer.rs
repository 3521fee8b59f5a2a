//! The mixing engine behind every output module.
//!
//! A device thread pulls from each playing stream at the device rate,
//! converts rate and channel layout, applies the composed volume and sums
//! with saturation into the sink. Streams may interpose a ring cache fed
//! by a background thread so the device-side pull is always local.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use crate::audio::{
    self, AudioFormat, MixAccumulator, Ring, RingReader, Sample, VOLUME_MAX,
};

use super::sink::AudioSink;
use super::{OutputError, SharedSource, SourceRead, StreamKey};

/// Frames mixed per device write.
const MIX_PERIOD_FRAMES: usize = 1024;

/// Ring window for cached streams.
const CACHE_WINDOW: usize = 4096;

/// Object-safe output module contract (the vtable every backend offers).
pub(crate) trait OutputModule: Send {
    fn add_stream(
        &mut self,
        format: AudioFormat,
        cache: usize,
        use_cache_thread: bool,
        source: SharedSource,
    ) -> Result<usize, OutputError>;
    fn remove_stream(&mut self, slot: usize);
    fn play_stream(&mut self, slot: usize);
    fn pause_stream(&mut self, slot: usize);
    fn flush_stream(&mut self, slot: usize);
    fn set_volume_stream(&mut self, slot: usize, volume: u32);
    fn volume_stream(&self, slot: usize) -> u32;
    fn stream_status(&self, slot: usize, key: StreamKey) -> u64;
    fn set_volume(&mut self, volume: u32);
    fn volume(&self) -> u32;
    fn close(&mut self);
}

/// Open the module registered under `id`.
pub(crate) fn open_module(
    id: &str,
    samplerate: u32,
    channels: u8,
) -> Result<Box<dyn OutputModule>, OutputError> {
    match id {
        "null" => Ok(Box::new(Mixer::<super::sink::NullSink>::open(
            samplerate, channels,
        )?)),
        #[cfg(all(feature = "audio-alsa", target_os = "linux"))]
        "alsa" => Ok(Box::new(Mixer::<super::alsa::AlsaSink>::open(
            samplerate, channels,
        )?)),
        other => Err(OutputError::UnknownModule(other.to_string())),
    }
}

/// Built-in module registry: `(id, name, description)`.
#[must_use]
pub fn modules() -> Vec<(&'static str, &'static str, &'static str)> {
    let mut list = vec![("null", "Null", "Clock-paced output without hardware.")];
    if cfg!(all(feature = "audio-alsa", target_os = "linux")) {
        list.insert(0, ("alsa", "ALSA", "ALSA audio output."));
    }
    list
}

/// Linear rate/channel converter state, one per stream.
struct ConvState {
    /// Previous staged frame carried across pulls (device channel layout)
    prev: Vec<Sample>,
    have_prev: bool,
    /// Fractional read position into the staged frames
    frac: f64,
}

struct CacheState {
    reader: Mutex<RingReader>,
    /// Format of the samples inside the ring, updated by the feeder
    format: Mutex<AudioFormat>,
    /// Source hit EOF; the ring may still hold audio
    source_ended: AtomicBool,
    feeder_stop: Arc<AtomicBool>,
    feeder: Mutex<Option<JoinHandle<()>>>,
}

struct StreamSlot {
    format: AudioFormat,
    source: SharedSource,
    volume: AtomicU32,
    playing: AtomicBool,
    flush: AtomicBool,
    ended: AtomicBool,
    played_frames: AtomicU64,
    cache: Option<CacheState>,
    conv: Mutex<ConvState>,
}

impl StreamSlot {
    /// Read source samples in their native format. Returns the samples
    /// read, the format they are in, and whether the source has ended.
    fn read_native(&self, out: &mut [Sample]) -> (usize, AudioFormat, bool) {
        if let Some(cache) = &self.cache {
            let format = *lock(&cache.format);
            let mut reader = lock(&cache.reader);
            let mut raw = vec![0u8; out.len() * std::mem::size_of::<Sample>()];
            let n = reader.pop(&mut raw);
            let samples = n / std::mem::size_of::<Sample>();
            for (i, slot) in out.iter_mut().take(samples).enumerate() {
                let off = i * std::mem::size_of::<Sample>();
                let mut bytes = [0u8; std::mem::size_of::<Sample>()];
                bytes.copy_from_slice(&raw[off..off + std::mem::size_of::<Sample>()]);
                *slot = Sample::from_ne_bytes(bytes);
            }
            let ended = cache.source_ended.load(Ordering::Acquire) && samples == 0;
            (samples, format, ended)
        } else {
            let mut format = self.format;
            match lock(&self.source).read(out, &mut format) {
                SourceRead::Samples(n) => (n, format, false),
                SourceRead::Pending => (0, format, false),
                SourceRead::Ended => (0, format, true),
            }
        }
    }

    /// Pull device-format samples, converting rate and channels as needed.
    /// Returns samples written and whether the stream has ended.
    fn pull(&self, device: AudioFormat, out: &mut [Sample]) -> (usize, bool) {
        if self.flush.swap(false, Ordering::AcqRel) {
            if let Some(cache) = &self.cache {
                let mut reader = lock(&cache.reader);
                let pending = reader.len();
                reader.read_forward(pending);
            }
            let mut conv = lock(&self.conv);
            conv.have_prev = false;
            conv.frac = 0.0;
        }

        let dc = usize::from(device.channels);
        let out_frames = out.len() / dc;

        // Fast path: formats agree, no conversion state involved
        let probe_format = if let Some(cache) = &self.cache {
            *lock(&cache.format)
        } else {
            self.format
        };
        if probe_format == device && !lock(&self.conv).have_prev {
            let (n, format, ended) = self.read_native(out);
            if format == device {
                return (n, ended);
            }
            // Format changed under us: restage what we read
            let staged: Vec<Sample> = out[..n].to_vec();
            return (self.convert(&staged, format, device, out), ended);
        }

        let src_fmt = probe_format;
        let ratio = f64::from(src_fmt.samplerate) / f64::from(device.samplerate);
        let sc = usize::from(src_fmt.channels.max(1));
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let need_frames = ((out_frames as f64) * ratio + 2.0).ceil() as usize;

        let mut native = vec![0 as Sample; need_frames * sc];
        let (n, format, ended) = self.read_native(&mut native);
        native.truncate(n);
        (self.convert(&native, format, device, out), ended && n == 0)
    }

    /// Convert `native` samples from `src` format into the device format,
    /// writing interleaved samples to `out`. Returns samples written.
    fn convert(
        &self,
        native: &[Sample],
        src: AudioFormat,
        device: AudioFormat,
        out: &mut [Sample],
    ) -> usize {
        let sc = usize::from(src.channels.max(1));
        let dc = usize::from(device.channels.max(1));
        let src_frames = native.len() / sc;

        // Channel fold into device layout
        let mut staged: Vec<Sample> = Vec::with_capacity((src_frames + 1) * dc);
        {
            let conv = lock(&self.conv);
            if conv.have_prev {
                staged.extend_from_slice(&conv.prev);
            }
        }
        for f in 0..src_frames {
            let frame = &native[f * sc..(f + 1) * sc];
            match (sc, dc) {
                (a, b) if a == b => staged.extend_from_slice(frame),
                (1, _) => staged.extend(std::iter::repeat_n(frame[0], dc)),
                (2, 1) => {
                    staged.push(audio::clamp_mix(
                        (MixAccumulator::from(frame[0]) + MixAccumulator::from(frame[1])) / 2 as MixAccumulator,
                    ));
                }
                _ => {
                    for ch in 0..dc {
                        staged.push(frame[ch.min(sc - 1)]);
                    }
                }
            }
        }

        let avail_frames = staged.len() / dc;
        let ratio = f64::from(src.samplerate) / f64::from(device.samplerate);
        let out_frames = out.len() / dc;

        let mut conv = lock(&self.conv);
        let mut produced = 0usize;
        while produced < out_frames {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let i0 = conv.frac as usize;
            if i0 + 1 >= avail_frames {
                break;
            }
            #[allow(clippy::cast_precision_loss)]
            let t = conv.frac - i0 as f64;
            for ch in 0..dc {
                out[produced * dc + ch] =
                    audio::lerp(staged[i0 * dc + ch], staged[(i0 + 1) * dc + ch], t);
            }
            produced += 1;
            conv.frac += ratio;
        }

        // Carry the frame under the cursor into the next pull
        if avail_frames > 0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let keep = (conv.frac as usize).min(avail_frames - 1);
            conv.prev = staged[keep * dc..(keep + 1) * dc].to_vec();
            conv.have_prev = true;
            #[allow(clippy::cast_precision_loss)]
            {
                conv.frac -= keep as f64;
            }
        }

        produced * dc
    }
}

struct MixerShared<S: AudioSink> {
    device: AudioFormat,
    volume: AtomicU32,
    stop: AtomicBool,
    streams: Mutex<Vec<Option<Arc<StreamSlot>>>>,
    sink: Mutex<Option<S>>,
}

/// Generic mixing module over a blocking sink.
pub(crate) struct Mixer<S: AudioSink> {
    shared: Arc<MixerShared<S>>,
    thread: Option<JoinHandle<()>>,
}

impl<S: AudioSink> Mixer<S> {
    pub(crate) fn open(samplerate: u32, channels: u8) -> Result<Self, OutputError> {
        let sink = S::open(samplerate, channels)?;
        let shared = Arc::new(MixerShared {
            device: AudioFormat::new(samplerate, channels),
            volume: AtomicU32::new(VOLUME_MAX),
            stop: AtomicBool::new(false),
            streams: Mutex::new(Vec::new()),
            sink: Mutex::new(Some(sink)),
        });

        let thread_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("aircat-mixer".to_string())
            .spawn(move || mix_loop(&thread_shared))
            .map_err(OutputError::Io)?;

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    fn slot(&self, index: usize) -> Option<Arc<StreamSlot>> {
        lock(&self.shared.streams).get(index).cloned().flatten()
    }
}

fn mix_loop<S: AudioSink>(shared: &MixerShared<S>) {
    let dc = usize::from(shared.device.channels);
    let mut mix = vec![0 as MixAccumulator; MIX_PERIOD_FRAMES * dc];
    let mut tmp = vec![0 as Sample; MIX_PERIOD_FRAMES * dc];
    let mut frame = vec![0 as Sample; MIX_PERIOD_FRAMES * dc];

    while !shared.stop.load(Ordering::Acquire) {
        let active: Vec<Arc<StreamSlot>> = lock(&shared.streams)
            .iter()
            .flatten()
            .filter(|s| s.playing.load(Ordering::Acquire) && !s.ended.load(Ordering::Acquire))
            .cloned()
            .collect();

        mix.fill(0 as MixAccumulator);
        let device_volume = shared.volume.load(Ordering::Acquire);

        for slot in active {
            let (n, ended) = slot.pull(shared.device, &mut tmp);
            if ended {
                slot.ended.store(true, Ordering::Release);
                continue;
            }
            let volume =
                u64::from(slot.volume.load(Ordering::Acquire)) * u64::from(device_volume)
                    / u64::from(VOLUME_MAX);
            #[allow(clippy::cast_possible_truncation)]
            let volume = volume as u32;
            for i in 0..n {
                mix[i] += MixAccumulator::from(audio::scale_volume(tmp[i], volume));
            }
            slot.played_frames
                .fetch_add((n / dc) as u64, Ordering::AcqRel);
        }

        for (acc, out) in mix.iter().zip(frame.iter_mut()) {
            *out = audio::clamp_mix(*acc);
        }

        let mut sink = lock(&shared.sink);
        if let Some(sink) = sink.as_mut() {
            if let Err(e) = sink.write(&frame) {
                warn!("device write failed, stopping mixer: {e}");
                break;
            }
        } else {
            break;
        }
    }
}

fn feeder_loop(
    source: &SharedSource,
    mut writer: crate::audio::RingWriter,
    format: &Mutex<AudioFormat>,
    ended: &AtomicBool,
    stop: &AtomicBool,
) {
    let mut staging = vec![0 as Sample; 2048];
    let mut raw = vec![0u8; 2048 * std::mem::size_of::<Sample>()];

    while !stop.load(Ordering::Acquire) {
        let mut fmt = *lock(format);
        let read = lock(source).read(&mut staging, &mut fmt);
        match read {
            SourceRead::Samples(n) => {
                *lock(format) = fmt;
                for (i, s) in staging[..n].iter().enumerate() {
                    let off = i * std::mem::size_of::<Sample>();
                    raw[off..off + std::mem::size_of::<Sample>()]
                        .copy_from_slice(&s.to_ne_bytes());
                }
                let mut pushed = 0;
                let total = n * std::mem::size_of::<Sample>();
                while pushed < total && !stop.load(Ordering::Acquire) {
                    let accepted = writer.push(&raw[pushed..total]);
                    pushed += accepted;
                    if accepted == 0 {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                }
            }
            SourceRead::Pending => std::thread::sleep(Duration::from_millis(10)),
            SourceRead::Ended => {
                ended.store(true, Ordering::Release);
                break;
            }
        }
    }
}

impl<S: AudioSink> OutputModule for Mixer<S> {
    fn add_stream(
        &mut self,
        format: AudioFormat,
        cache: usize,
        use_cache_thread: bool,
        source: SharedSource,
    ) -> Result<usize, OutputError> {
        let mut writer_opt = None;
        let cache_state = if use_cache_thread {
            // The cache hint is in bytes; zero selects ~100 ms of audio
            let bytes = if cache > 0 {
                cache
            } else {
                format.frame_bytes() * format.samplerate as usize / 10
            };
            let (writer, reader) = Ring::open(bytes.max(CACHE_WINDOW), CACHE_WINDOW);
            writer_opt = Some(writer);
            Some(CacheState {
                reader: Mutex::new(reader),
                format: Mutex::new(format),
                source_ended: AtomicBool::new(false),
                feeder_stop: Arc::new(AtomicBool::new(false)),
                feeder: Mutex::new(None),
            })
        } else {
            None
        };

        let slot = Arc::new(StreamSlot {
            format,
            source: Arc::clone(&source),
            volume: AtomicU32::new(VOLUME_MAX),
            playing: AtomicBool::new(false),
            flush: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            played_frames: AtomicU64::new(0),
            cache: cache_state,
            conv: Mutex::new(ConvState {
                prev: Vec::new(),
                have_prev: false,
                frac: 0.0,
            }),
        });

        if let (Some(writer), Some(cache)) = (writer_opt, &slot.cache) {
            let feeder_source = Arc::clone(&source);
            let feeder_slot = Arc::clone(&slot);
            let feeder_stop = Arc::clone(&cache.feeder_stop);
            let handle = std::thread::Builder::new()
                .name("aircat-cache".to_string())
                .spawn(move || {
                    if let Some(cache) = &feeder_slot.cache {
                        feeder_loop(
                            &feeder_source,
                            writer,
                            &cache.format,
                            &cache.source_ended,
                            &feeder_stop,
                        );
                    }
                })
                .map_err(OutputError::Io)?;
            *lock(&cache.feeder) = Some(handle);
        }

        let mut streams = lock(&self.shared.streams);
        let index = match streams.iter().position(Option::is_none) {
            Some(i) => {
                streams[i] = Some(slot);
                i
            }
            None => {
                streams.push(Some(slot));
                streams.len() - 1
            }
        };
        Ok(index)
    }

    fn remove_stream(&mut self, index: usize) {
        let slot = {
            let mut streams = lock(&self.shared.streams);
            streams.get_mut(index).and_then(Option::take)
        };
        if let Some(slot) = slot {
            if let Some(cache) = &slot.cache {
                cache.feeder_stop.store(true, Ordering::Release);
                if let Some(handle) = lock(&cache.feeder).take() {
                    let _ = handle.join();
                }
            }
        }
    }

    fn play_stream(&mut self, index: usize) {
        if let Some(slot) = self.slot(index) {
            slot.playing.store(true, Ordering::Release);
        }
    }

    fn pause_stream(&mut self, index: usize) {
        if let Some(slot) = self.slot(index) {
            slot.playing.store(false, Ordering::Release);
        }
    }

    fn flush_stream(&mut self, index: usize) {
        if let Some(slot) = self.slot(index) {
            slot.flush.store(true, Ordering::Release);
            slot.ended.store(false, Ordering::Release);
        }
    }

    fn set_volume_stream(&mut self, index: usize, volume: u32) {
        if let Some(slot) = self.slot(index) {
            slot.volume.store(volume.min(VOLUME_MAX), Ordering::Release);
        }
    }

    fn volume_stream(&self, index: usize) -> u32 {
        self.slot(index)
            .map_or(0, |s| s.volume.load(Ordering::Acquire))
    }

    fn stream_status(&self, index: usize, key: StreamKey) -> u64 {
        match key {
            StreamKey::Played => self.slot(index).map_or(0, |s| {
                s.played_frames.load(Ordering::Acquire) * 1000
                    / u64::from(self.shared.device.samplerate)
            }),
        }
    }

    fn set_volume(&mut self, volume: u32) {
        self.shared
            .volume
            .store(volume.min(VOLUME_MAX), Ordering::Release);
    }

    fn volume(&self) -> u32 {
        self.shared.volume.load(Ordering::Acquire)
    }

    fn close(&mut self) {
        self.shared.stop.store(true, Ordering::Release);

        let slots: Vec<usize> = (0..lock(&self.shared.streams).len()).collect();
        for index in slots {
            self.remove_stream(index);
        }

        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        lock(&self.shared.sink).take();
        debug!("mixer closed");
    }
}

impl<S: AudioSink> Drop for Mixer<S> {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.close();
        }
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

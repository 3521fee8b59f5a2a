//! Output mixer.
//!
//! One output module (device) is active at a time; logical output handles
//! group streams on top of it. Every stream pulls PCM from an
//! [`AudioSource`] and carries its own volume and playback state. When the
//! device configuration changes the module is reopened and every existing
//! stream is recreated with its remembered state.

#[cfg(all(feature = "audio-alsa", target_os = "linux"))]
mod alsa;
mod mixer;
pub mod sink;

pub use mixer::modules;
pub use sink::{AudioSink, NullSink};

use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::audio::{AudioFormat, Sample, VOLUME_MAX};
use crate::config::OutputConfig;
use crate::util::random_id;

use mixer::OutputModule;

/// Errors from the output layer.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// Module id not in the registry
    #[error("unknown output module: {0}")]
    UnknownModule(String),

    /// Unusable sample rate or channel count
    #[error("unsupported output format")]
    BadFormat,

    /// Operation on a closed output
    #[error("output closed")]
    Closed,

    /// Stream id not found
    #[error("no such stream")]
    NoSuchStream,

    /// Device-level failure
    #[error("device error: {0}")]
    Device(String),

    /// Thread spawn or other I/O failure
    #[error("io error: {0}")]
    Io(std::io::Error),
}

/// Result of one [`AudioSource::read`] pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRead {
    /// This many samples were written (one value per channel per instant)
    Samples(usize),
    /// Nothing available right now (buffering); the mixer plays silence
    Pending,
    /// The source is finished; the stream stops contributing
    Ended,
}

/// Upstream audio producer pulled by the output module at device cadence.
///
/// `fmt` is in/out: it arrives as the stream's declared format and the
/// source updates it when the decoded stream changes mid-flight.
pub trait AudioSource: Send {
    /// Fill `out` with interleaved samples.
    fn read(&mut self, out: &mut [Sample], fmt: &mut AudioFormat) -> SourceRead;
}

/// Shared handle to a source, so streams survive a device reload.
pub type SharedSource = Arc<Mutex<Box<dyn AudioSource>>>;

/// Wrap a source for [`OutputHandle::add_stream`].
pub fn shared_source(source: impl AudioSource + 'static) -> SharedSource {
    Arc::new(Mutex::new(Box::new(source)))
}

/// Per-stream status keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKey {
    /// Milliseconds of audio delivered to the device
    Played,
}

/// Opaque stream identifier, stable across device reloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamId(String);

struct StreamRecord {
    id: String,
    #[allow(dead_code)] // Surfaced in status queries later
    name: Option<String>,
    format: AudioFormat,
    cache: usize,
    use_cache_thread: bool,
    source: SharedSource,
    volume: u32,
    playing: bool,
    slot: Option<usize>,
}

struct HandleRecord {
    id: String,
    #[allow(dead_code)]
    name: String,
    volume: u32,
    streams: Vec<StreamRecord>,
}

struct OutputsInner {
    config: OutputConfig,
    module: Option<Box<dyn OutputModule>>,
    handles: Vec<HandleRecord>,
}

fn compose(stream: u32, handle: u32) -> u32 {
    u32::try_from(u64::from(stream) * u64::from(handle) / u64::from(VOLUME_MAX))
        .unwrap_or(VOLUME_MAX)
}

impl OutputsInner {
    fn module(&mut self) -> Result<&mut Box<dyn OutputModule>, OutputError> {
        self.module.as_mut().ok_or(OutputError::Closed)
    }

    fn reload(&mut self, config: OutputConfig) -> Result<(), OutputError> {
        info!(
            module = %config.module,
            samplerate = config.samplerate,
            channels = config.channels,
            "reloading output device"
        );

        if let Some(mut module) = self.module.take() {
            module.close();
        }

        let mut module =
            mixer::open_module(&config.module, config.samplerate, config.channels)?;
        module.set_volume(config.volume);

        // Recreate every stream with its remembered state
        for handle in &mut self.handles {
            for stream in &mut handle.streams {
                let slot = module.add_stream(
                    stream.format,
                    stream.cache,
                    stream.use_cache_thread,
                    Arc::clone(&stream.source),
                )?;
                stream.slot = Some(slot);
                module.set_volume_stream(slot, compose(stream.volume, handle.volume));
                if stream.playing {
                    module.play_stream(slot);
                }
            }
        }

        self.module = Some(module);
        self.config = config;
        Ok(())
    }

    fn find(&mut self, handle_id: &str, stream_id: &StreamId) -> Option<(&mut HandleRecord, usize)> {
        let handle = self.handles.iter_mut().find(|h| h.id == handle_id)?;
        let index = handle.streams.iter().position(|s| s.id == stream_id.0)?;
        Some((handle, index))
    }
}

/// Top-level output mixer: module registry, active device, handles.
pub struct Outputs {
    inner: Arc<Mutex<OutputsInner>>,
}

impl Outputs {
    /// Open the configured output module.
    ///
    /// # Errors
    /// `UnknownModule` or device failure.
    pub fn open(config: &OutputConfig) -> Result<Self, OutputError> {
        let config = config.clone().sanitized();
        let mut inner = OutputsInner {
            config: config.clone(),
            module: None,
            handles: Vec::new(),
        };
        inner.reload(config)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    /// Apply a configuration. A change of module, sample rate or channel
    /// count closes and reopens the device, migrating all streams.
    ///
    /// # Errors
    /// Reload failure (the previous device is already closed then).
    pub fn set_config(&self, config: &OutputConfig) -> Result<(), OutputError> {
        let config = config.clone().sanitized();
        let mut inner = lock(&self.inner);
        if config.module != inner.config.module
            || config.samplerate != inner.config.samplerate
            || config.channels != inner.config.channels
        {
            inner.reload(config)?;
        } else {
            inner.module()?.set_volume(config.volume);
            inner.config = config;
        }
        Ok(())
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> OutputConfig {
        lock(&self.inner).config.clone()
    }

    /// Set the device master volume.
    pub fn set_volume(&self, volume: u32) {
        let mut inner = lock(&self.inner);
        inner.config.volume = volume.min(VOLUME_MAX);
        if let Ok(module) = inner.module() {
            module.set_volume(volume.min(VOLUME_MAX));
        }
    }

    /// Device master volume.
    #[must_use]
    pub fn volume(&self) -> u32 {
        lock(&self.inner).config.volume
    }

    /// Create a logical output handle grouping streams.
    ///
    /// # Errors
    /// `Closed` after [`Outputs::close`].
    pub fn open_handle(&self, name: &str) -> Result<OutputHandle, OutputError> {
        let mut inner = lock(&self.inner);
        if inner.module.is_none() {
            return Err(OutputError::Closed);
        }
        let id = random_id(10);
        inner.handles.push(HandleRecord {
            id: id.clone(),
            name: name.to_string(),
            volume: VOLUME_MAX,
            streams: Vec::new(),
        });
        debug!(handle = %id, name, "output handle opened");
        Ok(OutputHandle {
            id,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Close the device and all handles.
    pub fn close(&self) {
        let mut inner = lock(&self.inner);
        if let Some(mut module) = inner.module.take() {
            module.close();
        }
        inner.handles.clear();
    }
}

impl Drop for Outputs {
    fn drop(&mut self) {
        self.close();
    }
}

/// Logical output owned by one module/feature; groups streams and carries
/// a handle-level volume.
pub struct OutputHandle {
    id: String,
    inner: Arc<Mutex<OutputsInner>>,
}

impl OutputHandle {
    /// Add a stream pulling from `source`. `cache` is a module-interpreted
    /// hint (bytes for the built-in modules, 0 = default pre-roll);
    /// `use_cache_thread` interposes a background feeder and ring cache.
    ///
    /// # Errors
    /// `Closed` when the device is gone.
    pub fn add_stream(
        &self,
        name: Option<&str>,
        format: AudioFormat,
        cache: usize,
        use_cache_thread: bool,
        source: SharedSource,
    ) -> Result<StreamId, OutputError> {
        let mut inner = lock(&self.inner);

        let handle_volume = inner
            .handles
            .iter()
            .find(|h| h.id == self.id)
            .map_or(VOLUME_MAX, |h| h.volume);

        let slot = inner.module()?.add_stream(
            format,
            cache,
            use_cache_thread,
            Arc::clone(&source),
        )?;
        inner
            .module()?
            .set_volume_stream(slot, compose(VOLUME_MAX, handle_volume));

        let id = random_id(10);
        let record = StreamRecord {
            id: id.clone(),
            name: name.map(str::to_string),
            format,
            cache,
            use_cache_thread,
            source,
            volume: VOLUME_MAX,
            playing: false,
            slot: Some(slot),
        };

        let handle = inner
            .handles
            .iter_mut()
            .find(|h| h.id == self.id)
            .ok_or(OutputError::Closed)?;
        handle.streams.push(record);

        debug!(stream = %id, "output stream added");
        Ok(StreamId(id))
    }

    /// Remove a stream and release its slot.
    pub fn remove_stream(&self, stream: &StreamId) {
        let mut inner = lock(&self.inner);
        let Some((handle, index)) = inner.find(&self.id, stream) else {
            return;
        };
        let record = handle.streams.remove(index);
        if let (Some(slot), Ok(module)) = (record.slot, inner.module()) {
            module.remove_stream(slot);
        }
    }

    fn with_stream(
        &self,
        stream: &StreamId,
        f: impl FnOnce(&mut Box<dyn OutputModule>, usize, &mut StreamRecord),
    ) -> Result<(), OutputError> {
        let mut inner = lock(&self.inner);
        let inner = &mut *inner;
        let handle = inner
            .handles
            .iter_mut()
            .find(|h| h.id == self.id)
            .ok_or(OutputError::NoSuchStream)?;
        let record = handle
            .streams
            .iter_mut()
            .find(|s| s.id == stream.0)
            .ok_or(OutputError::NoSuchStream)?;
        let module = inner.module.as_mut().ok_or(OutputError::Closed)?;
        let slot = record.slot.ok_or(OutputError::Closed)?;
        f(module, slot, record);
        Ok(())
    }

    /// Start playback.
    ///
    /// # Errors
    /// `NoSuchStream` / `Closed`.
    pub fn play_stream(&self, stream: &StreamId) -> Result<(), OutputError> {
        self.with_stream(stream, |module, slot, record| {
            record.playing = true;
            module.play_stream(slot);
        })
    }

    /// Pause playback.
    ///
    /// # Errors
    /// `NoSuchStream` / `Closed`.
    pub fn pause_stream(&self, stream: &StreamId) -> Result<(), OutputError> {
        self.with_stream(stream, |module, slot, record| {
            record.playing = false;
            module.pause_stream(slot);
        })
    }

    /// Drop any cached audio for the stream.
    ///
    /// # Errors
    /// `NoSuchStream` / `Closed`.
    pub fn flush_stream(&self, stream: &StreamId) -> Result<(), OutputError> {
        self.with_stream(stream, |module, slot, _| module.flush_stream(slot))
    }

    /// Set the stream volume (`0..=VOLUME_MAX`).
    ///
    /// # Errors
    /// `NoSuchStream` / `Closed`.
    pub fn set_volume_stream(&self, stream: &StreamId, volume: u32) -> Result<(), OutputError> {
        let mut inner = lock(&self.inner);
        let inner = &mut *inner;
        let handle = inner
            .handles
            .iter_mut()
            .find(|h| h.id == self.id)
            .ok_or(OutputError::NoSuchStream)?;
        let handle_volume = handle.volume;
        let record = handle
            .streams
            .iter_mut()
            .find(|s| s.id == stream.0)
            .ok_or(OutputError::NoSuchStream)?;
        record.volume = volume.min(VOLUME_MAX);
        let module = inner.module.as_mut().ok_or(OutputError::Closed)?;
        let slot = record.slot.ok_or(OutputError::Closed)?;
        module.set_volume_stream(slot, compose(record.volume, handle_volume));
        Ok(())
    }

    /// Stream volume.
    #[must_use]
    pub fn volume_stream(&self, stream: &StreamId) -> u32 {
        let mut inner = lock(&self.inner);
        inner
            .find(&self.id, stream)
            .map_or(0, |(handle, index)| handle.streams[index].volume)
    }

    /// Set the handle volume; re-derives every stream's effective gain.
    pub fn set_volume(&self, volume: u32) {
        let mut inner = lock(&self.inner);
        let inner = &mut *inner;
        let Some(handle) = inner.handles.iter_mut().find(|h| h.id == self.id) else {
            return;
        };
        handle.volume = volume.min(VOLUME_MAX);
        let Some(module) = inner.module.as_mut() else {
            return;
        };
        for record in &handle.streams {
            if let Some(slot) = record.slot {
                module.set_volume_stream(slot, compose(record.volume, handle.volume));
            }
        }
    }

    /// Handle volume.
    #[must_use]
    pub fn volume(&self) -> u32 {
        lock(&self.inner)
            .handles
            .iter()
            .find(|h| h.id == self.id)
            .map_or(0, |h| h.volume)
    }

    /// Query per-stream status.
    #[must_use]
    pub fn stream_status(&self, stream: &StreamId, key: StreamKey) -> u64 {
        let mut inner = lock(&self.inner);
        let inner = &mut *inner;
        let Some(handle) = inner.handles.iter_mut().find(|h| h.id == self.id) else {
            return 0;
        };
        let Some(record) = handle.streams.iter().find(|s| s.id == stream.0) else {
            return 0;
        };
        match (&inner.module, record.slot) {
            (Some(module), Some(slot)) => module.stream_status(slot, key),
            _ => 0,
        }
    }

    /// Close the handle, removing all its streams.
    pub fn close(&self) {
        let mut inner = lock(&self.inner);
        let inner = &mut *inner;
        let Some(pos) = inner.handles.iter().position(|h| h.id == self.id) else {
            return;
        };
        let handle = inner.handles.remove(pos);
        if let Some(module) = inner.module.as_mut() {
            for record in handle.streams {
                if let Some(slot) = record.slot {
                    module.remove_stream(slot);
                }
            }
        }
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests;

//! File/HTTP playback pipeline: `Stream → Demuxer → Decoder → output
//! stream`. Owns seek, buffering events and end-of-stream detection.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::audio::{AudioFormat, Sample};
use crate::decoder::{Codec, Decoder, DecoderError, DecoderInfo};
use crate::demux::{Demuxer, DemuxError, Meta};
use crate::error::AirCatError;
use crate::outputs::{AudioSource, SharedSource, SourceRead};
use crate::stream::Stream;

/// Consecutive sync failures tolerated before the stream ends.
const MAX_SYNC_FAILURES: u32 = 50;

/// Playback events fired from the read path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEvent {
    /// The demuxer ran dry and is buffering
    Buffering,
    /// Buffering finished
    Ready,
    /// End of stream reached
    End,
    /// Seek completed, position in seconds
    Seek(u64),
}

/// Event observer.
pub type EventCallback = Box<dyn FnMut(FileEvent) + Send>;

struct PlayerInner {
    demux: Box<dyn Demuxer>,
    decoder: Box<dyn Decoder>,
    /// Samples delivered since the last seek or format change
    pcm_pos: u64,
    /// Wall-clock offset of `pcm_pos` origin, in ms
    pcm_pos_off_ms: u64,
    pcm_remaining: usize,
    samplerate: u32,
    channels: u8,
    event_cb: Option<EventCallback>,
    buffering: bool,
    ended: bool,
    sync_failures: u32,
}

impl PlayerInner {
    fn fire(&mut self, event: FileEvent) {
        if let Some(cb) = &mut self.event_cb {
            cb(event);
        }
    }

    fn apply_format(&mut self, info: &DecoderInfo) {
        if info.samplerate != 0
            && info.channels != 0
            && (info.samplerate != self.samplerate || info.channels != self.channels)
        {
            debug!(
                samplerate = info.samplerate,
                channels = info.channels,
                "stream format changed"
            );
            if self.samplerate != 0 && self.channels != 0 {
                self.pcm_pos_off_ms +=
                    self.pcm_pos * 1000 / (u64::from(self.samplerate) * u64::from(self.channels));
            }
            self.pcm_pos = 0;
            self.samplerate = info.samplerate;
            self.channels = info.channels;
        }
    }

    fn read(&mut self, out: &mut [Sample], fmt: &mut AudioFormat) -> SourceRead {
        if self.ended {
            return SourceRead::Ended;
        }

        let mut info = DecoderInfo::default();
        let mut total = 0usize;

        // Drain PCM left inside the decoder first
        if self.pcm_remaining > 0 {
            match self.decoder.decode(None, out, &mut info) {
                Ok(samples) => {
                    self.apply_format(&info);
                    self.pcm_remaining = info.remaining;
                    total += samples;
                }
                Err(_) => {
                    self.ended = true;
                    self.fire(FileEvent::End);
                    return SourceRead::Ended;
                }
            }
        }

        while total < out.len() {
            let window = match self.demux.next_frame() {
                Ok(Some(len)) => len,
                Ok(None) => {
                    if total == 0 {
                        self.ended = true;
                        self.fire(FileEvent::End);
                        return SourceRead::Ended;
                    }
                    break;
                }
                Err(DemuxError::Stream(e)) => {
                    warn!("stream failed mid-read: {e}");
                    self.ended = true;
                    self.fire(FileEvent::End);
                    return SourceRead::Ended;
                }
                Err(_) => break,
            };

            if window == 0 {
                if !self.buffering {
                    self.buffering = true;
                    self.fire(FileEvent::Buffering);
                }
                break;
            }
            if self.buffering {
                self.buffering = false;
                self.fire(FileEvent::Ready);
            }

            let frame = self.demux.frame();
            let frame_len = frame.len();
            match self.decoder.decode(Some(frame), &mut out[total..], &mut info) {
                Ok(samples) => {
                    self.demux.set_used(info.used);
                    self.apply_format(&info);
                    self.pcm_remaining = info.remaining;
                    self.sync_failures = 0;
                    if samples == 0 && info.used == 0 {
                        break;
                    }
                    total += samples;
                }
                Err(DecoderError::NeedMoreData { used } | DecoderError::LostSync { used }) => {
                    self.sync_failures += 1;
                    if self.sync_failures > MAX_SYNC_FAILURES {
                        warn!("giving up after repeated sync failures");
                        self.ended = true;
                        self.fire(FileEvent::End);
                        return SourceRead::Ended;
                    }
                    self.demux.set_used(used.min(frame_len));
                    if used == 0 {
                        // Window cannot satisfy the decoder yet; a stuck
                        // window is forced forward after a few retries
                        if self.sync_failures >= 3 {
                            self.demux.set_used(1.min(frame_len));
                        }
                        break;
                    }
                }
                Err(e) => {
                    warn!("decoder failed: {e}");
                    self.ended = true;
                    self.fire(FileEvent::End);
                    return SourceRead::Ended;
                }
            }
        }

        self.pcm_pos += total as u64;
        if self.samplerate != 0 {
            fmt.samplerate = self.samplerate;
            fmt.channels = self.channels;
        }

        if total == 0 {
            SourceRead::Pending
        } else {
            SourceRead::Samples(total)
        }
    }
}

/// A playing file or remote stream.
pub struct FilePlayer {
    inner: Arc<Mutex<PlayerInner>>,
    meta: Meta,
    codec: Codec,
    length: u64,
    remote: bool,
}

impl FilePlayer {
    /// Open `uri` (path, `file://` or `http(s)://`), probe the container
    /// and set up the decoder.
    ///
    /// # Errors
    /// Stream/demux/decoder failures.
    pub fn open(uri: &str) -> Result<Self, AirCatError> {
        let remote = uri.contains("://") && !uri.starts_with("file://");
        let stream = Stream::open(uri, 16384)?;

        let (demux, samplerate, channels) = crate::demux::open(stream)?;
        let config = demux.dec_config();
        let (decoder, dec_samplerate, dec_channels) =
            crate::decoder::open(config.codec, config.config.as_deref())?;

        let mut meta = demux.meta().clone();

        // Some MP4 writers lie in the mp4a box; the decoder knows better
        let mut samplerate = samplerate;
        let mut channels = channels;
        if config.codec == Codec::Aac
            && ((dec_samplerate != 0 && dec_samplerate != samplerate)
                || (dec_channels != 0 && dec_channels != channels))
        {
            debug!(
                container = samplerate,
                decoder = dec_samplerate,
                "container format overridden by decoder"
            );
            samplerate = dec_samplerate;
            channels = dec_channels;
            meta.samplerate = dec_samplerate;
            meta.channels = dec_channels;
        }

        let length = meta.length;
        let inner = PlayerInner {
            demux,
            decoder,
            pcm_pos: 0,
            pcm_pos_off_ms: 0,
            pcm_remaining: 0,
            samplerate,
            channels,
            event_cb: None,
            buffering: false,
            ended: false,
            sync_failures: 0,
        };

        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
            meta,
            codec: config.codec,
            length,
            remote,
        })
    }

    /// Install the event observer.
    pub fn set_event_callback(&self, cb: EventCallback) {
        lock(&self.inner).event_cb = Some(cb);
    }

    /// Container tags and properties.
    #[must_use]
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Elementary stream codec.
    #[must_use]
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Stream format as currently decoded.
    #[must_use]
    pub fn format(&self) -> AudioFormat {
        let inner = lock(&self.inner);
        AudioFormat::new(inner.samplerate, inner.channels)
    }

    /// Duration in seconds (0 when unknown).
    #[must_use]
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Whether the output stream should interpose a cache thread (remote
    /// sources stall; local files do not).
    #[must_use]
    pub fn prefers_cache_thread(&self) -> bool {
        self.remote
    }

    /// Current playback position in seconds.
    #[must_use]
    pub fn pos(&self) -> u64 {
        let inner = lock(&self.inner);
        if inner.samplerate == 0 || inner.channels == 0 {
            return inner.pcm_pos_off_ms / 1000;
        }
        inner.pcm_pos / (u64::from(inner.samplerate) * u64::from(inner.channels))
            + inner.pcm_pos_off_ms / 1000
    }

    /// Seek to `sec`; returns the actually achieved position.
    ///
    /// # Errors
    /// Demuxer seek failures (`OutOfRange`, stream errors).
    pub fn set_pos(&self, sec: u64) -> Result<u64, AirCatError> {
        let mut inner = lock(&self.inner);
        let actual = inner.demux.set_pos(sec)?;

        // Discard PCM buffered inside the decoder
        let mut scratch = [0 as Sample; 512];
        let mut info = DecoderInfo::default();
        while inner.pcm_remaining > 0 {
            match inner.decoder.decode(None, &mut scratch, &mut info) {
                Ok(0) => break,
                Ok(_) => inner.pcm_remaining = info.remaining,
                Err(_) => break,
            }
        }

        inner.pcm_pos = 0;
        inner.pcm_pos_off_ms = actual * 1000;
        inner.pcm_remaining = 0;
        inner.ended = false;
        inner.fire(FileEvent::Seek(actual));
        Ok(actual)
    }

    /// Wrap this player as a mixer source. All clones share position.
    #[must_use]
    pub fn source(&self) -> SharedSource {
        Arc::new(Mutex::new(
            Box::new(PlayerSource(Arc::clone(&self.inner))) as Box<dyn AudioSource>
        ))
    }
}

struct PlayerSource(Arc<Mutex<PlayerInner>>);

impl AudioSource for PlayerSource {
    fn read(&mut self, out: &mut [Sample], fmt: &mut AudioFormat) -> SourceRead {
        lock(&self.0).read(out, fmt)
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

//! MPEG audio (MP3) demuxer.
//!
//! Byte-stream oriented: after open, the stream window starts at the first
//! audio frame and the MP3 decoder resynchronises itself. Seeks use the
//! Xing/Info or VBRI index frame when one is present.

use std::time::Duration;

use tracing::debug;

use super::{DecoderConfig, Demuxer, DemuxError, Meta};
use crate::decoder::Codec;
use crate::stream::{Stream, Whence};

/// kbit/s by [version][layer][index]; index 0 and 15 are invalid.
const BITRATES: [[[u32; 15]; 3]; 2] = [
    // MPEG-1
    [
        [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
        [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
        [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
    ],
    // MPEG-2 / 2.5 (LSF)
    [
        [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
        [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
        [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
    ],
];

const SAMPLERATES: [[u32; 4]; 3] = [
    [44100, 48000, 32000, 0],
    [22050, 24000, 16000, 0],
    [11025, 8000, 8000, 0],
];

/// Samples per frame by [version-group][layer].
const SAMPLES: [[u32; 3]; 2] = [[384, 1152, 1152], [384, 1152, 576]];

/// One parsed MPEG audio frame header.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameHeader {
    /// 0: MPEG-1, 1: MPEG-2, 2: MPEG-2.5
    pub mpeg: u8,
    /// 0: layer I, 1: layer II, 2: layer III
    pub layer: u8,
    /// kbit/s
    pub bitrate: u32,
    pub samplerate: u32,
    /// Channel mode after the original mapping: 0 = mono
    pub mode: u8,
    pub samples: u32,
    /// Whole frame length in bytes
    pub length: usize,
}

impl FrameHeader {
    /// Parse a 4-byte header at the start of `buf`.
    pub(crate) fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < 4 || buf[0] != 0xFF || (buf[1] & 0xE0) != 0xE0 {
            return None;
        }

        let mut mpeg = 3 - ((buf[1] >> 3) & 0x03);
        if mpeg == 2 {
            // Reserved version field
            return None;
        }
        // mp selects the bitrate/sample tables (MPEG-2.5 shares MPEG-2's)
        let mut mp = mpeg;
        if mpeg == 3 {
            mpeg = 2;
            mp = 1;
        }

        let layer = 3 - ((buf[1] >> 1) & 0x03);
        if layer == 3 {
            return None;
        }

        let bitrate_idx = (buf[2] >> 4) & 0x0F;
        if bitrate_idx == 0 || bitrate_idx == 15 {
            return None;
        }
        let bitrate = BITRATES[usize::from(mp)][usize::from(layer)][usize::from(bitrate_idx)];

        let samplerate_idx = (buf[2] >> 2) & 0x03;
        if samplerate_idx == 3 {
            return None;
        }
        let samplerate = SAMPLERATES[usize::from(mpeg)][usize::from(samplerate_idx)];

        let padding = u32::from((buf[2] >> 1) & 0x01);
        let mode = (((buf[3] >> 6) & 0x03) + 1) % 4;
        let samples = SAMPLES[usize::from(mp)][usize::from(layer)];

        let length = if layer == 0 {
            ((12 * bitrate * 1000 / samplerate) + padding) * 4
        } else if mpeg > 0 && layer == 2 {
            (72 * bitrate * 1000 / samplerate) + padding
        } else {
            (144 * bitrate * 1000 / samplerate) + padding
        };

        Some(Self {
            mpeg,
            layer,
            bitrate,
            samplerate,
            mode,
            samples,
            length: length as usize,
        })
    }

    pub(crate) fn channels(&self) -> u8 {
        if self.mode == 0 { 1 } else { 2 }
    }
}

struct VbriToc {
    scale: u32,
    entries: Vec<u32>,
}

/// MP3 demuxer state.
pub struct Mp3Demuxer {
    stream: Stream,
    meta: Meta,
    duration: u64,
    file_size: u64,
    /// From a Xing/VBRI header, 0 when absent
    nb_bytes: u64,
    nb_frames: u32,
    toc: Option<[u8; 100]>,
    vbri: Option<VbriToc>,
    /// Byte offset of the first audio frame
    offset: u64,
}

fn read_u32(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

fn read_u16(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[0], buf[1]])
}

impl Mp3Demuxer {
    /// Open the demuxer: skip any ID3v2 tag, lock onto the first frame pair,
    /// parse an index header if present.
    ///
    /// # Errors
    /// `Invalid` when no MPEG sync is found in the first buffer.
    pub fn open(mut stream: Stream) -> Result<(Self, u32, u8), DemuxError> {
        let mut id3_size: u64 = 0;

        if stream.read(10, None)? < 10 {
            return Err(DemuxError::Invalid("stream too short"));
        }
        if stream.buffer().starts_with(b"ID3") {
            let b = stream.buffer();
            id3_size = (u64::from(b[6]) << 21)
                | (u64::from(b[7]) << 14)
                | (u64::from(b[8]) << 7)
                | u64::from(b[9]);
            id3_size += 10;
            if b[5] & 0x20 != 0 {
                // Footer present
                id3_size += 10;
            }
            stream.seek(i64::try_from(id3_size).unwrap_or(i64::MAX), Whence::Current)?;
        }

        let len = stream.complete(0, None)?;

        // Sync: a parseable header followed by another syncword one frame on
        let mut first: Option<(usize, FrameHeader)> = None;
        let buf = stream.buffer();
        for i in 0..len.saturating_sub(3) {
            if buf[i] == 0xFF && (buf[i + 1] & 0xE0) == 0xE0 {
                let Some(frame) = FrameHeader::parse(&buf[i..]) else {
                    continue;
                };
                if i + frame.length + 2 > len
                    || buf[i + frame.length] != 0xFF
                    || (buf[i + frame.length + 1] & 0xE0) != 0xE0
                {
                    continue;
                }
                first = Some((i, frame));
                break;
            }
        }
        let (first, frame) = first.ok_or(DemuxError::Invalid("no MPEG sync found"))?;

        let mut demux = Self {
            file_size: stream.size(),
            stream,
            meta: Meta::default(),
            duration: 0,
            nb_bytes: 0,
            nb_frames: 0,
            toc: None,
            vbri: None,
            offset: 0,
        };

        // Window now starts at the first frame
        demux
            .stream
            .seek(i64::try_from(first).unwrap_or(0), Whence::Current)?;
        let len = demux.stream.complete(0, None)?;

        let mut audio_start = first;
        let buf = demux.stream.buffer()[..len].to_vec();
        if demux.parse_xing(&frame, &buf) || demux.parse_vbri(&frame, &buf) {
            // The index frame carries no audio
            audio_start += frame.length;
            demux
                .stream
                .seek(i64::try_from(frame.length).unwrap_or(0), Whence::Current)?;
        }

        demux.offset = id3_size + audio_start as u64;

        if demux.nb_frames > 0 {
            demux.duration =
                u64::from(frame.samples) * u64::from(demux.nb_frames) / u64::from(frame.samplerate);
        } else if demux.file_size > 0 {
            demux.duration =
                (demux.file_size - demux.offset) / (u64::from(frame.bitrate) * 125);
        }

        demux.meta.samplerate = frame.samplerate;
        demux.meta.channels = frame.channels();
        demux.meta.bitrate = frame.bitrate;
        demux.meta.length = demux.duration;

        debug!(
            offset = demux.offset,
            duration = demux.duration,
            indexed = demux.toc.is_some() || demux.vbri.is_some(),
            "mp3 stream opened"
        );

        let samplerate = frame.samplerate;
        let channels = frame.channels();
        Ok((demux, samplerate, channels))
    }

    /// Parse a Xing/Info header inside the first frame. Returns whether the
    /// frame is an index frame to be skipped.
    fn parse_xing(&mut self, frame: &FrameHeader, buf: &[u8]) -> bool {
        if frame.length > buf.len() {
            return false;
        }

        let offset = if frame.mode == 0 {
            if frame.mpeg == 0 { 21 } else { 13 }
        } else if frame.mpeg == 0 {
            36
        } else {
            21
        };
        if offset + 120 > frame.length {
            return false;
        }

        let mut p = &buf[offset..];
        if p[..4].eq_ignore_ascii_case(b"LAME") {
            // Bare LAME tag without Xing data: still not an audio frame
            return true;
        }
        if !p[..4].eq_ignore_ascii_case(b"Xing") && !p[..4].eq_ignore_ascii_case(b"Info") {
            return false;
        }
        p = &p[4..];

        let flags = read_u32(p);
        p = &p[4..];

        if flags & 0x0001 != 0 {
            self.nb_frames = read_u32(p);
            p = &p[4..];
        }
        if flags & 0x0002 != 0 {
            self.nb_bytes = u64::from(read_u32(p));
            p = &p[4..];
        }
        if flags & 0x0004 != 0 {
            let mut toc = [0u8; 100];
            toc.copy_from_slice(&p[..100]);
            self.toc = Some(toc);
        }

        true
    }

    /// Parse a VBRI header (fixed offset 36) inside the first frame.
    fn parse_vbri(&mut self, frame: &FrameHeader, buf: &[u8]) -> bool {
        if frame.length > buf.len() || frame.length < 62 {
            return false;
        }

        let mut p = &buf[36..];
        if &p[..4] != b"VBRI" {
            return false;
        }
        p = &p[4..];

        // version, delay, quality
        p = &p[6..];

        self.nb_bytes = u64::from(read_u32(p));
        p = &p[4..];
        if self.nb_bytes == 0 {
            return true;
        }

        self.nb_frames = read_u32(p);
        p = &p[4..];
        if self.nb_frames == 0 {
            return true;
        }

        let toc_count = usize::from(read_u16(p));
        p = &p[2..];
        let toc_scale = u32::from(read_u16(p));
        p = &p[2..];
        let toc_entry_size = usize::from(read_u16(p));
        p = &p[2..];
        let toc_frames = u32::from(read_u16(p));
        p = &p[2..];

        if toc_count == 0
            || toc_scale == 0
            || toc_entry_size == 0
            || toc_entry_size > 4
            || toc_frames == 0
            || toc_frames * (toc_count as u32 + 1) < self.nb_frames
        {
            return true;
        }

        let toc_bytes = toc_entry_size * toc_count;
        if frame.length < 62 + toc_bytes || p.len() < toc_bytes {
            return true;
        }

        let mut entries = Vec::with_capacity(toc_count);
        for chunk in p[..toc_bytes].chunks_exact(toc_entry_size) {
            let mut v: u32 = 0;
            for &b in chunk {
                v = (v << 8) | u32::from(b);
            }
            entries.push(v);
        }
        self.vbri = Some(VbriToc {
            scale: toc_scale,
            entries,
        });

        true
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn byte_pos_for(&self, sec: u64) -> u64 {
        if let Some(vbri) = &self.vbri {
            // Linear interpolation between cumulative TOC entries
            let n = vbri.entries.len() as u64;
            let seg = self.duration as f64 / n as f64;
            let fi = sec as f64 / seg;
            let i = (fi as usize).min(vbri.entries.len() - 1);
            let fa: f64 = vbri.entries[..i]
                .iter()
                .map(|&e| f64::from(e) * f64::from(vbri.scale))
                .sum();
            let fb = fa + f64::from(vbri.entries[i]) * f64::from(vbri.scale);
            (fa + (fb - fa) * (fi - i as f64)) as u64
        } else if let Some(toc) = &self.toc {
            let p = (sec as f64 * 100.0 / self.duration as f64).min(100.0);
            let i = (p as usize).min(99);
            let fa = f64::from(toc[i]);
            let fb = if i < 99 { f64::from(toc[i + 1]) } else { 256.0 };
            let fx = fa + (fb - fa) * (p - i as f64);
            let total = if self.nb_bytes > 0 {
                self.nb_bytes
            } else {
                self.file_size.saturating_sub(self.offset)
            };
            (fx / 256.0 * total as f64) as u64
        } else {
            self.file_size.saturating_sub(self.offset) * sec / self.duration.max(1)
        }
    }
}

impl Demuxer for Mp3Demuxer {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn dec_config(&self) -> DecoderConfig {
        DecoderConfig {
            codec: Codec::Mp3,
            config: None,
        }
    }

    fn next_frame(&mut self) -> Result<Option<usize>, DemuxError> {
        let len = self
            .stream
            .complete(0, Some(Duration::from_millis(100)))?;
        if len == 0 && self.file_size > 0 && self.stream.pos() >= self.file_size {
            return Ok(None);
        }
        Ok(Some(len))
    }

    fn frame(&self) -> &[u8] {
        self.stream.buffer()
    }

    fn set_used(&mut self, len: usize) {
        if len <= self.stream.buffer_len() {
            let _ = self.stream.seek(len as i64, Whence::Current);
        }
    }

    fn set_pos(&mut self, sec: u64) -> Result<u64, DemuxError> {
        if self.duration > 0 && sec > self.duration {
            return Err(DemuxError::OutOfRange);
        }

        let byte_pos = self.byte_pos_for(sec) + self.offset;
        if self.file_size > 0 && byte_pos > self.file_size {
            return Err(DemuxError::OutOfRange);
        }

        self.stream
            .seek(i64::try_from(byte_pos).map_err(|_| DemuxError::OutOfRange)?, Whence::Set)?;
        Ok(sec)
    }
}

#[cfg(test)]
mod tests;

//! MP4/M4A (ISO-BMFF) demuxer.
//!
//! Walks the box tree down to the `stbl` sample tables and produces AAC
//! access units one `stsz` entry at a time. Tag atoms under
//! `udta/meta/ilst` fill [`Meta`], including cover art.

use tracing::debug;

use super::{DecoderConfig, Demuxer, DemuxError, Meta, Picture};
use crate::decoder::Codec;
use crate::stream::{Stream, Whence};

/// ID3v1 genre names, indexed by the `gnre` atom (1-based).
const ID3V1_GENRES: [&str; 80] = [
    "Blues", "Classic Rock", "Country", "Dance", "Disco", "Funk", "Grunge",
    "Hip-Hop", "Jazz", "Metal", "New Age", "Oldies", "Other", "Pop", "R&B",
    "Rap", "Reggae", "Rock", "Techno", "Industrial", "Alternative", "Ska",
    "Death Metal", "Pranks", "Soundtrack", "Euro-Techno", "Ambient",
    "Trip-Hop", "Vocal", "Jazz+Funk", "Fusion", "Trance", "Classical",
    "Instrumental", "Acid", "House", "Game", "Sound Clip", "Gospel", "Noise",
    "Alternative Rock", "Bass", "Soul", "Punk", "Space", "Meditative",
    "Instrumental Pop", "Instrumental Rock", "Ethnic", "Gothic", "Darkwave",
    "Techno-Industrial", "Electronic", "Pop-Folk", "Eurodance", "Dream",
    "Southern Rock", "Comedy", "Cult", "Gangsta", "Top 40", "Christian Rap",
    "Pop/Funk", "Jungle", "Native US", "Cabaret", "New Wave", "Psychedelic",
    "Rave", "Showtunes", "Trailer", "Lo-Fi", "Tribal", "Acid Punk",
    "Acid Jazz", "Polka", "Retro", "Musical", "Rock & Roll", "Hard Rock",
];

fn read_u16(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[0], buf[1]])
}

fn read_u32(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

fn read_u64(buf: &[u8]) -> u64 {
    u64::from_be_bytes([
        buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
    ])
}

#[derive(Debug, Clone, Copy)]
struct StscEntry {
    first_chunk: u32,
    samples_per_chunk: u32,
}

/// MP4 demuxer state.
pub struct Mp4Demuxer {
    stream: Stream,
    meta: Meta,
    // mdhd
    time_scale: u32,
    duration_ticks: u64,
    // stsz
    fixed_sample_size: u32,
    sample_sizes: Vec<u32>,
    // stco / co64
    chunk_offsets: Vec<u64>,
    // stsc
    stsc: Vec<StscEntry>,
    // stts
    stts: Vec<(u32, u32)>,
    num_samples: u64,
    // mp4a
    channel_count: u8,
    samplerate: u32,
    // esds
    esds: Vec<u8>,
    avg_bitrate: u32,
    track_found: bool,
    // Cursors
    cur_sample: u64,
    cur_sample_size: u32,
    cur_chunk: usize,
    cur_chunk_idx: usize,
    cur_chunk_sample: u32,
    cur_offset: u64,
}

impl Mp4Demuxer {
    /// Open the demuxer: validate `ftyp`, locate and parse `moov`, position
    /// on the first sample.
    ///
    /// # Errors
    /// `Invalid` when the box tree is malformed or carries no `mp4a` track.
    pub fn open(stream: Stream) -> Result<(Self, u32, u8), DemuxError> {
        let mut demux = Self {
            stream,
            meta: Meta::default(),
            time_scale: 0,
            duration_ticks: 0,
            fixed_sample_size: 0,
            sample_sizes: Vec::new(),
            chunk_offsets: Vec::new(),
            stsc: Vec::new(),
            stts: Vec::new(),
            num_samples: 0,
            channel_count: 0,
            samplerate: 0,
            esds: Vec::new(),
            avg_bitrate: 0,
            track_found: false,
            cur_sample: 0,
            cur_sample_size: 0,
            cur_chunk: 0,
            cur_chunk_idx: 0,
            cur_chunk_sample: 0,
            cur_offset: 0,
        };

        let (size, kind) = demux.read_atom()?;
        if &kind != b"ftyp" {
            return Err(DemuxError::Invalid("missing ftyp"));
        }
        demux.skip(size - 8)?;

        let file_size = demux.stream.size();
        let mut moov_found = false;
        let mut mdat_found = false;
        let mut walked: u64 = size;

        while file_size == 0 || walked < file_size {
            let (size, kind) = match demux.read_atom() {
                Ok(v) => v,
                Err(DemuxError::Invalid(_)) => break,
                Err(e) => return Err(e),
            };
            match &kind {
                b"moov" => {
                    demux.parse_moov(size - 8)?;
                    moov_found = true;
                    if mdat_found {
                        break;
                    }
                }
                b"mdat" => {
                    mdat_found = true;
                    if moov_found {
                        break;
                    }
                    demux.skip(size - 8)?;
                }
                _ => demux.skip(size - 8)?,
            }
            walked += size;
        }

        if !mdat_found || !demux.track_found {
            return Err(DemuxError::Invalid("no mp4a track"));
        }
        if demux.chunk_offsets.is_empty() || demux.stsc.is_empty() || demux.num_samples == 0 {
            return Err(DemuxError::Invalid("incomplete sample tables"));
        }

        demux.cur_sample_size = demux.sample_size_at(0);
        demux.cur_offset = demux.chunk_offsets[0];

        demux.meta.samplerate = demux.samplerate;
        demux.meta.channels = demux.channel_count;
        demux.meta.bitrate = demux.avg_bitrate / 1000;
        if demux.time_scale != 0 {
            demux.meta.length = demux.duration_ticks / u64::from(demux.time_scale);
        }

        debug!(
            samples = demux.num_samples,
            chunks = demux.chunk_offsets.len(),
            duration = demux.meta.length,
            "mp4 stream opened"
        );

        let samplerate = demux.samplerate;
        let channels = demux.channel_count;
        Ok((demux, samplerate, channels))
    }

    fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, DemuxError> {
        if n > self.stream.buffer_size() {
            return Err(DemuxError::Invalid("atom larger than stream buffer"));
        }
        if self.stream.read(n, None)? < n {
            return Err(DemuxError::Invalid("truncated atom"));
        }
        Ok(self.stream.buffer()[..n].to_vec())
    }

    /// Skip `n` bytes beyond what has already been read.
    fn skip(&mut self, n: u64) -> Result<(), DemuxError> {
        let adv = self.stream.buffer_len() as u64 + n;
        self.stream
            .seek(i64::try_from(adv).map_err(|_| DemuxError::Invalid("atom overflow"))?, Whence::Current)?;
        Ok(())
    }

    /// Read an atom header; returns (total size incl. header, kind).
    fn read_atom(&mut self) -> Result<(u64, [u8; 4]), DemuxError> {
        let b = self.read_exact(8)?;
        let size = u64::from(read_u32(&b[0..4]));
        let kind = [b[4], b[5], b[6], b[7]];
        if size < 8 {
            return Err(DemuxError::Invalid("bad atom size"));
        }
        Ok((size, kind))
    }

    fn walk_children<F>(&mut self, mut body: u64, mut visit: F) -> Result<(), DemuxError>
    where
        F: FnMut(&mut Self, u64, &[u8; 4]) -> Result<bool, DemuxError>,
    {
        while body >= 8 {
            let (size, kind) = self.read_atom()?;
            let child_body = size - 8;
            if !visit(self, child_body, &kind)? {
                self.skip(child_body)?;
            }
            body = body.saturating_sub(size);
        }
        if body > 0 {
            self.skip(body)?;
        }
        Ok(())
    }

    fn parse_moov(&mut self, body: u64) -> Result<(), DemuxError> {
        self.walk_children(body, |d, child, kind| match kind {
            b"trak" if !d.track_found => {
                d.parse_track(child)?;
                Ok(true)
            }
            b"udta" => {
                d.parse_udta(child)?;
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    fn parse_track(&mut self, body: u64) -> Result<(), DemuxError> {
        self.walk_children(body, |d, child, kind| match kind {
            b"mdia" | b"minf" | b"stbl" => {
                d.parse_track(child)?;
                Ok(true)
            }
            b"mdhd" => {
                d.parse_mdhd(child)?;
                Ok(true)
            }
            b"stsd" => {
                d.parse_stsd(child)?;
                Ok(true)
            }
            b"stts" if d.track_found => {
                d.parse_stts(child)?;
                Ok(true)
            }
            b"stsc" if d.track_found => {
                d.parse_stsc(child)?;
                Ok(true)
            }
            b"stsz" if d.track_found => {
                d.parse_stsz(child)?;
                Ok(true)
            }
            b"stco" if d.track_found => {
                d.parse_stco(child, false)?;
                Ok(true)
            }
            b"co64" if d.track_found => {
                d.parse_stco(child, true)?;
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    fn parse_mdhd(&mut self, body: u64) -> Result<(), DemuxError> {
        let version = self.read_exact(4)?[0];
        let consumed = if version == 1 {
            let b = self.read_exact(28)?;
            self.time_scale = read_u32(&b[16..20]);
            self.duration_ticks = read_u64(&b[20..28]);
            32
        } else {
            let b = self.read_exact(16)?;
            self.time_scale = read_u32(&b[8..12]);
            self.duration_ticks = u64::from(read_u32(&b[12..16]));
            20
        };
        self.skip(body.saturating_sub(consumed))
    }

    fn parse_stsd(&mut self, body: u64) -> Result<(), DemuxError> {
        let b = self.read_exact(8)?;
        let count = read_u32(&b[4..8]);
        let mut remaining = body.saturating_sub(8);

        for _ in 0..count {
            if remaining < 8 {
                break;
            }
            let (size, kind) = self.read_atom()?;
            if &kind == b"mp4a" {
                self.parse_mp4a(size - 8)?;
            } else {
                self.skip(size - 8)?;
            }
            remaining = remaining.saturating_sub(size);
        }
        self.skip(remaining)
    }

    fn parse_mp4a(&mut self, body: u64) -> Result<(), DemuxError> {
        let b = self.read_exact(28)?;
        self.channel_count = u8::try_from(read_u16(&b[16..18])).unwrap_or(2);
        // 16.16 fixed-point sample rate, integer part only
        self.samplerate = u32::from(read_u16(&b[24..26]));
        self.track_found = true;

        let mut remaining = body.saturating_sub(28);
        if remaining >= 8 {
            let (size, kind) = self.read_atom()?;
            if &kind == b"esds" {
                self.parse_esds(size - 8)?;
            } else {
                self.skip(size - 8)?;
            }
            remaining = remaining.saturating_sub(size);
        }
        self.skip(remaining)
    }

    fn read_desc_len(&mut self, remaining: &mut u64) -> Result<u32, DemuxError> {
        let mut len: u32 = 0;
        for _ in 0..4 {
            if *remaining == 0 {
                break;
            }
            let b = self.read_exact(1)?[0];
            *remaining -= 1;
            len = (len << 7) | u32::from(b & 0x7F);
            if b & 0x80 == 0 {
                break;
            }
        }
        Ok(len)
    }

    /// ES descriptor walk: 0x03 → 0x04 (13-byte properties) → 0x05
    /// (`DecoderSpecificInfo`, the `AudioSpecificConfig` blob).
    fn parse_esds(&mut self, body: u64) -> Result<(), DemuxError> {
        let mut rem = body;

        // version + flags
        self.read_exact(4)?;
        rem = rem.saturating_sub(4);

        let tag = self.read_exact(1)?[0];
        rem = rem.saturating_sub(1);
        if tag == 0x03 {
            if self.read_desc_len(&mut rem)? < 20 {
                return self.skip(rem);
            }
            self.read_exact(3)?;
            rem = rem.saturating_sub(3);
        } else {
            self.read_exact(2)?;
            rem = rem.saturating_sub(2);
        }

        let tag = self.read_exact(1)?[0];
        rem = rem.saturating_sub(1);
        if tag != 0x04 || self.read_desc_len(&mut rem)? < 13 {
            return self.skip(rem);
        }

        let b = self.read_exact(14)?;
        self.avg_bitrate = read_u32(&b[9..13]);
        let next_tag = b[13];
        rem = rem.saturating_sub(14);
        if next_tag != 0x05 {
            return self.skip(rem);
        }

        let config_len = self.read_desc_len(&mut rem)? as usize;
        if config_len > 0 && config_len as u64 <= rem {
            let b = self.read_exact(config_len)?;
            self.esds = b;
            rem -= config_len as u64;
        }
        self.skip(rem)
    }

    fn parse_stts(&mut self, body: u64) -> Result<(), DemuxError> {
        let b = self.read_exact(8)?;
        let count = read_u32(&b[4..8]) as usize;
        let per_read = self.stream.buffer_size() / 8;

        self.stts = Vec::with_capacity(count);
        self.num_samples = 0;
        let mut done = 0;
        while done < count {
            let n = per_read.min(count - done);
            let b = self.read_exact(n * 8)?;
            for j in 0..n {
                let sample_count = read_u32(&b[j * 8..]);
                let sample_delta = read_u32(&b[j * 8 + 4..]);
                self.stts.push((sample_count, sample_delta));
                self.num_samples += u64::from(sample_count);
            }
            done += n;
        }
        self.skip(body.saturating_sub(8 + count as u64 * 8))
    }

    fn parse_stsc(&mut self, body: u64) -> Result<(), DemuxError> {
        let b = self.read_exact(8)?;
        let count = read_u32(&b[4..8]) as usize;
        let per_read = self.stream.buffer_size() / 12;

        self.stsc = Vec::with_capacity(count);
        let mut done = 0;
        while done < count {
            let n = per_read.min(count - done);
            let b = self.read_exact(n * 12)?;
            for j in 0..n {
                self.stsc.push(StscEntry {
                    first_chunk: read_u32(&b[j * 12..]),
                    samples_per_chunk: read_u32(&b[j * 12 + 4..]),
                });
            }
            done += n;
        }
        self.skip(body.saturating_sub(8 + count as u64 * 12))
    }

    fn parse_stsz(&mut self, body: u64) -> Result<(), DemuxError> {
        let b = self.read_exact(12)?;
        self.fixed_sample_size = read_u32(&b[4..8]);
        let count = read_u32(&b[8..12]) as usize;
        let mut consumed = 12u64;

        if self.fixed_sample_size == 0 {
            let per_read = self.stream.buffer_size() / 4;
            self.sample_sizes = Vec::with_capacity(count);
            let mut done = 0;
            while done < count {
                let n = per_read.min(count - done);
                let b = self.read_exact(n * 4)?;
                for j in 0..n {
                    self.sample_sizes.push(read_u32(&b[j * 4..]));
                }
                done += n;
            }
            consumed += count as u64 * 4;
        }
        self.skip(body.saturating_sub(consumed))
    }

    fn parse_stco(&mut self, body: u64, wide: bool) -> Result<(), DemuxError> {
        let b = self.read_exact(8)?;
        let count = read_u32(&b[4..8]) as usize;
        let entry = if wide { 8 } else { 4 };
        let per_read = self.stream.buffer_size() / entry;

        self.chunk_offsets = Vec::with_capacity(count);
        let mut done = 0;
        while done < count {
            let n = per_read.min(count - done);
            let b = self.read_exact(n * entry)?;
            for j in 0..n {
                let off = if wide {
                    read_u64(&b[j * 8..])
                } else {
                    u64::from(read_u32(&b[j * 4..]))
                };
                self.chunk_offsets.push(off);
            }
            done += n;
        }
        self.skip(body.saturating_sub(8 + (count * entry) as u64))
    }

    fn parse_udta(&mut self, body: u64) -> Result<(), DemuxError> {
        self.walk_children(body, |d, child, kind| match kind {
            b"meta" => {
                d.parse_meta(child)?;
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    fn parse_meta(&mut self, body: u64) -> Result<(), DemuxError> {
        // version + flags
        self.read_exact(4)?;
        self.walk_children(body.saturating_sub(4), |d, child, kind| match kind {
            b"ilst" => {
                d.parse_ilst(child)?;
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    fn parse_ilst(&mut self, body: u64) -> Result<(), DemuxError> {
        self.walk_children(body, |d, child, kind| {
            match kind {
                [0xA9, b'a', b'l', b'b'] => {
                    d.meta.album = d.parse_txt(child)?;
                }
                [0xA9, b'A', b'R', b'T'] => {
                    d.meta.artist = d.parse_txt(child)?;
                }
                [0xA9, b'c', b'm', b't'] => {
                    d.meta.comment = d.parse_txt(child)?;
                }
                [0xA9, b'd', b'a', b'y'] => {
                    if let Some(year) = d.parse_txt(child)? {
                        d.meta.year = year.trim().parse().unwrap_or(0);
                    }
                }
                [0xA9, b'n', b'a', b'm'] => {
                    d.meta.title = d.parse_txt(child)?;
                }
                [0xA9, b'g', b'e', b'n'] => {
                    d.meta.genre = d.parse_txt(child)?;
                }
                b"trkn" => d.parse_trkn(child)?,
                b"gnre" => d.parse_gnre(child)?,
                b"covr" => d.parse_covr(child)?,
                _ => return Ok(false),
            }
            Ok(true)
        })
    }

    /// Text tag: a `data` child with version/flags and UTF-8 payload.
    fn parse_txt(&mut self, body: u64) -> Result<Option<String>, DemuxError> {
        if body < 8 {
            self.skip(body)?;
            return Ok(None);
        }
        let (size, kind) = self.read_atom()?;
        if &kind != b"data" || size < 16 {
            self.skip(body.saturating_sub(8))?;
            return Ok(None);
        }

        let len = (size - 16) as usize;
        // type + locale
        self.read_exact(8)?;

        let mut text = Vec::with_capacity(len);
        let mut left = len;
        while left > 0 {
            let n = left.min(self.stream.buffer_size());
            let b = self.read_exact(n)?;
            text.extend_from_slice(&b);
            left -= n;
        }

        self.skip(body.saturating_sub(size))?;
        Ok(Some(String::from_utf8_lossy(&text).into_owned()))
    }

    fn parse_trkn(&mut self, body: u64) -> Result<(), DemuxError> {
        if body < 8 {
            return self.skip(body);
        }
        let (size, kind) = self.read_atom()?;
        let mut consumed = 8u64;
        if &kind == b"data" && size == 24 {
            self.read_exact(10)?;
            self.meta.track = read_u16(&self.read_exact(2)?);
            self.meta.total_track = read_u16(&self.read_exact(2)?);
            consumed += 14;
        } else {
            self.skip(size - 8)?;
            consumed += size - 8;
        }
        self.skip(body.saturating_sub(consumed))
    }

    fn parse_gnre(&mut self, body: u64) -> Result<(), DemuxError> {
        if body < 8 {
            return self.skip(body);
        }
        let (size, kind) = self.read_atom()?;
        let mut consumed = 8u64;
        if &kind == b"data" && size == 18 {
            self.read_exact(8)?;
            let genre = usize::from(read_u16(&self.read_exact(2)?));
            consumed += 10;
            if genre >= 1 && genre <= ID3V1_GENRES.len() {
                self.meta.genre = Some(ID3V1_GENRES[genre - 1].to_string());
            }
        } else {
            self.skip(size - 8)?;
            consumed += size - 8;
        }
        self.skip(body.saturating_sub(consumed))
    }

    /// Cover art: the `data` type field selects the MIME (13 jpeg, 14 png).
    fn parse_covr(&mut self, body: u64) -> Result<(), DemuxError> {
        if body < 8 {
            return self.skip(body);
        }
        let (size, kind) = self.read_atom()?;
        if &kind != b"data" || size < 16 {
            self.skip(body.saturating_sub(8))?;
            return Ok(());
        }

        let len = (size - 16) as usize;
        let b = self.read_exact(8)?;
        let flags = read_u32(&b[0..4]);

        let mut data = Vec::with_capacity(len);
        let mut left = len;
        while left > 0 {
            let n = left.min(self.stream.buffer_size());
            let b = self.read_exact(n)?;
            data.extend_from_slice(&b);
            left -= n;
        }

        let mime = match flags {
            13 => Some("image/jpeg"),
            14 => Some("image/png"),
            _ => None,
        };
        if let Some(mime) = mime {
            self.meta.picture = Some(Picture {
                data,
                mime: mime.to_string(),
            });
        }

        self.skip(body.saturating_sub(size))
    }

    fn sample_size_at(&self, sample: u64) -> u32 {
        if self.fixed_sample_size != 0 {
            self.fixed_sample_size
        } else {
            self.sample_sizes
                .get(usize::try_from(sample).unwrap_or(usize::MAX))
                .copied()
                .unwrap_or(0)
        }
    }

    /// Locate the sample containing `ticks` media-time units; returns the
    /// sample index and the sub-sample tick offset.
    fn find_sample(&self, ticks: u64) -> Option<(u64, u64)> {
        let mut acc_ticks: u64 = 0;
        let mut sample: u64 = 0;
        for &(count, delta) in &self.stts {
            let span = u64::from(count) * u64::from(delta);
            if delta != 0 && acc_ticks + span > ticks {
                let into = ticks - acc_ticks;
                return Some((sample + into / u64::from(delta), into % u64::from(delta)));
            }
            acc_ticks += span;
            sample += u64::from(count);
        }
        None
    }

    /// Locate the chunk containing `sample`; returns (chunk index,
    /// stsc run index, sample index within the chunk).
    fn find_chunk(&self, sample: u64) -> Option<(usize, usize, u32)> {
        let mut acc: u64 = 0;
        for (i, entry) in self.stsc.iter().enumerate() {
            let next_first = if i + 1 < self.stsc.len() {
                self.stsc[i + 1].first_chunk
            } else {
                u32::try_from(self.chunk_offsets.len()).unwrap_or(u32::MAX) + 1
            };
            let run_chunks = u64::from(next_first.saturating_sub(entry.first_chunk));
            let spc = u64::from(entry.samples_per_chunk);
            if spc == 0 {
                continue;
            }
            let run_samples = run_chunks * spc;
            if acc + run_samples > sample {
                let into = sample - acc;
                let chunk = (entry.first_chunk as u64 - 1) + into / spc;
                let chunk = usize::try_from(chunk).ok()?;
                return Some((chunk, i, u32::try_from(into % spc).ok()?));
            }
            acc += run_samples;
        }
        None
    }
}

impl Demuxer for Mp4Demuxer {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn dec_config(&self) -> DecoderConfig {
        DecoderConfig {
            codec: Codec::Aac,
            config: if self.esds.is_empty() {
                None
            } else {
                Some(self.esds.clone())
            },
        }
    }

    fn next_frame(&mut self) -> Result<Option<usize>, DemuxError> {
        if self.cur_sample >= self.num_samples {
            return Ok(None);
        }

        let size = self.cur_sample_size as usize;
        self.stream
            .seek(i64::try_from(self.cur_offset).map_err(|_| DemuxError::OutOfRange)?, Whence::Set)?;
        if size > self.stream.buffer_size() {
            return Err(DemuxError::Invalid("sample larger than stream buffer"));
        }
        if self.stream.read(size, None)? < size {
            return Ok(None);
        }

        self.cur_sample += 1;
        if self.cur_sample < self.num_samples {
            self.cur_chunk_sample += 1;
            let spc = self.stsc[self.cur_chunk_idx].samples_per_chunk;
            if self.cur_chunk_sample >= spc {
                // Next chunk, possibly crossing an stsc run boundary
                self.cur_chunk += 1;
                if self.cur_chunk_idx + 1 < self.stsc.len()
                    && self.cur_chunk as u64 + 1
                        >= u64::from(self.stsc[self.cur_chunk_idx + 1].first_chunk)
                {
                    self.cur_chunk_idx += 1;
                }
                self.cur_offset = self
                    .chunk_offsets
                    .get(self.cur_chunk)
                    .copied()
                    .ok_or(DemuxError::Invalid("chunk index out of range"))?;
                self.cur_chunk_sample = 0;
            } else {
                self.cur_offset += u64::from(self.cur_sample_size);
            }
            self.cur_sample_size = self.sample_size_at(self.cur_sample);
        }

        Ok(Some(size))
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
        let ticks = sec * u64::from(self.time_scale);
        let (sample, skip) = self.find_sample(ticks).ok_or(DemuxError::OutOfRange)?;
        let (chunk, chunk_idx, sample_in_chunk) =
            self.find_chunk(sample).ok_or(DemuxError::OutOfRange)?;

        let mut offset = *self
            .chunk_offsets
            .get(chunk)
            .ok_or(DemuxError::OutOfRange)?;
        if self.fixed_sample_size != 0 {
            offset += u64::from(sample_in_chunk) * u64::from(self.fixed_sample_size);
        } else {
            let first = sample - u64::from(sample_in_chunk);
            for s in first..sample {
                offset += u64::from(self.sample_size_at(s));
            }
        }

        self.cur_sample = sample;
        self.cur_chunk = chunk;
        self.cur_chunk_idx = chunk_idx;
        self.cur_chunk_sample = sample_in_chunk;
        self.cur_offset = offset;
        self.cur_sample_size = self.sample_size_at(sample);

        Ok(sec - skip / u64::from(self.time_scale.max(1)))
    }
}

#[cfg(test)]
pub(crate) mod tests;

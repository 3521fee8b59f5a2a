//! RAOP audio path: transport → AES decrypt → decoder → PCM.
//!
//! One handle per session. The output mixer pulls through
//! [`RaopAudioHandle::read`] on the device thread; lost or missing packets
//! turn into injected silence so playback never stalls.

use std::net::IpAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, trace};

use crate::audio::{AudioFormat, Sample};
use crate::crypto::AudioDecryptor;
use crate::decoder::{self, Codec, Decoder, DecoderInfo};
use crate::outputs::{AudioSource, SourceRead};
use crate::rtp::{
    self, JitterConfig, RtcpAction, RtpConfig, RtpError, RtpRead, RtpReceiver,
};
use crate::sdp::StreamParams;

use super::tcp::RaopTcp;
use super::{RaopError, Transport};

/// RAOP audio payload type.
const PAYLOAD_TYPE: u8 = 0x60;

/// First port tried for the audio transport.
const AUDIO_PORT_BASE: u16 = 6000;

/// Jitter buffer span in milliseconds.
const POOL_MS: u32 = 1000;

/// Pre-roll depth in milliseconds.
const DELAY_MS: u32 = 100;

const RESENT_RATIO: u8 = 10;

enum AudioTransport {
    Udp(RtpReceiver),
    Tcp(RaopTcp),
}

struct ReadState {
    decoder: Box<dyn Decoder>,
    pcm_remaining: usize,
    /// Samples of silence still owed for lost packets
    silence_remaining: usize,
}

/// Per-session RAOP audio source.
pub(crate) struct RaopAudioHandle {
    transport: AudioTransport,
    decryptor: Option<AudioDecryptor>,
    state: Mutex<ReadState>,
    samplerate: u32,
    channels: u8,
    samples_per_frame: u32,
    decode_errors: AtomicUsize,
}

/// Derive frames-per-packet from the negotiated parameters (ALAC carries
/// it in the fmtp, the rest use the AirPlay default).
fn samples_per_frame(params: &StreamParams) -> u32 {
    if params.codec == Codec::Alac {
        if let Some(fmtp) = &params.fmtp {
            let fields: Vec<&str> = fmtp.split_whitespace().collect();
            let index = if fields.len() == 12 { 1 } else { 0 };
            if let Some(v) = fields.get(index).and_then(|f| f.parse().ok()) {
                return v;
            }
        }
    }
    352
}

/// Extract the hex `config=` blob from an AAC fmtp line.
fn aac_config(fmtp: &str) -> Option<Vec<u8>> {
    let config = fmtp
        .split(';')
        .map(str::trim)
        .find_map(|p| p.strip_prefix("config="))?;
    let hex: String = config.chars().take_while(char::is_ascii_hexdigit).collect();
    if hex.len() < 4 {
        return None;
    }
    (0..hex.len() - 1)
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

fn open_decoder(params: &StreamParams) -> Result<(Box<dyn Decoder>, u32, u8), RaopError> {
    let (codec, config) = match params.codec {
        Codec::Alac => {
            let fmtp = params
                .fmtp
                .as_deref()
                .ok_or(RaopError::MissingFormat)?;
            let cookie = decoder::alac::cookie_from_fmtp(fmtp)?;
            return Ok(decoder::open(Codec::Alac, Some(&cookie))?);
        }
        Codec::Aac => {
            let fmtp = params
                .fmtp
                .as_deref()
                .ok_or(RaopError::MissingFormat)?;
            let asc = aac_config(fmtp).ok_or(RaopError::MissingFormat)?;
            (Codec::Aac, Some(asc))
        }
        Codec::Pcm => (Codec::Pcm, None),
        Codec::Mp3 => (Codec::Mp3, None),
    };
    Ok(decoder::open(codec, config.as_deref())?)
}

impl RaopAudioHandle {
    /// Open the audio transport and decoder for a negotiated session.
    pub(crate) fn open(
        transport: Transport,
        params: &StreamParams,
        aes: Option<([u8; 16], [u8; 16])>,
        peer: IpAddr,
        control_port: u16,
    ) -> Result<Self, RaopError> {
        let (decoder, samplerate, channels) = open_decoder(params)?;
        let samplerate = if samplerate == 0 { 44100 } else { samplerate };
        let channels = if channels == 0 { 2 } else { channels };
        let spf = samples_per_frame(params);

        let transport = match transport {
            Transport::Tcp => AudioTransport::Tcp(RaopTcp::open(AUDIO_PORT_BASE)?),
            Transport::Udp => {
                let packets_per_second = samplerate / spf.max(1);
                let pool = POOL_MS * packets_per_second / 1000;
                let delay = DELAY_MS * packets_per_second / 1000;
                let spf_rtcp = spf;

                let config = RtpConfig {
                    port: AUDIO_PORT_BASE,
                    rtcp_port: control_port,
                    peer: Some(peer),
                    payload: PAYLOAD_TYPE,
                    jitter: JitterConfig {
                        max_packet_count: u16::try_from(pool.max(8)).unwrap_or(u16::MAX),
                        delay_packet_count: u16::try_from(delay.max(2)).unwrap_or(u16::MAX),
                        resent_ratio: RESENT_RATIO,
                        ..JitterConfig::default()
                    },
                    rtcp_cb: Some(Box::new(move |buf: &[u8]| {
                        rtcp_action(buf, spf_rtcp)
                    })),
                    // AirPlay retransmit replies wrap the real RTP packet
                    // in a 4-byte pre-header
                    cust_cb: Some(Box::new(|buf: &[u8]| {
                        if buf.len() > 16 {
                            Some(buf[4..].to_vec())
                        } else {
                            None
                        }
                    })),
                    resend_cb: Some(Box::new(|seq: u16, count: u16| {
                        Some(resend_request(seq, count))
                    })),
                };
                AudioTransport::Udp(RtpReceiver::open(config).map_err(|e| match e {
                    RtpError::NoFreePort(p) => RaopError::NoFreePort(p),
                    other => RaopError::Rtp(other),
                })?)
            }
        };

        Ok(Self {
            transport,
            decryptor: aes.map(|(key, iv)| AudioDecryptor::new(&key, &iv)),
            state: Mutex::new(ReadState {
                decoder,
                pcm_remaining: 0,
                silence_remaining: 0,
            }),
            samplerate,
            channels,
            samples_per_frame: spf,
            decode_errors: AtomicUsize::new(0),
        })
    }

    /// Bound server port to report in the SETUP answer.
    pub(crate) fn port(&self) -> u16 {
        match &self.transport {
            AudioTransport::Udp(rtp) => rtp.port(),
            AudioTransport::Tcp(tcp) => tcp.port(),
        }
    }

    pub(crate) fn samplerate(&self) -> u32 {
        self.samplerate
    }

    pub(crate) fn channels(&self) -> u8 {
        self.channels
    }

    /// Flush in-flight audio up to `seq`: packets older than it will never
    /// reach the decoder again.
    pub(crate) fn flush(&self, seq: u16) {
        if let AudioTransport::Udp(rtp) = &self.transport {
            rtp.flush(seq, 0);
        }
        let mut state = lock(&self.state);
        state.silence_remaining = 0;
        state.pcm_remaining = 0;
        // Throw away PCM still queued inside the decoder
        let mut scratch = [0 as Sample; 512];
        let mut info = DecoderInfo::default();
        while matches!(state.decoder.decode(None, &mut scratch, &mut info), Ok(n) if n > 0) {}
    }

    fn read_samples(&self, out: &mut [Sample]) -> SourceRead {
        let mut state = lock(&self.state);
        let mut info = DecoderInfo::default();

        // Owed silence first
        if state.silence_remaining > 0 {
            let n = state.silence_remaining.min(out.len());
            out[..n].fill(0 as Sample);
            state.silence_remaining -= n;
            return SourceRead::Samples(n);
        }

        let mut written = 0usize;

        if state.pcm_remaining > 0 {
            if let Ok(n) = state.decoder.decode(None, out, &mut info) {
                state.pcm_remaining = info.remaining;
                written += n;
            }
        }

        let mut packet = [0u8; rtp::MAX_PACKET_SIZE];
        let mut plain = [0u8; rtp::MAX_PACKET_SIZE];

        while written < out.len() {
            let received = match &self.transport {
                AudioTransport::Udp(rtp) => rtp.read(&mut packet),
                AudioTransport::Tcp(tcp) => match tcp.read(&mut packet) {
                    0 => RtpRead::NoPacket,
                    n => RtpRead::Packet(n),
                },
            };

            match received {
                RtpRead::Packet(0) => {}
                RtpRead::Packet(len) => {
                    let payload: &[u8] = if let Some(decryptor) = &self.decryptor {
                        decryptor.decrypt(&packet[..len], &mut plain[..len]);
                        &plain[..len]
                    } else {
                        &packet[..len]
                    };

                    match state
                        .decoder
                        .decode(Some(payload), &mut out[written..], &mut info)
                    {
                        Ok(n) => {
                            state.pcm_remaining = info.remaining;
                            written += n;
                        }
                        Err(e) => {
                            let errors = self.decode_errors.fetch_add(1, Ordering::AcqRel);
                            if errors % 100 == 0 {
                                debug!("raop packet decode failed: {e}");
                            }
                        }
                    }
                }
                RtpRead::Lost | RtpRead::Discarded => {
                    trace!("lost packet, injecting one frame of silence");
                    state.silence_remaining +=
                        (self.samples_per_frame * u32::from(self.channels)) as usize;
                    break;
                }
                RtpRead::NoPacket => break,
            }
        }

        // Satisfy owed silence from this call when nothing was decoded
        if written == 0 && state.silence_remaining > 0 {
            let n = state.silence_remaining.min(out.len());
            out[..n].fill(0 as Sample);
            state.silence_remaining -= n;
            return SourceRead::Samples(n);
        }

        if written == 0 {
            SourceRead::Pending
        } else {
            SourceRead::Samples(written)
        }
    }
}

impl AudioSource for RaopSource {
    fn read(&mut self, out: &mut [Sample], fmt: &mut AudioFormat) -> SourceRead {
        fmt.samplerate = self.0.samplerate;
        fmt.channels = self.0.channels;
        self.0.read_samples(out)
    }
}

/// Mixer-facing wrapper sharing the session's audio handle.
pub(crate) struct RaopSource(pub(crate) std::sync::Arc<RaopAudioHandle>);

/// Map an RTCP packet to the receiver action: 0xD4 time-sync adjusts the
/// pre-roll, 0xD6 retransmit replies are unwrapped and re-queued.
fn rtcp_action(buf: &[u8], samples_per_frame: u32) -> RtcpAction {
    if buf.len() < 4 {
        return RtcpAction::None;
    }
    match buf[1] {
        0xD4 if buf.len() >= 20 => {
            let reference = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
            let current = u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]);
            let delay_samples = current.wrapping_sub(reference);
            let packets = delay_samples / samples_per_frame.max(1);
            RtcpAction::SetDelayPackets(u16::try_from(packets).unwrap_or(u16::MAX))
        }
        0xD6 if buf.len() >= 16 => RtcpAction::Inject(buf[4..].to_vec()),
        _ => RtcpAction::None,
    }
}

/// Compound RTCP retransmit request: `80 D5 0001 <first> <count>`.
fn resend_request(seq: u16, count: u16) -> Vec<u8> {
    let mut out = vec![0x80, 0xD5, 0x00, 0x01];
    out.extend_from_slice(&seq.to_be_bytes());
    out.extend_from_slice(&count.to_be_bytes());
    out
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resend_request_layout() {
        assert_eq!(
            resend_request(0x1234, 2),
            vec![0x80, 0xD5, 0x00, 0x01, 0x12, 0x34, 0x00, 0x02]
        );
    }

    #[test]
    fn timing_packet_sets_delay() {
        let mut buf = vec![0x80, 0xD4];
        buf.resize(20, 0);
        buf[4..8].copy_from_slice(&1000u32.to_be_bytes());
        buf[16..20].copy_from_slice(&(1000u32 + 352 * 10).to_be_bytes());

        match rtcp_action(&buf, 352) {
            RtcpAction::SetDelayPackets(n) => assert_eq!(n, 10),
            _ => panic!("expected SetDelayPackets"),
        }
    }

    #[test]
    fn retransmit_reply_is_injected_without_wrapper() {
        let mut buf = vec![0x80, 0xD6, 0x00, 0x01];
        buf.extend_from_slice(&[0x80; 16]);

        match rtcp_action(&buf, 352) {
            RtcpAction::Inject(pkt) => assert_eq!(pkt.len(), 16),
            _ => panic!("expected Inject"),
        }
    }

    #[test]
    fn short_rtcp_ignored() {
        assert!(matches!(rtcp_action(&[0x80], 352), RtcpAction::None));
        assert!(matches!(
            rtcp_action(&[0x80, 0xD4, 0, 0], 352),
            RtcpAction::None
        ));
    }

    #[test]
    fn aac_fmtp_config_extracts_hex() {
        let fmtp = "96 mode=AAC-hbr; config=1210; sizeLength=13";
        assert_eq!(aac_config(fmtp), Some(vec![0x12, 0x10]));
        assert_eq!(aac_config("96 mode=AAC-hbr"), None);
    }

    #[test]
    fn alac_fmtp_yields_frame_count() {
        let params = StreamParams {
            codec: Codec::Alac,
            fmtp: Some("96 352 0 16 40 10 14 2 255 0 0 44100".to_string()),
            rtpmap: None,
            encryption: None,
        };
        assert_eq!(samples_per_frame(&params), 352);
    }
}

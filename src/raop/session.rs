//! Per-client RAOP session: RTSP method handling and stream lifecycle.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::audio::{AudioFormat, VOLUME_MAX};
use crate::crypto;
use crate::outputs::{AudioSource, SharedSource, StreamId, StreamKey};
use crate::rtsp::headers::names;
use crate::rtsp::{Method, RtspRequest, RtspResponse, StatusCode, auth::DigestAuth};
use crate::sdp::{SessionDescription, StreamParams};
use crate::util::random_id;

use super::audio::{RaopAudioHandle, RaopSource};
use super::{ServerShared, SessionInfo, Transport, dmap};

pub(crate) struct Session {
    shared: Arc<ServerShared>,
    peer: SocketAddr,
    local_ip: IpAddr,
    auth: DigestAuth,
    params: Option<StreamParams>,
    aes: Option<([u8; 16], [u8; 16])>,
    transport: Transport,
    control_port: u16,
    #[allow(dead_code)] // Negotiated but the time-sync channel rides control
    timing_port: u16,
    audio: Option<Arc<RaopAudioHandle>>,
    stream: Option<StreamId>,
    info: Arc<Mutex<SessionInfo>>,
    samplerate: u32,
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Pull `seq=`/`rtptime=` out of an RTP-Info header.
fn parse_rtp_info(value: &str) -> (u16, u32) {
    let mut seq = 0u16;
    let mut rtptime = 0u32;
    for part in value.split([';', ',']) {
        let part = part.trim();
        if let Some(v) = part.strip_prefix("seq=") {
            seq = v.trim().parse().unwrap_or(0);
        } else if let Some(v) = part.strip_prefix("rtptime=") {
            rtptime = v.trim().parse().unwrap_or(0);
        }
    }
    (seq, rtptime)
}

fn parse_port(transport: &str, key: &str) -> u16 {
    transport
        .split(';')
        .filter_map(|p| p.trim().strip_prefix(key))
        .find_map(|v| v.strip_prefix('='))
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// The `-30..0` dB volume scale maps linearly onto the mixer unit;
/// `-144` is the mute sentinel. Preserved bit-for-bit from the protocol.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn volume_from_db(db: f32) -> u32 {
    if db <= -144.0 {
        return 0;
    }
    let v = (db + 30.0) * VOLUME_MAX as f32 / 30.0;
    (v.clamp(0.0, VOLUME_MAX as f32)) as u32
}

impl Session {
    pub(crate) fn new(shared: Arc<ServerShared>, peer: SocketAddr, local_ip: IpAddr) -> Self {
        let info = Arc::new(Mutex::new(SessionInfo {
            id: random_id(10),
            name: Some(peer.ip().to_string()),
            ..SessionInfo::default()
        }));
        lock(&shared.infos).push(Arc::clone(&info));

        Self {
            shared,
            peer,
            local_ip,
            auth: DigestAuth::new(),
            params: None,
            aes: None,
            transport: Transport::Udp,
            control_port: 0,
            timing_port: 0,
            audio: None,
            stream: None,
            info,
            samplerate: 44100,
        }
    }

    fn common_headers(&self, mut resp: RtspResponse, req: &RtspRequest) -> RtspResponse {
        if let Some(challenge) = req.headers.get(names::APPLE_CHALLENGE) {
            let ip = match self.local_ip {
                IpAddr::V4(v4) => v4,
                IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
            };
            match crypto::apple_response(challenge, ip, &self.shared.config.hw_addr) {
                Ok(response) => resp.headers.insert(names::APPLE_RESPONSE, response),
                Err(e) => warn!("apple challenge failed: {e}"),
            }
        }
        resp.headers.insert("Server", "AirCat/1.0");
        if let Some(cseq) = req.headers.get(names::CSEQ) {
            resp.headers.insert(names::CSEQ, cseq.to_string());
        }
        resp
    }

    /// Process one request and build the reply.
    pub(crate) fn handle_request(&mut self, req: &RtspRequest) -> RtspResponse {
        if let Some(password) = self.shared.config.password.clone() {
            let realm = self.shared.config.name.clone();
            let authorized = req
                .headers
                .get(names::AUTHORIZATION)
                .is_some_and(|a| self.auth.check(a, &realm, &password, req.method.as_str()));
            if !authorized {
                let resp = RtspResponse::new(StatusCode::UNAUTHORIZED)
                    .header(names::WWW_AUTHENTICATE, self.auth.challenge(&realm));
                return self.common_headers(resp, req);
            }
        }

        let resp = match req.method {
            Method::Options => RtspResponse::new(StatusCode::OK).header(
                "Public",
                "ANNOUNCE, SETUP, RECORD, PAUSE, FLUSH, TEARDOWN, OPTIONS, \
                 GET_PARAMETER, SET_PARAMETER",
            ),
            Method::Announce => self.handle_announce(req),
            Method::Setup => self.handle_setup(req),
            Method::Record => self.handle_record(req),
            Method::Flush => self.handle_flush(req),
            Method::SetParameter => self.handle_set_parameter(req),
            Method::GetParameter => RtspResponse::new(StatusCode::OK),
            Method::Teardown => self.handle_teardown(),
            Method::Play => {
                if let Some(stream) = &self.stream {
                    let _ = self.shared.output.play_stream(stream);
                }
                RtspResponse::new(StatusCode::OK)
            }
            Method::Pause => {
                if let Some(stream) = &self.stream {
                    let _ = self.shared.output.pause_stream(stream);
                }
                RtspResponse::new(StatusCode::OK)
            }
            Method::Describe => RtspResponse::new(StatusCode::METHOD_NOT_ALLOWED),
        };

        self.common_headers(resp, req)
    }

    fn handle_announce(&mut self, req: &RtspRequest) -> RtspResponse {
        let body = String::from_utf8_lossy(&req.body);
        let sdp = SessionDescription::parse(&body);
        let Some(media) = sdp.media_of_kind("audio") else {
            return RtspResponse::new(StatusCode::BAD_REQUEST);
        };

        let params = match StreamParams::parse(media) {
            Ok(params) => params,
            Err(e) => {
                warn!("unusable announce: {e}");
                return RtspResponse::new(StatusCode::BAD_REQUEST);
            }
        };

        self.aes = match &params.encryption {
            Some(enc) => match crypto::decrypt_aes_key(&enc.wrapped_key) {
                Ok(key) => Some((key, enc.iv)),
                Err(e) => {
                    // Without the session key the audio is undecodable
                    warn!("session key unwrap failed: {e}");
                    return RtspResponse::new(StatusCode::BAD_REQUEST);
                }
            },
            None => None,
        };

        debug!(codec = ?params.codec, peer = %self.peer, "announce accepted");
        self.params = Some(params);
        RtspResponse::new(StatusCode::OK)
    }

    fn handle_setup(&mut self, req: &RtspRequest) -> RtspResponse {
        let Some(params) = self.params.clone() else {
            return RtspResponse::new(StatusCode::BAD_REQUEST);
        };
        let transport_header = req.headers.get(names::TRANSPORT).unwrap_or("").to_string();

        self.transport = if transport_header.contains("TCP") {
            Transport::Tcp
        } else {
            Transport::Udp
        };
        self.control_port = parse_port(&transport_header, "control_port");
        self.timing_port = parse_port(&transport_header, "timing_port");

        let audio = match RaopAudioHandle::open(
            self.transport,
            &params,
            self.aes,
            self.peer.ip(),
            self.control_port,
        ) {
            Ok(audio) => Arc::new(audio),
            Err(e) => {
                warn!("audio transport setup failed: {e}");
                return RtspResponse::new(StatusCode::INTERNAL_ERROR);
            }
        };

        self.samplerate = audio.samplerate();
        let format = AudioFormat::new(audio.samplerate(), audio.channels());
        let source: SharedSource = Arc::new(Mutex::new(
            Box::new(RaopSource(Arc::clone(&audio))) as Box<dyn AudioSource>,
        ));

        let name = lock(&self.info).name.clone();
        let stream = match self
            .shared
            .output
            .add_stream(name.as_deref(), format, 0, false, source)
        {
            Ok(stream) => stream,
            Err(e) => {
                warn!("cannot attach output stream: {e}");
                return RtspResponse::new(StatusCode::INTERNAL_ERROR);
            }
        };

        let port = audio.port();
        info!(peer = %self.peer, port, codec = ?params.codec, "raop session set up");
        self.audio = Some(audio);
        self.stream = Some(stream);

        RtspResponse::new(StatusCode::OK)
            .header("Audio-Jack-Status", "connected; type=analog")
            .header(
                names::TRANSPORT,
                format!("{transport_header};server_port={port};"),
            )
            .header(names::SESSION, "1")
    }

    fn handle_record(&mut self, req: &RtspRequest) -> RtspResponse {
        let (seq, _) = req
            .headers
            .get(names::RTP_INFO)
            .map(parse_rtp_info)
            .unwrap_or((0, 0));

        if let Some(audio) = &self.audio {
            audio.flush(seq);
        }
        if let Some(stream) = &self.stream {
            let _ = self.shared.output.play_stream(stream);
        }
        RtspResponse::new(StatusCode::OK)
    }

    fn handle_flush(&mut self, req: &RtspRequest) -> RtspResponse {
        let (seq, _) = req
            .headers
            .get(names::RTP_INFO)
            .map(parse_rtp_info)
            .unwrap_or((0, 0));

        if let Some(stream) = &self.stream {
            let _ = self.shared.output.pause_stream(stream);
            let _ = self.shared.output.flush_stream(stream);
        }
        if let Some(audio) = &self.audio {
            audio.flush(seq);
        }
        lock(&self.info).played_ms = 0;
        if let Some(stream) = &self.stream {
            let _ = self.shared.output.play_stream(stream);
        }
        RtspResponse::new(StatusCode::OK)
    }

    fn handle_set_parameter(&mut self, req: &RtspRequest) -> RtspResponse {
        let content_type = req.headers.content_type().unwrap_or("").to_string();

        if content_type == "text/parameters" {
            let body = String::from_utf8_lossy(&req.body);
            for line in body.lines() {
                if let Some(v) = line.strip_prefix("volume: ") {
                    let volume = volume_from_db(v.trim().parse().unwrap_or(0.0));
                    lock(&self.info).volume = volume;
                    if let Some(stream) = &self.stream {
                        let _ = self.shared.output.set_volume_stream(stream, volume);
                    }
                } else if let Some(v) = line.strip_prefix("progress: ") {
                    self.apply_progress(v);
                }
            }
        } else if content_type == "application/x-dmap-tagged" {
            let track = dmap::parse(&req.body);
            let mut info = lock(&self.info);
            info.title = track.title;
            info.artist = track.artist;
            info.album = track.album;
            // New track: the old artwork no longer applies
            info.cover = None;
        } else if let Some(kind) = content_type.strip_prefix("image/") {
            let mut info = lock(&self.info);
            if kind == "none" || req.body.is_empty() {
                info.cover = None;
            } else {
                info.cover = Some((req.body.clone(), content_type.clone()));
            }
        }

        RtspResponse::new(StatusCode::OK)
    }

    /// `progress: <start>/<cur>/<end>` as RTP timestamps.
    fn apply_progress(&mut self, value: &str) {
        let mut parts = value.trim().split('/');
        let (Some(start), Some(cur), Some(end)) = (parts.next(), parts.next(), parts.next())
        else {
            return;
        };
        let (Ok(start), Ok(cur), Ok(end)) = (
            start.trim().parse::<u32>(),
            cur.trim().parse::<u32>(),
            end.trim().parse::<u32>(),
        ) else {
            return;
        };

        let rate = u64::from(self.samplerate.max(1));
        let mut info = lock(&self.info);
        info.duration = u64::from(end.wrapping_sub(start)) / rate;
        info.position = u64::from(cur.wrapping_sub(start)) / rate;
        if let Some(stream) = &self.stream {
            info.played_ms = self.shared.output.stream_status(stream, StreamKey::Played);
        }
    }

    fn handle_teardown(&mut self) -> RtspResponse {
        self.release_stream();
        debug!(peer = %self.peer, "session torn down");
        RtspResponse::new(StatusCode::OK)
    }

    fn release_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.shared.output.remove_stream(&stream);
        }
        self.audio = None;
    }

    /// Connection-level cleanup; also unregisters the info entry.
    pub(crate) fn close(&mut self) {
        self.release_stream();
        let id = lock(&self.info).id.clone();
        lock(&self.shared.infos).retain(|info| lock(info).id != id);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

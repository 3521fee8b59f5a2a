use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use super::{SessionDescription, StreamParams};
use crate::decoder::Codec;

const ANNOUNCE_ALAC: &str = "v=0\r\n\
o=iTunes 3413821438 0 IN IP4 192.168.1.10\r\n\
s=iTunes\r\n\
c=IN IP4 192.168.1.20\r\n\
t=0 0\r\n\
m=audio 0 RTP/AVP 96\r\n\
a=rtpmap:96 AppleLossless\r\n\
a=fmtp:96 352 0 16 40 10 14 2 255 0 0 44100\r\n";

#[test]
fn parses_session_and_media() {
    let sdp = SessionDescription::parse(ANNOUNCE_ALAC);
    assert_eq!(sdp.session_name, "iTunes");
    assert_eq!(sdp.connection.as_deref(), Some("IN IP4 192.168.1.20"));
    assert_eq!(sdp.media.len(), 1);

    let media = sdp.media_of_kind("audio").unwrap();
    assert_eq!(media.attribute("rtpmap"), Some("96 AppleLossless"));
}

#[test]
fn alac_stream_params() {
    let sdp = SessionDescription::parse(ANNOUNCE_ALAC);
    let media = sdp.media_of_kind("audio").unwrap();
    let params = StreamParams::parse(media).unwrap();
    assert_eq!(params.codec, Codec::Alac);
    assert_eq!(
        params.fmtp.as_deref(),
        Some("96 352 0 16 40 10 14 2 255 0 0 44100")
    );
    assert!(params.encryption.is_none());
}

#[test]
fn pcm_without_fmtp_falls_back_to_rtpmap() {
    let sdp = SessionDescription::parse(
        "m=audio 0 RTP/AVP 96\r\na=rtpmap:96 L16/44100/2\r\n",
    );
    let params = StreamParams::parse(sdp.media_of_kind("audio").unwrap()).unwrap();
    assert_eq!(params.codec, Codec::Pcm);
    assert_eq!(params.fmtp.as_deref(), Some("96 L16/44100/2"));
}

#[test]
fn aac_codec_detected() {
    let sdp = SessionDescription::parse(
        "m=audio 0 RTP/AVP 96\r\na=rtpmap:96 mpeg4-generic/44100/2\r\n",
    );
    let params = StreamParams::parse(sdp.media_of_kind("audio").unwrap()).unwrap();
    assert_eq!(params.codec, Codec::Aac);
}

#[test]
fn unknown_codec_rejected() {
    let sdp = SessionDescription::parse("m=audio 0 RTP/AVP 96\r\na=rtpmap:96 opus/48000\r\n");
    assert!(StreamParams::parse(sdp.media_of_kind("audio").unwrap()).is_err());
}

#[test]
fn encryption_attributes_decode() {
    let iv = [0x10u8; 16];
    let key = vec![0xAB; 256];
    let body = format!(
        "m=audio 0 RTP/AVP 96\r\n\
         a=rtpmap:96 AppleLossless\r\n\
         a=rsaaeskey:{}\r\n\
         a=aesiv:{}\r\n",
        STANDARD.encode(&key),
        // Unpadded, as real clients send it
        STANDARD.encode(iv).trim_end_matches('='),
    );
    let sdp = SessionDescription::parse(&body);
    let params = StreamParams::parse(sdp.media_of_kind("audio").unwrap()).unwrap();
    let enc = params.encryption.unwrap();
    assert_eq!(enc.wrapped_key, key);
    assert_eq!(enc.iv, iv);
}

#[test]
fn bad_iv_length_rejected() {
    let body = format!(
        "m=audio 0 RTP/AVP 96\r\n\
         a=rtpmap:96 AppleLossless\r\n\
         a=rsaaeskey:{}\r\n\
         a=aesiv:{}\r\n",
        STANDARD.encode([1u8; 256]),
        STANDARD.encode([1u8; 8]),
    );
    let sdp = SessionDescription::parse(&body);
    assert!(StreamParams::parse(sdp.media_of_kind("audio").unwrap()).is_err());
}

#[test]
fn arbitrary_bytes_do_not_panic() {
    let junk = String::from_utf8_lossy(&[0x01, 0xFF, b'\n', b'a', b'=', 0xF0]).into_owned();
    let _ = SessionDescription::parse(&junk);
    let _ = SessionDescription::parse("");
    let _ = SessionDescription::parse("m=\r\na=\r\nz\r\n=\r\n");
}

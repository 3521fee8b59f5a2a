use std::io::Write as _;

use super::{FrameHeader, Mp3Demuxer};
use crate::demux::Demuxer as _;
use crate::stream::Stream;

/// MPEG-1 layer III, 128 kbit/s, 44.1 kHz, stereo: 417-byte frames.
const FRAME_HEADER: [u8; 4] = [0xFF, 0xFB, 0x90, 0x00];
const FRAME_LEN: usize = 417;

fn frame(fill: u8) -> Vec<u8> {
    let mut f = vec![fill; FRAME_LEN];
    f[..4].copy_from_slice(&FRAME_HEADER);
    f
}

fn open_fixture(data: &[u8]) -> (Mp3Demuxer, u32, u8, tempfile::NamedTempFile) {
    let mut file = tempfile::Builder::new().suffix(".mp3").tempfile().unwrap();
    file.write_all(data).unwrap();
    file.flush().unwrap();
    let stream = Stream::open(file.path().to_str().unwrap(), 0).unwrap();
    let (demux, samplerate, channels) = Mp3Demuxer::open(stream).unwrap();
    (demux, samplerate, channels, file)
}

#[test]
fn header_parse_rejects_invalid() {
    assert!(FrameHeader::parse(&[0xFF, 0xFB]).is_none());
    assert!(FrameHeader::parse(&[0x00, 0x00, 0x00, 0x00]).is_none());
    // Reserved version
    assert!(FrameHeader::parse(&[0xFF, 0xEB, 0x90, 0x00]).is_none());
    // Bad bitrate index
    assert!(FrameHeader::parse(&[0xFF, 0xFB, 0xF0, 0x00]).is_none());
}

#[test]
fn header_parse_mpeg1_layer3() {
    let h = FrameHeader::parse(&FRAME_HEADER).unwrap();
    assert_eq!(h.samplerate, 44100);
    assert_eq!(h.bitrate, 128);
    assert_eq!(h.samples, 1152);
    assert_eq!(h.length, FRAME_LEN);
    assert_eq!(h.channels(), 2);
}

#[test]
fn sync_after_leading_noise() {
    // 20 junk bytes, then two clean frames
    let mut data = vec![0x55u8; 20];
    data.extend_from_slice(&frame(0));
    data.extend_from_slice(&frame(0));

    let (demux, samplerate, channels, _file) = open_fixture(&data);
    assert_eq!(samplerate, 44100);
    assert_eq!(channels, 2);
    assert_eq!(demux.offset, 20);
}

#[test]
fn id3_tag_is_skipped() {
    // 90-byte ID3v2 body (100 with header), then two frames
    let mut data = vec![0u8; 100];
    data[0..3].copy_from_slice(b"ID3");
    data[9] = 90;
    data.extend_from_slice(&frame(0));
    data.extend_from_slice(&frame(0));

    let (demux, _, _, _file) = open_fixture(&data);
    assert_eq!(demux.offset, 100);
}

fn xing_frame(frames: u32, bytes: u32) -> Vec<u8> {
    let mut f = frame(0);
    // Xing header at offset 36 for MPEG-1 stereo
    f[36..40].copy_from_slice(b"Xing");
    f[40..44].copy_from_slice(&0x0007u32.to_be_bytes());
    f[44..48].copy_from_slice(&frames.to_be_bytes());
    f[48..52].copy_from_slice(&bytes.to_be_bytes());
    for i in 0..100 {
        f[52 + i] = u8::try_from(i * 256 / 100).unwrap();
    }
    f
}

#[test]
fn xing_header_sets_duration_and_skips_index_frame() {
    let mut data = Vec::new();
    let nb_frames = 100u32;
    let nb_bytes = nb_frames * FRAME_LEN as u32;
    data.extend_from_slice(&xing_frame(nb_frames, nb_bytes));
    for _ in 0..4 {
        data.extend_from_slice(&frame(1));
    }

    let (demux, _, _, _file) = open_fixture(&data);
    // 100 frames * 1152 samples / 44100 Hz = 2 s (integer)
    assert_eq!(demux.meta().length, 2);
    // The Xing frame itself carries no audio
    assert_eq!(demux.offset, FRAME_LEN as u64);
}

#[test]
fn set_pos_uses_xing_toc() {
    let nb_frames = 100u32;
    let nb_bytes = nb_frames * FRAME_LEN as u32;
    let mut data = Vec::new();
    data.extend_from_slice(&xing_frame(nb_frames, nb_bytes));
    for _ in 0..100 {
        data.extend_from_slice(&frame(1));
    }

    let (mut demux, _, _, _file) = open_fixture(&data);
    let got = demux.set_pos(1).unwrap();
    assert_eq!(got, 1);

    // p = 50%, toc[50] = 128 -> middle of the audio data
    let expected = u64::from(nb_bytes) * 128 / 256 + FRAME_LEN as u64;
    assert_eq!(demux.stream.pos(), expected);
}

#[test]
fn set_pos_without_index_estimates_from_bitrate() {
    let mut data = Vec::new();
    for _ in 0..100 {
        data.extend_from_slice(&frame(1));
    }

    let (mut demux, _, _, _file) = open_fixture(&data);
    let duration = demux.meta().length;
    assert_eq!(duration, (100 * FRAME_LEN as u64) / (128 * 125));

    demux.set_pos(duration / 2).unwrap();
    let expected = 100 * FRAME_LEN as u64 * (duration / 2) / duration;
    assert_eq!(demux.stream.pos(), expected);
}

#[test]
fn set_pos_past_end_fails() {
    let mut data = Vec::new();
    for _ in 0..100 {
        data.extend_from_slice(&frame(1));
    }
    let (mut demux, _, _, _file) = open_fixture(&data);
    assert!(demux.set_pos(10_000).is_err());
}

#[test]
fn next_frame_tops_up_window() {
    let mut data = Vec::new();
    for _ in 0..3 {
        data.extend_from_slice(&frame(2));
    }
    let (mut demux, _, _, _file) = open_fixture(&data);

    let len = demux.next_frame().unwrap().unwrap();
    assert!(len > 0);
    assert_eq!(&demux.frame()[..4], &FRAME_HEADER);

    // Consume one frame and confirm the window re-aligns on the next
    demux.set_used(FRAME_LEN);
    let len = demux.next_frame().unwrap().unwrap();
    assert!(len > 0);
    assert_eq!(&demux.frame()[..4], &FRAME_HEADER);
}

#[test]
fn no_sync_in_noise_fails_open() {
    let mut file = tempfile::Builder::new().suffix(".mp3").tempfile().unwrap();
    file.write_all(&[0x11u8; 4096]).unwrap();
    file.flush().unwrap();
    let stream = Stream::open(file.path().to_str().unwrap(), 0).unwrap();
    assert!(Mp3Demuxer::open(stream).is_err());
}

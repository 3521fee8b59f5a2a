use std::io::Write as _;

use super::Mp4Demuxer;
use crate::decoder::Codec;
use crate::demux::Demuxer as _;
use crate::stream::Stream;

fn atom(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&u32::try_from(8 + payload.len()).unwrap().to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    out
}

fn full_atom(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut payload = vec![0u8; 4];
    payload.extend_from_slice(body);
    atom(kind, &payload)
}

fn esds_atom() -> Vec<u8> {
    let mut body = Vec::new();
    // ES descriptor
    body.push(0x03);
    body.push(25); // length
    body.extend_from_slice(&[0, 0, 0]); // ES_ID + flags
    // DecoderConfig descriptor
    body.push(0x04);
    body.push(17);
    body.push(0x40); // AAC object
    body.extend_from_slice(&[0x15, 0, 0, 0]); // stream type + buffer size
    body.extend_from_slice(&256_000u32.to_be_bytes()); // max bitrate
    body.extend_from_slice(&128_000u32.to_be_bytes()); // avg bitrate
    // DecoderSpecificInfo: AAC-LC 44.1 kHz stereo
    body.push(0x05);
    body.push(2);
    body.extend_from_slice(&[0x12, 0x10]);
    full_atom(b"esds", &body)
}

fn mp4a_atom() -> Vec<u8> {
    let mut body = vec![0u8; 16]; // reserved + data ref + reserved
    body.extend_from_slice(&2u16.to_be_bytes()); // channels
    body.extend_from_slice(&16u16.to_be_bytes()); // sample size
    body.extend_from_slice(&[0u8; 4]); // predefined + reserved
    body.extend_from_slice(&44100u16.to_be_bytes()); // 16.16 rate, int part
    body.extend_from_slice(&0u16.to_be_bytes());
    body.extend_from_slice(&esds_atom());
    atom(b"mp4a", &body)
}

fn table_atom(kind: &[u8; 4], entries: &[u32]) -> Vec<u8> {
    let mut body = Vec::new();
    for e in entries {
        body.extend_from_slice(&e.to_be_bytes());
    }
    full_atom(kind, &body)
}

/// 8 samples of 1024 ticks, sizes 5..=12, 4 samples per chunk, 2 chunks.
fn sample_sizes() -> Vec<u32> {
    (5..=12).collect()
}

pub(crate) fn build_m4a(time_scale: u32, title: Option<&str>) -> Vec<u8> {
    let sizes = sample_sizes();

    let mdhd = {
        let mut body = vec![0u8; 8]; // creation + modification
        body.extend_from_slice(&time_scale.to_be_bytes());
        body.extend_from_slice(&(8 * 1024u32).to_be_bytes()); // duration
        body.extend_from_slice(&[0u8; 4]); // language + quality
        full_atom(b"mdhd", &body)
    };

    let stsd = {
        let mut body = Vec::new();
        body.extend_from_slice(&1u32.to_be_bytes()); // entry count
        body.extend_from_slice(&mp4a_atom());
        full_atom(b"stsd", &body)
    };

    let stts = {
        let mut entries = vec![1u32]; // entry count
        entries.push(8); // sample count
        entries.push(1024); // delta
        table_atom(b"stts", &entries)
    };

    let stsc = {
        let entries = vec![1u32, 1, 4, 1]; // count, first_chunk, spc, desc
        table_atom(b"stsc", &entries)
    };

    let stsz = {
        let mut entries = vec![0u32, 8]; // fixed size 0, count
        entries.extend_from_slice(&sizes);
        table_atom(b"stsz", &entries)
    };

    // Chunk offsets are patched once the header size is known
    let stco_placeholder = table_atom(b"stco", &[2, 0, 0]);

    let stbl: Vec<u8> = [stsd, stts, stsc, stsz, stco_placeholder].concat();
    let stbl = atom(b"stbl", &stbl);
    let minf = atom(b"minf", &stbl);
    let mdia = atom(b"mdia", &[mdhd, minf].concat());
    let trak = atom(b"trak", &mdia);

    let udta = title.map(|t| {
        let mut data_body = vec![0u8; 4]; // type (1 = UTF-8 would be 1; 0 ok)
        data_body.extend_from_slice(t.as_bytes());
        let data = full_atom(b"data", &data_body);
        let nam = atom(&[0xA9, b'n', b'a', b'm'], &data);
        let ilst = atom(b"ilst", &nam);
        let meta = full_atom(b"meta", &ilst);
        atom(b"udta", &meta)
    });

    let mut moov_body = trak;
    if let Some(udta) = udta {
        moov_body.extend_from_slice(&udta);
    }
    let moov = atom(b"moov", &moov_body);

    let ftyp = atom(b"ftyp", b"M4A \x00\x00\x00\x00isomiso2");

    // mdat payload: 8 samples, each filled with its index
    let mut mdat_payload = Vec::new();
    for (i, &s) in sizes.iter().enumerate() {
        mdat_payload.extend(std::iter::repeat_n(u8::try_from(i).unwrap(), s as usize));
    }
    let mdat = atom(b"mdat", &mdat_payload);

    let mut file = [ftyp, moov, mdat].concat();

    // Patch the stco entries with the real chunk offsets
    let mdat_payload_pos = u32::try_from(file.len() - mdat_payload.len()).unwrap();
    let chunk0 = mdat_payload_pos;
    let chunk1 = mdat_payload_pos + sizes[..4].iter().sum::<u32>();
    let stco_pos = file
        .windows(4)
        .position(|w| w == b"stco")
        .expect("stco present")
        - 4;
    file[stco_pos + 16..stco_pos + 20].copy_from_slice(&chunk0.to_be_bytes());
    file[stco_pos + 20..stco_pos + 24].copy_from_slice(&chunk1.to_be_bytes());

    file
}

fn open_fixture(data: &[u8]) -> (Mp4Demuxer, u32, u8, tempfile::NamedTempFile) {
    let mut file = tempfile::Builder::new().suffix(".m4a").tempfile().unwrap();
    file.write_all(data).unwrap();
    file.flush().unwrap();
    let stream = Stream::open(file.path().to_str().unwrap(), 0).unwrap();
    let (demux, samplerate, channels) = Mp4Demuxer::open(stream).unwrap();
    (demux, samplerate, channels, file)
}

#[test]
fn open_reads_track_parameters() {
    let data = build_m4a(44100, None);
    let (demux, samplerate, channels, _f) = open_fixture(&data);
    assert_eq!(samplerate, 44100);
    assert_eq!(channels, 2);
    assert_eq!(demux.num_samples, 8);
    assert_eq!(demux.chunk_offsets.len(), 2);
    assert_eq!(demux.meta().bitrate, 128);

    let cfg = demux.dec_config();
    assert_eq!(cfg.codec, Codec::Aac);
    assert_eq!(cfg.config.as_deref(), Some(&[0x12u8, 0x10][..]));
}

#[test]
fn title_tag_is_extracted() {
    let data = build_m4a(44100, Some("Test Track"));
    let (demux, _, _, _f) = open_fixture(&data);
    assert_eq!(demux.meta().title.as_deref(), Some("Test Track"));
}

#[test]
fn next_frame_walks_all_samples() {
    let data = build_m4a(44100, None);
    let (mut demux, _, _, _f) = open_fixture(&data);
    let sizes = sample_sizes();

    for (i, &s) in sizes.iter().enumerate() {
        let len = demux.next_frame().unwrap().expect("frame available");
        assert_eq!(len, s as usize, "sample {i} size");
        let expect = u8::try_from(i).unwrap();
        assert!(
            demux.frame().iter().all(|&b| b == expect),
            "sample {i} content"
        );
        demux.set_used(len);
    }
    assert!(demux.next_frame().unwrap().is_none());
}

#[test]
fn set_pos_lands_on_containing_sample() {
    // time_scale 1024 makes one sample per second
    let data = build_m4a(1024, None);
    let (mut demux, _, _, _f) = open_fixture(&data);

    let got = demux.set_pos(5).unwrap();
    assert_eq!(got, 5);
    assert_eq!(demux.cur_sample, 5);
    assert_eq!(demux.cur_chunk, 1);
    assert_eq!(demux.cur_chunk_sample, 1);

    // Next frame is sample 5 (filled with 5s, 10 bytes)
    let len = demux.next_frame().unwrap().unwrap();
    assert_eq!(len, 10);
    assert!(demux.frame().iter().all(|&b| b == 5));
}

#[test]
fn set_pos_past_end_fails() {
    let data = build_m4a(1024, None);
    let (mut demux, _, _, _f) = open_fixture(&data);
    assert!(demux.set_pos(100).is_err());
}

#[test]
fn garbage_is_rejected() {
    let mut file = tempfile::Builder::new().suffix(".m4a").tempfile().unwrap();
    file.write_all(&[0xAB; 512]).unwrap();
    file.flush().unwrap();
    let stream = Stream::open(file.path().to_str().unwrap(), 0).unwrap();
    assert!(Mp4Demuxer::open(stream).is_err());
}

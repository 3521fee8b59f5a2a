use std::io::Write as _;

use super::{Stream, StreamError, Whence};

fn temp_file(content: &[u8], suffix: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    f.write_all(content).unwrap();
    f.flush().unwrap();
    f
}

#[test]
fn open_reports_size_and_seekable() {
    let f = temp_file(&[0u8; 1000], ".bin");
    let s = Stream::open(f.path().to_str().unwrap(), 0).unwrap();
    assert_eq!(s.size(), 1000);
    assert!(s.is_seekable());
    assert_eq!(s.pos(), 0);
}

#[test]
fn content_type_from_extension() {
    let f = temp_file(b"xx", ".mp3");
    let s = Stream::open(f.path().to_str().unwrap(), 0).unwrap();
    assert_eq!(s.content_type(), Some("audio/mpeg"));

    let f = temp_file(b"xx", ".m4a");
    let s = Stream::open(f.path().to_str().unwrap(), 0).unwrap();
    assert_eq!(s.content_type(), Some("audio/mp4"));
}

#[test]
fn missing_file_fails_open() {
    assert!(matches!(
        Stream::open("/nonexistent/nope.mp3", 0),
        Err(StreamError::Open(_))
    ));
}

#[test]
fn read_fills_and_replaces_buffer() {
    let data: Vec<u8> = (0..=255).collect();
    let f = temp_file(&data, ".bin");
    let mut s = Stream::open(f.path().to_str().unwrap(), 64).unwrap();

    assert_eq!(s.read(10, None).unwrap(), 10);
    assert_eq!(s.buffer(), &data[0..10]);
    assert_eq!(s.pos(), 0);

    // A second read discards the previous window and advances pos
    assert_eq!(s.read(10, None).unwrap(), 10);
    assert_eq!(s.buffer(), &data[10..20]);
    assert_eq!(s.pos(), 10);
}

#[test]
fn complete_appends_without_discarding() {
    let data: Vec<u8> = (0..=255).collect();
    let f = temp_file(&data, ".bin");
    let mut s = Stream::open(f.path().to_str().unwrap(), 64).unwrap();

    s.read(4, None).unwrap();
    assert_eq!(s.complete(4, None).unwrap(), 8);
    assert_eq!(s.buffer(), &data[0..8]);
    assert_eq!(s.pos(), 0);
}

#[test]
fn seek_within_buffer_shifts() {
    let data: Vec<u8> = (0..=255).collect();
    let f = temp_file(&data, ".bin");
    let mut s = Stream::open(f.path().to_str().unwrap(), 64).unwrap();

    s.read(16, None).unwrap();
    s.seek(4, Whence::Current).unwrap();
    assert_eq!(s.pos(), 4);
    assert_eq!(s.buffer(), &data[4..16]);
}

#[test]
fn seek_forward_past_buffer_uses_descriptor() {
    let data: Vec<u8> = (0..=255).cycle().take(4096).collect();
    let f = temp_file(&data, ".bin");
    let mut s = Stream::open(f.path().to_str().unwrap(), 64).unwrap();

    s.seek(1000, Whence::Set).unwrap();
    assert_eq!(s.pos(), 1000);
    s.read(8, None).unwrap();
    assert_eq!(s.buffer(), &data[1000..1008]);
}

#[test]
fn seek_backward_on_file_works() {
    let data: Vec<u8> = (0..=255).cycle().take(512).collect();
    let f = temp_file(&data, ".bin");
    let mut s = Stream::open(f.path().to_str().unwrap(), 64).unwrap();

    s.seek(256, Whence::Set).unwrap();
    s.read(8, None).unwrap();
    s.seek(0, Whence::Set).unwrap();
    s.read(8, None).unwrap();
    assert_eq!(s.buffer(), &data[0..8]);
}

#[test]
fn eof_reads_return_zero() {
    let f = temp_file(&[1, 2, 3], ".bin");
    let mut s = Stream::open(f.path().to_str().unwrap(), 16).unwrap();
    assert_eq!(s.read(0, None).unwrap(), 3);
    assert_eq!(s.read(0, None).unwrap(), 0);
}
